use anyhow::Result;
use sqlx::Row;

use crate::domain::group::Group;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct GroupService {
    db: Db,
}

fn group_from_row(row: &sqlx::postgres::PgRow) -> Group {
    Group {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        description: row.get("description"),
    }
}

impl GroupService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_group(&self, title: &str, slug: &str, description: &str) -> Result<Group> {
        let row = sqlx::query(
            "INSERT INTO groups (title, slug, description) VALUES ($1, $2, $3) \
             RETURNING id, title, slug, description",
        )
        .bind(title)
        .bind(slug)
        .bind(description)
        .fetch_one(self.db.pool())
        .await?;

        Ok(group_from_row(&row))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, title, slug, description FROM groups WHERE slug = $1")
            .bind(slug)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(group_from_row))
    }

    pub async fn get_group(&self, group_id: i64) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, title, slug, description FROM groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(group_from_row))
    }

    /// Choices for the post form's group select.
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query("SELECT id, title, slug, description FROM groups ORDER BY title, id")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(group_from_row).collect())
    }
}
