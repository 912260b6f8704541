use anyhow::Result;
use sqlx::Row;

use crate::domain::comment::Comment;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct CommentService {
    db: Db,
}

fn comment_from_row(row: &sqlx::postgres::PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        text: row.get("text"),
        created: row.get("created"),
    }
}

impl CommentService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn add_comment(&self, post_id: i64, author_id: i64, text: &str) -> Result<Comment> {
        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO comments (post_id, author_id, text) \
                VALUES ($1, $2, $3) \
                RETURNING id, post_id, author_id, text, created \
             ) \
             SELECT c.*, u.username AS author_username \
             FROM inserted c \
             JOIN users u ON u.id = c.author_id",
        )
        .bind(post_id)
        .bind(author_id)
        .bind(text)
        .fetch_one(self.db.pool())
        .await?;

        Ok(comment_from_row(&row))
    }

    /// Oldest first, the order a conversation is read in.
    pub async fn list_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT c.id, c.post_id, c.author_id, u.username AS author_username, c.text, c.created \
             FROM comments c \
             JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = $1 \
             ORDER BY c.created, c.id",
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(comment_from_row).collect())
    }
}
