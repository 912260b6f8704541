use anyhow::Result;
use sqlx::Row;

use crate::domain::user::{Profile, User};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;

        let user = row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            created_at: row.get("created_at"),
        });

        Ok(user)
    }

    /// The author with post and follow counters, in one round trip.
    pub async fn get_profile(&self, username: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.created_at, \
                    (SELECT COUNT(*) FROM posts p WHERE p.author_id = u.id) AS posts_count, \
                    (SELECT COUNT(*) FROM follows f WHERE f.author_id = u.id) AS followers_count, \
                    (SELECT COUNT(*) FROM follows f WHERE f.user_id = u.id) AS following_count \
             FROM users u WHERE u.username = $1",
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        let profile = row.map(|row| {
            let user = User {
                id: row.get("id"),
                username: row.get("username"),
                created_at: row.get("created_at"),
            };
            Profile::from_user(
                user,
                row.get("posts_count"),
                row.get("followers_count"),
                row.get("following_count"),
            )
        });

        Ok(profile)
    }
}
