use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Profile header data: the author plus the counters shown next to the feed.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub posts_count: i64,
    pub followers_count: i64,
    pub following_count: i64,
}

impl Profile {
    pub fn from_user(user: User, posts_count: i64, followers_count: i64, following_count: i64) -> Self {
        Self {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
            posts_count,
            followers_count,
            following_count,
        }
    }
}
