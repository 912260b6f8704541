use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Directed edge: `user_id` follows `author_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub user_id: i64,
    pub author_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
