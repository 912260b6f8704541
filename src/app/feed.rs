use anyhow::Result;
use redis::AsyncCommands;
use tracing::warn;

use crate::infra::cache::RedisCache;

const PAGE_CACHE_PREFIX: &str = "page:";

/// Rendered index feed pages, kept for a short fixed interval.
///
/// Entries are keyed by the resolved page number only, so the raw query
/// string and the viewer never split the cache. New posts show up once the
/// entry expires or the cache is cleared. Redis trouble is logged and
/// treated as a miss.
#[derive(Clone)]
pub struct FeedCache {
    cache: RedisCache,
    ttl_seconds: u64,
}

impl FeedCache {
    pub fn new(cache: RedisCache, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub fn index_key(page_number: i64) -> String {
        format!("{}index:{}", PAGE_CACHE_PREFIX, page_number)
    }

    pub async fn get_index(&self, page_number: i64) -> Option<String> {
        let key = Self::index_key(page_number);
        let mut conn = match self.cache.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = ?err, "page cache unavailable");
                return None;
            }
        };
        match conn.get::<_, Option<String>>(&key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = ?err, key = %key, "failed to read page cache");
                None
            }
        }
    }

    pub async fn put_index(&self, page_number: i64, html: &str) {
        if self.ttl_seconds == 0 {
            return;
        }
        let key = Self::index_key(page_number);
        match self.cache.connection().await {
            Ok(mut conn) => {
                if let Err(err) = conn.set_ex::<_, _, ()>(&key, html, self.ttl_seconds).await {
                    warn!(error = ?err, key = %key, "failed to write page cache");
                }
            }
            Err(err) => warn!(error = ?err, "page cache unavailable"),
        }
    }

    /// Drops every cached page.
    pub async fn clear(&self) -> Result<usize> {
        self.cache.delete_prefix(PAGE_CACHE_PREFIX).await
    }
}
