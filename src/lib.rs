pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::config::AppConfig;
use crate::http::Templates;
use crate::infra::{cache::RedisCache, db::Db, storage::MediaStorage};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub media: MediaStorage,
    pub templates: Templates,
    pub admin_token: Option<String>,
    pub session_key: [u8; 32],
    pub session_ttl_hours: u64,
    pub secure_cookies: bool,
    pub per_page: i64,
    pub index_cache_ttl_seconds: u64,
    pub upload_max_bytes: usize,
}

impl AppState {
    /// Connects to Postgres and Redis and prepares the media root.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let db = Db::connect(config).await?;
        let cache = RedisCache::connect(&config.redis_url).await?;
        let media = MediaStorage::new(config).await?;
        let templates = Templates::load()?;

        Ok(Self {
            db,
            cache,
            media,
            templates,
            admin_token: config.admin_token.clone(),
            session_key: config.session_key,
            session_ttl_hours: config.session_ttl_hours,
            secure_cookies: config.secure_cookies,
            per_page: config.per_page_count,
            index_cache_ttl_seconds: config.index_cache_ttl_seconds,
            upload_max_bytes: config.upload_max_bytes,
        })
    }
}
