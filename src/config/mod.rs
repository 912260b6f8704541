use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub session_key: [u8; 32],
    pub session_ttl_hours: u64,
    pub secure_cookies: bool,
    pub admin_token: Option<String>,
    pub media_root: String,
    pub upload_max_bytes: usize,
    pub per_page_count: i64,
    pub index_cache_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let per_page_count = check_per_page(env_or_parse("PER_PAGE_COUNT", "10")?)?;

        Ok(Self {
            http_addr,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            session_key: env_key_32("SESSION_KEY")?,
            session_ttl_hours: env_or_parse("SESSION_TTL_HOURS", "336")?,
            secure_cookies: env_or_parse("SECURE_COOKIES", "false")?,
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            media_root: env_or("MEDIA_ROOT", "./media"),
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "10485760")?,
            per_page_count,
            index_cache_ttl_seconds: env_or_parse("INDEX_CACHE_TTL_SECONDS", "20")?,
        })
    }
}

const MAX_PER_PAGE: i64 = 1000;

fn check_per_page(per_page: i64) -> Result<i64> {
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
        return Err(anyhow!(
            "invalid PER_PAGE_COUNT: must be between 1 and {}",
            MAX_PER_PAGE
        ));
    }
    Ok(per_page)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    parse_value(key, &value)
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    decode_key_32(key, &value)
}

fn decode_key_32(key: &str, value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_32_byte_key() {
        // "0123456789abcdef0123456789abcdef"
        let key = decode_key_32("SESSION_KEY", "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=").unwrap();
        assert_eq!(&key[..4], b"0123");
    }

    #[test]
    fn rejects_short_key() {
        let err = decode_key_32("SESSION_KEY", "c2hvcnQ=").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn rejects_unparseable_number() {
        let err = parse_value::<u64>("INDEX_CACHE_TTL_SECONDS", "soon").unwrap_err();
        assert!(err.to_string().starts_with("invalid INDEX_CACHE_TTL_SECONDS"));
    }

    #[test]
    fn page_size_must_be_in_range() {
        assert_eq!(check_per_page(10).unwrap(), 10);
        assert_eq!(check_per_page(MAX_PER_PAGE).unwrap(), MAX_PER_PAGE);
        assert!(check_per_page(0).is_err());
        assert!(check_per_page(MAX_PER_PAGE + 1).is_err());
        assert!(check_per_page(i64::MAX).is_err());
    }

    #[test]
    fn parses_bool_flag() {
        assert!(parse_value::<bool>("SECURE_COOKIES", "true").unwrap());
        assert!(!parse_value::<bool>("SECURE_COOKIES", "false").unwrap());
    }
}
