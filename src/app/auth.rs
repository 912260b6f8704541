use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use sqlx::Row;
use time::{Duration, OffsetDateTime};

use crate::domain::user::User;
use crate::infra::db::Db;

const TOKEN_ISSUER: &str = "yatube";
const TOKEN_TYPE: &str = "session";

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct AuthService {
    db: Db,
    session_key: [u8; 32],
    session_ttl_hours: u64,
}

impl AuthService {
    pub fn new(db: Db, session_key: [u8; 32], session_ttl_hours: u64) -> Self {
        Self {
            db,
            session_key,
            session_ttl_hours,
        }
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<User> {
        let password_hash = hash_password(password)?;
        let row = sqlx::query(
            "INSERT INTO users (username, password_hash) \
             VALUES ($1, $2) \
             RETURNING id, username, created_at",
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(self.db.pool())
        .await?;

        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            created_at: row.get("created_at"),
        })
    }

    /// Returns `None` for an unknown user or a wrong password.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<SessionToken>> {
        let row = sqlx::query("SELECT id, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let user_id: i64 = row.get("id");
        let password_hash: String = row.get("password_hash");
        if password_hash.is_empty() {
            return Ok(None);
        }

        if !verify_password(password, &password_hash)? {
            return Ok(None);
        }

        Ok(Some(self.issue_session(user_id)?))
    }

    pub fn issue_session(&self, user_id: i64) -> Result<SessionToken> {
        encode_session(&self.session_key, user_id, self.session_ttl_hours)
    }

    pub fn authenticate(&self, token: &str) -> Result<Option<AuthSession>> {
        decode_session(&self.session_key, token)
    }

    pub async fn get_current_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            created_at: row.get("created_at"),
        }))
    }
}

fn encode_session(key_bytes: &[u8; 32], user_id: i64, ttl_hours: u64) -> Result<SessionToken> {
    let duration = std::time::Duration::from_secs(ttl_hours * 60 * 60);
    let mut claims = Claims::new_expires_in(&duration)?;
    claims.issuer(TOKEN_ISSUER)?;
    claims.audience(TOKEN_ISSUER)?;
    claims.subject(&user_id.to_string())?;
    claims.add_additional("typ", TOKEN_TYPE)?;

    let key = SymmetricKey::<V4>::from(key_bytes)?;
    let token = local::encrypt(&key, &claims, None, None)?;
    let expires_at = OffsetDateTime::now_utc() + Duration::hours(ttl_hours as i64);

    Ok(SessionToken { token, expires_at })
}

/// Undecryptable, expired or foreign tokens yield `Ok(None)`.
fn decode_session(key_bytes: &[u8; 32], token: &str) -> Result<Option<AuthSession>> {
    let key = SymmetricKey::<V4>::from(key_bytes)?;
    let mut rules = ClaimsValidationRules::new();
    rules.validate_issuer_with(TOKEN_ISSUER);
    rules.validate_audience_with(TOKEN_ISSUER);

    let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
        Ok(token) => token,
        Err(_) => return Ok(None),
    };
    let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
        Ok(token) => token,
        Err(_) => return Ok(None),
    };
    let claims = match trusted.payload_claims() {
        Some(claims) => claims,
        None => return Ok(None),
    };

    if !has_token_type(claims, TOKEN_TYPE) {
        return Ok(None);
    }
    let user_id = claim_i64(claims, "sub")?;
    Ok(Some(AuthSession { user_id }))
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn claim_i64(claims: &Claims, name: &str) -> Result<i64> {
    let value = claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))?;
    Ok(value.parse()?)
}

fn has_token_type(claims: &Claims, expected: &str) -> bool {
    claims
        .get_claim("typ")
        .and_then(|value| value.as_str())
        .map(|value| value == expected)
        .unwrap_or(false)
}
