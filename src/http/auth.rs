use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use cookie::time::Duration;
use cookie::{Cookie, SameSite};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::app::auth::{AuthService, SessionToken};
use crate::http::AppError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

/// The logged-in user. Rejects anonymous requests with a redirect to the
/// login page; take `Option<AuthUser>` for views open to everyone.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AdminToken;

const ADMIN_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-admin-token");

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let token = session_token(&parts.headers).ok_or_else(|| AppError::login_required(&next))?;

        let service = AuthService::new(
            state.db.clone(),
            state.session_key,
            state.session_ttl_hours,
        );
        let session = service.authenticate(&token).map_err(|err| {
            tracing::error!(error = ?err, "failed to authenticate");
            AppError::internal("failed to authenticate")
        })?;
        let session = session.ok_or_else(|| AppError::login_required(&next))?;

        let user = service
            .get_current_user(session.user_id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, user_id = session.user_id, "failed to load session user");
                AppError::internal("failed to authenticate")
            })?
            .ok_or_else(|| AppError::login_required(&next))?;

        Ok(AuthUser {
            user_id: user.id,
            username: user.username,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_token
            .as_ref()
            .ok_or_else(|| AppError::forbidden("admin token not configured"))?;

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::forbidden("missing admin token"))?;

        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::forbidden("invalid admin token"));
        }

        Ok(AdminToken)
    }
}

/// Session cookie first, then `Authorization: Bearer`.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

pub fn session_cookie(session: &SessionToken, ttl_hours: u64, secure: bool) -> Option<HeaderValue> {
    let cookie = Cookie::build((SESSION_COOKIE, session.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::hours(ttl_hours as i64))
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

pub fn removal_cookie() -> Option<HeaderValue> {
    let mut cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    cookie.make_removal();
    HeaderValue::from_str(&cookie.to_string()).ok()
}
