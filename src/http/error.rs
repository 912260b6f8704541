use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Handler error. Redirects are errors too: a login-required view answers
/// anonymous requests with a redirect to the login page.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    location: Option<String>,
}

/// Marker left on responses built from an `AppError`, so the error-page
/// middleware only replaces bodies this crate produced.
#[derive(Debug, Clone)]
pub struct ErrorPage {
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, message)
    }

    /// `next` is the path (and query) to come back to after logging in.
    pub fn login_required(next: &str) -> Self {
        let next: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
        Self {
            status: StatusCode::FOUND,
            message: "login required".to_string(),
            location: Some(format!("/auth/login/?next={}", next)),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            location: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(location) = self.location {
            return (self.status, [(header::LOCATION, location)]).into_response();
        }

        let marker = ErrorPage {
            message: self.message.clone(),
        };
        let mut response = (self.status, self.message).into_response();
        response.extensions_mut().insert(marker);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_required_encodes_next() {
        let err = AppError::login_required("/new/?page=2");
        assert_eq!(err.status(), StatusCode::FOUND);
        assert_eq!(err.location(), Some("/auth/login/?next=%2Fnew%2F%3Fpage%3D2"));
    }

    #[test]
    fn error_response_carries_marker() {
        let response = AppError::not_found("post not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let marker = response.extensions().get::<ErrorPage>().unwrap();
        assert_eq!(marker.message, "post not found");
    }

    #[test]
    fn redirect_response_has_location_header() {
        let response = AppError::login_required("/follow/").into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/auth/login/?next=%2Ffollow%2F"
        );
        assert!(response.extensions().get::<ErrorPage>().is_none());
    }
}
