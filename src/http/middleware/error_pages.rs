use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use tera::Context;

use crate::http::error::ErrorPage;
use crate::AppState;

/// Replaces the plain-text body of 404 and 500 errors raised by handlers
/// (and by the router fallback) with the HTML error pages.
pub async fn render_error_pages(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.extensions().get::<ErrorPage>().is_none() {
        return response;
    }

    let status = response.status();
    let template = match status {
        StatusCode::NOT_FOUND => "misc/404.html",
        StatusCode::INTERNAL_SERVER_ERROR => "misc/500.html",
        _ => return response,
    };

    let mut context = Context::new();
    context.insert("viewer", &Option::<()>::None);
    context.insert("path", &path);

    match state.templates.render_raw(template, &context) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => {
            tracing::error!(error = ?err, template, "failed to render error page");
            response
        }
    }
}
