use std::any::Any;

use axum::extract::DefaultBodyLimit;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::AppState;

mod auth;
mod error;
mod forms;
mod handlers;
mod middleware;
mod render;
mod routes;

pub use auth::AuthUser;
pub use error::AppError;
pub use render::Templates;

pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(state.media.root());

    let routes = Router::new()
        .merge(routes::health())
        .merge(routes::pages())
        .merge(routes::auth())
        .merge(routes::posts())
        .merge(routes::admin())
        .nest_service("/media", media)
        .fallback(handlers::page_not_found);

    with_error_pages(routes, state.clone())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.upload_max_bytes))
        .with_state(state)
}

/// Wraps `routes` so that a panicking handler answers 500 and every 404 or
/// 500 raised inside gets the HTML error page.
pub fn with_error_pages(routes: Router<AppState>, state: AppState) -> Router<AppState> {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::error_pages::render_error_pages,
        ))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = detail, "handler panicked");
    AppError::internal("internal server error").into_response()
}
