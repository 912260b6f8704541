use axum::{routing::get, routing::post, Router};

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn pages() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/about/author/", get(handlers::about_author))
        .route("/about/tech/", get(handlers::about_tech))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/signup/", get(handlers::signup_form).post(handlers::signup))
        .route("/auth/login/", get(handlers::login_form).post(handlers::login))
        .route("/auth/logout/", get(handlers::logout).post(handlers::logout))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/new/", get(handlers::new_post_form).post(handlers::new_post))
        .route("/group/:slug/", get(handlers::group_posts))
        .route("/follow/", get(handlers::follow_index))
        .route("/:username/", get(handlers::profile))
        .route(
            "/:username/follow/",
            get(handlers::profile_follow).post(handlers::profile_follow),
        )
        .route(
            "/:username/unfollow/",
            get(handlers::profile_unfollow).post(handlers::profile_unfollow),
        )
        .route("/:username/:post_id/", get(handlers::post_view))
        .route(
            "/:username/:post_id/edit/",
            get(handlers::post_edit_form).post(handlers::post_edit),
        )
        .route(
            "/:username/:post_id/comment/",
            get(handlers::add_comment_redirect).post(handlers::add_comment),
        )
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route("/admin/groups", post(handlers::admin_create_group))
        .route("/admin/cache/clear", post(handlers::admin_clear_cache))
}
