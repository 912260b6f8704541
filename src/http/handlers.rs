use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tera::Context;
use validator::Validate;

use crate::app::auth::AuthService;
use crate::app::comments::CommentService;
use crate::app::feed::FeedCache;
use crate::app::groups::GroupService;
use crate::app::posts::{FeedFilter, ImageChange, PostService};
use crate::app::social::SocialService;
use crate::app::users::UserService;
use crate::domain::page::{Page, Paginator};
use crate::domain::post::Post;
use crate::http::auth::{removal_cookie, session_cookie, AdminToken};
use crate::http::forms::{
    safe_next, CommentForm, CreateGroupRequest, FormErrors, LoginForm, PostForm,
    PostSubmission, SignupForm, INVALID_CHOICE,
};
use crate::http::{AppError, AuthUser};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

/// 302 to `location`.
fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

pub(crate) fn profile_path(username: &str) -> String {
    format!("/{}/", encode_segment(username))
}

pub(crate) fn post_path(username: &str, post_id: i64) -> String {
    format!("/{}/{}/", encode_segment(username), post_id)
}

/// Every page gets the viewer, `null` for anonymous requests.
fn page_context(viewer: Option<&AuthUser>) -> Context {
    let mut context = Context::new();
    context.insert("viewer", &viewer);
    context
}

fn paginator(state: &AppState) -> Paginator {
    Paginator::new(state.per_page)
}

/// Non-numeric ids can never match a post.
fn parse_post_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| AppError::not_found("post not found"))
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|err| err.as_database_error())
        .and_then(|db_err| db_err.code())
        .map_or(false, |code| code == "23505")
}

async fn load_feed(
    state: &AppState,
    filter: FeedFilter,
    raw_page: Option<&str>,
) -> Result<Page<Post>, AppError> {
    PostService::new(state.db.clone())
        .page(filter, paginator(state), raw_page)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, filter = ?filter, "failed to load feed");
            AppError::internal("failed to load feed")
        })
}

pub async fn index(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let service = PostService::new(state.db.clone());
    let count = service.count(FeedFilter::All).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to count posts");
        AppError::internal("failed to load feed")
    })?;
    let request = paginator(&state).locate(query.page.as_deref(), count);

    let feed_cache = FeedCache::new(state.cache.clone(), state.index_cache_ttl_seconds);
    let feed = match feed_cache.get_index(request.number).await {
        Some(html) => html,
        None => {
            let posts = service
                .list(FeedFilter::All, request.offset, request.limit)
                .await
                .map_err(|err| {
                    tracing::error!(error = ?err, "failed to load feed");
                    AppError::internal("failed to load feed")
                })?;

            let mut context = Context::new();
            context.insert("page", &Page::new(request, posts));
            let html = state
                .templates
                .render_raw("posts/index_feed.html", &context)
                .map_err(|err| {
                    tracing::error!(error = ?err, "failed to render index feed");
                    AppError::internal("failed to render page")
                })?;
            feed_cache.put_index(request.number, &html).await;
            html
        }
    };

    let mut context = page_context(viewer.as_ref());
    context.insert("feed", &feed);
    state.templates.render("index.html", &context)
}

pub async fn group_posts(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let group = GroupService::new(state.db.clone())
        .get_by_slug(&slug)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, slug = %slug, "failed to load group");
            AppError::internal("failed to load group")
        })?
        .ok_or_else(|| AppError::not_found("group not found"))?;

    let page = load_feed(&state, FeedFilter::Group(group.id), query.page.as_deref()).await?;

    let mut context = page_context(viewer.as_ref());
    context.insert("group", &group);
    context.insert("page", &page);
    state.templates.render("group.html", &context)
}

pub async fn profile(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let author = UserService::new(state.db.clone())
        .get_profile(&username)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, username = %username, "failed to load profile");
            AppError::internal("failed to load profile")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let page = load_feed(&state, FeedFilter::Author(author.id), query.page.as_deref()).await?;

    let following = match &viewer {
        Some(viewer) => SocialService::new(state.db.clone())
            .is_following(viewer.user_id, author.id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, author_id = author.id, "failed to check follow");
                AppError::internal("failed to load profile")
            })?,
        None => false,
    };

    let mut context = page_context(viewer.as_ref());
    context.insert("author", &author);
    context.insert("page", &page);
    context.insert("following", &following);
    state.templates.render("posts/profile.html", &context)
}

pub async fn follow_index(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let page = load_feed(
        &state,
        FeedFilter::FollowedBy(user.user_id),
        query.page.as_deref(),
    )
    .await?;

    let mut context = page_context(Some(&user));
    context.insert("page", &page);
    state.templates.render("follow.html", &context)
}

async fn find_post(state: &AppState, username: &str, raw_id: &str) -> Result<Post, AppError> {
    let post_id = parse_post_id(raw_id)?;
    PostService::new(state.db.clone())
        .get_post(username, post_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id, "failed to load post");
            AppError::internal("failed to load post")
        })?
        .ok_or_else(|| AppError::not_found("post not found"))
}

/// The detail page, with a blank or a bound comment form.
async fn render_post_page(
    state: &AppState,
    viewer: Option<&AuthUser>,
    post: Post,
    form: CommentForm,
    errors: FormErrors,
) -> Result<Html<String>, AppError> {
    let author = UserService::new(state.db.clone())
        .get_profile(&post.author_username)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = post.id, "failed to load post author");
            AppError::internal("failed to load post")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let comments = CommentService::new(state.db.clone())
        .list_for_post(post.id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = post.id, "failed to load comments");
            AppError::internal("failed to load comments")
        })?;

    let mut context = page_context(viewer);
    context.insert("post", &post);
    context.insert("author", &author);
    context.insert("comments", &comments);
    context.insert("form", &form);
    context.insert("errors", &errors);
    state.templates.render("posts/post.html", &context)
}

pub async fn post_view(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path((username, post_id)): Path<(String, String)>,
) -> Result<Html<String>, AppError> {
    let post = find_post(&state, &username, &post_id).await?;
    render_post_page(
        &state,
        viewer.as_ref(),
        post,
        CommentForm::default(),
        FormErrors::default(),
    )
    .await
}

async fn render_post_form(
    state: &AppState,
    user: &AuthUser,
    form: &PostForm,
    errors: &FormErrors,
    post: Option<&Post>,
) -> Result<Html<String>, AppError> {
    let groups = GroupService::new(state.db.clone())
        .list_groups()
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list groups");
            AppError::internal("failed to list groups")
        })?;

    let mut context = page_context(Some(user));
    context.insert("form", form);
    context.insert("errors", errors);
    context.insert("groups", &groups);
    context.insert("is_edit", &post.is_some());
    context.insert("post", &post);
    state.templates.render("posts/new.html", &context)
}

/// Runs the form checks plus the group lookup. Returns the chosen group id
/// when the submission is valid.
async fn clean_submission(
    state: &AppState,
    submission: &PostSubmission,
) -> Result<(Option<i64>, FormErrors), AppError> {
    let mut errors = submission.validate().await;
    let group_id = submission.form.group_id().ok().flatten();

    if let Some(group_id) = group_id {
        let group = GroupService::new(state.db.clone())
            .get_group(group_id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, group_id, "failed to load group");
                AppError::internal("failed to load group")
            })?;
        if group.is_none() {
            errors.add("group", INVALID_CHOICE);
        }
    }

    Ok((group_id, errors))
}

async fn store_image(state: &AppState, submission: &PostSubmission) -> Result<Option<String>, AppError> {
    let Some(image) = &submission.image else {
        return Ok(None);
    };
    let path = state
        .media
        .save("posts", &image.file_name, &image.bytes)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, file_name = %image.file_name, "failed to store image");
            AppError::internal("failed to store image")
        })?;
    Ok(Some(path))
}

pub async fn new_post_form(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Html<String>, AppError> {
    render_post_form(&state, &user, &PostForm::default(), &FormErrors::default(), None).await
}

pub async fn new_post(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = PostSubmission::from_multipart(multipart).await?;
    let (group_id, errors) = clean_submission(&state, &submission).await?;
    if !errors.is_empty() {
        let page = render_post_form(&state, &user, &submission.form, &errors, None).await?;
        return Ok(page.into_response());
    }

    let image = store_image(&state, &submission).await?;
    let post = PostService::new(state.db.clone())
        .create_post(user.user_id, &submission.form.text, group_id, image)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, author_id = user.user_id, "failed to create post");
            AppError::internal("failed to create post")
        })?;

    tracing::info!(post_id = post.id, author_id = user.user_id, "post created");
    Ok(redirect("/"))
}

pub async fn post_edit_form(
    State(state): State<AppState>,
    user: AuthUser,
    Path((username, post_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let post = find_post(&state, &username, &post_id).await?;
    if post.author_id != user.user_id {
        return Ok(redirect(&post_path(&post.author_username, post.id)));
    }

    let form = PostForm::from_post(&post.text, post.group_id);
    let page = render_post_form(&state, &user, &form, &FormErrors::default(), Some(&post)).await?;
    Ok(page.into_response())
}

pub async fn post_edit(
    State(state): State<AppState>,
    user: AuthUser,
    Path((username, post_id)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let post = find_post(&state, &username, &post_id).await?;
    let detail = post_path(&post.author_username, post.id);
    if post.author_id != user.user_id {
        return Ok(redirect(&detail));
    }

    let submission = PostSubmission::from_multipart(multipart).await?;
    let (group_id, errors) = clean_submission(&state, &submission).await?;
    if !errors.is_empty() {
        let page = render_post_form(&state, &user, &submission.form, &errors, Some(&post)).await?;
        return Ok(page.into_response());
    }

    // A new upload wins over the clear checkbox.
    let image = match store_image(&state, &submission).await? {
        Some(path) => ImageChange::Replace(path),
        None if submission.clear_image => ImageChange::Clear,
        None => ImageChange::Keep,
    };

    let updated = PostService::new(state.db.clone())
        .update_post(post.id, user.user_id, &submission.form.text, group_id, image)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = post.id, "failed to update post");
            AppError::internal("failed to update post")
        })?;
    if updated.is_none() {
        tracing::warn!(post_id = post.id, "post changed hands during edit");
    }

    Ok(redirect(&detail))
}

pub async fn add_comment_redirect(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((username, post_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let post = find_post(&state, &username, &post_id).await?;
    Ok(redirect(&post_path(&post.author_username, post.id)))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path((username, post_id)): Path<(String, String)>,
    Form(form): Form<CommentForm>,
) -> Result<Response, AppError> {
    let post = find_post(&state, &username, &post_id).await?;

    let (form, errors) = form.clean();
    if !errors.is_empty() {
        let page = render_post_page(&state, Some(&user), post, form, errors).await?;
        return Ok(page.into_response());
    }

    CommentService::new(state.db.clone())
        .add_comment(post.id, user.user_id, &form.text)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = post.id, "failed to add comment");
            AppError::internal("failed to add comment")
        })?;

    Ok(redirect(&post_path(&post.author_username, post.id)))
}

async fn find_author(state: &AppState, username: &str) -> Result<i64, AppError> {
    let author = UserService::new(state.db.clone())
        .get_by_username(username)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, username = %username, "failed to load user");
            AppError::internal("failed to load user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(author.id)
}

pub async fn profile_follow(
    State(state): State<AppState>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let author_id = find_author(&state, &username).await?;

    // Self-follows and repeats are no-ops at the database level.
    let created = SocialService::new(state.db.clone())
        .follow(user.user_id, author_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, author_id, "failed to follow");
            AppError::internal("failed to follow")
        })?;
    if created.is_some() {
        tracing::debug!(user_id = user.user_id, author_id, "follow created");
    }

    Ok(redirect(&profile_path(&username)))
}

pub async fn profile_unfollow(
    State(state): State<AppState>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let author_id = find_author(&state, &username).await?;

    SocialService::new(state.db.clone())
        .unfollow(user.user_id, author_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, author_id, "failed to unfollow");
            AppError::internal("failed to unfollow")
        })?;

    Ok(redirect(&profile_path(&username)))
}

pub async fn about_author(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
) -> Result<Html<String>, AppError> {
    state
        .templates
        .render("about/author.html", &page_context(viewer.as_ref()))
}

pub async fn about_tech(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
) -> Result<Html<String>, AppError> {
    state
        .templates
        .render("about/tech.html", &page_context(viewer.as_ref()))
}

pub async fn page_not_found() -> AppError {
    AppError::not_found("page not found")
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(state.db.clone(), state.session_key, state.session_ttl_hours)
}

/// Redirect that also sets the session cookie.
fn logged_in_redirect(
    state: &AppState,
    session: &crate::app::auth::SessionToken,
    location: &str,
) -> Result<Response, AppError> {
    let cookie = session_cookie(session, state.session_ttl_hours, state.secure_cookies)
        .ok_or_else(|| AppError::internal("failed to build session cookie"))?;
    let mut response = redirect(location);
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

fn render_signup(state: &AppState, form: &SignupForm, errors: &FormErrors) -> Result<Html<String>, AppError> {
    let mut context = page_context(None);
    context.insert("form", form);
    context.insert("errors", errors);
    state.templates.render("auth/signup.html", &context)
}

pub async fn signup_form(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    render_signup(&state, &SignupForm::default(), &FormErrors::default())
}

pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    let (form, mut errors) = form.clean();
    if !errors.is_empty() {
        return Ok(render_signup(&state, &form, &errors)?.into_response());
    }

    let service = auth_service(&state);
    let user = match service.signup(&form.username, &form.password1).await {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            errors.add("username", "A user with that username already exists.");
            return Ok(render_signup(&state, &form, &errors)?.into_response());
        }
        Err(err) => {
            tracing::error!(error = ?err, "failed to create user");
            return Err(AppError::internal("failed to create user"));
        }
    };

    let session = service.issue_session(user.id).map_err(|err| {
        tracing::error!(error = ?err, user_id = user.id, "failed to issue session");
        AppError::internal("failed to create user")
    })?;

    tracing::info!(user_id = user.id, "user signed up");
    logged_in_redirect(&state, &session, "/")
}

fn render_login(state: &AppState, form: &LoginForm, errors: &FormErrors) -> Result<Html<String>, AppError> {
    let mut context = page_context(None);
    context.insert("form", form);
    context.insert("errors", errors);
    state.templates.render("auth/login.html", &context)
}

pub async fn login_form(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> Result<Html<String>, AppError> {
    let form = LoginForm {
        next: query.next,
        ..LoginForm::default()
    };
    render_login(&state, &form, &FormErrors::default())
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let (form, mut errors) = form.clean();
    if !errors.is_empty() {
        return Ok(render_login(&state, &form, &errors)?.into_response());
    }

    let session = auth_service(&state)
        .login(&form.username, &form.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match session {
        Some(session) => logged_in_redirect(&state, &session, safe_next(form.next.as_deref())),
        None => {
            errors.add(
                FormErrors::NON_FIELD,
                "Please enter a correct username and password. Note that both fields may be case-sensitive.",
            );
            Ok(render_login(&state, &form, &errors)?.into_response())
        }
    }
}

pub async fn logout() -> Result<Response, AppError> {
    let cookie: HeaderValue =
        removal_cookie().ok_or_else(|| AppError::internal("failed to clear session"))?;
    let mut response = redirect("/");
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

pub async fn admin_create_group(
    State(state): State<AppState>,
    _admin: AdminToken,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::bad_request(errors.to_string()));
    }

    let group = GroupService::new(state.db.clone())
        .create_group(&payload.title, &payload.slug, &payload.description)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                return AppError::conflict("slug already taken");
            }
            tracing::error!(error = ?err, slug = %payload.slug, "failed to create group");
            AppError::internal("failed to create group")
        })?;

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn admin_clear_cache(
    State(state): State<AppState>,
    _admin: AdminToken,
) -> Result<StatusCode, AppError> {
    let removed = FeedCache::new(state.cache.clone(), state.index_cache_ttl_seconds)
        .clear()
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to clear page cache");
            AppError::internal("failed to clear page cache")
        })?;

    tracing::info!(removed, "page cache cleared");
    Ok(StatusCode::NO_CONTENT)
}
