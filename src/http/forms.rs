//! Form input for the HTML views.
//!
//! Forms are plain structs validated with `validator`; failures become
//! per-field messages (`FormErrors`) that the templates print next to the
//! offending input.

use std::collections::BTreeMap;
use std::io::Cursor;

use axum::extract::Multipart;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::group::is_valid_slug;
use crate::http::AppError;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";
pub const IMAGE_TOO_LARGE: &str = "Image is too large. Width and height may be at most 6000 pixels.";

/// Largest accepted width or height of an uploaded image, in pixels.
pub const MAX_IMAGE_SIDE: u32 = 6000;

/// Field name → messages. `__all__` holds errors not tied to one field.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub const NON_FIELD: &'static str = "__all__";

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn from_validation(errors: &ValidationErrors) -> Self {
        let mut out = Self::default();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors.iter() {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                out.add(&field.to_string(), message);
            }
        }
        out
    }

    fn validate(form: &impl Validate) -> Self {
        match form.validate() {
            Ok(()) => Self::default(),
            Err(errors) => Self::from_validation(&errors),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Validate)]
pub struct PostForm {
    #[validate(length(min = 1, message = "This field is required."))]
    pub text: String,
    /// Raw select value; empty means "no group".
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Everything a new-post or edit submission carried. Unknown fields
/// (an `author` field included) are ignored.
#[derive(Debug, Default)]
pub struct PostSubmission {
    pub form: PostForm,
    pub image: Option<UploadedImage>,
    pub clear_image: bool,
}

impl PostForm {
    pub fn from_post(text: &str, group_id: Option<i64>) -> Self {
        Self {
            text: text.to_string(),
            group: group_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }

    /// `Ok(None)` for an empty selection, `Err` for anything not an id.
    pub fn group_id(&self) -> Result<Option<i64>, ()> {
        let raw = self.group.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<i64>().map(Some).map_err(|_| ())
    }
}

impl PostSubmission {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut submission = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::bad_request(format!("invalid form data: {}", err)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "text" => submission.form.text = read_text(field).await?,
                "group" => submission.form.group = read_text(field).await?,
                "image-clear" => submission.clear_image = !read_text(field).await?.is_empty(),
                "image" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| AppError::bad_request(format!("invalid upload: {}", err)))?;
                    // Browsers send an empty, unnamed part when no file was chosen.
                    if !file_name.is_empty() || !bytes.is_empty() {
                        submission.image = Some(UploadedImage { file_name, bytes });
                    }
                }
                _ => {}
            }
        }

        submission.form.text = submission.form.text.trim().to_string();
        Ok(submission)
    }

    /// Field checks that need no database. The group's existence is checked
    /// by the caller.
    /// The image check decodes on the blocking pool.
    pub async fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::validate(&self.form);
        if self.form.group_id().is_err() {
            errors.add("group", INVALID_CHOICE);
        }
        if let Some(image) = &self.image {
            let bytes = image.bytes.clone();
            match tokio::task::spawn_blocking(move || check_image(&bytes)).await {
                Ok(Ok(_)) => {}
                Ok(Err(message)) => errors.add("image", message),
                Err(err) => {
                    tracing::error!(error = ?err, "image check task failed");
                    errors.add("image", INVALID_IMAGE);
                }
            }
        }
        errors
    }
}

/// The upload must be a supported image no larger than `MAX_IMAGE_SIDE` on
/// either side. Dimensions come from the header before anything is decoded.
pub fn check_image(bytes: &[u8]) -> Result<image::ImageFormat, &'static str> {
    if bytes.is_empty() {
        return Err(EMPTY_FILE);
    }
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| INVALID_IMAGE)?;
    let format = reader.format().ok_or(INVALID_IMAGE)?;
    let (width, height) = reader.into_dimensions().map_err(|_| INVALID_IMAGE)?;
    if width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
        return Err(IMAGE_TOO_LARGE);
    }

    let mut limits = image::Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    let mut reader = image::ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(limits);
    reader.decode().map_err(|_| INVALID_IMAGE)?;
    Ok(format)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid form data: {}", err)))
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
pub struct CommentForm {
    #[serde(default)]
    #[validate(length(min = 1, message = "This field is required."))]
    pub text: String,
}

impl CommentForm {
    pub fn clean(mut self) -> (Self, FormErrors) {
        self.text = self.text.trim().to_string();
        let errors = FormErrors::validate(&self);
        (self, errors)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
pub struct SignupForm {
    #[serde(default)]
    #[validate(
        length(min = 1, max = 150, message = "Enter a username of at most 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[serde(default, skip_serializing)]
    #[validate(length(min = 8, message = "This password is too short. It must contain at least 8 characters."))]
    pub password1: String,
    #[serde(default, skip_serializing)]
    #[validate(must_match(other = "password1", message = "The two password fields didn't match."))]
    pub password2: String,
}

impl SignupForm {
    pub fn clean(mut self) -> (Self, FormErrors) {
        self.username = self.username.trim().to_string();
        let errors = FormErrors::validate(&self);
        (self, errors)
    }
}

/// Letters, digits and `@ . + - _`, the same set a username may hold in URLs
/// without looking like a route of its own.
fn validate_username(username: &str) -> Result<(), ValidationError> {
    let valid = username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        let mut error = ValidationError::new("username");
        error.message = Some(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                .into(),
        );
        Err(error)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

impl LoginForm {
    pub fn clean(mut self) -> (Self, FormErrors) {
        self.username = self.username.trim().to_string();
        let mut errors = FormErrors::default();
        if self.username.is_empty() {
            errors.add("username", REQUIRED);
        }
        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        }
        (self, errors)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 200, message = "title must be between 1 and 200 characters"))]
    pub title: String,
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
    #[serde(default)]
    pub description: String,
}

fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        let mut error = ValidationError::new("slug");
        error.message = Some("slug may contain only a-z, 0-9, '_' and '-'".into());
        Err(error)
    }
}

/// Only same-site paths are followed after login.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') => next,
        _ => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SMALL_GIF: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x02, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
        0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x0C, 0x0A, 0x00, 0x3B,
    ];

    fn submission(text: &str, group: &str) -> PostSubmission {
        PostSubmission {
            form: PostForm {
                text: text.to_string(),
                group: group.to_string(),
            },
            image: None,
            clear_image: false,
        }
    }

    #[tokio::test]
    async fn post_requires_text() {
        let errors = submission("", "").validate().await;
        assert_eq!(errors.get("text"), Some(&[REQUIRED.to_string()][..]));
    }

    #[tokio::test]
    async fn post_group_must_be_an_id() {
        assert!(submission("hi", "").validate().await.is_empty());
        assert!(submission("hi", "12").validate().await.is_empty());

        let errors = submission("hi", "new_group").validate().await;
        assert_eq!(errors.get("group"), Some(&[INVALID_CHOICE.to_string()][..]));
    }

    #[test]
    fn group_id_parses_selection() {
        assert_eq!(PostForm::from_post("x", Some(7)).group_id(), Ok(Some(7)));
        assert_eq!(PostForm::from_post("x", None).group_id(), Ok(None));
    }

    #[test]
    fn small_gif_is_a_valid_image() {
        assert_eq!(check_image(SMALL_GIF), Ok(image::ImageFormat::Gif));
    }

    #[test]
    fn text_file_is_not_an_image() {
        assert_eq!(check_image(b"hello, world"), Err(INVALID_IMAGE));
        assert_eq!(check_image(b""), Err(EMPTY_FILE));
        // Right magic bytes, truncated body.
        assert_eq!(check_image(&SMALL_GIF[..10]), Err(INVALID_IMAGE));
    }

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(image::GrayImage::new(width, height))
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn image_at_the_size_limit_is_accepted() {
        let bytes = png_of(MAX_IMAGE_SIDE, 1);
        assert_eq!(check_image(&bytes), Ok(image::ImageFormat::Png));
    }

    #[test]
    fn oversized_image_is_rejected_before_decoding() {
        assert_eq!(check_image(&png_of(MAX_IMAGE_SIDE + 1, 1)), Err(IMAGE_TOO_LARGE));
        assert_eq!(check_image(&png_of(1, MAX_IMAGE_SIDE + 1)), Err(IMAGE_TOO_LARGE));
    }

    #[tokio::test]
    async fn post_with_oversized_image_reports_image_field() {
        let mut sub = submission("hi", "");
        sub.image = Some(UploadedImage {
            file_name: "wide.png".to_string(),
            bytes: Bytes::from(png_of(MAX_IMAGE_SIDE + 1, 1)),
        });
        let errors = sub.validate().await;
        assert_eq!(errors.get("image"), Some(&[IMAGE_TOO_LARGE.to_string()][..]));
    }

    #[tokio::test]
    async fn post_with_broken_image_reports_image_field() {
        let mut sub = submission("hi", "");
        sub.image = Some(UploadedImage {
            file_name: "fake.gif".to_string(),
            bytes: Bytes::from_static(b"not a gif"),
        });
        let errors = sub.validate().await;
        assert_eq!(errors.get("image"), Some(&[INVALID_IMAGE.to_string()][..]));
        assert!(errors.get("text").is_none());
    }

    #[test]
    fn blank_comment_is_rejected_after_trimming() {
        let (form, errors) = CommentForm { text: "   \n".to_string() }.clean();
        assert_eq!(form.text, "");
        assert_eq!(errors.get("text"), Some(&[REQUIRED.to_string()][..]));

        let (form, errors) = CommentForm { text: " nice post ".to_string() }.clean();
        assert_eq!(form.text, "nice post");
        assert!(errors.is_empty());
    }

    #[test]
    fn signup_checks_username_and_passwords() {
        let ok = SignupForm {
            username: "Хаски".to_string(),
            password1: "long enough".to_string(),
            password2: "long enough".to_string(),
        };
        assert!(ok.clean().1.is_empty());

        let (_, errors) = SignupForm {
            username: "bad name!".to_string(),
            password1: "short".to_string(),
            password2: "other".to_string(),
        }
        .clean();
        assert!(errors.get("username").is_some());
        assert!(errors.get("password1").is_some());
        assert!(errors.get("password2").is_some());
    }

    #[test]
    fn login_requires_both_fields() {
        let (_, errors) = LoginForm::default().clean();
        assert!(errors.get("username").is_some());
        assert!(errors.get("password").is_some());
    }

    #[test]
    fn group_request_validates_slug() {
        let request = CreateGroupRequest {
            title: "Новая группа".to_string(),
            slug: "new_group".to_string(),
            description: String::new(),
        };
        assert!(request.validate().is_ok());

        let request = CreateGroupRequest {
            slug: "New Group".to_string(),
            ..request
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/new/")), "/new/");
        assert_eq!(safe_next(Some("//evil.example/")), "/");
        assert_eq!(safe_next(Some("https://evil.example/")), "/");
        assert_eq!(safe_next(Some("/\\evil")), "/");
        assert_eq!(safe_next(None), "/");
    }
}
