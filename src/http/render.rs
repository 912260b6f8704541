use std::sync::Arc;

use axum::response::Html;
use tera::{Context, Tera};

use crate::http::AppError;

/// Templates are compiled into the binary so the server and the tests do
/// not depend on the working directory.
const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../../templates/base.html")),
    ("includes/post_card.html", include_str!("../../templates/includes/post_card.html")),
    ("includes/paginator.html", include_str!("../../templates/includes/paginator.html")),
    ("includes/form_errors.html", include_str!("../../templates/includes/form_errors.html")),
    ("index.html", include_str!("../../templates/index.html")),
    ("group.html", include_str!("../../templates/group.html")),
    ("follow.html", include_str!("../../templates/follow.html")),
    ("posts/index_feed.html", include_str!("../../templates/posts/index_feed.html")),
    ("posts/profile.html", include_str!("../../templates/posts/profile.html")),
    ("posts/post.html", include_str!("../../templates/posts/post.html")),
    ("posts/new.html", include_str!("../../templates/posts/new.html")),
    ("auth/login.html", include_str!("../../templates/auth/login.html")),
    ("auth/signup.html", include_str!("../../templates/auth/signup.html")),
    ("about/author.html", include_str!("../../templates/about/author.html")),
    ("about/tech.html", include_str!("../../templates/about/tech.html")),
    ("misc/404.html", include_str!("../../templates/misc/404.html")),
    ("misc/500.html", include_str!("../../templates/misc/500.html")),
];

#[derive(Clone)]
pub struct Templates {
    tera: Arc<Tera>,
}

impl Templates {
    pub fn load() -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())?;
        tera.set_escape_fn(escape_html);
        Ok(Self {
            tera: Arc::new(tera),
        })
    }

    pub fn render_raw(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render(name, context)
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<Html<String>, AppError> {
        self.render_raw(name, context).map(Html).map_err(|err| {
            tracing::error!(error = ?err, template = name, "failed to render template");
            AppError::internal("failed to render page")
        })
    }
}

/// HTML escaping that leaves `/` alone, so paths stay readable in markup.
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
