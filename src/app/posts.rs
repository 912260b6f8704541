use anyhow::Result;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::page::{Page, Paginator};
use crate::domain::post::Post;
use crate::infra::db::Db;

const POST_SELECT: &str = "SELECT p.id, p.text, p.pub_date, p.author_id, u.username AS author_username, \
            p.group_id, g.slug AS group_slug, g.title AS group_title, p.image, \
            (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count \
     FROM posts p \
     JOIN users u ON u.id = p.author_id \
     LEFT JOIN groups g ON g.id = p.group_id";

/// Which posts a feed shows. Every feed is ordered newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFilter {
    All,
    Group(i64),
    Author(i64),
    /// Posts by every author the given user follows.
    FollowedBy(i64),
}

impl FeedFilter {
    fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match *self {
            FeedFilter::All => {}
            FeedFilter::Group(group_id) => {
                builder.push(" WHERE p.group_id = ").push_bind(group_id);
            }
            FeedFilter::Author(author_id) => {
                builder.push(" WHERE p.author_id = ").push_bind(author_id);
            }
            FeedFilter::FollowedBy(user_id) => {
                builder
                    .push(" WHERE p.author_id IN (SELECT author_id FROM follows WHERE user_id = ")
                    .push_bind(user_id)
                    .push(")");
            }
        }
    }
}

/// What an edit does to the post's image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    Keep,
    Replace(String),
    Clear,
}

#[derive(Clone)]
pub struct PostService {
    db: Db,
}

fn post_from_row(row: &sqlx::postgres::PgRow) -> Post {
    Post {
        id: row.get("id"),
        text: row.get("text"),
        pub_date: row.get("pub_date"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        group_id: row.get("group_id"),
        group_slug: row.get("group_slug"),
        group_title: row.get("group_title"),
        image: row.get("image"),
        comments_count: row.get("comments_count"),
    }
}

impl PostService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_post(
        &self,
        author_id: i64,
        text: &str,
        group_id: Option<i64>,
        image: Option<String>,
    ) -> Result<Post> {
        let post_id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (text, author_id, group_id, image) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(text)
        .bind(author_id)
        .bind(group_id)
        .bind(image)
        .fetch_one(self.db.pool())
        .await?;

        self.get_post_by_id(post_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", post_id))
    }

    pub async fn get_post_by_id(&self, post_id: i64) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("{} WHERE p.id = $1", POST_SELECT))
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// Posts are addressed by author username and id together; a mismatched
    /// username is the same as a missing post.
    pub async fn get_post(&self, username: &str, post_id: i64) -> Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "{} WHERE p.id = $1 AND u.username = $2",
            POST_SELECT
        ))
        .bind(post_id)
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// Only the author's own post is touched; `None` otherwise.
    pub async fn update_post(
        &self,
        post_id: i64,
        author_id: i64,
        text: &str,
        group_id: Option<i64>,
        image: ImageChange,
    ) -> Result<Option<Post>> {
        let (set_image, new_image) = match image {
            ImageChange::Keep => (false, None),
            ImageChange::Replace(path) => (true, Some(path)),
            ImageChange::Clear => (true, None),
        };

        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE posts \
             SET text = $3, \
                 group_id = $4, \
                 image = CASE WHEN $5 THEN $6 ELSE image END \
             WHERE id = $1 AND author_id = $2 \
             RETURNING id",
        )
        .bind(post_id)
        .bind(author_id)
        .bind(text)
        .bind(group_id)
        .bind(set_image)
        .bind(new_image)
        .fetch_optional(self.db.pool())
        .await?;

        match updated {
            Some(post_id) => self.get_post_by_id(post_id).await,
            None => Ok(None),
        }
    }

    pub async fn count(&self, filter: FeedFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM posts p");
        filter.push_where(&mut builder);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn list(&self, filter: FeedFilter, offset: i64, limit: i64) -> Result<Vec<Post>> {
        let mut builder = QueryBuilder::<Postgres>::new(POST_SELECT);
        filter.push_where(&mut builder);
        builder
            .push(" ORDER BY p.pub_date DESC, p.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder.build().fetch_all(self.db.pool()).await?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    /// One page of a feed. `raw_page` is the untouched `page` query value.
    pub async fn page(
        &self,
        filter: FeedFilter,
        paginator: Paginator,
        raw_page: Option<&str>,
    ) -> Result<Page<Post>> {
        let count = self.count(filter).await?;
        let request = paginator.locate(raw_page, count);
        let posts = self.list(filter, request.offset, request.limit).await?;
        Ok(Page::new(request, posts))
    }
}
