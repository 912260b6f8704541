//! Page-number pagination for feeds.
//!
//! Page numbers are 1-based. A missing or non-numeric `page` value resolves
//! to the first page and numbers outside `1..=num_pages` clamp to the
//! nearest valid page, so a feed request never fails on its page parameter.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    per_page: i64,
}

/// A located page: which slice of the feed to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous_page_number: Option<i64>,
    pub next_page_number: Option<i64>,
}

impl Paginator {
    pub fn new(per_page: i64) -> Self {
        Self {
            per_page: per_page.max(1),
        }
    }

    #[cfg(test)]
    pub fn per_page(&self) -> i64 {
        self.per_page
    }

    pub fn num_pages(&self, count: i64) -> i64 {
        if count <= 0 {
            return 1;
        }
        count / self.per_page + i64::from(count % self.per_page != 0)
    }

    pub fn locate(&self, raw_page: Option<&str>, count: i64) -> PageRequest {
        let num_pages = self.num_pages(count);
        let number = raw_page
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .clamp(1, num_pages);

        PageRequest {
            number,
            num_pages,
            count: count.max(0),
            offset: (number - 1) * self.per_page,
            limit: self.per_page,
        }
    }
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, items: Vec<T>) -> Self {
        let has_previous = request.number > 1;
        let has_next = request.number < request.num_pages;
        Self {
            items,
            number: request.number,
            num_pages: request.num_pages,
            count: request.count,
            has_previous,
            has_next,
            previous_page_number: has_previous.then(|| request.number - 1),
            next_page_number: has_next.then(|| request.number + 1),
        }
    }
}
