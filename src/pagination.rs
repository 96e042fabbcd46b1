//! Cursor-driven paging over search results.
//!
//! A [`Page`] is plain data. Moving to a neighbour goes through a
//! [`PageSource`], which knows how to dereference the opaque cursor URLs the
//! server hands back. Stepping never touches the page it starts from.

use crate::error::{ApiError, ApiResult};
use crate::executor::Fetched;
use crate::types::Page;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    /// Direction that moves `from` towards `to`, if they differ.
    pub fn towards(from: u32, to: u32) -> Option<Self> {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Some(Direction::Next),
            std::cmp::Ordering::Less => Some(Direction::Previous),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn apply(self, page: u32) -> u32 {
        match self {
            Direction::Next => page.saturating_add(1),
            Direction::Previous => page.saturating_sub(1),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Next => f.write_str("next"),
            Direction::Previous => f.write_str("previous"),
        }
    }
}

/// Anything that can load the page behind a cursor URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_cursor(&self, cursor: &str) -> ApiResult<Fetched<Page>>;
}

pub fn cursor(page: &Page, direction: Direction) -> Option<&str> {
    match direction {
        Direction::Next => page.next.as_deref(),
        Direction::Previous => page.previous.as_deref(),
    }
    .filter(|url| !url.is_empty())
}

/// One hop in `direction`. Fails with [`ApiError::PaginationExhausted`]
/// when the page has no cursor that way.
pub async fn step<S>(source: &S, page: &Page, direction: Direction) -> ApiResult<Fetched<Page>>
where
    S: PageSource + ?Sized,
{
    match cursor(page, direction) {
        Some(url) => source.fetch_cursor(url).await,
        None => Err(ApiError::PaginationExhausted(direction)),
    }
}

pub async fn next_page<S>(source: &S, page: &Page) -> ApiResult<Fetched<Page>>
where
    S: PageSource + ?Sized,
{
    step(source, page, Direction::Next).await
}

pub async fn previous_page<S>(source: &S, page: &Page) -> ApiResult<Fetched<Page>>
where
    S: PageSource + ?Sized,
{
    step(source, page, Direction::Previous).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PageLink {
    Number(u32),
    Gap,
}

/// Numbered links for a pager strip: first and last page always shown,
/// a few around `current`, gaps elsewhere. `current` is clamped into
/// `1..=total`. A gapped strip always holds seven links, so `max_visible`
/// below seven acts as seven.
pub fn page_window(current: u32, total: u32, max_visible: u32) -> Vec<PageLink> {
    if total <= max_visible.max(7) {
        return (1..=total).map(PageLink::Number).collect();
    }

    let current = current.clamp(1, total);
    let mut links = vec![PageLink::Number(1)];
    if current <= 4 {
        links.extend((2..=5).map(PageLink::Number));
        links.push(PageLink::Gap);
        links.push(PageLink::Number(total));
    } else if current.saturating_add(3) >= total {
        links.push(PageLink::Gap);
        links.extend((total - 4..=total).map(PageLink::Number));
    } else {
        links.push(PageLink::Gap);
        links.extend((current - 1..=current + 1).map(PageLink::Number));
        links.push(PageLink::Gap);
        links.push(PageLink::Number(total));
    }
    links
}
