//! News sources the scheduler can poll.
//!
//! A source turns one network round trip into an ordered, duplicate-free list
//! of [`NewsItem`]s. It keeps no state between calls.
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Listing page | [`listing`] | HTML scraping | Priority-ordered selectors with link-scan fallback |
//!
//! The scheduler only sees the [`NewsSource`] trait, so tests drive it with
//! canned items instead of a live site.

use crate::error::NewsError;
use crate::models::NewsItem;
use async_trait::async_trait;

pub mod listing;

/// Something that can be polled for the current list of news items.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch and extract the current items.
    ///
    /// An empty list is a successful result; transport failures are
    /// [`NewsError::Network`], extraction failures [`NewsError::Parse`].
    async fn fetch(&self) -> Result<Vec<NewsItem>, NewsError>;
}
