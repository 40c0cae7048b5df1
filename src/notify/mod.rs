//! Outbound notification of new items.
//!
//! - [`email`]: SMTP delivery through `lettre`
//! - [`compose`]: Subject and body rendering shared by every channel

use crate::error::NewsError;
use crate::models::NewsItem;
use async_trait::async_trait;

pub mod compose;
pub mod email;

/// Receipt for a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub count: usize,
}

/// Delivers a batch of news items to the recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification covering `items`, in order.
    ///
    /// `items` must be non-empty. `subject` overrides the generated one.
    /// Failures are [`NewsError::Delivery`] carrying the transport error text.
    async fn send(&self, items: &[NewsItem], subject: Option<&str>)
    -> Result<Delivery, NewsError>;
}
