//! Error taxonomy shared by the scraper, the dedup store, the notifier and the
//! scheduler.
//!
//! Each variant maps to one recovery policy:
//!
//! | Variant | Raised by | Policy |
//! |---------|-----------|--------|
//! | [`NewsError::Network`] | listing fetch | next scheduled tick retries |
//! | [`NewsError::Parse`] | listing extraction | tick aborts, next tick retries fresh |
//! | [`NewsError::Storage`] | dedup store | fatal at startup, logged on commit |
//! | [`NewsError::Config`] | settings, notifier | fatal at startup only |
//! | [`NewsError::Delivery`] | notifier | blocks commit (real-time), restores queue (batch) |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required configuration: {}", missing.join(", "))]
    MissingConfig { missing: Vec<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

impl NewsError {
    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        NewsError::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must stop the process when raised during startup.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            NewsError::Storage { .. } | NewsError::MissingConfig { .. } | NewsError::Config(_)
        )
    }
}
