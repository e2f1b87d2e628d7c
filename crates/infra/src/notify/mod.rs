//! Routing of persisted events to downstream services.

pub mod http;
pub mod recording;

use async_trait::async_trait;
use thiserror::Error;

use jex_events_core::Event;

pub use http::HttpNotifier;
pub use recording::RecordingNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Forwards an enriched event downstream.
///
/// A failure is reported to the caller, which logs it and carries on; routing
/// never blocks persistence.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn route(&self, event: &Event) -> Result<(), NotifyError>;
}
