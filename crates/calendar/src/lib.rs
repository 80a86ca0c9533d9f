//! External calendar collaborator boundary.
//!
//! The booking engine talks to the shared salon calendar exclusively through
//! the [`CalendarClient`] trait: free/busy lookups plus event CRUD. The HTTP
//! implementation targets a Google-Calendar-v3-shaped REST surface and owns
//! timeout, retry and failure-classification policy; everything above this
//! crate only distinguishes transient from permanent failures.

pub mod client;
pub mod http;
pub mod types;

use thiserror::Error;

pub use client::{CalendarClient, NoopCalendarClient};
pub use http::{HttpCalendarClient, RetryPolicy};
pub use types::{BusyInterval, EventDraft, EventPatch, EventRef};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("calendar transport failed: {0}")]
    Transport(String),
    #[error("calendar rejected the request with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
    #[error("calendar event not found: {0}")]
    NotFound(String),
}

impl CalendarError {
    /// Transient failures are worth a bounded retry with backoff; permanent
    /// ones (bad request, missing event) are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::NotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CalendarError;

    #[test]
    fn transport_and_server_errors_are_transient() {
        assert!(CalendarError::Transport("connection reset".to_string()).is_transient());
        assert!(CalendarError::Status { status: 503, message: "unavailable".to_string() }
            .is_transient());
        assert!(CalendarError::Status { status: 429, message: "rate limited".to_string() }
            .is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!CalendarError::Status { status: 400, message: "bad request".to_string() }
            .is_transient());
        assert!(!CalendarError::NotFound("evt-1".to_string()).is_transient());
        assert!(!CalendarError::Decode("truncated body".to_string()).is_transient());
    }
}
