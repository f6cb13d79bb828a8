//! Error types for the orchestration core.

use crate::provider::ProviderError;
use thiserror::Error;

/// Result type alias using the core error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to the transport layer.
///
/// Every variant is scoped to a single request; none is fatal to the
/// process. The transport decides which ones become user-visible notices.
#[derive(Error, Debug)]
pub enum Error {
    /// Assistant id not present in the catalog
    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),

    /// Upstream work unit ended in a terminal non-success state
    #[error("Run ended as {status}: {detail}")]
    RunFailed { status: String, detail: String },

    /// Completion wait exhausted its attempt budget
    #[error("Timed out waiting for the assistant")]
    Timeout,

    /// Transport or API failure talking to the provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Local persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build a `RunFailed` from an upstream terminal state.
    pub fn run_failed(status: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::RunFailed {
            status: status.into(),
            detail: detail.into(),
        }
    }

    /// Check if this is a terminal upstream failure (as opposed to a
    /// transport error or a local one).
    pub const fn is_run_failed(&self) -> bool {
        matches!(self, Self::RunFailed { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Storage(e.to_string())
    }
}
