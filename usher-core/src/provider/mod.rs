//! Upstream provider abstraction.
//!
//! One trait covers the two conversation protocols the orchestrator
//! multiplexes between: the thread/run protocol (durable server-side
//! threads with explicitly started, asynchronously finishing runs) and the
//! response-chaining protocol (stateless calls linked by a previous
//! response id). The HTTP implementation lives in [`openai`]; tests swap in
//! scripted fakes.

mod openai;

#[cfg(test)]
pub(crate) mod testing;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::Deserialize;

// ============================================================================
// Thread Protocol Types
// ============================================================================

/// Lifecycle state of a run, as reported by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Incomplete,
    Expired,
    /// Forward compatibility: states this build does not know yet.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether the run still occupies its thread. While a run is active the
    /// upstream rejects new messages on the same thread. Unrecognized
    /// states count as active so they are waited out, not clobbered.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::InProgress | Self::RequiresAction | Self::Cancelling | Self::Unknown
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Wire name, used in logs and error details.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One asynchronous unit of work on a thread.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Upstream error description for terminal failures.
    pub error_detail: Option<String>,
}

/// A message read back from a thread, reduced to its text segments.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: String,
    /// "user" or "assistant".
    pub role: String,
    pub text_parts: Vec<String>,
}

/// User input appended to a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageInput {
    Text(String),
    /// Inline image content part referencing an uploaded file.
    Image { prompt: String, file_id: String },
    /// Document attachment analyzed with the code-interpreter tool.
    Document { prompt: String, file_id: String },
}

// ============================================================================
// Response Protocol Types
// ============================================================================

/// User input for one response-chaining call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseInput {
    Text(String),
    /// Image inlined as a base64 data URL; no upload round trip.
    Image { prompt: String, data_url: String },
    /// Uploaded-file reference.
    File { prompt: String, file_id: String },
}

/// Request for one response-chaining round trip.
#[derive(Debug, Clone)]
pub struct ResponseRequest {
    pub model: String,
    /// System instruction carrying the assistant's fixed persona.
    pub instructions: String,
    pub input: ResponseInput,
    /// Chaining reference to the previous turn, absent on a fresh context.
    pub previous_response_id: Option<String>,
}

/// A response unit, either freshly created or retrieved for history.
#[derive(Debug, Clone, Default)]
pub struct ResponseUnit {
    pub id: String,
    /// Wire status string, e.g. "completed" or "failed".
    pub status: String,
    pub error_detail: Option<String>,
    /// Text of the recorded user input, one string per input item.
    pub input_texts: Vec<String>,
    pub output_texts: Vec<String>,
    pub previous_response_id: Option<String>,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface to the upstream conversation provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a durable conversation container, returning its handle.
    async fn create_thread(&self) -> Result<String, ProviderError>;

    /// List runs on a thread, newest first.
    async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>, ProviderError>;

    /// Retrieve the current state of a single run.
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ProviderError>;

    /// Request cancellation of a run.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ProviderError>;

    /// Append user input to a thread.
    async fn create_message(
        &self,
        thread_id: &str,
        input: &MessageInput,
    ) -> Result<(), ProviderError>;

    /// Start a run of `assistant_id` over the thread's accumulated state.
    async fn create_run(&self, thread_id: &str, assistant_id: &str)
        -> Result<Run, ProviderError>;

    /// List messages on a thread, newest first.
    async fn list_messages(
        &self,
        thread_id: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, ProviderError>;

    /// One full response-chaining round trip: submit input, receive the
    /// finished response.
    async fn create_response(
        &self,
        request: &ResponseRequest,
    ) -> Result<ResponseUnit, ProviderError>;

    /// Retrieve a previously created response, including its recorded
    /// input and chaining reference.
    async fn retrieve_response(&self, response_id: &str) -> Result<ResponseUnit, ProviderError>;

    /// Upload a file for assistant use; returns the upstream file id.
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ProviderError>;
}

// ============================================================================
// Provider Error
// ============================================================================

/// Error from the upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Which API operation failed, e.g. "create_run".
    pub operation: String,
    pub message: String,
    /// HTTP status when the upstream answered with one.
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(
        operation: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "[{}] HTTP {}: {}", self.operation, code, self.message),
            None => write!(f, "[{}] {}", self.operation, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}
