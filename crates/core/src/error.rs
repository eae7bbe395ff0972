//! Error types for the Kenning domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Lookups that find nothing are not errors: `get` returns `Option` and
//! mutations on a missing id return `false`.

use thiserror::Error;

/// The top-level error type for all Kenning operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Extraction errors ---
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    // --- Pipeline errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- Observer errors ---
    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record serialization failed for {collection}: {reason}")]
    Serialization { collection: String, reason: String },

    #[error("Record already exists: {collection}/{id}")]
    Duplicate { collection: String, id: String },
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("LLM client not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No scripted response left (call #{call})")]
    Exhausted { call: usize },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Conversation unit not found: {0}")]
    UnitNotFound(String),

    #[error("Invalid pattern '{pattern_id}': {reason}")]
    InvalidPattern { pattern_id: String, reason: String },

    #[error("LLM call failed during extraction: {0}")]
    Llm(#[from] LlmError),

    #[error("Store failure during extraction: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Task {task_id} cannot be retried: {reason}")]
    NotRetryable { task_id: String, reason: String },

    #[error("Queue stalled: {pending} pending task(s) could not be claimed")]
    Stalled { pending: usize },

    #[error("Store failure in pipeline: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Observer {observer} requires an LLM client but none is configured")]
    LlmUnavailable { observer: String },

    #[error("LLM call failed in {observer}: {source}")]
    Llm {
        observer: String,
        #[source]
        source: LlmError,
    },

    #[error("Store failure in observer: {0}")]
    Store(#[from] StoreError),
}
