//! Error types for the refereed orchestration core.

use thiserror::Error;

/// Storage-related errors (checkpoint files, workflow registry)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Checkpoint regression for {workflow_id}: {current} -> {attempted}")]
    CheckpointRegression {
        workflow_id: String,
        current: String,
        attempted: String,
    },

    #[error("Invalid status transition for {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        workflow_id: String,
        from: String,
        to: String,
    },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidData(err.to_string())
    }
}

/// Failures reported by a generation capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider call timed out: {0}")]
    Timeout(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Malformed provider output: {0}")]
    MalformedOutput(String),

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient failures are retried with backoff and may fall back to another tier.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Timeout(_)
                | ProviderError::ProviderUnavailable(_)
        )
    }
}

/// Stage-level failures raised while a workflow is advancing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: ProviderError,
    },

    #[error("Review round {round} received {received} of {required} required reviews")]
    InsufficientReviews {
        round: u32,
        received: usize,
        required: usize,
    },

    #[error("Reviewer {reviewer_id} did not respond in round {round}")]
    ReviewerTimedOut { round: u32, reviewer_id: String },

    #[error("No handler registered for stage {0}")]
    MissingStage(String),

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),

    #[error("Workflow {0} was cancelled")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors surfaced by the worker pool's submission and control operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Caller {caller} submitted too recently; retry in {retry_after_ms}ms")]
    RateLimited { caller: String, retry_after_ms: u64 },

    #[error("Job queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Worker pool is not running")]
    NotRunning,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot {action} workflow {workflow_id} in status {status}")]
    InvalidAction {
        workflow_id: String,
        action: &'static str,
        status: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Top-level errors for configuration, startup and the CLI surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
