//! Error types for the Agora protocol.

use thiserror::Error;

use crate::types::{JobId, JobPhase, MemoId, MemoStatus};

/// Main error type for Agora operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgoraError {
    /// A phase transition was rejected by the state machine.
    #[error("Invalid transition for job {job_id}: {from} -> {to}: {reason}")]
    InvalidTransition {
        job_id: JobId,
        from: JobPhase,
        to: JobPhase,
        reason: String,
    },

    /// A memo with the same id is already in the ledger.
    #[error("Memo {memo_id} already recorded for job {job_id}")]
    DuplicateMemo { job_id: JobId, memo_id: MemoId },

    /// A memo was resolved after it left PENDING.
    #[error("Memo {memo_id} already resolved as {status}")]
    AlreadyResolved { memo_id: MemoId, status: MemoStatus },

    /// Resource not found.
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// A memo does not fit the ledger it was offered to.
    #[error("Invalid memo {memo_id}: {message}")]
    InvalidMemo { memo_id: MemoId, message: String },

    /// Amount or token precision cannot be converted to base units.
    #[error("Invalid fare: {0}")]
    InvalidFare(String),

    /// Semantic rerank and manual sort were requested together.
    #[error("Rerank and manual sort cannot be combined")]
    AmbiguousRankingMode,

    /// Discovery result size must be positive.
    #[error("top_k must be positive, got {0}")]
    InvalidTopK(i64),

    /// Caller supplied an unusable request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Ledger gateway call failed.
    #[error("Ledger error during {operation}: {message}")]
    Ledger {
        operation: String,
        message: String,
        retryable: bool,
    },

    /// Registry service call failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// The registry has no record of the job.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// Similarity service call failed.
    #[error("Similarity service error: {0}")]
    Similarity(String),

    /// A retryable call kept failing until the attempt cap.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgoraError {
    /// Build a retryable ledger error.
    pub fn ledger(operation: impl Into<String>, message: impl Into<String>) -> Self {
        AgoraError::Ledger {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a ledger error that must not be retried (signature or auth failure).
    pub fn ledger_fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        AgoraError::Ledger {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Build a memo lookup failure.
    pub fn memo_not_found(memo_id: MemoId) -> Self {
        AgoraError::NotFound {
            resource_type: "Memo".to_string(),
            id: memo_id.to_string(),
        }
    }

    /// Returns true if a transient fault caused this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgoraError::Ledger { retryable, .. } => *retryable,
            AgoraError::Registry(_) => true,
            AgoraError::ConnectionError(_) => true,
            _ => false,
        }
    }

    /// Returns the job ID if available.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            AgoraError::InvalidTransition { job_id, .. } => Some(*job_id),
            AgoraError::DuplicateMemo { job_id, .. } => Some(*job_id),
            AgoraError::JobNotFound(job_id) => Some(*job_id),
            _ => None,
        }
    }
}

/// Convenience Result type for Agora operations.
pub type Result<T> = std::result::Result<T, AgoraError>;

impl From<serde_json::Error> for AgoraError {
    fn from(err: serde_json::Error) -> Self {
        AgoraError::SerializationError(err.to_string())
    }
}
