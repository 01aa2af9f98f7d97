//! Session level errors

use tandem_consistency::ConsistencyError;
use tandem_jupiter::{DocumentId, JupiterError};
use thiserror::Error;

/// Errors surfaced by host and client sessions
#[derive(Debug, Error)]
pub enum TandemError {
    /// Error from the OT engine
    #[error("Jupiter error: {0}")]
    Jupiter(#[from] JupiterError),

    /// Error from the checksum and recovery layer
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// The session actor has stopped
    #[error("Session closed")]
    SessionClosed,

    /// The document is being resynchronized and rejects local edits
    #[error("Recovery in progress for {0}")]
    RecoveryInProgress(DocumentId),
}

/// Result type for session operations
pub type TandemResult<T> = Result<T, TandemError>;
