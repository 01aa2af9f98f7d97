//! Error types for checksum verification and recovery

use crate::RecoveryId;
use tandem_jupiter::{DocumentId, JupiterError};
use thiserror::Error;

/// Consistency layer errors
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// Error from the OT engine
    #[error("Jupiter error: {0}")]
    Jupiter(#[from] JupiterError),

    /// An activity could not be handed to the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Received file content is not usable text
    #[error("Invalid content for {document}: {reason}")]
    InvalidContent { document: DocumentId, reason: String },

    /// The host did not finish a recovery round in time
    #[error("Recovery {0} timed out")]
    RecoveryTimeout(RecoveryId),

    /// Recovery was cancelled by the caller
    #[error("Recovery cancelled")]
    Cancelled,

    /// The session ended while waiting
    #[error("Session ended")]
    SessionEnded,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConsistencyError {
    fn from(err: serde_json::Error) -> Self {
        ConsistencyError::Serialization(err.to_string())
    }
}

/// Result type for consistency operations
pub type ConsistencyResult<T> = Result<T, ConsistencyError>;
