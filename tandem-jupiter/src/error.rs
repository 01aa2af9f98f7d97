//! Error types for the Jupiter engine

use crate::{DocumentId, SiteId};
use thiserror::Error;

/// A violated Jupiter precondition.
///
/// Fatal for the OT state of the affected document: the instance must be
/// reset through consistency recovery before it can transform again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformationError {
    /// The peer acknowledges less than the oldest queued operation
    #[error("remote count {remote} precedes oldest unacknowledged operation {oldest}")]
    StaleAcknowledgement { remote: u64, oldest: u64 },

    /// The peer acknowledges operations that were never sent
    #[error("remote count {remote} exceeds local operation count {local}")]
    UnsentAcknowledgement { remote: u64, local: u64 },

    /// The request is not the next one in the causal sequence
    #[error("request local count {received} does not match expected count {expected}")]
    OutOfOrder { received: u64, expected: u64 },
}

/// Jupiter engine errors
#[derive(Error, Debug)]
pub enum JupiterError {
    /// Precondition violated while transforming
    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformationError),

    /// Operation cannot be applied to the given text
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// No binding exists for the site
    #[error("Unknown site {site} for document {document}")]
    UnknownSite { site: SiteId, document: DocumentId },

    /// The hub worker for a document has shut down
    #[error("Document hub closed: {0}")]
    HubClosed(DocumentId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for JupiterError {
    fn from(err: serde_json::Error) -> Self {
        JupiterError::Serialization(err.to_string())
    }
}

/// Result type for Jupiter operations
pub type JupiterResult<T> = Result<T, JupiterError>;
