//! Wire unit exchanged between a client and the server

use crate::{DocumentId, Operation, SiteId, VectorTime};
use serde::{Deserialize, Serialize};

/// An operation stamped with the sender's vector time.
///
/// Created by the generating Jupiter instance and consumed by exactly one
/// receiving instance. `source` names the participant that authored the
/// edit; requests rebroadcast by the hub keep the original author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Document the operation belongs to
    pub document: DocumentId,
    /// Authoring participant
    pub source: SiteId,
    /// Sender's vector time at generation
    pub vector_time: VectorTime,
    /// The edit
    pub operation: Operation,
}

impl Request {
    /// Create a new request
    pub fn new(
        document: DocumentId,
        source: SiteId,
        vector_time: VectorTime,
        operation: Operation,
    ) -> Self {
        Self {
            document,
            source,
            vector_time,
            operation,
        }
    }

    /// Same request attributed to another author
    #[must_use]
    pub fn with_source(mut self, source: SiteId) -> Self {
        self.source = source;
        self
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> crate::JupiterResult<String> {
        serde_json::to_string(self).map_err(crate::JupiterError::from)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> crate::JupiterResult<Self> {
        serde_json::from_str(json).map_err(crate::JupiterError::from)
    }
}
