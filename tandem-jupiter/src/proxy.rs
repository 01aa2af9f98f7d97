//! Server side binding of one client

use crate::{DocumentId, Jupiter, Operation, Request, SiteId, TransformationError, VectorTime};

/// The hub's server-side Jupiter instance for one remote client
#[derive(Debug, Clone)]
pub struct ProxyDocument {
    client: SiteId,
    jupiter: Jupiter,
}

impl ProxyDocument {
    /// Create a proxy for `client` on `document`, owned by `host`
    pub fn new(document: DocumentId, host: SiteId, client: SiteId) -> Self {
        Self {
            client,
            jupiter: Jupiter::server(document, host),
        }
    }

    /// Get the remote client
    pub fn client(&self) -> SiteId {
        self.client
    }

    /// Current vector time of this proxy
    pub fn vector_time(&self) -> VectorTime {
        self.jupiter.vector_time()
    }

    /// Get the underlying Jupiter instance
    pub fn jupiter(&self) -> &Jupiter {
        &self.jupiter
    }

    /// Transform a request received from the client
    pub fn receive(&mut self, request: &Request) -> Result<Operation, TransformationError> {
        self.jupiter.receive_request(request)
    }

    /// Stamp an operation for the client, attributed to `author`
    pub fn generate(&mut self, operation: Operation, author: SiteId) -> Request {
        self.jupiter.generate_request(operation).with_source(author)
    }

    /// Forget history after the client's content was replaced
    pub fn reset(&mut self) {
        self.jupiter.reset();
    }
}
