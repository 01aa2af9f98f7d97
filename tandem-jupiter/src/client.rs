//! Client side bindings
//!
//! A participant keeps one client-side [`Jupiter`] per shared document,
//! all talking to the same host. The owner of a [`DocumentClient`] is the
//! single thread that applies edits to the local documents.

use crate::{
    DocumentId, Jupiter, JupiterError, JupiterResult, Operation, Request, SiteId, VectorTime,
};
use std::collections::HashMap;
use tracing::debug;

/// One document of a participant, bound to the host
#[derive(Debug, Clone)]
pub struct ClientDocument {
    host: SiteId,
    jupiter: Jupiter,
}

impl ClientDocument {
    /// Bind `document` of `site` to `host`
    pub fn new(document: DocumentId, site: SiteId, host: SiteId) -> Self {
        Self {
            host,
            jupiter: Jupiter::client(document, site),
        }
    }

    /// Get the host site
    pub fn host(&self) -> SiteId {
        self.host
    }

    /// Get the underlying Jupiter instance
    pub fn jupiter(&self) -> &Jupiter {
        &self.jupiter
    }

    /// Stamp a local edit for the host
    pub fn generate(&mut self, operation: Operation) -> Request {
        self.jupiter.generate_request(operation)
    }

    /// Transform a request from the host for local application
    pub fn receive(&mut self, request: &Request) -> JupiterResult<Operation> {
        Ok(self.jupiter.receive_request(request)?)
    }

    /// Map host indices through unacknowledged local edits
    pub fn transform_indices(
        &mut self,
        timestamp: VectorTime,
        indices: &[usize],
    ) -> JupiterResult<Vec<usize>> {
        Ok(self.jupiter.transform_indices(timestamp, indices)?)
    }

    /// Forget history after the content was replaced
    pub fn reset(&mut self) {
        self.jupiter.reset();
    }
}

/// All client bindings of one participant
#[derive(Debug)]
pub struct DocumentClient {
    site: SiteId,
    host: SiteId,
    documents: HashMap<DocumentId, ClientDocument>,
}

impl DocumentClient {
    /// Create the binding set of `site`, connected to `host`
    pub fn new(site: SiteId, host: SiteId) -> Self {
        Self {
            site,
            host,
            documents: HashMap::new(),
        }
    }

    /// Get the local site
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Get the host site
    pub fn host(&self) -> SiteId {
        self.host
    }

    /// Bound documents
    pub fn documents(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    /// Get the binding of a document
    pub fn get(&self, document: &DocumentId) -> Option<&ClientDocument> {
        self.documents.get(document)
    }

    fn binding(&mut self, document: &DocumentId) -> &mut ClientDocument {
        let (site, host) = (self.site, self.host);
        self.documents
            .entry(document.clone())
            .or_insert_with(|| ClientDocument::new(document.clone(), site, host))
    }

    /// Stamp a local edit; binds the document on first use
    pub fn generate(&mut self, document: &DocumentId, operation: Operation) -> Request {
        self.binding(document).generate(operation)
    }

    /// Transform a request from the host
    pub fn receive(&mut self, request: &Request) -> JupiterResult<Operation> {
        self.binding(&request.document).receive(request)
    }

    /// Map host indices for a document
    pub fn transform_indices(
        &mut self,
        document: &DocumentId,
        timestamp: VectorTime,
        indices: &[usize],
    ) -> JupiterResult<Vec<usize>> {
        let site = self.site;
        self.documents
            .get_mut(document)
            .ok_or_else(|| JupiterError::UnknownSite {
                site,
                document: document.clone(),
            })?
            .transform_indices(timestamp, indices)
    }

    /// Reset a document's vector time to (0,0)
    pub fn reset(&mut self, document: &DocumentId) {
        if let Some(binding) = self.documents.get_mut(document) {
            debug!(%document, site = %self.site, "resetting client binding");
            binding.reset();
        }
    }

    /// Drop a document's binding
    pub fn remove(&mut self, document: &DocumentId) -> bool {
        self.documents.remove(document).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binds_documents_lazily() {
        let mut client = DocumentClient::new(SiteId(2), SiteId(0));
        let a = DocumentId::new("a.txt");
        let b = DocumentId::new("b.txt");

        let first = client.generate(&a, Operation::insert(0, "x"));
        let second = client.generate(&a, Operation::insert(1, "y"));
        let other = client.generate(&b, Operation::insert(0, "z"));

        assert_eq!(first.vector_time, VectorTime::new(0, 0));
        assert_eq!(second.vector_time, VectorTime::new(1, 0));
        assert_eq!(other.vector_time, VectorTime::new(0, 0));
        assert_eq!(first.source, SiteId(2));
        assert_eq!(client.documents().count(), 2);
    }

    #[test]
    fn test_reset_and_remove() {
        let mut client = DocumentClient::new(SiteId(2), SiteId(0));
        let doc = DocumentId::new("a.txt");
        client.generate(&doc, Operation::insert(0, "x"));

        client.reset(&doc);
        let binding = client.get(&doc).unwrap();
        assert_eq!(binding.jupiter().vector_time(), VectorTime::zero());
        assert_eq!(binding.host(), SiteId(0));

        assert!(client.remove(&doc));
        assert!(!client.remove(&doc));
    }

    #[test]
    fn test_transform_indices_requires_binding() {
        let mut client = DocumentClient::new(SiteId(2), SiteId(0));
        let result = client.transform_indices(&DocumentId::new("none"), VectorTime::zero(), &[0]);
        assert!(matches!(result, Err(JupiterError::UnknownSite { .. })));
    }
}
