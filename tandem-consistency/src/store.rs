//! Access to the local copies of shared documents

use crate::{ConsistencyError, ConsistencyResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tandem_jupiter::{DocumentId, Operation};

/// A site's view of the documents open in the session
pub trait DocumentStore: Send + Sync {
    /// Documents currently open, including ones that do not exist
    fn open_documents(&self) -> Vec<DocumentId>;

    /// Current content; `None` if the document does not exist
    fn content(&self, document: &DocumentId) -> Option<String>;

    /// Apply an edit; an absent document is created empty first
    fn apply(&self, document: &DocumentId, operation: &Operation) -> ConsistencyResult<()>;

    /// Replace the whole content; `None` marks the document absent
    fn replace(&self, document: &DocumentId, content: Option<String>);

    /// Flush editor buffers of a document
    fn save(&self, document: &DocumentId) -> ConsistencyResult<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<DocumentId, Option<String>>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a document with initial content
    pub fn open(&self, document: impl Into<DocumentId>, content: impl Into<String>) {
        self.documents
            .write()
            .insert(document.into(), Some(content.into()));
    }

    /// Stop tracking a document
    pub fn close(&self, document: &DocumentId) -> bool {
        self.documents.write().remove(document).is_some()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl DocumentStore for MemoryStore {
    fn open_documents(&self) -> Vec<DocumentId> {
        self.documents.read().keys().cloned().collect()
    }

    fn content(&self, document: &DocumentId) -> Option<String> {
        self.documents.read().get(document).cloned().flatten()
    }

    fn apply(&self, document: &DocumentId, operation: &Operation) -> ConsistencyResult<()> {
        let mut documents = self.documents.write();
        let current = documents.get(document).cloned().flatten().unwrap_or_default();
        let edited = operation.apply(&current)?;
        documents.insert(document.clone(), Some(edited));
        Ok(())
    }

    fn replace(&self, document: &DocumentId, content: Option<String>) {
        self.documents.write().insert(document.clone(), content);
    }

    fn save(&self, document: &DocumentId) -> ConsistencyResult<()> {
        if !self.documents.read().contains_key(document) {
            return Err(ConsistencyError::InvalidContent {
                document: document.clone(),
                reason: "document is not open".to_string(),
            });
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_replace() {
        let store = MemoryStore::new();
        let doc = DocumentId::new("a.txt");

        store.apply(&doc, &Operation::insert(0, "abc")).unwrap();
        assert_eq!(store.content(&doc).as_deref(), Some("abc"));

        assert!(store.apply(&doc, &Operation::delete(5, "x")).is_err());
        assert_eq!(store.content(&doc).as_deref(), Some("abc"));

        store.replace(&doc, None);
        assert_eq!(store.content(&doc), None);
        assert_eq!(store.open_documents(), vec![doc.clone()]);

        assert!(store.close(&doc));
        assert!(store.open_documents().is_empty());
    }

    #[test]
    fn test_save_requires_open_document() {
        let store = MemoryStore::new();
        store.open("a.txt", "x");
        store.save(&DocumentId::new("a.txt")).unwrap();
        assert!(store.save(&DocumentId::new("b.txt")).is_err());
        assert_eq!(store.save_count(), 1);
    }
}
