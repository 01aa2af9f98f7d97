//! Jupiter Operational Transformation for Tandem
//!
//! Keeps every participant's copy of a shared document convergent while
//! edits travel concurrently through a central hub.
//!
//! ## Overview
//!
//! ```text
//! ┌──────────┐  Request   ┌──────────────────────────────────┐  Request   ┌──────────┐
//! │ Client A │──────────▶│            DocumentHub           │──────────▶│ Client B │
//! │ Jupiter  │◀──────────│ proxy(A)  ─ serializer ─ proxy(B)│◀──────────│ Jupiter  │
//! └──────────┘           └──────────────────────────────────┘           └──────────┘
//! ```
//!
//! Every client runs a client-side [`Jupiter`] per document; the hub keeps
//! one server-side [`Jupiter`] (a proxy) per connected client and applies
//! requests strictly one at a time.
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_jupiter::{DocumentId, Jupiter, Operation, SiteId};
//!
//! let doc = DocumentId::new("notes.txt");
//! let mut client = Jupiter::client(doc.clone(), SiteId(1));
//! let mut server = Jupiter::server(doc, SiteId(0));
//!
//! let request = client.generate_request(Operation::insert(0, "Hello"));
//! let operation = server.receive_request(&request).unwrap();
//! assert_eq!(operation.apply("").unwrap(), "Hello");
//! ```

pub mod algorithm;
pub mod client;
pub mod error;
pub mod hub;
pub mod operation;
pub mod proxy;
pub mod request;
pub mod server;
pub mod transform;
pub mod vector_time;

pub use algorithm::*;
pub use client::*;
pub use error::*;
pub use hub::*;
pub use operation::Operation;
pub use proxy::*;
pub use request::*;
pub use server::*;
pub use transform::transform;
pub use vector_time::*;

use serde::{Deserialize, Serialize};

/// Identifier of a session participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site-{}", self.0)
    }
}

/// Identity of a shared document, usually its project-relative path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a document identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
