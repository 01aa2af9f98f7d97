//! Content checksums broadcast by the host

use serde::{Deserialize, Serialize};
use tandem_jupiter::DocumentId;

/// Length and hash of a document that does not exist
pub const MISSING: i64 = -1;

/// Fingerprint of one document's authoritative content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Document the fingerprint belongs to
    pub document: DocumentId,
    /// Content length in bytes, or [`MISSING`]
    pub length: i64,
    /// Content hash, or [`MISSING`]
    pub hash: i64,
    /// False if the document is absent at the host
    pub exists: bool,
}

impl Checksum {
    /// Fingerprint `content`, or the missing sentinel for `None`
    pub fn compute(document: DocumentId, content: Option<&str>) -> Self {
        match content {
            Some(content) => Self::of(document, content),
            None => Self::missing(document),
        }
    }

    /// Fingerprint existing content
    pub fn of(document: DocumentId, content: &str) -> Self {
        Self {
            document,
            length: content.len() as i64,
            hash: content_hash(content),
            exists: true,
        }
    }

    /// Sentinel for an absent document
    pub fn missing(document: DocumentId) -> Self {
        Self {
            document,
            length: MISSING,
            hash: MISSING,
            exists: false,
        }
    }

    /// Compare against the local copy (`None` if absent locally)
    pub fn is_consistent_with(&self, local: Option<&str>) -> bool {
        match (self.exists, local) {
            (true, Some(content)) => {
                self.length == content.len() as i64 && self.hash == content_hash(content)
            }
            (false, None) => true,
            _ => false,
        }
    }
}

/// BLAKE3 of the content folded to 63 bits, so it never equals [`MISSING`]
pub fn content_hash(content: &str) -> i64 {
    let digest = blake3::hash(content.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(head) & i64::MAX
}
