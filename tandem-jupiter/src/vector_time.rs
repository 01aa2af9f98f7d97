//! Two-component vector time of a Jupiter site pair

use serde::{Deserialize, Serialize};

/// Causal clock shared by exactly one client and the server for one
/// document.
///
/// `local` counts operations this site generated, `remote` counts
/// operations received from the peer and applied. Both only ever grow;
/// the value is copied into every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VectorTime {
    /// Operations generated locally
    pub local: u64,
    /// Operations received from the peer
    pub remote: u64,
}

impl VectorTime {
    /// Create a vector time from both counters
    pub fn new(local: u64, remote: u64) -> Self {
        Self { local, remote }
    }

    /// Vector time with both counters at zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// Copy with the local counter advanced by one
    #[must_use]
    pub fn increment_local(self) -> Self {
        Self {
            local: self.local + 1,
            ..self
        }
    }

    /// Copy with the remote counter advanced by one
    #[must_use]
    pub fn increment_remote(self) -> Self {
        Self {
            remote: self.remote + 1,
            ..self
        }
    }

    /// True if neither counter of `self` is behind `other`
    pub fn dominates(&self, other: &Self) -> bool {
        self.local >= other.local && self.remote >= other.remote
    }
}

impl std::fmt::Display for VectorTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.local, self.remote)
    }
}
