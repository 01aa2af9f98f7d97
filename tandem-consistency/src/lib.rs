//! Checksum watchdog and recovery protocol for Tandem
//!
//! The Jupiter engine keeps copies convergent as long as its invariants
//! hold. This crate is the safety net for when they do not: the host
//! periodically broadcasts a [`Checksum`] of every open document, clients
//! compare it with their local copy and, on mismatch, ask the host to
//! resend the authoritative content.
//!
//! ## Protocol
//!
//! ```text
//! host                                     client
//!  │── Checksum{doc, len, hash} ─────────────▶│ mismatch: doc inconsistent
//!  │◀──────── ChecksumError{id, [doc]} ───────│ run_recovery()
//!  │  reset proxy of doc                      │
//!  │── RecoveryFile{id, doc, content} ───────▶│ reset Jupiter, replace content
//!  │── Checksum{doc, len, hash} ─────────────▶│ consistent again
//!  │── ChecksumError{id, []} ────────────────▶│ round complete
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_consistency::*;
//! use tandem_jupiter::{DocumentId, SiteId};
//!
//! let store = Arc::new(MemoryStore::new());
//! store.open("notes.txt", "draft");
//! let (sink, _outbox) = ChannelSink::new();
//! let watchdog = ClientWatchdog::new(
//!     SiteId(0),
//!     RecoveryConfig::default(),
//!     store,
//!     Arc::new(sink),
//!     Arc::new(RandomRecoveryIds),
//! );
//!
//! let host = Checksum::of(DocumentId::new("notes.txt"), "final");
//! assert_eq!(watchdog.on_checksum(host), DocumentState::Inconsistent);
//! assert!(watchdog.has_inconsistencies());
//! ```

pub mod activity;
pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod recovery;
pub mod router;
pub mod store;

pub use activity::*;
pub use checksum::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use host::*;
pub use recovery::*;
pub use router::*;
pub use store::*;
