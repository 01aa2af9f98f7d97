//! # Tandem
//!
//! Real-time collaborative editing core. A host owns the authoritative copy
//! of every shared document; participants edit concurrently and their
//! edits are merged with the Jupiter operational transformation algorithm.
//! A checksum watchdog detects copies that drift apart anyway and a
//! recovery protocol replaces them with the host's content.
//!
//! The crate wires the two layers into session actors:
//!
//! - [`HostSession`] runs the document hubs, the checksum watchdog and the
//!   recovery responder.
//! - [`ClientSession`] applies the host's requests, compares checksums and
//!   drives recovery rounds.
//!
//! Both talk to the network only through an [`ActivitySink`]; whatever
//! transport carries activities hands inbound ones to `receive`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem::{ChannelSink, HostSession, MemoryStore, Operation, SiteId, TandemConfig};
//!
//! # async fn run() -> tandem::TandemResult<()> {
//! let config = TandemConfig::from_env();
//! tandem::logging::init(&config.log)?;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.open("notes.txt", "hello");
//! let (sink, _outbound) = ChannelSink::new();
//!
//! let host = HostSession::start(&config, SiteId(1), store, Arc::new(sink))?;
//! host.join(SiteId(2)).await?;
//! host.edit("notes.txt".into(), Operation::insert(5, " world")).await?;
//! host.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod logging;

pub use client::ClientSession;
pub use config::TandemConfig;
pub use error::{TandemError, TandemResult};
pub use event::SessionEvent;
pub use host::HostSession;
pub use logging::{LogConfig, LogFormat};

pub use tandem_consistency;
pub use tandem_jupiter;

pub use tandem_consistency::{
    Activity, ActivityHandler, ActivityKind, ActivityRouter, ActivitySink, CancelFlag,
    ChannelSink, Checksum, ClientWatchdog, DocumentState, DocumentStore, Envelope, HostWatchdog,
    MemoryStore, Recipient, RecoveryConfig, RecoveryId, RecoveryReport, WatchdogConfig,
};
pub use tandem_jupiter::{DocumentId, Operation, Request, SiteId, VectorTime};
