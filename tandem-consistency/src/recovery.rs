//! Recovery round identifiers and the host side responder

use crate::{
    Activity, ActivitySink, BlockGuard, Checksum, ConsistencyResult, DocumentStore, HostWatchdog,
    Recipient,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_jupiter::{DocumentId, SiteId};
use tracing::{debug, info};
use uuid::Uuid;

/// Correlation token of one recovery round
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryId(String);

impl RecoveryId {
    /// Create a recovery id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh recovery ids
pub trait RecoveryIdGenerator: Send + Sync {
    /// Produce an id not handed out before
    fn next_id(&self) -> RecoveryId;
}

/// Random v4 UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRecoveryIds;

impl RecoveryIdGenerator for RandomRecoveryIds {
    fn next_id(&self) -> RecoveryId {
        RecoveryId(Uuid::new_v4().to_string())
    }
}

/// Deterministic `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialRecoveryIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialRecoveryIds {
    /// Create a generator starting at 1
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl RecoveryIdGenerator for SequentialRecoveryIds {
    fn next_id(&self) -> RecoveryId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        RecoveryId(format!("{}-{}", self.prefix, n))
    }
}

/// Host side of recovery: resends authoritative content
#[derive(Clone)]
pub struct RecoveryResponder {
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn ActivitySink>,
    watchdog: HostWatchdog,
}

impl RecoveryResponder {
    /// Create a responder
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
        watchdog: HostWatchdog,
    ) -> Self {
        Self {
            store,
            sink,
            watchdog,
        }
    }

    /// Open a round for `site`; periodic checksums pause until it ends.
    ///
    /// The caller resets the site's Jupiter proxy of each document before
    /// calling [`RecoveryRound::resend`] for it.
    pub async fn begin(&self, site: SiteId, recovery_id: RecoveryId) -> RecoveryRound {
        let block = self.watchdog.block_scoped().await;
        info!(%site, %recovery_id, "recovery round started");
        RecoveryRound {
            responder: self.clone(),
            site,
            recovery_id,
            sent: Vec::new(),
            _block: block,
        }
    }
}

/// One in-progress recovery round
#[must_use = "a round must be finished to tell the client no more files follow"]
pub struct RecoveryRound {
    responder: RecoveryResponder,
    site: SiteId,
    recovery_id: RecoveryId,
    sent: Vec<DocumentId>,
    _block: BlockGuard,
}

impl RecoveryRound {
    /// Get the recovery id
    pub fn recovery_id(&self) -> &RecoveryId {
        &self.recovery_id
    }

    /// Send the content of `document` followed by its checksum
    pub async fn resend(&mut self, document: &DocumentId) -> ConsistencyResult<Checksum> {
        let content = self.responder.store.content(document);
        let checksum = Checksum::compute(document.clone(), content.as_deref());
        let recipient = Recipient::Site(self.site);

        self.responder
            .sink
            .send(
                recipient,
                Activity::RecoveryFile {
                    recovery_id: self.recovery_id.clone(),
                    document: document.clone(),
                    content: content.map(Bytes::from),
                },
            )
            .await?;
        self.responder
            .sink
            .send(recipient, Activity::Checksum(checksum.clone()))
            .await?;

        debug!(site = %self.site, %document, exists = checksum.exists, "document resent");
        self.sent.push(document.clone());
        Ok(checksum)
    }

    /// Send the end-of-round marker and resume checksums.
    ///
    /// Returns the documents resent.
    pub async fn finish(self) -> ConsistencyResult<Vec<DocumentId>> {
        self.responder
            .sink
            .send(
                Recipient::Site(self.site),
                Activity::ChecksumError {
                    recovery_id: self.recovery_id.clone(),
                    documents: Vec::new(),
                },
            )
            .await?;
        info!(
            site = %self.site,
            recovery_id = %self.recovery_id,
            files = self.sent.len(),
            "recovery round finished"
        );
        Ok(self.sent)
    }
}
