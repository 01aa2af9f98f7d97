//! Client side checksum watchdog and recovery driver
//!
//! ```text
//! Consistent ──(checksum mismatch)──▶ Inconsistent
//!     ▲                                    │
//!     └──(recovery done, checksum matches)─┘
//!
//! any state ──(detach)──▶ Detached
//! ```

use crate::{
    Activity, ActivityHandler, ActivitySink, Checksum, ConsistencyError, ConsistencyResult,
    DocumentStore, Recipient, RecoveryConfig, RecoveryId, RecoveryIdGenerator,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tandem_jupiter::{DocumentId, SiteId};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Consistency state of one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Consistent,
    Inconsistent,
    Detached,
}

/// Cooperative cancellation of a recovery
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a finished recovery round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Round id; `None` if there was nothing to recover
    pub recovery_id: Option<RecoveryId>,
    /// Documents requested from the host
    pub documents: Vec<DocumentId>,
    /// Requested documents still inconsistent after the round
    pub still_inconsistent: Vec<DocumentId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RecoveryReport {
    /// True if every requested document is consistent again
    pub fn is_complete(&self) -> bool {
        self.still_inconsistent.is_empty()
    }
}

#[derive(Debug, Default)]
struct WatchState {
    checksums: HashMap<DocumentId, Checksum>,
    inconsistent: BTreeSet<DocumentId>,
    detached: bool,
}

#[derive(Debug)]
struct ActiveRound {
    recovery_id: RecoveryId,
    documents: BTreeSet<DocumentId>,
}

struct ClientInner {
    host: SiteId,
    config: RecoveryConfig,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn ActivitySink>,
    ids: Arc<dyn RecoveryIdGenerator>,
    state: Mutex<WatchState>,
    signal: watch::Sender<bool>,
    recovery: AsyncMutex<()>,
    active: Mutex<Option<ActiveRound>>,
    /// Outstanding messages of the active round: one per file plus the
    /// end-of-round marker
    remaining: AtomicUsize,
}

/// Compares host checksums against local content and drives recovery
#[derive(Clone)]
pub struct ClientWatchdog {
    inner: Arc<ClientInner>,
}

impl ClientWatchdog {
    /// Create a watchdog reporting to `host`
    pub fn new(
        host: SiteId,
        config: RecoveryConfig,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
        ids: Arc<dyn RecoveryIdGenerator>,
    ) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                host,
                config,
                store,
                sink,
                ids,
                state: Mutex::new(WatchState::default()),
                signal,
                recovery: AsyncMutex::new(()),
                active: Mutex::new(None),
                remaining: AtomicUsize::new(0),
            }),
        }
    }

    /// Compare a host checksum with the local copy
    pub fn on_checksum(&self, checksum: Checksum) -> DocumentState {
        let local = self.inner.store.content(&checksum.document);
        let consistent = checksum.is_consistent_with(local.as_deref());
        let document = checksum.document.clone();

        let mut state = self.inner.state.lock();
        if state.detached {
            return DocumentState::Detached;
        }
        state.checksums.insert(document.clone(), checksum);
        let changed = if consistent {
            state.inconsistent.remove(&document)
        } else {
            state.inconsistent.insert(document.clone())
        };
        let present = !state.inconsistent.is_empty();
        drop(state);

        if changed {
            if consistent {
                info!(%document, "document consistent again");
            } else {
                warn!(%document, "document inconsistent with host");
            }
            self.publish(present);
        }
        if consistent {
            DocumentState::Consistent
        } else {
            DocumentState::Inconsistent
        }
    }

    /// Compare the local copy with the last checksum received
    pub fn recheck(&self, document: &DocumentId) -> DocumentState {
        let checksum = self.inner.state.lock().checksums.get(document).cloned();
        match checksum {
            Some(checksum) => self.on_checksum(checksum),
            None => self.state(document),
        }
    }

    /// Flag a document whose OT state failed, without waiting for a checksum
    pub fn mark_inconsistent(&self, document: &DocumentId) {
        let mut state = self.inner.state.lock();
        if state.detached || !state.inconsistent.insert(document.clone()) {
            return;
        }
        drop(state);
        warn!(%document, "document marked inconsistent");
        self.publish(true);
    }

    /// Current state of a document
    pub fn state(&self, document: &DocumentId) -> DocumentState {
        let state = self.inner.state.lock();
        if state.detached {
            DocumentState::Detached
        } else if state.inconsistent.contains(document) {
            DocumentState::Inconsistent
        } else {
            DocumentState::Consistent
        }
    }

    /// Watch the "inconsistency present" signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.signal.subscribe()
    }

    /// Check if any document is inconsistent
    pub fn has_inconsistencies(&self) -> bool {
        !self.inner.state.lock().inconsistent.is_empty()
    }

    /// Currently inconsistent documents, sorted
    pub fn inconsistent_documents(&self) -> Vec<DocumentId> {
        self.inner.state.lock().inconsistent.iter().cloned().collect()
    }

    /// True while `document` is part of an unfinished recovery round
    pub fn is_recovering(&self, document: &DocumentId) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|round| round.documents.contains(document))
    }

    /// Messages still expected for the active round
    pub fn files_remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Count a file of the active round; content is applied by the caller
    pub fn on_recovery_file(&self, recovery_id: &RecoveryId, document: &DocumentId) {
        if !self.is_active(recovery_id) {
            debug!(%recovery_id, %document, "recovery file outside active round");
            return;
        }
        self.decrement();
        debug!(%recovery_id, %document, remaining = self.files_remaining(), "recovery file received");
    }

    /// End the active round
    pub fn on_recovery_complete(&self, recovery_id: &RecoveryId) {
        if self.is_active(recovery_id) {
            self.inner.remaining.store(0, Ordering::Release);
        }
    }

    /// Ask the host to resend every inconsistent document and wait until
    /// the round ends.
    ///
    /// Concurrent calls run one after another.
    pub async fn run_recovery(&self, cancel: &CancelFlag) -> ConsistencyResult<RecoveryReport> {
        let _single_flight = self.inner.recovery.lock().await;
        let started_at = Utc::now();
        self.ensure_running(cancel)?;

        let documents = self.inconsistent_documents();
        if documents.is_empty() {
            return Ok(RecoveryReport {
                recovery_id: None,
                documents,
                still_inconsistent: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            });
        }

        for document in &documents {
            // a copy missing locally has nothing to flush
            if let Err(err) = self.inner.store.save(document) {
                warn!(%document, "could not save before recovery: {}", err);
            }
        }

        let recovery_id = self.inner.ids.next_id();
        self.inner
            .remaining
            .store(documents.len() + 1, Ordering::Release);
        *self.inner.active.lock() = Some(ActiveRound {
            recovery_id: recovery_id.clone(),
            documents: documents.iter().cloned().collect(),
        });
        info!(%recovery_id, documents = documents.len(), "recovery requested");

        let outcome = self.request_and_wait(&recovery_id, &documents, cancel).await;
        self.inner.active.lock().take();
        self.inner.remaining.store(0, Ordering::Release);
        outcome?;

        let still_inconsistent: Vec<DocumentId> = {
            let state = self.inner.state.lock();
            documents
                .iter()
                .filter(|document| state.inconsistent.contains(*document))
                .cloned()
                .collect()
        };
        info!(%recovery_id, unresolved = still_inconsistent.len(), "recovery finished");

        Ok(RecoveryReport {
            recovery_id: Some(recovery_id),
            documents,
            still_inconsistent,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Leave the session: clear all state and end any waiting recovery
    pub fn detach(&self) {
        {
            let mut state = self.inner.state.lock();
            state.detached = true;
            state.checksums.clear();
            state.inconsistent.clear();
        }
        self.publish(false);
        debug!("client watchdog detached");
    }

    /// Check if the watchdog was detached
    pub fn is_detached(&self) -> bool {
        self.inner.state.lock().detached
    }

    async fn request_and_wait(
        &self,
        recovery_id: &RecoveryId,
        documents: &[DocumentId],
        cancel: &CancelFlag,
    ) -> ConsistencyResult<()> {
        self.inner
            .sink
            .send(
                Recipient::Site(self.inner.host),
                Activity::ChecksumError {
                    recovery_id: recovery_id.clone(),
                    documents: documents.to_vec(),
                },
            )
            .await?;

        let deadline = self.inner.config.timeout().map(|timeout| Instant::now() + timeout);
        loop {
            self.ensure_running(cancel)?;
            if self.files_remaining() == 0 {
                return Ok(());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(%recovery_id, "recovery timed out");
                return Err(ConsistencyError::RecoveryTimeout(recovery_id.clone()));
            }
            time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    fn ensure_running(&self, cancel: &CancelFlag) -> ConsistencyResult<()> {
        if cancel.is_cancelled() {
            return Err(ConsistencyError::Cancelled);
        }
        if self.is_detached() {
            return Err(ConsistencyError::SessionEnded);
        }
        Ok(())
    }

    fn is_active(&self, recovery_id: &RecoveryId) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|round| &round.recovery_id == recovery_id)
    }

    fn decrement(&self) {
        let _ = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn publish(&self, present: bool) {
        self.inner.signal.send_replace(present);
    }
}

#[async_trait]
impl ActivityHandler for ClientWatchdog {
    async fn handle(&self, source: SiteId, activity: &Activity) -> ConsistencyResult<()> {
        if source != self.inner.host {
            debug!(%source, kind = ?activity.kind(), "ignoring activity not sent by host");
            return Ok(());
        }
        match activity {
            Activity::Checksum(checksum) => {
                self.on_checksum(checksum.clone());
            }
            Activity::RecoveryFile {
                recovery_id,
                document,
                ..
            } => self.on_recovery_file(recovery_id, document),
            Activity::ChecksumError {
                recovery_id,
                documents,
            } if documents.is_empty() => self.on_recovery_complete(recovery_id),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelSink, Envelope, MemoryStore, SequentialRecoveryIds};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const HOST: SiteId = SiteId(0);

    fn watchdog(
        store: Arc<MemoryStore>,
        config: RecoveryConfig,
    ) -> (ClientWatchdog, mpsc::UnboundedReceiver<Envelope>) {
        let (sink, envelopes) = ChannelSink::new();
        let watchdog = ClientWatchdog::new(
            HOST,
            config,
            store,
            Arc::new(sink),
            Arc::new(SequentialRecoveryIds::new("r")),
        );
        (watchdog, envelopes)
    }

    fn fast() -> RecoveryConfig {
        RecoveryConfig {
            poll_interval_ms: 5,
            timeout_ms: Some(2_000),
        }
    }

    #[test]
    fn test_mismatch_rules() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        store.replace(&DocumentId::new("b.txt"), None);
        let (watchdog, _envelopes) = watchdog(store, fast());
        let a = DocumentId::new("a.txt");
        let b = DocumentId::new("b.txt");

        assert_eq!(
            watchdog.on_checksum(Checksum::of(a.clone(), "alpha")),
            DocumentState::Consistent
        );
        // host has it, local copy differs
        assert_eq!(
            watchdog.on_checksum(Checksum::of(a.clone(), "alpha!")),
            DocumentState::Inconsistent
        );
        // host says missing, local exists
        assert_eq!(
            watchdog.on_checksum(Checksum::missing(a.clone())),
            DocumentState::Inconsistent
        );
        // host has it, local missing
        assert_eq!(
            watchdog.on_checksum(Checksum::of(b.clone(), "")),
            DocumentState::Inconsistent
        );
        assert_eq!(
            watchdog.on_checksum(Checksum::missing(b.clone())),
            DocumentState::Consistent
        );
        assert_eq!(watchdog.inconsistent_documents(), vec![a]);
    }

    #[tokio::test]
    async fn test_signal_follows_inconsistent_set() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        let (watchdog, _envelopes) = watchdog(store.clone(), fast());
        let a = DocumentId::new("a.txt");
        let mut signal = watchdog.subscribe();
        assert!(!*signal.borrow());

        watchdog.on_checksum(Checksum::of(a.clone(), "beta"));
        signal.changed().await.unwrap();
        assert!(*signal.borrow_and_update());
        assert!(watchdog.has_inconsistencies());

        store.replace(&a, Some("beta".to_string()));
        assert_eq!(watchdog.recheck(&a), DocumentState::Consistent);
        signal.changed().await.unwrap();
        assert!(!*signal.borrow_and_update());

        watchdog.mark_inconsistent(&a);
        assert_eq!(watchdog.state(&a), DocumentState::Inconsistent);
        watchdog.detach();
        assert_eq!(watchdog.state(&a), DocumentState::Detached);
        assert!(!watchdog.has_inconsistencies());
        assert_eq!(
            watchdog.on_checksum(Checksum::of(a, "x")),
            DocumentState::Detached
        );
    }

    #[tokio::test]
    async fn test_recovery_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let doc = DocumentId::new("d.txt");
        store.open(doc.clone(), "x".repeat(118));
        let (watchdog, mut envelopes) = watchdog(store.clone(), fast());

        let host_content = "y".repeat(120);
        let host_checksum = Checksum::of(doc.clone(), &host_content);
        assert_eq!(host_checksum.length, 120);
        watchdog.on_checksum(host_checksum.clone());
        assert_eq!(watchdog.inconsistent_documents(), vec![doc.clone()]);

        let recovering = watchdog.clone();
        let task = tokio::spawn(async move { recovering.run_recovery(&CancelFlag::new()).await });

        let envelope = envelopes.recv().await.unwrap();
        assert_eq!(envelope.recipient, Recipient::Site(HOST));
        let Activity::ChecksumError {
            recovery_id,
            documents,
        } = envelope.activity
        else {
            panic!("expected recovery request");
        };
        assert_eq!(recovery_id, RecoveryId::new("r-1"));
        assert_eq!(documents, vec![doc.clone()]);
        assert_eq!(store.save_count(), 1);
        assert!(watchdog.is_recovering(&doc));

        // what the session does on the host's file, checksum and marker
        store.replace(&doc, Some(host_content));
        watchdog.on_recovery_file(&recovery_id, &doc);
        assert_eq!(watchdog.files_remaining(), 1);
        watchdog.on_checksum(host_checksum);
        watchdog.on_recovery_complete(&recovery_id);

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.recovery_id, Some(recovery_id));
        assert!(report.is_complete());
        assert!(!watchdog.has_inconsistencies());
        assert!(!watchdog.is_recovering(&doc));
    }

    #[tokio::test]
    async fn test_recovers_document_missing_locally() {
        let store = Arc::new(MemoryStore::new());
        let unopened = DocumentId::new("new.txt");
        let stale = DocumentId::new("stale.txt");
        store.open(stale.clone(), "old");
        let (watchdog, mut envelopes) = watchdog(store.clone(), fast());

        assert_eq!(
            watchdog.on_checksum(Checksum::of(unopened.clone(), "hello")),
            DocumentState::Inconsistent
        );
        watchdog.on_checksum(Checksum::of(stale.clone(), "new"));

        let recovering = watchdog.clone();
        let task = tokio::spawn(async move { recovering.run_recovery(&CancelFlag::new()).await });

        let envelope = envelopes.recv().await.unwrap();
        let Activity::ChecksumError {
            recovery_id,
            documents,
        } = envelope.activity
        else {
            panic!("expected recovery request");
        };
        assert_eq!(documents, vec![unopened.clone(), stale.clone()]);
        assert_eq!(store.save_count(), 1);

        for (document, content) in [(&unopened, "hello"), (&stale, "new")] {
            store.replace(document, Some(content.to_string()));
            watchdog.on_recovery_file(&recovery_id, document);
            watchdog.on_checksum(Checksum::of(document.clone(), content));
        }
        watchdog.on_recovery_complete(&recovery_id);

        let report = task.await.unwrap().unwrap();
        assert!(report.is_complete());
        assert_eq!(store.content(&unopened).as_deref(), Some("hello"));
        assert!(!watchdog.has_inconsistencies());
    }

    #[tokio::test]
    async fn test_counter_never_goes_below_zero() {
        let store = Arc::new(MemoryStore::new());
        let (watchdog, _envelopes) = watchdog(store, fast());
        let id = RecoveryId::new("r-1");
        *watchdog.inner.active.lock() = Some(ActiveRound {
            recovery_id: id.clone(),
            documents: BTreeSet::new(),
        });
        watchdog.inner.remaining.store(1, Ordering::Release);

        watchdog.on_recovery_file(&id, &DocumentId::new("a"));
        watchdog.on_recovery_file(&id, &DocumentId::new("b"));
        assert_eq!(watchdog.files_remaining(), 0);

        watchdog.on_recovery_file(&RecoveryId::new("other"), &DocumentId::new("c"));
        assert_eq!(watchdog.files_remaining(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_recovery_lock() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        let (watchdog, mut envelopes) = watchdog(store, fast());
        watchdog.mark_inconsistent(&DocumentId::new("a.txt"));

        let cancel = CancelFlag::new();
        let recovering = watchdog.clone();
        let flag = cancel.clone();
        let task = tokio::spawn(async move { recovering.run_recovery(&flag).await });

        envelopes.recv().await.unwrap();
        cancel.cancel();
        assert!(matches!(
            task.await.unwrap(),
            Err(ConsistencyError::Cancelled)
        ));
        assert!(watchdog.has_inconsistencies());

        // a new attempt is not starved by the cancelled one
        let again = tokio::time::timeout(Duration::from_secs(1), watchdog.run_recovery(&cancel)).await;
        assert!(matches!(again, Ok(Err(ConsistencyError::Cancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_times_out() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        let config = RecoveryConfig {
            poll_interval_ms: 100,
            timeout_ms: Some(1_000),
        };
        let (watchdog, _envelopes) = watchdog(store, config);
        watchdog.mark_inconsistent(&DocumentId::new("a.txt"));

        let result = watchdog.run_recovery(&CancelFlag::new()).await;
        assert!(matches!(result, Err(ConsistencyError::RecoveryTimeout(id)) if id.as_str() == "r-1"));
        assert!(watchdog.has_inconsistencies());
    }

    #[tokio::test]
    async fn test_detach_ends_waiting_recovery() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        let (watchdog, mut envelopes) = watchdog(store, fast());
        watchdog.mark_inconsistent(&DocumentId::new("a.txt"));

        let recovering = watchdog.clone();
        let task = tokio::spawn(async move { recovering.run_recovery(&CancelFlag::new()).await });
        envelopes.recv().await.unwrap();
        watchdog.detach();

        assert!(matches!(
            task.await.unwrap(),
            Err(ConsistencyError::SessionEnded)
        ));
    }

    #[tokio::test]
    async fn test_handler_ignores_other_sources() {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "alpha");
        let (watchdog, _envelopes) = watchdog(store, fast());
        let bogus = Activity::Checksum(Checksum::of(DocumentId::new("a.txt"), "zzz"));

        watchdog.handle(SiteId(7), &bogus).await.unwrap();
        assert!(!watchdog.has_inconsistencies());
        watchdog.handle(HOST, &bogus).await.unwrap();
        assert!(watchdog.has_inconsistencies());
    }
}
