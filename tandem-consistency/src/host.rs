//! Host side checksum watchdog
//!
//! Periodically fingerprints every open document and broadcasts the
//! checksums to the session. A gate mutex is held for the duration of
//! each cycle; blocking the watchdog means holding that gate, so `block`
//! returns only after any in-flight cycle finished. Pauses are counted
//! apart from the gate, so a running cycle does not read as blocked.

use crate::{
    Activity, ActivitySink, Checksum, ConsistencyResult, DocumentStore, Recipient, WatchdogConfig,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tandem_jupiter::DocumentId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};

/// Pause of the watchdog; checksums resume when dropped
#[must_use = "the watchdog resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BlockGuard {
    _gate: OwnedMutexGuard<()>,
    paused: Arc<AtomicUsize>,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.paused.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Timer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct HostInner {
    config: WatchdogConfig,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn ActivitySink>,
    gate: Arc<AsyncMutex<()>>,
    /// Live block guards
    paused: Arc<AtomicUsize>,
    /// Serializes `block` calls
    blocking: AsyncMutex<()>,
    manual_block: Mutex<Option<BlockGuard>>,
    cache: Mutex<HashMap<DocumentId, Checksum>>,
    dirty: Mutex<HashSet<DocumentId>>,
    timer: Mutex<Option<Timer>>,
}

/// Periodic checksum broadcaster, run by the session host
#[derive(Clone)]
pub struct HostWatchdog {
    inner: Arc<HostInner>,
}

impl HostWatchdog {
    /// Create a stopped watchdog
    pub fn new(
        config: WatchdogConfig,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                store,
                sink,
                gate: Arc::new(AsyncMutex::new(())),
                paused: Arc::new(AtomicUsize::new(0)),
                blocking: AsyncMutex::new(()),
                manual_block: Mutex::new(None),
                cache: Mutex::new(HashMap::new()),
                dirty: Mutex::new(HashSet::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &WatchdogConfig {
        &self.inner.config
    }

    /// Start the periodic timer; no-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return;
        }

        let (stop, mut stopped) = oneshot::channel();
        let watchdog = self.clone();
        let period = self.inner.config.checksum_interval();
        let task = async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = period.as_millis() as u64, "checksum watchdog started");

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Ok(_gate) = watchdog.inner.gate.try_lock() else {
                            debug!("watchdog blocked, skipping cycle");
                            continue;
                        };
                        if let Err(err) = watchdog.run_cycle().await {
                            warn!("checksum cycle failed: {}", err);
                        }
                    }
                }
            }
            info!("checksum watchdog stopped");
        };

        let handle = tokio::spawn(task.instrument(info_span!("host_watchdog")));
        *timer = Some(Timer { stop, handle });
    }

    /// True while the timer runs
    pub fn is_running(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    /// Stop the timer, waiting up to the shutdown timeout for an
    /// in-flight cycle, then drop cached checksums
    pub async fn stop(&self) {
        let timer = self.inner.timer.lock().take();
        if let Some(Timer { stop, mut handle }) = timer {
            let _ = stop.send(());
            let timeout = self.inner.config.shutdown_timeout();
            match time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("checksum watchdog task failed: {}", err),
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "checksum watchdog did not stop in time");
                    handle.abort();
                }
            }
        }
        self.inner.cache.lock().clear();
        self.inner.dirty.lock().clear();
    }

    /// Compute and broadcast checksums now, waiting while blocked.
    ///
    /// Returns the number of checksums sent.
    pub async fn check_now(&self) -> ConsistencyResult<usize> {
        let _gate = self.inner.gate.lock().await;
        self.run_cycle().await
    }

    /// Note that a document changed since its last checksum
    pub fn mark_dirty(&self, document: &DocumentId) {
        self.inner.dirty.lock().insert(document.clone());
    }

    /// Pause until [`unblock`](Self::unblock); returns once no cycle runs.
    ///
    /// Blocking an already blocked watchdog is a no-op.
    pub async fn block(&self) {
        let _serial = self.inner.blocking.lock().await;
        if self.inner.manual_block.lock().is_some() {
            return;
        }
        let guard = self.block_scoped().await;
        *self.inner.manual_block.lock() = Some(guard);
    }

    /// Resume after [`block`](Self::block)
    pub fn unblock(&self) {
        self.inner.manual_block.lock().take();
    }

    /// Pause for the lifetime of the returned guard
    pub async fn block_scoped(&self) -> BlockGuard {
        let gate = self.inner.gate.clone().lock_owned().await;
        self.inner.paused.fetch_add(1, Ordering::AcqRel);
        BlockGuard {
            _gate: gate,
            paused: self.inner.paused.clone(),
        }
    }

    /// True while paused; a running cycle does not count
    pub fn is_blocked(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire) > 0
    }

    /// Last checksum sent for a document
    pub fn last_checksum(&self, document: &DocumentId) -> Option<Checksum> {
        self.inner.cache.lock().get(document).cloned()
    }

    async fn run_cycle(&self) -> ConsistencyResult<usize> {
        let documents = self.inner.store.open_documents();
        let checksums: Vec<Checksum> = {
            let mut cache = self.inner.cache.lock();
            let mut dirty = self.inner.dirty.lock();
            cache.retain(|document, _| documents.contains(document));

            documents
                .iter()
                .map(|document| {
                    if dirty.remove(document) {
                        cache.remove(document);
                    }
                    cache
                        .entry(document.clone())
                        .or_insert_with(|| {
                            let content = self.inner.store.content(document);
                            Checksum::compute(document.clone(), content.as_deref())
                        })
                        .clone()
                })
                .collect()
        };

        for checksum in &checksums {
            self.inner
                .sink
                .send(Recipient::Everyone, Activity::Checksum(checksum.clone()))
                .await?;
        }
        debug!(documents = checksums.len(), "checksums broadcast");
        Ok(checksums.len())
    }
}
