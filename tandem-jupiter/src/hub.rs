//! Server side multiplexer for one shared document
//!
//! The two-party Jupiter algorithm is extended to N clients by routing all
//! edits through the server: one proxy per client, and a single worker
//! task that dequeues a request, applies it to the sender's proxy and
//! rebroadcasts the result through every other proxy before touching the
//! next request. The worker is the only code that ever sees the proxies;
//! membership changes from other tasks travel as commands on the same
//! queue.

use crate::{
    DocumentId, JupiterError, JupiterResult, Operation, ProxyDocument, Request, SiteId,
    TransformationError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Result of serializing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    /// Document the request belonged to
    pub document: DocumentId,
    /// Author of the request
    pub origin: SiteId,
    /// Operation as applied in the hub's linear history
    pub operation: Operation,
    /// Requests for every other connected site
    pub requests: Vec<(SiteId, Request)>,
}

/// A precondition failure that stopped a hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubFault {
    /// Affected document
    pub document: DocumentId,
    /// Site whose request failed
    pub site: SiteId,
    /// Violated precondition
    pub error: TransformationError,
}

/// Output of a hub worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A request was serialized and must be delivered
    Outgoing(Broadcast),
    /// Serialization stopped; the document needs recovery
    Fault(HubFault),
    /// A proxy was reset; every event for the site emitted before this
    /// one predates the reset
    Reset { document: DocumentId, site: SiteId },
}

impl HubEvent {
    /// Document the event refers to
    pub fn document(&self) -> &DocumentId {
        match self {
            HubEvent::Outgoing(broadcast) => &broadcast.document,
            HubEvent::Fault(fault) => &fault.document,
            HubEvent::Reset { document, .. } => document,
        }
    }
}

/// Proxies of one document and the apply/rebroadcast step
#[derive(Debug)]
pub struct HubCore {
    document: DocumentId,
    host: SiteId,
    proxies: BTreeMap<SiteId, ProxyDocument>,
}

impl HubCore {
    /// Create a core without clients
    pub fn new(document: DocumentId, host: SiteId) -> Self {
        Self {
            document,
            host,
            proxies: BTreeMap::new(),
        }
    }

    /// Get the document
    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Connected sites
    pub fn sites(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.proxies.keys().copied()
    }

    /// Get the proxy of a site
    pub fn proxy(&self, site: SiteId) -> Option<&ProxyDocument> {
        self.proxies.get(&site)
    }

    /// Attach a proxy; false if the site was already connected
    pub fn admit(&mut self, site: SiteId) -> bool {
        if self.proxies.contains_key(&site) {
            return false;
        }
        let proxy = ProxyDocument::new(self.document.clone(), self.host, site);
        self.proxies.insert(site, proxy);
        true
    }

    /// Detach a proxy
    pub fn evict(&mut self, site: SiteId) -> bool {
        self.proxies.remove(&site).is_some()
    }

    /// Reset a proxy to vector time (0,0)
    pub fn reset(&mut self, site: SiteId) -> bool {
        match self.proxies.get_mut(&site) {
            Some(proxy) => {
                proxy.reset();
                true
            }
            None => false,
        }
    }

    /// Apply a request and produce the rebroadcast for every other site
    pub fn apply(&mut self, request: &Request) -> JupiterResult<Broadcast> {
        let origin = request.source;
        let proxy = self
            .proxies
            .get_mut(&origin)
            .ok_or_else(|| JupiterError::UnknownSite {
                site: origin,
                document: self.document.clone(),
            })?;

        let operation = proxy.receive(request)?;

        let requests = self
            .proxies
            .iter_mut()
            .filter(|(site, _)| **site != origin)
            .map(|(site, proxy)| (*site, proxy.generate(operation.clone(), origin)))
            .collect();

        Ok(Broadcast {
            document: self.document.clone(),
            origin,
            operation,
            requests,
        })
    }
}

/// Commands processed by the hub worker, in arrival order
#[derive(Debug)]
enum HubCommand {
    Inbound(Request),
    AddClient(SiteId),
    RemoveClient(SiteId),
    ResetClient {
        site: SiteId,
        done: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to the serializing worker of one document
#[derive(Debug)]
pub struct DocumentHub {
    document: DocumentId,
    commands: mpsc::UnboundedSender<HubCommand>,
    faulted: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DocumentHub {
    /// Spawn the worker for `document` with proxies for `sites`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        document: DocumentId,
        host: SiteId,
        sites: impl IntoIterator<Item = SiteId>,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        let mut core = HubCore::new(document.clone(), host);
        for site in sites {
            core.admit(site);
        }

        let (commands, inbox) = mpsc::unbounded_channel();
        let faulted = Arc::new(AtomicBool::new(false));
        let span = info_span!("document_hub", document = %document);
        let handle = tokio::spawn(run_worker(core, inbox, events, faulted.clone()).instrument(span));

        Self {
            document,
            commands,
            faulted,
            handle,
        }
    }

    /// Get the document
    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// True once a transformation failure stopped serialization
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn send(&self, command: HubCommand) -> JupiterResult<()> {
        self.commands
            .send(command)
            .map_err(|_| JupiterError::HubClosed(self.document.clone()))
    }

    /// Queue a proxy for a newly connected site
    pub fn add_client(&self, site: SiteId) -> JupiterResult<()> {
        self.send(HubCommand::AddClient(site))
    }

    /// Queue removal of a site's proxy; its requests still queued are dropped
    pub fn remove_client(&self, site: SiteId) -> JupiterResult<()> {
        self.send(HubCommand::RemoveClient(site))
    }

    /// Enqueue a request; never blocks
    pub fn submit_inbound(&self, request: Request) -> JupiterResult<()> {
        self.send(HubCommand::Inbound(request))
    }

    /// Reset a site's proxy once every request queued before is processed.
    ///
    /// Resetting the site that caused a fault resumes serialization.
    /// Returns false if the site has no proxy.
    pub async fn reset_client(&self, site: SiteId) -> JupiterResult<bool> {
        let reply = self.queue_reset(site)?;
        reply
            .await
            .map_err(|_| JupiterError::HubClosed(self.document.clone()))
    }

    /// Queue a proxy reset; the receiver completes once it was applied
    pub fn queue_reset(&self, site: SiteId) -> JupiterResult<oneshot::Receiver<bool>> {
        let (done, reply) = oneshot::channel();
        self.send(HubCommand::ResetClient { site, done })?;
        Ok(reply)
    }

    /// Stop the worker after the commands already queued
    pub async fn shutdown(self) {
        if self.commands.send(HubCommand::Shutdown).is_ok() {
            if let Err(err) = self.handle.await {
                warn!(document = %self.document, "hub worker ended abnormally: {}", err);
            }
        }
    }
}

async fn run_worker(
    mut core: HubCore,
    mut inbox: mpsc::UnboundedReceiver<HubCommand>,
    events: mpsc::UnboundedSender<HubEvent>,
    faulted: Arc<AtomicBool>,
) {
    info!(clients = core.proxies.len(), "hub worker started");
    let mut fault: Option<SiteId> = None;

    while let Some(command) = inbox.recv().await {
        match command {
            HubCommand::Inbound(request) => {
                if let Some(site) = fault {
                    debug!(
                        source = %request.source,
                        faulted_by = %site,
                        "hub faulted, dropping request"
                    );
                    continue;
                }

                match core.apply(&request) {
                    Ok(broadcast) => {
                        if events.send(HubEvent::Outgoing(broadcast)).is_err() {
                            debug!("hub event receiver dropped");
                        }
                    }
                    Err(JupiterError::Transformation(err)) => {
                        error!(
                            site = %request.source,
                            vector_time = %request.vector_time,
                            "transformation failed, hub stopped: {}",
                            err
                        );
                        fault = Some(request.source);
                        faulted.store(true, Ordering::Release);
                        let _ = events.send(HubEvent::Fault(HubFault {
                            document: core.document.clone(),
                            site: request.source,
                            error: err,
                        }));
                    }
                    Err(err) => {
                        warn!(site = %request.source, "dropping request: {}", err);
                    }
                }
            }
            HubCommand::AddClient(site) => {
                if core.admit(site) {
                    debug!(%site, "client admitted");
                }
            }
            HubCommand::RemoveClient(site) => {
                if core.evict(site) {
                    debug!(%site, "client removed");
                }
            }
            HubCommand::ResetClient { site, done } => {
                let found = core.reset(site);
                if found {
                    if fault == Some(site) {
                        info!(%site, "faulted client reset, hub resumed");
                        fault = None;
                        faulted.store(false, Ordering::Release);
                    }
                    let _ = events.send(HubEvent::Reset {
                        document: core.document.clone(),
                        site,
                    });
                }
                let _ = done.send(found);
            }
            HubCommand::Shutdown => break,
        }
    }

    info!("hub worker stopped");
}
