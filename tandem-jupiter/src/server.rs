//! Host side registry of document hubs
//!
//! One [`DocumentHub`] runs per shared document. Hubs are created lazily
//! on the first request for a document and admit every site connected at
//! that time; later sites are added to all running hubs.

use crate::{DocumentHub, DocumentId, HubEvent, JupiterError, JupiterResult, Request, SiteId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// All document hubs of a session host
pub struct DocumentServer {
    host: SiteId,
    sites: RwLock<BTreeSet<SiteId>>,
    hubs: DashMap<DocumentId, DocumentHub>,
    events: mpsc::UnboundedSender<HubEvent>,
}

impl DocumentServer {
    /// Create a server; every hub reports into the returned receiver
    pub fn new(host: SiteId) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let server = Self {
            host,
            sites: RwLock::new(BTreeSet::new()),
            hubs: DashMap::new(),
            events,
        };
        (server, receiver)
    }

    /// Get the host site
    pub fn host(&self) -> SiteId {
        self.host
    }

    /// Connected sites
    pub fn sites(&self) -> Vec<SiteId> {
        self.sites.read().iter().copied().collect()
    }

    /// Documents with a running hub
    pub fn documents(&self) -> Vec<DocumentId> {
        let mut documents: Vec<DocumentId> =
            self.hubs.iter().map(|entry| entry.key().clone()).collect();
        documents.sort();
        documents
    }

    /// Connect a site to every running and future hub
    pub fn add_client(&self, site: SiteId) -> JupiterResult<()> {
        if !self.sites.write().insert(site) {
            return Ok(());
        }
        info!(%site, "client joined");
        for hub in self.hubs.iter() {
            hub.add_client(site)?;
        }
        Ok(())
    }

    /// Disconnect a site from every hub
    pub fn remove_client(&self, site: SiteId) -> JupiterResult<()> {
        if !self.sites.write().remove(&site) {
            return Ok(());
        }
        info!(%site, "client left");
        for hub in self.hubs.iter() {
            hub.remove_client(site)?;
        }
        Ok(())
    }

    /// Route a request to its document's hub, spawning the hub if needed
    pub fn submit(&self, request: Request) -> JupiterResult<()> {
        let document = request.document.clone();
        let hub = self.hubs.entry(document.clone()).or_insert_with(|| {
            debug!(%document, "spawning document hub");
            let sites = self.sites.read().clone();
            DocumentHub::spawn(document, self.host, sites, self.events.clone())
        });
        hub.submit_inbound(request)
    }

    /// Reset a site's proxy for one document.
    ///
    /// Returns false if no hub or proxy exists.
    pub async fn reset_client(&self, document: &DocumentId, site: SiteId) -> JupiterResult<bool> {
        // the map guard must not be held across the await
        let reply = match self.hubs.get(document) {
            Some(hub) => hub.queue_reset(site)?,
            None => return Ok(false),
        };
        reply
            .await
            .map_err(|_| JupiterError::HubClosed(document.clone()))
    }

    /// True if the document's hub stopped on a transformation failure
    pub fn is_faulted(&self, document: &DocumentId) -> bool {
        self.hubs
            .get(document)
            .map(|hub| hub.is_faulted())
            .unwrap_or(false)
    }

    /// Stop and drop one document's hub
    pub async fn close_document(&self, document: &DocumentId) -> bool {
        match self.hubs.remove(document) {
            Some((_, hub)) => {
                hub.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every hub
    pub async fn shutdown(&self) {
        for document in self.documents() {
            self.close_document(&document).await;
        }
        info!(host = %self.host, "document server stopped");
    }
}
