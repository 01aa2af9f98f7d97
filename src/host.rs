//! Host side of a session
//!
//! The host owns the authoritative copy of every document. One actor task
//! serializes everything that touches the host's own Jupiter bindings:
//! local edits, inbound activities and the output of the document hubs.
//! The host takes part in editing as a regular site with its own proxy in
//! each hub.

use crate::{SessionEvent, TandemConfig, TandemError, TandemResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tandem_consistency::{
    Activity, ActivityHandler, ActivityKind, ActivityRouter, ActivitySink, ConsistencyError,
    ConsistencyResult, DocumentStore, HostWatchdog, RandomRecoveryIds, Recipient, RecoveryId,
    RecoveryIdGenerator, RecoveryResponder,
};
use tandem_jupiter::{
    DocumentClient, DocumentId, DocumentServer, HubEvent, HubFault, JupiterError, Operation,
    Request, SiteId,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

enum HostCommand {
    Join(SiteId, oneshot::Sender<TandemResult<()>>),
    Leave(SiteId, oneshot::Sender<TandemResult<()>>),
    Receive { source: SiteId, activity: Activity },
    Edit {
        document: DocumentId,
        operation: Operation,
        done: oneshot::Sender<TandemResult<()>>,
    },
    Shutdown,
}

/// Handle to a running host session
pub struct HostSession {
    id: Uuid,
    site: SiteId,
    commands: mpsc::UnboundedSender<HostCommand>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<dyn DocumentStore>,
    watchdog: HostWatchdog,
    handle: JoinHandle<()>,
}

impl HostSession {
    /// Start a host session with random recovery ids.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &TandemConfig,
        site: SiteId,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
    ) -> TandemResult<Self> {
        Self::with_recovery_ids(config, site, store, sink, Arc::new(RandomRecoveryIds))
    }

    /// Start a host session with an explicit recovery id source
    pub fn with_recovery_ids(
        config: &TandemConfig,
        site: SiteId,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
        ids: Arc<dyn RecoveryIdGenerator>,
    ) -> TandemResult<Self> {
        let id = Uuid::new_v4();
        let (server, hub_events) = DocumentServer::new(site);
        let server = Arc::new(server);
        server.add_client(site)?;

        let watchdog = HostWatchdog::new(config.watchdog.clone(), store.clone(), sink.clone());
        let responder = RecoveryResponder::new(store.clone(), sink.clone(), watchdog.clone());

        let router = ActivityRouter::new();
        router.subscribe(
            ActivityKind::Jupiter,
            SubmitToHub {
                server: server.clone(),
            },
        );

        let (events, _) = broadcast::channel(1000);
        let (commands, inbox) = mpsc::unbounded_channel();
        let actor = HostActor {
            site,
            store: store.clone(),
            sink,
            server,
            hub_events,
            local: DocumentClient::new(site, site),
            watchdog: watchdog.clone(),
            responder,
            router,
            ids,
            events: events.clone(),
            faults: VecDeque::new(),
        };

        let span = info_span!("host_session", session = %id, %site);
        let handle = tokio::spawn(actor.run(inbox).instrument(span));
        watchdog.start();
        info!(session = %id, %site, "host session started");

        Ok(Self {
            id,
            site,
            commands,
            events,
            store,
            watchdog,
            handle,
        })
    }

    /// Get the session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the host site
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Get the authoritative document store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Get the checksum watchdog
    pub fn watchdog(&self) -> &HostWatchdog {
        &self.watchdog
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: HostCommand) -> TandemResult<()> {
        self.commands
            .send(command)
            .map_err(|_| TandemError::SessionClosed)
    }

    async fn request<F>(&self, command: F) -> TandemResult<()>
    where
        F: FnOnce(oneshot::Sender<TandemResult<()>>) -> HostCommand,
    {
        let (done, reply) = oneshot::channel();
        self.send(command(done))?;
        reply.await.map_err(|_| TandemError::SessionClosed)?
    }

    /// Admit a participant to every document
    pub async fn join(&self, site: SiteId) -> TandemResult<()> {
        self.request(|done| HostCommand::Join(site, done)).await
    }

    /// Remove a participant
    pub async fn leave(&self, site: SiteId) -> TandemResult<()> {
        self.request(|done| HostCommand::Leave(site, done)).await
    }

    /// Hand an activity received from `source` to the session; never blocks
    pub fn receive(&self, source: SiteId, activity: Activity) -> TandemResult<()> {
        self.send(HostCommand::Receive { source, activity })
    }

    /// Apply a local edit and share it with every participant
    pub async fn edit(&self, document: DocumentId, operation: Operation) -> TandemResult<()> {
        self.request(|done| HostCommand::Edit {
            document,
            operation,
            done,
        })
        .await
    }

    /// Broadcast checksums now instead of waiting for the timer
    pub async fn check_now(&self) -> TandemResult<usize> {
        Ok(self.watchdog.check_now().await?)
    }

    /// Stop the session after every queued command
    pub async fn close(self) {
        if self.send(HostCommand::Shutdown).is_ok() {
            if let Err(err) = self.handle.await {
                warn!("host session task failed: {}", err);
            }
        }
    }
}

/// Forwards client requests into the document hubs
struct SubmitToHub {
    server: Arc<DocumentServer>,
}

#[async_trait]
impl ActivityHandler for SubmitToHub {
    async fn handle(&self, source: SiteId, activity: &Activity) -> ConsistencyResult<()> {
        let Activity::Jupiter(request) = activity else {
            return Ok(());
        };
        if request.source != source {
            return Err(ConsistencyError::Transport(format!(
                "request from {} claims to be from {}",
                source, request.source
            )));
        }
        self.server.submit(request.clone())?;
        Ok(())
    }
}

struct HostActor {
    site: SiteId,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn ActivitySink>,
    server: Arc<DocumentServer>,
    hub_events: mpsc::UnboundedReceiver<HubEvent>,
    local: DocumentClient,
    watchdog: HostWatchdog,
    responder: RecoveryResponder,
    router: ActivityRouter,
    ids: Arc<dyn RecoveryIdGenerator>,
    events: broadcast::Sender<SessionEvent>,
    /// Faults seen while waiting for a reset marker, handled afterwards
    faults: VecDeque<Fault>,
}

/// A document whose OT state must be rebuilt
struct Fault {
    document: DocumentId,
    site: SiteId,
}

impl From<HubFault> for Fault {
    fn from(fault: HubFault) -> Self {
        Self {
            document: fault.document,
            site: fault.site,
        }
    }
}

impl HostActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<HostCommand>) {
        loop {
            while let Some(fault) = self.faults.pop_front() {
                if let Err(err) = self.recover_fault(fault).await {
                    error!("fault recovery failed: {}", err);
                }
            }

            tokio::select! {
                command = inbox.recv() => match command {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.hub_events.recv() => self.handle_hub_event(event).await,
            }
        }

        self.watchdog.stop().await;
        self.server.shutdown().await;
        let _ = self.events.send(SessionEvent::Closed);
        info!("host session stopped");
    }

    async fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Join(site, done) => {
                let result = self.server.add_client(site).map_err(TandemError::from);
                if result.is_ok() {
                    let _ = self.events.send(SessionEvent::Joined(site));
                }
                let _ = done.send(result);
            }
            HostCommand::Leave(site, done) => {
                let result = self.server.remove_client(site).map_err(TandemError::from);
                if result.is_ok() {
                    let _ = self.events.send(SessionEvent::Left(site));
                }
                let _ = done.send(result);
            }
            HostCommand::Edit {
                document,
                operation,
                done,
            } => {
                let _ = done.send(self.edit(document, operation));
            }
            HostCommand::Receive { source, activity } => match activity {
                Activity::ChecksumError {
                    recovery_id,
                    documents,
                } if !documents.is_empty() => {
                    if let Err(err) = self.respond(source, recovery_id, documents).await {
                        error!(%source, "recovery round failed: {}", err);
                    }
                }
                activity => {
                    self.router.dispatch(source, &activity).await;
                }
            },
            HostCommand::Shutdown => {}
        }
    }

    fn edit(&mut self, document: DocumentId, operation: Operation) -> TandemResult<()> {
        self.store.apply(&document, &operation)?;
        self.watchdog.mark_dirty(&document);
        let request = self.local.generate(&document, operation);
        self.server.submit(request)?;
        Ok(())
    }

    /// Every target gets its copy even if delivery to another one fails
    async fn handle_hub_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Outgoing(broadcast) => {
                for (target, request) in broadcast.requests {
                    if let Err(err) = self.deliver(target, request).await {
                        warn!(%target, document = %broadcast.document, "request not delivered: {}", err);
                    }
                }
            }
            HubEvent::Fault(fault) => self.faults.push_back(fault.into()),
            HubEvent::Reset { document, site } => {
                debug!(%document, %site, "proxy reset");
            }
        }
    }

    async fn deliver(&mut self, target: SiteId, request: Request) -> TandemResult<()> {
        if target != self.site {
            self.sink
                .send(Recipient::Site(target), Activity::Jupiter(request))
                .await?;
            return Ok(());
        }

        let document = request.document.clone();
        let origin = request.source;
        match self.local.receive(&request) {
            Ok(operation) => {
                if let Err(err) = self.store.apply(&document, &operation) {
                    // the binding already counted the request
                    error!(%document, "transformed operation does not apply: {}", err);
                    self.faults.push_back(Fault {
                        document,
                        site: self.site,
                    });
                    return Ok(());
                }
                self.watchdog.mark_dirty(&document);
                let _ = self.events.send(SessionEvent::RemoteEdit {
                    document,
                    origin,
                    operation,
                });
            }
            Err(JupiterError::Transformation(err)) => {
                error!(%document, "host binding rejected request: {}", err);
                self.faults.push_back(Fault {
                    document,
                    site: self.site,
                });
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Forward hub output until the reset marker of (`document`, `site`)
    async fn flush_until_reset(&mut self, document: &DocumentId, site: SiteId) -> TandemResult<()> {
        while let Some(event) = self.hub_events.recv().await {
            match event {
                HubEvent::Reset {
                    document: ref reset,
                    site: reset_site,
                } if reset == document && reset_site == site => return Ok(()),
                event => self.handle_hub_event(event).await,
            }
        }
        Err(TandemError::SessionClosed)
    }

    async fn reset_proxy(&mut self, document: &DocumentId, site: SiteId) -> TandemResult<()> {
        if self.server.reset_client(document, site).await? {
            self.flush_until_reset(document, site).await?;
        }
        Ok(())
    }

    async fn respond(
        &mut self,
        site: SiteId,
        recovery_id: RecoveryId,
        documents: Vec<DocumentId>,
    ) -> TandemResult<()> {
        let mut round = self.responder.begin(site, recovery_id.clone()).await;
        for document in &documents {
            self.reset_proxy(document, site).await?;
            round.resend(document).await?;
        }
        let documents = round.finish().await?;
        let _ = self.events.send(SessionEvent::RecoveryServed {
            site,
            recovery_id,
            documents,
        });
        Ok(())
    }

    async fn recover_fault(&mut self, fault: Fault) -> TandemResult<()> {
        let Fault { document, site } = fault;
        warn!(%document, %site, "resynchronizing document after fault");
        let _ = self.events.send(SessionEvent::Fault {
            document: document.clone(),
            site,
        });

        for participant in self.server.sites() {
            if participant == self.site {
                self.reset_proxy(&document, participant).await?;
                self.local.reset(&document);
            } else {
                let recovery_id = self.ids.next_id();
                if let Err(err) = self
                    .respond(participant, recovery_id, vec![document.clone()])
                    .await
                {
                    error!(%participant, %document, "recovery round failed: {}", err);
                }
            }
        }
        Ok(())
    }
}
