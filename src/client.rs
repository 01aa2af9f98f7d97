//! Client side of a session
//!
//! An actor task owns the client's Jupiter bindings. Inbound activities
//! are applied in arrival order; resent files replace the local copy and
//! reset the document's Jupiter state before the watchdog sees them.

use crate::{SessionEvent, TandemConfig, TandemError, TandemResult};
use std::sync::Arc;
use tandem_consistency::{
    Activity, ActivityHandler, ActivityKind, ActivityRouter, ActivitySink, CancelFlag,
    ClientWatchdog, ConsistencyError, DocumentStore, RandomRecoveryIds, Recipient,
    RecoveryIdGenerator, RecoveryReport,
};
use tandem_jupiter::{DocumentClient, DocumentId, JupiterError, Operation, Request, SiteId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

enum ClientCommand {
    Receive { source: SiteId, activity: Activity },
    Edit {
        document: DocumentId,
        operation: Operation,
        done: oneshot::Sender<TandemResult<()>>,
    },
    Shutdown,
}

/// Handle to a running client session
pub struct ClientSession {
    site: SiteId,
    host: SiteId,
    commands: mpsc::UnboundedSender<ClientCommand>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<dyn DocumentStore>,
    watchdog: ClientWatchdog,
    handle: JoinHandle<()>,
}

impl ClientSession {
    /// Join the session hosted by `host` as `site`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &TandemConfig,
        site: SiteId,
        host: SiteId,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        Self::with_recovery_ids(config, site, host, store, sink, Arc::new(RandomRecoveryIds))
    }

    /// Join with an explicit recovery id source
    pub fn with_recovery_ids(
        config: &TandemConfig,
        site: SiteId,
        host: SiteId,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn ActivitySink>,
        ids: Arc<dyn RecoveryIdGenerator>,
    ) -> Self {
        let watchdog = ClientWatchdog::new(
            host,
            config.recovery.clone(),
            store.clone(),
            sink.clone(),
            ids,
        );

        let router = ActivityRouter::new();
        let handler: Arc<dyn ActivityHandler> = Arc::new(watchdog.clone());
        for kind in [
            ActivityKind::Checksum,
            ActivityKind::RecoveryFile,
            ActivityKind::ChecksumError,
        ] {
            router.subscribe_shared(kind, handler.clone());
        }

        let (events, _) = broadcast::channel(1000);
        let (commands, inbox) = mpsc::unbounded_channel();
        let actor = ClientActor {
            host,
            store: store.clone(),
            sink,
            binding: DocumentClient::new(site, host),
            watchdog: watchdog.clone(),
            router,
            events: events.clone(),
        };

        let span = info_span!("client_session", %site, %host);
        let handle = tokio::spawn(actor.run(inbox).instrument(span));
        info!(%site, %host, "client session started");

        Self {
            site,
            host,
            commands,
            events,
            store,
            watchdog,
            handle,
        }
    }

    /// Get the local site
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Get the host site
    pub fn host(&self) -> SiteId {
        self.host
    }

    /// Get the local document store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Get the checksum watchdog
    pub fn watchdog(&self) -> &ClientWatchdog {
        &self.watchdog
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch the "inconsistency present" signal
    pub fn inconsistency(&self) -> watch::Receiver<bool> {
        self.watchdog.subscribe()
    }

    /// Currently inconsistent documents
    pub fn inconsistent_documents(&self) -> Vec<DocumentId> {
        self.watchdog.inconsistent_documents()
    }

    fn send(&self, command: ClientCommand) -> TandemResult<()> {
        self.commands
            .send(command)
            .map_err(|_| TandemError::SessionClosed)
    }

    /// Hand an activity received from `source` to the session; never blocks
    pub fn receive(&self, source: SiteId, activity: Activity) -> TandemResult<()> {
        self.send(ClientCommand::Receive { source, activity })
    }

    /// Apply a local edit and send it to the host
    pub async fn edit(&self, document: DocumentId, operation: Operation) -> TandemResult<()> {
        let (done, reply) = oneshot::channel();
        self.send(ClientCommand::Edit {
            document,
            operation,
            done,
        })?;
        reply.await.map_err(|_| TandemError::SessionClosed)?
    }

    /// Resynchronize every inconsistent document with the host.
    ///
    /// Waits until the host resent all of them, `cancel` is set or the
    /// session ends.
    pub async fn recover(&self, cancel: &CancelFlag) -> TandemResult<RecoveryReport> {
        Ok(self.watchdog.run_recovery(cancel).await?)
    }

    /// Leave the session
    pub async fn close(self) {
        if self.send(ClientCommand::Shutdown).is_ok() {
            if let Err(err) = self.handle.await {
                warn!("client session task failed: {}", err);
            }
        }
    }
}

struct ClientActor {
    host: SiteId,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn ActivitySink>,
    binding: DocumentClient,
    watchdog: ClientWatchdog,
    router: ActivityRouter,
    events: broadcast::Sender<SessionEvent>,
}

impl ClientActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ClientCommand>) {
        while let Some(command) = inbox.recv().await {
            match command {
                ClientCommand::Receive { source, activity } => {
                    self.receive(source, activity).await;
                }
                ClientCommand::Edit {
                    document,
                    operation,
                    done,
                } => {
                    let _ = done.send(self.edit(document, operation).await);
                }
                ClientCommand::Shutdown => break,
            }
        }

        self.watchdog.detach();
        let _ = self.events.send(SessionEvent::Closed);
        info!("client session stopped");
    }

    async fn edit(&mut self, document: DocumentId, operation: Operation) -> TandemResult<()> {
        if self.watchdog.is_recovering(&document) {
            return Err(TandemError::RecoveryInProgress(document));
        }
        self.store.apply(&document, &operation)?;
        let request = self.binding.generate(&document, operation);
        self.sink
            .send(Recipient::Site(self.host), Activity::Jupiter(request))
            .await?;
        Ok(())
    }

    async fn receive(&mut self, source: SiteId, activity: Activity) {
        if source != self.host {
            warn!(%source, kind = ?activity.kind(), "dropping activity not sent by host");
            return;
        }

        match &activity {
            Activity::Jupiter(request) => self.apply_request(request),
            Activity::RecoveryFile {
                document, content, ..
            } => self.restore(document, content.as_deref()),
            _ => {}
        }
        self.router.dispatch(source, &activity).await;
    }

    fn apply_request(&mut self, request: &Request) {
        let document = &request.document;
        let operation = match self.binding.receive(request) {
            Ok(operation) => operation,
            Err(JupiterError::Transformation(err)) => {
                error!(%document, "transformation failed: {}", err);
                self.watchdog.mark_inconsistent(document);
                let _ = self.events.send(SessionEvent::Fault {
                    document: document.clone(),
                    site: request.source,
                });
                return;
            }
            Err(err) => {
                error!(%document, "request rejected: {}", err);
                return;
            }
        };

        if let Err(err) = self.store.apply(document, &operation) {
            error!(%document, "transformed operation does not apply: {}", err);
            self.watchdog.mark_inconsistent(document);
            return;
        }
        let _ = self.events.send(SessionEvent::RemoteEdit {
            document: document.clone(),
            origin: request.source,
            operation,
        });
    }

    fn restore(&mut self, document: &DocumentId, content: Option<&[u8]>) {
        let content = match content.map(|bytes| String::from_utf8(bytes.to_vec())).transpose() {
            Ok(content) => content,
            Err(err) => {
                let err = ConsistencyError::InvalidContent {
                    document: document.clone(),
                    reason: err.to_string(),
                };
                error!("{}", err);
                self.watchdog.mark_inconsistent(document);
                return;
            }
        };

        self.binding.reset(document);
        self.store.replace(document, content);
        info!(%document, "document restored from host");
        let _ = self.events.send(SessionEvent::Restored {
            document: document.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tandem_consistency::{Envelope, MemoryStore};
    use tandem_jupiter::VectorTime;
    use tokio::time::timeout;

    const HOST: SiteId = SiteId(0);
    const SITE: SiteId = SiteId(1);

    fn client() -> (
        ClientSession,
        Arc<MemoryStore>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        let store = Arc::new(MemoryStore::new());
        store.open("a.txt", "abc");
        let (sink, outbox) = tandem_consistency::ChannelSink::new();
        let session = ClientSession::start(
            &TandemConfig::default(),
            SITE,
            HOST,
            store.clone(),
            Arc::new(sink),
        );
        (session, store, outbox)
    }

    #[tokio::test]
    async fn test_edit_is_sent_to_host() {
        let (session, store, mut outbox) = client();
        let document = DocumentId::new("a.txt");

        session
            .edit(document.clone(), Operation::insert(3, "d"))
            .await
            .unwrap();
        assert_eq!(store.content(&document).as_deref(), Some("abcd"));

        let envelope = outbox.recv().await.unwrap();
        assert_eq!(envelope.recipient, Recipient::Site(HOST));
        assert_eq!(
            envelope.activity,
            Activity::Jupiter(Request::new(
                document,
                SITE,
                VectorTime::zero(),
                Operation::insert(3, "d"),
            ))
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_host_request_is_applied() {
        let (session, store, _outbox) = client();
        let document = DocumentId::new("a.txt");
        let mut events = session.subscribe();

        let request = Request::new(
            document.clone(),
            SiteId(2),
            VectorTime::zero(),
            Operation::delete(0, "a"),
        );
        // only the host may send activities
        session
            .receive(SiteId(2), Activity::Jupiter(request.clone()))
            .unwrap();
        session.receive(HOST, Activity::Jupiter(request)).unwrap();

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::RemoteEdit {
                document: document.clone(),
                origin: SiteId(2),
                operation: Operation::delete(0, "a"),
            }
        );
        assert_eq!(store.content(&document).as_deref(), Some("bc"));
    }

    #[tokio::test]
    async fn test_out_of_order_request_marks_document_inconsistent() {
        let (session, _store, _outbox) = client();
        let document = DocumentId::new("a.txt");
        let mut signal = session.inconsistency();

        let request = Request::new(
            document.clone(),
            SiteId(2),
            VectorTime::new(3, 0),
            Operation::insert(0, "x"),
        );
        session.receive(HOST, Activity::Jupiter(request)).unwrap();

        timeout(Duration::from_secs(1), signal.wait_for(|present| *present))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.inconsistent_documents(), vec![document]);
    }

    #[tokio::test]
    async fn test_recovery_file_replaces_content() {
        let (session, store, _outbox) = client();
        let document = DocumentId::new("a.txt");
        let mut events = session.subscribe();

        session
            .receive(
                HOST,
                Activity::RecoveryFile {
                    recovery_id: tandem_consistency::RecoveryId::new("r-1"),
                    document: document.clone(),
                    content: Some(bytes::Bytes::from("fresh")),
                },
            )
            .unwrap();

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SessionEvent::Restored { document: document.clone() });
        assert_eq!(store.content(&document).as_deref(), Some("fresh"));
    }
}
