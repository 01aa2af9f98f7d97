//! Subscription registry for inbound activities

use crate::{Activity, ActivityKind, ConsistencyError, ConsistencyResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tandem_jupiter::SiteId;
use tracing::{debug, error, trace};

/// Consumer of one or more activity kinds
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Handle an activity received from `source`
    async fn handle(&self, source: SiteId, activity: &Activity) -> ConsistencyResult<()>;
}

/// Result of dispatching one activity
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Handlers that ran
    pub handled: usize,
    /// Errors returned by handlers, in subscription order
    pub errors: Vec<ConsistencyError>,
}

impl Dispatch {
    /// True if every handler succeeded
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Routes activities to the handlers subscribed to their kind
#[derive(Clone, Default)]
pub struct ActivityRouter {
    handlers: Arc<DashMap<ActivityKind, Vec<Arc<dyn ActivityHandler>>>>,
}

impl ActivityRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one kind
    pub fn subscribe<H>(&self, kind: ActivityKind, handler: H)
    where
        H: ActivityHandler + 'static,
    {
        self.subscribe_shared(kind, Arc::new(handler));
    }

    /// Subscribe a shared handler; the same handler may serve several kinds
    pub fn subscribe_shared(&self, kind: ActivityKind, handler: Arc<dyn ActivityHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
        debug!(?kind, "subscribed activity handler");
    }

    /// Remove every handler of a kind
    pub fn unsubscribe(&self, kind: ActivityKind) {
        self.handlers.remove(&kind);
    }

    /// Remove all handlers
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Number of handlers subscribed to a kind
    pub fn handler_count(&self, kind: ActivityKind) -> usize {
        self.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }

    /// Run the handlers of the activity's kind one after another
    pub async fn dispatch(&self, source: SiteId, activity: &Activity) -> Dispatch {
        let kind = activity.kind();
        let handlers = match self.handlers.get(&kind) {
            Some(handlers) => handlers.clone(),
            None => {
                trace!(?kind, %source, "no handler for activity");
                return Dispatch::default();
            }
        };

        let mut dispatch = Dispatch::default();
        for handler in handlers {
            dispatch.handled += 1;
            if let Err(err) = handler.handle(source, activity).await {
                error!(?kind, %source, "activity handler failed: {}", err);
                dispatch.errors.push(err);
            }
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Checksum, RecoveryId};
    use parking_lot::Mutex;
    use tandem_jupiter::DocumentId;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ActivityHandler for Recorder {
        async fn handle(&self, source: SiteId, activity: &Activity) -> ConsistencyResult<()> {
            self.log
                .lock()
                .push(format!("{}:{}:{:?}", self.name, source, activity.kind()));
            if self.fail {
                return Err(ConsistencyError::Transport("down".to_string()));
            }
            Ok(())
        }
    }

    fn checksum() -> Activity {
        Activity::Checksum(Checksum::of(DocumentId::new("a"), "a"))
    }

    #[tokio::test]
    async fn test_dispatch_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = ActivityRouter::new();
        router.subscribe(
            ActivityKind::Checksum,
            Recorder {
                name: "first",
                log: log.clone(),
                fail: true,
            },
        );
        router.subscribe(
            ActivityKind::Checksum,
            Recorder {
                name: "second",
                log: log.clone(),
                fail: false,
            },
        );

        let dispatch = router.dispatch(SiteId(0), &checksum()).await;
        assert_eq!(dispatch.handled, 2);
        assert_eq!(dispatch.errors.len(), 1);
        assert!(!dispatch.is_ok());
        assert_eq!(
            *log.lock(),
            vec!["first:site-0:Checksum", "second:site-0:Checksum"]
        );
    }

    #[tokio::test]
    async fn test_unrouted_kind_is_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = ActivityRouter::new();
        router.subscribe(
            ActivityKind::Checksum,
            Recorder {
                name: "only",
                log: log.clone(),
                fail: false,
            },
        );

        let done = Activity::ChecksumError {
            recovery_id: RecoveryId::new("r"),
            documents: vec![],
        };
        let dispatch = router.dispatch(SiteId(0), &done).await;
        assert_eq!(dispatch.handled, 0);
        assert!(log.lock().is_empty());

        assert_eq!(router.handler_count(ActivityKind::Checksum), 1);
        router.unsubscribe(ActivityKind::Checksum);
        assert_eq!(router.handler_count(ActivityKind::Checksum), 0);
    }
}
