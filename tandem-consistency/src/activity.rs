//! Activities exchanged between session participants
//!
//! The transport (out of scope here) carries [`Envelope`]s; the core only
//! produces and consumes the closed [`Activity`] union.

use crate::{Checksum, ConsistencyError, ConsistencyResult, RecoveryId};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tandem_jupiter::{DocumentId, Request, SiteId};
use tokio::sync::mpsc;

/// Everything the consistency core sends or receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    /// A Jupiter request for one document
    Jupiter(Request),
    /// Host fingerprint of one document
    Checksum(Checksum),
    /// Client asks the host to resend `documents`; an empty list sent by
    /// the host ends the round
    ChecksumError {
        recovery_id: RecoveryId,
        documents: Vec<DocumentId>,
    },
    /// Authoritative content of one document, `None` if it does not exist
    RecoveryFile {
        recovery_id: RecoveryId,
        document: DocumentId,
        content: Option<Bytes>,
    },
}

/// Discriminant of [`Activity`], used as subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Jupiter,
    Checksum,
    ChecksumError,
    RecoveryFile,
}

impl Activity {
    /// Get the activity kind
    pub fn kind(&self) -> ActivityKind {
        match self {
            Activity::Jupiter(_) => ActivityKind::Jupiter,
            Activity::Checksum(_) => ActivityKind::Checksum,
            Activity::ChecksumError { .. } => ActivityKind::ChecksumError,
            Activity::RecoveryFile { .. } => ActivityKind::RecoveryFile,
        }
    }

    /// Document the activity refers to, if exactly one
    pub fn document(&self) -> Option<&DocumentId> {
        match self {
            Activity::Jupiter(request) => Some(&request.document),
            Activity::Checksum(checksum) => Some(&checksum.document),
            Activity::RecoveryFile { document, .. } => Some(document),
            Activity::ChecksumError { .. } => None,
        }
    }

    /// True for the host's end-of-round marker
    pub fn is_recovery_complete(&self) -> bool {
        matches!(self, Activity::ChecksumError { documents, .. } if documents.is_empty())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> ConsistencyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> ConsistencyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Addressee of an outgoing activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// One participant
    Site(SiteId),
    /// Every participant but the sender
    Everyone,
}

/// An addressed activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub recipient: Recipient,
    pub activity: Activity,
}

/// Outbound side of the transport
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Hand an activity to the transport
    async fn send(&self, recipient: Recipient, activity: Activity) -> ConsistencyResult<()>;
}

/// Sink that queues envelopes on a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Wrap an existing sender
    pub fn from_sender(sender: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ActivitySink for ChannelSink {
    async fn send(&self, recipient: Recipient, activity: Activity) -> ConsistencyResult<()> {
        self.sender
            .send(Envelope {
                recipient,
                activity,
            })
            .map_err(|_| ConsistencyError::Transport("activity channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_jupiter::{Operation, VectorTime};

    #[test]
    fn test_kind_and_document() {
        let doc = DocumentId::new("a.txt");
        let request = Request::new(doc.clone(), SiteId(1), VectorTime::zero(), Operation::insert(0, "x"));

        let jupiter = Activity::Jupiter(request);
        assert_eq!(jupiter.kind(), ActivityKind::Jupiter);
        assert_eq!(jupiter.document(), Some(&doc));

        let done = Activity::ChecksumError {
            recovery_id: RecoveryId::new("r"),
            documents: vec![],
        };
        assert_eq!(done.kind(), ActivityKind::ChecksumError);
        assert!(done.is_recovery_complete());
        assert_eq!(done.document(), None);
    }

    #[test]
    fn test_json_shape() {
        let activity = Activity::RecoveryFile {
            recovery_id: RecoveryId::new("r-1"),
            document: DocumentId::new("a.txt"),
            content: Some(Bytes::from_static(b"hi")),
        };
        let json = activity.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "recovery_file");
        assert_eq!(value["document"], "a.txt");
        assert_eq!(Activity::from_json(&json).unwrap(), activity);

        let missing = Activity::Checksum(Checksum::missing(DocumentId::new("gone")));
        assert_eq!(Activity::from_json(&missing.to_json().unwrap()).unwrap(), missing);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut receiver) = ChannelSink::new();
        let activity = Activity::Checksum(Checksum::of(DocumentId::new("a"), "x"));
        sink.send(Recipient::Everyone, activity.clone()).await.unwrap();

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.recipient, Recipient::Everyone);
        assert_eq!(envelope.activity, activity);

        drop(receiver);
        assert!(matches!(
            sink.send(Recipient::Site(SiteId(1)), activity).await,
            Err(ConsistencyError::Transport(_))
        ));
    }
}
