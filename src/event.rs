//! Notifications published by sessions

use tandem_consistency::RecoveryId;
use tandem_jupiter::{DocumentId, Operation, SiteId};

/// Something that happened in a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A participant joined (host only)
    Joined(SiteId),
    /// A participant left (host only)
    Left(SiteId),
    /// An edit from another participant was applied locally
    RemoteEdit {
        document: DocumentId,
        origin: SiteId,
        operation: Operation,
    },
    /// OT state of a document failed; recovery follows
    Fault { document: DocumentId, site: SiteId },
    /// The host resent documents to a participant (host only)
    RecoveryServed {
        site: SiteId,
        recovery_id: RecoveryId,
        documents: Vec<DocumentId>,
    },
    /// Authoritative content replaced the local copy (client only)
    Restored { document: DocumentId },
    /// The session stopped
    Closed,
}
