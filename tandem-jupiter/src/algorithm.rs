//! The Jupiter algorithm for one site pair and one document
//!
//! Each client talks to the server only. Both ends of the pair run an
//! instance; the client instance privileges its own pending operations,
//! the server instance privileges incoming ones, which makes the server
//! the tie-breaking authority.

use crate::transform::transform;
use crate::{DocumentId, Operation, Request, SiteId, TransformationError, VectorTime};
use std::collections::VecDeque;
use tracing::trace;

/// Which end of the client/server pair an instance runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Editing participant
    Client,
    /// Hub proxy for one client
    Server,
}

/// A locally generated operation the peer has not acknowledged yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Operation, kept transformed against everything received since
    pub operation: Operation,
    /// Local operation count when the operation was sent
    pub local_count: u64,
}

/// Jupiter state machine
#[derive(Debug, Clone)]
pub struct Jupiter {
    document: DocumentId,
    site: SiteId,
    side: Side,
    vector_time: VectorTime,
    /// Append-only at the back, discarded from the front; ascending
    /// `local_count`
    ack_queue: VecDeque<PendingOperation>,
}

impl Jupiter {
    /// Create an instance at vector time (0,0)
    pub fn new(document: DocumentId, site: SiteId, side: Side) -> Self {
        Self {
            document,
            site,
            side,
            vector_time: VectorTime::zero(),
            ack_queue: VecDeque::new(),
        }
    }

    /// Client side instance
    pub fn client(document: DocumentId, site: SiteId) -> Self {
        Self::new(document, site, Side::Client)
    }

    /// Server side instance
    pub fn server(document: DocumentId, site: SiteId) -> Self {
        Self::new(document, site, Side::Server)
    }

    /// Get the document
    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Get the local site
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Get the side
    pub fn side(&self) -> Side {
        self.side
    }

    /// Current vector time
    pub fn vector_time(&self) -> VectorTime {
        self.vector_time
    }

    /// Unacknowledged operations, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.ack_queue.iter()
    }

    /// Number of unacknowledged operations
    pub fn pending_count(&self) -> usize {
        self.ack_queue.len()
    }

    /// Stamp a local operation and remember it until acknowledged.
    ///
    /// The halves of a split are queued separately under the same count.
    pub fn generate_request(&mut self, operation: Operation) -> Request {
        let timestamp = self.vector_time;
        let local_count = timestamp.local;

        match &operation {
            Operation::Split(first, second) => {
                self.ack_queue.push_back(PendingOperation {
                    operation: (**first).clone(),
                    local_count,
                });
                self.ack_queue.push_back(PendingOperation {
                    operation: (**second).clone(),
                    local_count,
                });
            }
            _ => self.ack_queue.push_back(PendingOperation {
                operation: operation.clone(),
                local_count,
            }),
        }
        self.vector_time = self.vector_time.increment_local();

        trace!(
            document = %self.document,
            site = %self.site,
            vector_time = %timestamp,
            pending = self.ack_queue.len(),
            "generated request"
        );
        Request::new(self.document.clone(), self.site, timestamp, operation)
    }

    /// Transform a peer request into the operation to apply locally
    pub fn receive_request(&mut self, request: &Request) -> Result<Operation, TransformationError> {
        let timestamp = request.vector_time;
        self.check_preconditions(timestamp)?;
        self.discard_acknowledged(timestamp.remote);

        let operation = self.transform(request.operation.clone());
        self.vector_time = self.vector_time.increment_remote();

        trace!(
            document = %self.document,
            site = %self.site,
            vector_time = %self.vector_time,
            pending = self.ack_queue.len(),
            "received request"
        );
        Ok(operation)
    }

    /// Drop queued operations acknowledged by `timestamp`
    pub fn acknowledge(&mut self, timestamp: VectorTime) {
        self.discard_acknowledged(timestamp.remote);
    }

    /// Map peer indices (e.g. a selection) through pending operations
    pub fn transform_indices(
        &mut self,
        timestamp: VectorTime,
        indices: &[usize],
    ) -> Result<Vec<usize>, TransformationError> {
        self.check_preconditions(timestamp)?;
        self.discard_acknowledged(timestamp.remote);

        Ok(indices
            .iter()
            .map(|&index| {
                self.ack_queue
                    .iter()
                    .fold(index, |index, pending| pending.operation.transform_index(index))
            })
            .collect())
    }

    /// Forget all history; the document content was replaced out of band
    pub fn reset(&mut self) {
        self.vector_time = VectorTime::zero();
        self.ack_queue.clear();
    }

    fn check_preconditions(&self, timestamp: VectorTime) -> Result<(), TransformationError> {
        if let Some(oldest) = self.ack_queue.front() {
            if timestamp.remote < oldest.local_count {
                return Err(TransformationError::StaleAcknowledgement {
                    remote: timestamp.remote,
                    oldest: oldest.local_count,
                });
            }
        }
        if timestamp.remote > self.vector_time.local {
            return Err(TransformationError::UnsentAcknowledgement {
                remote: timestamp.remote,
                local: self.vector_time.local,
            });
        }
        if timestamp.local != self.vector_time.remote {
            return Err(TransformationError::OutOfOrder {
                received: timestamp.local,
                expected: self.vector_time.remote,
            });
        }
        Ok(())
    }

    fn discard_acknowledged(&mut self, remote: u64) {
        while self
            .ack_queue
            .front()
            .is_some_and(|pending| pending.local_count < remote)
        {
            self.ack_queue.pop_front();
        }
    }

    /// Privilege of the incoming operation against a queued one.
    ///
    /// On the client the queued operation counts as already applied, so an
    /// incoming insert at the same spot keeps its position and lands in
    /// front of it; the server does the opposite.
    fn incoming_privileged(&self) -> bool {
        self.side == Side::Client
    }

    fn transform(&mut self, mut incoming: Operation) -> Operation {
        let privileged = self.incoming_privileged();

        for pending in self.ack_queue.iter_mut() {
            let mut existing = std::mem::replace(&mut pending.operation, Operation::NoOp);

            incoming = match incoming {
                // each half moves the queued operation on before the next
                Operation::Split(first, second) => {
                    let first_t = transform(&first, &existing, privileged);
                    existing = transform(&existing, &first, !privileged);
                    let second_t = transform(&second, &existing, privileged);
                    existing = transform(&existing, &second, !privileged);
                    Operation::split(first_t, second_t)
                }
                other => {
                    let transformed = transform(&other, &existing, privileged);
                    existing = transform(&existing, &other, !privileged);
                    transformed
                }
            };

            pending.operation = existing;
        }
        incoming
    }
}
