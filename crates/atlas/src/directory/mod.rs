//! Owner-side bookkeeping: the directory service.
//!
//! Every node runs one [`DirectoryService`] holding a [`DirectoryEntry`]
//! for each object it owns. The service is the only component that mutates
//! `total_issued`/`total_returned`, through three operations:
//!
//! - `create_entry` registers a new object and issues its initial quota
//! - `request_credit` grants a replenishment quantum to an exhausted holder
//! - `return_credit` accumulates returned credit and fires the collection
//!   trigger when the books balance
//!
//! Operations touching the same entry are serialized (the entry table's
//! shard write lock); different entries proceed independently. Collected
//! entries are retained as tombstones so that late returns are ignored
//! idempotently and late credit requests fail loudly; [`sweep_collected`]
//! evicts them.
//!
//! [`sweep_collected`]: DirectoryService::sweep_collected

mod entry;

pub use entry::{DirectoryEntry, EntryState, Finalizer};

use atlas_core::{
    DirectoryMessage, ErrorKind, GcError, GlobalRef, NodeId, ObjectAddress, ObjectId, RefKind,
};
use dashmap::DashMap;
use entry::ReturnOutcome;
use std::sync::atomic::{AtomicU64, Ordering};

/// Authoritative bookkeeping and collection decisions for every object
/// owned by one node.
pub struct DirectoryService {
    /// This node's identity; the `owner` field of every reference issued
    /// here.
    node: NodeId,
    /// Credit granted per replenishment request.
    quantum: u64,
    /// All entries owned by this node, keyed by object id.
    entries: DashMap<ObjectId, DirectoryEntry>,
    /// Next object id to allocate.
    next_object: AtomicU64,
    /// Next storage slot to allocate.
    next_address: AtomicU64,
}

impl DirectoryService {
    /// Creates a directory service for `node` granting `quantum` credit per
    /// replenishment request.
    pub fn new(node: NodeId, quantum: u64) -> Self {
        assert!(quantum >= 1, "replenishment quantum must be at least 1");
        Self {
            node,
            quantum,
            entries: DashMap::new(),
            next_object: AtomicU64::new(1),
            next_address: AtomicU64::new(1),
        }
    }

    /// The node this service is authoritative for.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The replenishment quantum `Q`.
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Registers a new object and issues its initial credit quota to the
    /// caller.
    ///
    /// The returned reference carries `initial_quota` credit, which must be
    /// at least 1. A finalizer may only be attached to managed objects.
    pub fn create_entry(
        &self,
        initial_quota: u64,
        kind: RefKind,
        finalizer: Option<Finalizer>,
    ) -> Result<GlobalRef, GcError> {
        if initial_quota == 0 {
            return Err(GcError::InvalidQuota);
        }
        debug_assert!(
            finalizer.is_none() || kind == RefKind::Managed,
            "finalizers belong to managed objects"
        );

        let object = ObjectId::from_raw(self.next_object.fetch_add(1, Ordering::Relaxed));
        let address = ObjectAddress::from_raw(self.next_address.fetch_add(1, Ordering::Relaxed));

        self.entries.insert(
            object,
            DirectoryEntry::new(object, address, kind, initial_quota, finalizer),
        );

        tracing::debug!(node = %self.node, %object, %address, initial_quota, "registered object");

        Ok(GlobalRef::from_parts(self.node, object, initial_quota, kind))
    }

    /// Grants the replenishment quantum to a holder whose credit is
    /// exhausted, increasing `total_issued` accordingly.
    ///
    /// The grant and the bump of `total_issued` are one atomic step: once
    /// this returns, the requester owns the granted credit even if it never
    /// observes the reply, and must eventually return it.
    pub fn request_credit(&self, object: ObjectId, reported_credit: u64) -> Result<u64, GcError> {
        self.grant_credit(object, reported_credit)
            .map_err(|kind| kind.into_error(object))
    }

    fn grant_credit(&self, object: ObjectId, reported_credit: u64) -> Result<u64, ErrorKind> {
        let Some(mut entry) = self.entries.get_mut(&object) else {
            tracing::error!(node = %self.node, %object, "credit requested for unknown object");
            return Err(ErrorKind::UnknownObject);
        };

        match entry.issue(self.quantum) {
            Ok(()) => {
                tracing::debug!(
                    node = %self.node,
                    %object,
                    reported_credit,
                    granted = self.quantum,
                    total_issued = entry.total_issued(),
                    "granted credit"
                );
                Ok(self.quantum)
            }
            Err(kind) => {
                // A caller kept a reference past its full return. Loud by
                // contract: this is a defect, not a normal error path.
                tracing::error!(node = %self.node, %object, ?kind, "credit requested past Live");
                Err(kind)
            }
        }
    }

    /// Records returned credit and fires the collection trigger when the
    /// books balance.
    ///
    /// Returns for unknown or already-collected objects are ignored: a
    /// release in flight can lose the race against a collection triggered
    /// by other returns, and that is not an error.
    pub fn return_credit(&self, object: ObjectId, amount: u64) {
        let finalizer = {
            let Some(mut entry) = self.entries.get_mut(&object) else {
                tracing::warn!(node = %self.node, %object, amount, "return for unknown object (late release)");
                return;
            };

            match entry.absorb_return(amount) {
                ReturnOutcome::Accepted => {
                    tracing::debug!(
                        node = %self.node,
                        %object,
                        amount,
                        total_returned = entry.total_returned(),
                        total_issued = entry.total_issued(),
                        "credit returned"
                    );
                    return;
                }
                ReturnOutcome::Ignored => {
                    tracing::warn!(node = %self.node, %object, amount, "return past Live ignored");
                    return;
                }
                // The entry is now Collecting; we won the race and must run
                // the trigger. Take the finalizer while still holding the
                // entry so nothing else can.
                ReturnOutcome::Balanced => entry.take_finalizer(),
            }
        };

        // The table lock is released: collection never blocks other
        // entries' bookkeeping.
        self.collect(object, finalizer);
    }

    /// The collection trigger: destroys the object and tombstones its
    /// entry, exactly once.
    fn collect(&self, object: ObjectId, finalizer: Option<Finalizer>) {
        tracing::debug!(node = %self.node, %object, "collecting object");

        if let Some(finalizer) = finalizer {
            finalizer();
        }

        if let Some(mut entry) = self.entries.get_mut(&object) {
            entry.mark_collected();
        }

        tracing::debug!(node = %self.node, %object, "object collected");
    }

    /// Resolves a locally-owned reference to its storage address.
    ///
    /// Only meaningful at the owner; anything else answers `UnknownObject`.
    pub fn resolve(&self, object: ObjectId) -> Result<ObjectAddress, GcError> {
        match self.entries.get(&object) {
            Some(entry) if entry.state() == EntryState::Live => Ok(entry.address()),
            _ => Err(GcError::UnknownObject(object)),
        }
    }

    /// Evicts tombstones, returning how many were removed.
    pub fn sweep_collected(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.state() != EntryState::Collected);
        before - self.entries.len()
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries remain.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current state of an entry, if present.
    pub fn state_of(&self, object: ObjectId) -> Option<EntryState> {
        self.entries.get(&object).map(|e| e.state())
    }

    /// `(total_issued, total_returned)` of an entry, if present.
    pub fn books_of(&self, object: ObjectId) -> Option<(u64, u64)> {
        self.entries
            .get(&object)
            .map(|e| (e.total_issued(), e.total_returned()))
    }

    /// Dispatches an incoming wire message to the matching operation.
    ///
    /// Returns `Some(reply)` for request/reply exchanges and `None` for
    /// one-way messages. Transports call this for every message they
    /// receive.
    pub fn handle(&self, msg: DirectoryMessage) -> Option<DirectoryMessage> {
        match msg {
            DirectoryMessage::Create {
                initial_quota,
                kind,
            } => {
                // Remote creations cannot carry a finalizer; one can only be
                // registered by code running at the owner.
                let reply = match self.create_entry(initial_quota, kind, None) {
                    Ok(gref) => DirectoryMessage::Created { gref },
                    Err(_) => DirectoryMessage::Error {
                        kind: ErrorKind::InvalidQuota,
                    },
                };
                Some(reply)
            }
            DirectoryMessage::RequestCredit {
                object,
                reported_credit,
            } => {
                let reply = match self.grant_credit(object, reported_credit) {
                    Ok(amount) => DirectoryMessage::CreditGrant { amount },
                    Err(kind) => DirectoryMessage::Error { kind },
                };
                Some(reply)
            }
            DirectoryMessage::ReturnCredit { object, amount } => {
                self.return_credit(object, amount);
                None
            }
            other => {
                tracing::warn!(node = %self.node, ?other, "unexpected directory message");
                None
            }
        }
    }
}
