//! Per-object bookkeeping kept at the owning node.

use atlas_core::{ErrorKind, ObjectAddress, ObjectId, RefKind};
use std::fmt;

/// A finalizer run at the owner when a managed object is collected.
pub type Finalizer = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Lifecycle state of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Credit is outstanding; the object is reachable.
    Live,
    /// The books balanced; the finalizer is running (or about to).
    Collecting,
    /// The object was destroyed. The entry is a tombstone until swept.
    Collected,
}

/// What `DirectoryEntry::absorb_return` decided.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReturnOutcome {
    /// Credit recorded; the object still has outstanding credit.
    Accepted,
    /// Credit recorded and the books now balance: collection must run.
    Balanced,
    /// The entry is past Live; the return was dropped (late duplicate of an
    /// already-counted release, or a caller defect).
    Ignored,
}

/// Authoritative bookkeeping for one object, owned exclusively by its
/// node's directory service.
///
/// `total_issued` and `total_returned` are monotonically non-decreasing;
/// `total_returned <= total_issued` always holds. The object is eligible
/// for collection exactly when the two are equal (and credit was issued at
/// all, which `create` guarantees).
pub struct DirectoryEntry {
    object: ObjectId,
    address: ObjectAddress,
    kind: RefKind,
    total_issued: u64,
    total_returned: u64,
    state: EntryState,
    finalizer: Option<Finalizer>,
}

impl DirectoryEntry {
    pub(crate) fn new(
        object: ObjectId,
        address: ObjectAddress,
        kind: RefKind,
        initial_quota: u64,
        finalizer: Option<Finalizer>,
    ) -> Self {
        debug_assert!(initial_quota >= 1);
        Self {
            object,
            address,
            kind,
            total_issued: initial_quota,
            total_returned: 0,
            state: EntryState::Live,
            finalizer,
        }
    }

    /// The object this entry describes.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// The object's local storage location.
    pub fn address(&self) -> ObjectAddress {
        self.address
    }

    /// The object kind.
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Total credit ever issued for this object.
    pub fn total_issued(&self) -> u64 {
        self.total_issued
    }

    /// Total credit returned so far.
    pub fn total_returned(&self) -> u64 {
        self.total_returned
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Issues `amount` additional credit to a requester.
    ///
    /// Fails if the entry is past Live: a caller must never request credit
    /// for an object whose credit was fully returned.
    pub(crate) fn issue(&mut self, amount: u64) -> Result<(), ErrorKind> {
        match self.state {
            EntryState::Live => {
                self.total_issued += amount;
                self.check_books();
                Ok(())
            }
            EntryState::Collecting => Err(ErrorKind::AlreadyCollecting),
            EntryState::Collected => Err(ErrorKind::AlreadyCollected),
        }
    }

    /// Records returned credit.
    ///
    /// On `Balanced` the entry has already transitioned to Collecting, so
    /// the caller observing it is the one that must run the collection
    /// trigger; concurrent returns see Collecting and are ignored.
    pub(crate) fn absorb_return(&mut self, amount: u64) -> ReturnOutcome {
        if self.state != EntryState::Live {
            return ReturnOutcome::Ignored;
        }

        self.total_returned += amount;
        self.check_books();

        if self.total_returned == self.total_issued {
            self.state = EntryState::Collecting;
            ReturnOutcome::Balanced
        } else {
            ReturnOutcome::Accepted
        }
    }

    /// Takes the finalizer for the collection trigger to run.
    pub(crate) fn take_finalizer(&mut self) -> Option<Finalizer> {
        debug_assert_eq!(self.state, EntryState::Collecting);
        self.finalizer.take()
    }

    /// Marks the entry as a tombstone once the object has been destroyed.
    pub(crate) fn mark_collected(&mut self) {
        debug_assert_eq!(self.state, EntryState::Collecting);
        self.state = EntryState::Collected;
    }

    fn check_books(&self) {
        debug_assert!(
            self.total_returned <= self.total_issued,
            "conservation violated for {}: returned {} > issued {}",
            self.object,
            self.total_returned,
            self.total_issued
        );
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("object", &self.object)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("total_issued", &self.total_issued)
            .field("total_returned", &self.total_returned)
            .field("state", &self.state)
            .finish()
    }
}
