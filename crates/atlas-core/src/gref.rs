//! The global reference handle.
//!
//! A [`GlobalRef`] names an object that may live on a remote node and
//! carries this holder's share of the object's issued credit. Copying a
//! reference is a *local* operation: the credit is subdivided between the
//! two halves, and the owner is only contacted when a single indivisible
//! credit remains.
//!
//! The type is deliberately not `Clone`. Duplication can require a network
//! round trip and can fail, so it is an explicit operation on the runtime
//! (`Node::duplicate`), never an implicit copy.

use crate::{NodeId, ObjectId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Distinguishes how an object is destroyed when its credit is fully
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    /// A plain data object; collection just evicts the directory entry.
    Plain,
    /// A managed object; collection runs the finalizer registered at the
    /// owner before evicting the entry.
    Managed,
}

/// A handle to an object that may live on a remote node.
///
/// Identity is `(owner, object)` only: two references to the same object
/// compare equal and hash identically regardless of how much credit each
/// carries. The credit is strictly positive for as long as the handle is
/// alive; a handle whose credit has been surrendered no longer exists as a
/// value.
#[derive(Serialize, Deserialize)]
pub struct GlobalRef {
    owner: NodeId,
    object: ObjectId,
    credit: u64,
    kind: RefKind,
}

impl GlobalRef {
    /// Creates a reference from its parts.
    ///
    /// This is primarily used by the directory service when granting credit
    /// and by tests. `credit` must be at least 1.
    pub fn from_parts(owner: NodeId, object: ObjectId, credit: u64, kind: RefKind) -> Self {
        debug_assert!(credit >= 1, "a global reference must carry credit");
        Self {
            owner,
            object,
            credit,
            kind,
        }
    }

    /// The node holding the authoritative directory entry.
    pub const fn owner(&self) -> NodeId {
        self.owner
    }

    /// The object identifier, unique within the owner.
    pub const fn object(&self) -> ObjectId {
        self.object
    }

    /// This handle's share of the object's issued credit.
    pub const fn credit(&self) -> u64 {
        self.credit
    }

    /// The object kind.
    pub const fn kind(&self) -> RefKind {
        self.kind
    }

    /// Returns `true` if both references name the same object.
    pub fn same_object(&self, other: &GlobalRef) -> bool {
        self.owner == other.owner && self.object == other.object
    }

    /// Splits this reference's credit in half, producing a second valid
    /// handle to the same object.
    ///
    /// The new handle receives `credit / 2` (floor) and this handle keeps
    /// the rest, so the total is conserved. Returns `None` when only one
    /// indivisible credit remains; the caller must obtain more credit from
    /// the owner first (`Node::duplicate` does this).
    pub fn split(&mut self) -> Option<GlobalRef> {
        if self.credit <= 1 {
            return None;
        }
        let half = self.credit / 2;
        self.credit -= half;
        Some(GlobalRef {
            owner: self.owner,
            object: self.object,
            credit: half,
            kind: self.kind,
        })
    }

    /// Adds replenished credit granted by the owner.
    pub fn add_credit(&mut self, amount: u64) {
        self.credit += amount;
    }

    /// Consumes the handle, yielding the credit to be returned to the owner.
    pub fn surrender(self) -> u64 {
        self.credit
    }
}

impl PartialEq for GlobalRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl Eq for GlobalRef {}

impl Hash for GlobalRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.object.hash(state);
    }
}

impl PartialOrd for GlobalRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GlobalRef {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.owner, self.object).cmp(&(other.owner, other.object))
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}/{} credit={} {:?}>",
            self.owner, self.object, self.credit, self.kind
        )
    }
}
