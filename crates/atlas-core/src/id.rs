//! Identifiers for nodes and the objects they own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one node in the system.
///
/// A node is a participant with its own memory and task scheduler. Object
/// identifiers are only unique within their owning node, so `(NodeId,
/// ObjectId)` is the globally unique name of an object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node identifier from its raw value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Identifies an object within its owning node.
///
/// Allocated by the owning node's directory service; opaque everywhere else.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Creates an object identifier from its raw value.
    ///
    /// This is primarily used for deserialization and testing. Identifiers
    /// are normally allocated by the directory service.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The local storage location of an object at its owner.
///
/// Opaque to the protocol; higher layers decide what the slot means. Only
/// the owning node can resolve a reference to its address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAddress(u64);

impl ObjectAddress {
    /// Creates an address from its raw slot value.
    pub const fn from_raw(slot: u64) -> Self {
        Self(slot)
    }

    /// Returns the raw slot value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr@{}", self.0)
    }
}

impl fmt::Debug for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
