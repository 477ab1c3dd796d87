//! # Atlas
//!
//! A runtime for referring to, invoking, and releasing objects that live
//! on arbitrary remote nodes, built around a credit-based distributed
//! garbage collection protocol with no central coordinator.
//!
//! # How it works
//!
//! - Creating an object registers a directory entry at the owning node and
//!   issues an initial credit quota to the creator's [`GlobalRef`]
//! - Duplicating a reference subdivides its credit locally; the owner is
//!   only contacted when a single indivisible credit remains
//! - Releasing a reference returns its credit to the owner, synchronously
//!   when local, as a fire-and-forget message when remote
//! - The owner destroys the object exactly once all issued credit has been
//!   returned
//!
//! The conservation invariant ties it together: for every object, the sum
//! of credit over all live references plus the credit returned to the
//! owner always equals the credit ever issued. No ordering of messages is
//! required for correctness, only their eventual delivery.
//!
//! # Quick start
//!
//! ```ignore
//! use atlas::{Config, distribution::Mesh};
//! use atlas_core::NodeId;
//!
//! let mesh = Mesh::new();
//! let alpha = mesh.add_node(Config::new(NodeId::new(1)));
//! let beta = mesh.add_node(Config::new(NodeId::new(2)));
//!
//! // Create an object on alpha, hand a duplicate to beta.
//! let mut gref = alpha.create(4)?;
//! let copy = alpha.duplicate(&mut gref).await?;
//!
//! // Releasing every reference collects the object at its owner.
//! beta.release(copy);
//! beta.flush_returns().await;
//! alpha.release(gref);
//! ```

pub mod config;
pub mod credit;
pub mod directory;
pub mod distribution;
mod runtime;


pub use config::Config;
pub use runtime::Node;

pub use atlas_core::{
    DirectoryMessage, ErrorKind, GcError, GlobalRef, NodeId, ObjectAddress, ObjectId, RefKind,
};
