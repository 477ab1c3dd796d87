//! # atlas-core
//!
//! Core types for Atlas, a credit-based distributed garbage collection
//! runtime.
//!
//! This crate provides the foundational types used throughout the Atlas
//! ecosystem:
//!
//! - [`NodeId`], [`ObjectId`], [`ObjectAddress`] - identity for nodes and
//!   the objects they own
//! - [`GlobalRef`] - a handle to an object that may live on a remote node,
//!   carrying a local credit share
//! - [`GcError`] - the protocol error taxonomy
//! - [`DirectoryMessage`] - the wire messages exchanged between directory
//!   services

#![deny(warnings)]
#![deny(missing_docs)]

mod error;
mod gref;
mod id;
mod message;

pub use error::{ErrorKind, GcError};
pub use gref::{GlobalRef, RefKind};
pub use id::{NodeId, ObjectAddress, ObjectId};
pub use message::{frame_message, parse_frame, DirectoryMessage};
