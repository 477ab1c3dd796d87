//! Error types for the credit protocol.

use crate::{NodeId, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by directory and credit operations.
#[derive(Debug, Clone, Error)]
pub enum GcError {
    /// The message could not be delivered or the reply timed out. The
    /// caller may retry later; this layer never retries on its own.
    #[error("transport error: {0}")]
    Transport(String),

    /// No directory entry exists for the object. Idempotently ignored for
    /// credit returns, surfaced for credit requests and resolution.
    #[error("unknown object: {0}")]
    UnknownObject(ObjectId),

    /// A caller kept using an object whose credit was already fully
    /// returned. This is a defect in the caller, not a retryable condition.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No route to the target node.
    #[error("not connected to {0}")]
    NotConnected(NodeId),

    /// An initial credit quota must be at least 1.
    #[error("initial quota must be at least 1")]
    InvalidQuota,

    /// The remote side answered with something the protocol does not allow
    /// at this point in the exchange.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// The error variants that travel on the wire.
///
/// A directory service answering a request only ever needs this subset;
/// transport-level failures are reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No entry for the requested object.
    UnknownObject,
    /// The entry is being collected; requesting credit for it is a caller
    /// defect.
    AlreadyCollecting,
    /// The entry was collected; requesting credit for it is a caller
    /// defect.
    AlreadyCollected,
    /// The requested initial quota was zero.
    InvalidQuota,
}

impl ErrorKind {
    /// Lifts a wire error into the caller-facing taxonomy.
    pub fn into_error(self, object: ObjectId) -> GcError {
        match self {
            ErrorKind::UnknownObject => GcError::UnknownObject(object),
            ErrorKind::AlreadyCollecting => GcError::ProtocolViolation(format!(
                "credit requested for {object} while it is being collected"
            )),
            ErrorKind::AlreadyCollected => GcError::ProtocolViolation(format!(
                "credit requested for {object} after it was collected"
            )),
            ErrorKind::InvalidQuota => GcError::InvalidQuota,
        }
    }
}
