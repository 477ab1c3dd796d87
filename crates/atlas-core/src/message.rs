//! Wire protocol for directory services.
//!
//! Defines the messages exchanged between nodes. Messages are serialized
//! with postcard; on stream transports each message is framed with a 4-byte
//! big-endian length prefix.

use crate::{ErrorKind, GcError, GlobalRef, NodeId, ObjectId, RefKind};
use serde::{Deserialize, Serialize};

/// Messages exchanged between directory services.
///
/// `Create` and `RequestCredit` are request/reply exchanges; `ReturnCredit`
/// is one-way and tolerates arbitrary delay. `Hello`/`Welcome` are the
/// connection handshake used by stream transports to learn the peer's
/// identity.
#[derive(Debug, Serialize, Deserialize)]
pub enum DirectoryMessage {
    // === Handshake ===
    /// Initial hello from a connecting node.
    Hello {
        /// The connecting node's identity.
        node: NodeId,
    },

    /// Response to `Hello`, accepting the connection.
    Welcome {
        /// The accepting node's identity.
        node: NodeId,
    },

    // === Object creation ===
    /// Create an object on the receiving node.
    Create {
        /// Credit issued to the creator with the new reference.
        initial_quota: u64,
        /// Whether destruction runs owner-side finalization.
        kind: RefKind,
    },

    /// Reply to `Create` carrying the freshly issued reference.
    Created {
        /// The new reference; its credit equals the requested quota.
        gref: GlobalRef,
    },

    // === Credit protocol ===
    /// Ask the owner for more credit for an exhausted reference.
    RequestCredit {
        /// The object whose credit is exhausted.
        object: ObjectId,
        /// The requester's current credit, for diagnostics.
        reported_credit: u64,
    },

    /// Reply to `RequestCredit`.
    CreditGrant {
        /// Additional credit now owned by the requester.
        amount: u64,
    },

    /// Return unused credit to the owner. One-way; no reply is ever sent.
    ReturnCredit {
        /// The object the credit belongs to.
        object: ObjectId,
        /// The credit being returned.
        amount: u64,
    },

    // === Failures ===
    /// Error reply to a request/reply exchange.
    Error {
        /// What went wrong.
        kind: ErrorKind,
    },
}

impl DirectoryMessage {
    /// Serialize this message to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, GcError> {
        postcard::to_allocvec(self).map_err(|e| GcError::Transport(format!("encode: {e}")))
    }

    /// Deserialize a message from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, GcError> {
        postcard::from_bytes(bytes).map_err(|e| GcError::Transport(format!("decode: {e}")))
    }
}

/// Frame a message with a length prefix.
///
/// Format: 4-byte big-endian length + postcard payload.
pub fn frame_message(msg: &DirectoryMessage) -> Result<Vec<u8>, GcError> {
    let payload = msg.encode()?;
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Try to parse a framed message from a buffer.
///
/// Returns `Some((message, bytes_consumed))` if a complete message is
/// available, or `None` if more data is needed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(DirectoryMessage, usize)>, GcError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + len {
        return Ok(None);
    }

    let msg = DirectoryMessage::decode(&buf[4..4 + len])?;
    Ok(Some((msg, 4 + len)))
}
