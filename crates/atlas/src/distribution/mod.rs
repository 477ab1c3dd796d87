//! Distribution layer.
//!
//! The credit protocol only needs two delivery primitives from its
//! transport, captured by the [`Transport`] trait:
//!
//! - `call`: a request/reply exchange (`Create`, `RequestCredit`)
//! - `cast`: a one-way message (`ReturnCredit`)
//!
//! Delivery guarantees, retry and backoff policy belong to the transport;
//! the protocol itself tolerates arbitrary delay of casts but never their
//! loss. Two implementations are provided:
//!
//! - [`Mesh`]: an in-process transport wiring several nodes inside one
//!   tokio runtime, with partitioning and delivery-delay knobs for tests
//! - [`QuicTransport`]: QUIC connections between real nodes

mod mesh;
mod quic;

pub use mesh::Mesh;
pub use quic::QuicTransport;

use async_trait::async_trait;
use atlas_core::{DirectoryMessage, GcError, NodeId};

/// Delivery primitives consumed by the credit protocol.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `msg` to `target` and waits for the reply.
    ///
    /// Suspends the calling task, not the worker thread. A transport error
    /// is surfaced to the caller; this layer never retries on its own.
    async fn call(
        &self,
        target: NodeId,
        msg: DirectoryMessage,
    ) -> Result<DirectoryMessage, GcError>;

    /// Sends `msg` to `target` without waiting for a reply.
    ///
    /// An error means the message was definitely not delivered and the
    /// caller still owns it (the return buffer re-queues in that case).
    async fn cast(&self, target: NodeId, msg: DirectoryMessage) -> Result<(), GcError>;
}
