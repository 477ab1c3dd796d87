//! The per-node runtime: the credit manager's public surface.
//!
//! A [`Node`] combines this node's directory service, the transport, and
//! the pending-return buffer. It exposes the four protocol operations
//! (`create`, `duplicate`, `release`, `resolve`) plus explicit return
//! flushing. Handles are cheap to clone and share between tasks.

use crate::config::Config;
use crate::credit::ReturnBuffer;
use crate::directory::DirectoryService;
use crate::distribution::Transport;
use atlas_core::{DirectoryMessage, ErrorKind, GcError, GlobalRef, NodeId, ObjectAddress, RefKind};
use std::sync::Arc;

/// One participant in the distributed system.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    directory: Arc<DirectoryService>,
    transport: Arc<dyn Transport>,
    returns: ReturnBuffer,
}

impl Node {
    pub(crate) fn from_config(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: config.node_id(),
                directory: Arc::new(DirectoryService::new(
                    config.node_id(),
                    config.quantum_value(),
                )),
                transport,
                returns: ReturnBuffer::new(config.flush_threshold_value()),
            }),
        }
    }

    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The directory service for objects owned by this node.
    pub fn directory(&self) -> &DirectoryService {
        &self.inner.directory
    }

    pub(crate) fn directory_arc(&self) -> Arc<DirectoryService> {
        self.inner.directory.clone()
    }

    /// Creates a plain object owned by this node.
    ///
    /// The returned reference carries `initial_quota` credit (at least 1).
    pub fn create(&self, initial_quota: u64) -> Result<GlobalRef, GcError> {
        self.inner
            .directory
            .create_entry(initial_quota, RefKind::Plain, None)
    }

    /// Creates a managed object owned by this node.
    ///
    /// `finalizer` runs on this node, exactly once, when the object's
    /// credit has been fully returned.
    pub fn create_managed(
        &self,
        initial_quota: u64,
        finalizer: impl FnOnce() + Send + Sync + 'static,
    ) -> Result<GlobalRef, GcError> {
        self.inner
            .directory
            .create_entry(initial_quota, RefKind::Managed, Some(Box::new(finalizer)))
    }

    /// Creates a plain object owned by `target`, suspending until the
    /// remote allocation completes.
    pub async fn create_on(&self, target: NodeId, initial_quota: u64) -> Result<GlobalRef, GcError> {
        if target == self.inner.id {
            return self.create(initial_quota);
        }
        if initial_quota == 0 {
            return Err(GcError::InvalidQuota);
        }

        let reply = self
            .inner
            .transport
            .call(
                target,
                DirectoryMessage::Create {
                    initial_quota,
                    kind: RefKind::Plain,
                },
            )
            .await?;

        match reply {
            DirectoryMessage::Created { gref } => Ok(gref),
            DirectoryMessage::Error {
                kind: ErrorKind::InvalidQuota,
            } => Err(GcError::InvalidQuota),
            other => Err(GcError::UnexpectedReply(format!(
                "expected Created, got {other:?}"
            ))),
        }
    }

    /// Duplicates a reference, subdividing its credit.
    ///
    /// The common case is purely local: the credit is split in half and no
    /// message is sent. When only one indivisible credit remains, one
    /// `RequestCredit` round trip to the owner replenishes the reference
    /// first; the calling task suspends until the grant arrives. A
    /// transport failure fails the duplication and is not retried here.
    pub async fn duplicate(&self, gref: &mut GlobalRef) -> Result<GlobalRef, GcError> {
        if gref.credit() == 1 {
            let granted = self.request_credit(gref).await?;
            gref.add_credit(granted);
            tracing::debug!(
                node = %self.inner.id,
                gref = ?gref,
                granted,
                "replenished exhausted reference"
            );
        }

        gref.split().ok_or_else(|| {
            GcError::ProtocolViolation("reference still exhausted after replenishment".into())
        })
    }

    async fn request_credit(&self, gref: &GlobalRef) -> Result<u64, GcError> {
        if gref.owner() == self.inner.id {
            return self.inner.directory.request_credit(gref.object(), gref.credit());
        }

        let reply = self
            .inner
            .transport
            .call(
                gref.owner(),
                DirectoryMessage::RequestCredit {
                    object: gref.object(),
                    reported_credit: gref.credit(),
                },
            )
            .await?;

        match reply {
            DirectoryMessage::CreditGrant { amount } => Ok(amount),
            DirectoryMessage::Error { kind } => Err(kind.into_error(gref.object())),
            other => Err(GcError::UnexpectedReply(format!(
                "expected CreditGrant, got {other:?}"
            ))),
        }
    }

    /// Releases a reference, returning its credit to the owner.
    ///
    /// Never fails and never suspends. When this node is the owner the
    /// return is applied synchronously (a managed finalizer may run on the
    /// releasing task). Otherwise the credit is parked in the return
    /// buffer and shipped by a background flush; delivery may be delayed
    /// arbitrarily but the credit is never lost.
    pub fn release(&self, gref: GlobalRef) {
        let owner = gref.owner();
        let object = gref.object();
        let amount = gref.surrender();

        if owner == self.inner.id {
            self.inner.directory.return_credit(object, amount);
            return;
        }

        tracing::debug!(node = %self.inner.id, %owner, %object, amount, "release parked for return");
        if self.inner.returns.add(owner, object, amount) {
            // Flush off the releasing task. Outside a runtime the credit
            // just stays parked until an explicit flush.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let node = self.clone();
                handle.spawn(async move {
                    node.flush_returns().await;
                });
            }
        }
    }

    /// Sends every pending credit return to its owner.
    ///
    /// An undeliverable return is re-queued and retried by a later flush.
    pub async fn flush_returns(&self) {
        for (owner, object, amount) in self.inner.returns.drain() {
            let result = self
                .inner
                .transport
                .cast(owner, DirectoryMessage::ReturnCredit { object, amount })
                .await;

            if let Err(error) = result {
                tracing::warn!(
                    node = %self.inner.id,
                    %owner,
                    %object,
                    amount,
                    %error,
                    "return undeliverable; re-queued"
                );
                self.inner.returns.add(owner, object, amount);
            }
        }
    }

    /// Number of `(owner, object)` entries waiting in the return buffer.
    pub fn pending_returns(&self) -> usize {
        self.inner.returns.len()
    }

    /// Resolves a reference to its storage address.
    ///
    /// Local lookup at the owner only: any other node answers
    /// `UnknownObject`.
    pub fn resolve(&self, gref: &GlobalRef) -> Result<ObjectAddress, GcError> {
        if gref.owner() != self.inner.id {
            return Err(GcError::UnknownObject(gref.object()));
        }
        self.inner.directory.resolve(gref.object())
    }

    /// Drains pending returns and evicts tombstones.
    pub async fn shutdown(&self) {
        self.flush_returns().await;
        let swept = self.inner.directory.sweep_collected();
        tracing::debug!(node = %self.inner.id, swept, "node shut down");
    }
}
