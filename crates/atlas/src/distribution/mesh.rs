//! In-process transport for multi-node setups inside one runtime.
//!
//! A [`Mesh`] connects the directory services of several nodes without any
//! real networking. Messages still pass through the postcard wire encoding,
//! so anything that works over the mesh also fits on the wire. Tests use
//! the mesh's knobs to produce the protocol's failure modes: a partitioned
//! node makes calls fail with a transport error, and a cast delay keeps
//! credit returns in flight for a while (delayed, never lost).

use super::Transport;
use crate::config::Config;
use crate::directory::DirectoryService;
use crate::runtime::Node;
use async_trait::async_trait;
use atlas_core::{DirectoryMessage, GcError, NodeId};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// An in-process mesh of nodes.
#[derive(Clone, Default)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

#[derive(Default)]
struct MeshInner {
    /// Directory services reachable through this mesh.
    nodes: DashMap<NodeId, Arc<DirectoryService>>,
    /// Nodes currently unreachable.
    partitioned: DashSet<NodeId>,
    /// Artificial delivery delay applied to casts.
    cast_delay: Mutex<Option<Duration>>,
}

impl Mesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a node from `config` and wires it into the mesh.
    pub fn add_node(&self, config: Config) -> Node {
        let node = config.build(Arc::new(self.clone()));
        self.inner.nodes.insert(node.id(), node.directory_arc());
        node
    }

    /// Makes `node` unreachable: calls to it fail, casts to it fail (and
    /// are re-queued by the sender's return buffer).
    pub fn partition(&self, node: NodeId) {
        self.inner.partitioned.insert(node);
    }

    /// Makes `node` reachable again.
    pub fn heal(&self, node: NodeId) {
        self.inner.partitioned.remove(&node);
    }

    /// Delays every subsequent cast by `delay` before it is delivered.
    ///
    /// The message is already owned by the mesh when `cast` returns: it
    /// arrives late, it does not get lost.
    pub fn set_cast_delay(&self, delay: Option<Duration>) {
        *self.inner.cast_delay.lock() = delay;
    }

    fn route(&self, target: NodeId) -> Result<Arc<DirectoryService>, GcError> {
        if self.inner.partitioned.contains(&target) {
            return Err(GcError::Transport(format!("{target} is unreachable")));
        }
        self.inner
            .nodes
            .get(&target)
            .map(|d| d.clone())
            .ok_or(GcError::NotConnected(target))
    }
}

/// Round-trips a message through its wire encoding, as a real transport
/// would.
fn over_the_wire(msg: &DirectoryMessage) -> Result<DirectoryMessage, GcError> {
    DirectoryMessage::decode(&msg.encode()?)
}

#[async_trait]
impl Transport for Mesh {
    async fn call(
        &self,
        target: NodeId,
        msg: DirectoryMessage,
    ) -> Result<DirectoryMessage, GcError> {
        let directory = self.route(target)?;
        let msg = over_the_wire(&msg)?;

        let reply = directory
            .handle(msg)
            .ok_or_else(|| GcError::UnexpectedReply("one-way message sent as call".into()))?;
        over_the_wire(&reply)
    }

    async fn cast(&self, target: NodeId, msg: DirectoryMessage) -> Result<(), GcError> {
        let directory = self.route(target)?;
        let msg = over_the_wire(&msg)?;

        let delay = *self.inner.cast_delay.lock();
        match delay {
            Some(delay) => {
                // In flight: delivery happens later, off the sender's task.
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    directory.handle(msg);
                });
            }
            None => {
                directory.handle(msg);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::RefKind;

    #[tokio::test]
    async fn call_reaches_the_target_directory() {
        let mesh = Mesh::new();
        let node = mesh.add_node(Config::new(NodeId::new(1)));

        let reply = mesh
            .call(
                NodeId::new(1),
                DirectoryMessage::Create {
                    initial_quota: 2,
                    kind: RefKind::Plain,
                },
            )
            .await
            .unwrap();

        match reply {
            DirectoryMessage::Created { gref } => assert_eq!(gref.owner(), node.id()),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_target_is_not_connected() {
        let mesh = Mesh::new();
        let err = mesh
            .call(
                NodeId::new(9),
                DirectoryMessage::RequestCredit {
                    object: atlas_core::ObjectId::from_raw(1),
                    reported_credit: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GcError::NotConnected(_)));
    }

    #[tokio::test]
    async fn partitioned_target_fails_with_transport_error() {
        let mesh = Mesh::new();
        let node = mesh.add_node(Config::new(NodeId::new(1)));
        mesh.partition(node.id());

        let err = mesh
            .call(
                node.id(),
                DirectoryMessage::Create {
                    initial_quota: 1,
                    kind: RefKind::Plain,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GcError::Transport(_)));

        mesh.heal(node.id());
        assert!(mesh
            .call(
                node.id(),
                DirectoryMessage::Create {
                    initial_quota: 1,
                    kind: RefKind::Plain,
                },
            )
            .await
            .is_ok());
    }
}
