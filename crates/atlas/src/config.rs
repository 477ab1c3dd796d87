//! Node configuration.

use crate::credit::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_QUANTUM};
use crate::distribution::Transport;
use crate::runtime::Node;
use atlas_core::NodeId;
use std::sync::Arc;

/// Builder for a [`Node`].
///
/// # Example
///
/// ```ignore
/// use atlas::{Config, distribution::Mesh};
/// use atlas_core::NodeId;
///
/// let mesh = Mesh::new();
/// let node = mesh.add_node(Config::new(NodeId::new(1)).quantum(16));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    node: NodeId,
    quantum: u64,
    flush_threshold: usize,
}

impl Config {
    /// Creates a configuration with default quantum and flush threshold.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            quantum: DEFAULT_QUANTUM,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Sets the replenishment quantum `Q` granted per credit request.
    ///
    /// Must be at least 1; powers of two keep splits even.
    pub fn quantum(mut self, quantum: u64) -> Self {
        self.quantum = quantum;
        self
    }

    /// Sets how many pending return entries trigger a background flush.
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// The node identity this configuration is for.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub(crate) fn quantum_value(&self) -> u64 {
        self.quantum
    }

    pub(crate) fn flush_threshold_value(&self) -> usize {
        self.flush_threshold
    }

    /// Builds the node on top of `transport`.
    pub fn build(self, transport: Arc<dyn Transport>) -> Node {
        Node::from_config(self, transport)
    }
}
