//! Pending credit returns.
//!
//! Releasing a remote reference must never suspend the releasing task, so
//! returned credit is parked here and shipped to owners by a flush. Amounts
//! are coalesced per `(owner, object)`: the protocol sums credit rather
//! than sequencing events, so one message carrying the combined amount is
//! equivalent to many.

use atlas_core::{NodeId, ObjectId};
use dashmap::DashMap;

/// Default replenishment quantum `Q`: credit granted per request.
///
/// A power of two keeps subsequent splits even.
pub const DEFAULT_QUANTUM: u64 = 8;

/// Default number of pending entries that triggers a background flush.
///
/// At 1, every remote release is shipped as soon as a flush task can run.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1;

/// Credit waiting to be returned to remote owners.
pub(crate) struct ReturnBuffer {
    pending: DashMap<(NodeId, ObjectId), u64>,
    threshold: usize,
}

impl ReturnBuffer {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            pending: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Parks `amount` credit for `object` at `owner`. Returns `true` when
    /// the buffer has reached its flush threshold.
    pub(crate) fn add(&self, owner: NodeId, object: ObjectId, amount: u64) -> bool {
        *self.pending.entry((owner, object)).or_insert(0) += amount;
        self.pending.len() >= self.threshold
    }

    /// Takes everything currently pending.
    ///
    /// The drain is atomic per entry: credit is either still pending or
    /// owned by exactly one flush, never both.
    pub(crate) fn drain(&self) -> Vec<(NodeId, ObjectId, u64)> {
        let keys: Vec<(NodeId, ObjectId)> = self.pending.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|((owner, object), amount)| (owner, object, amount))
            })
            .collect()
    }

    /// Number of distinct `(owner, object)` entries pending.
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
