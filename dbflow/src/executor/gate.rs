//! Manual gate service for pause, approval, and operator retry signals.

use crate::node::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

/// An operator or external-system decision for a suspended node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue past the gate (or retry the halted activity).
    Approve,
    /// Refuse: the branch fails.
    Reject,
}

/// Tracks nodes suspended on a manual signal.
///
/// A branch hitting a pause/approval node (or a `RetryPolicy::Manual` halt)
/// registers a oneshot slot keyed by (pipeline id, node id) and awaits the
/// receiver. `signal` fulfills the slot from the operator side. Suspensions
/// hold no exclusive resource; other branches and pipelines are unaffected.
#[derive(Debug, Default)]
pub struct GateService {
    pending: RwLock<HashMap<(Uuid, NodeId), oneshot::Sender<GateDecision>>>,
}

impl GateService {
    /// Creates an empty gate service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a suspension and returns the receiver the branch awaits.
    ///
    /// A second registration for the same key replaces the first; the stale
    /// receiver resolves as closed.
    pub fn register(&self, pipeline_id: Uuid, node_id: NodeId) -> oneshot::Receiver<GateDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert((pipeline_id, node_id), tx);
        rx
    }

    /// Delivers a decision to a suspended node.
    ///
    /// Returns false if nothing is waiting under that key.
    pub fn signal(&self, pipeline_id: Uuid, node_id: NodeId, decision: GateDecision) -> bool {
        if let Some(tx) = self.pending.write().remove(&(pipeline_id, node_id)) {
            return tx.send(decision).is_ok();
        }
        false
    }

    /// Drops a registration without signalling (abort path).
    pub fn unregister(&self, pipeline_id: Uuid, node_id: NodeId) {
        self.pending.write().remove(&(pipeline_id, node_id));
    }

    /// Lists the nodes of one pipeline currently waiting on a signal.
    #[must_use]
    pub fn waiting_nodes(&self, pipeline_id: Uuid) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .pending
            .read()
            .keys()
            .filter(|(pid, _)| *pid == pipeline_id)
            .map(|(_, nid)| *nid)
            .collect();
        ids.sort();
        ids
    }
}
