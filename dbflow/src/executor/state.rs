//! Per-node and overall execution state tracking.

use crate::node::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The lifecycle state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Built but not started.
    Created,
    /// Currently executing.
    Running,
    /// Suspended on a pause/approval gate or a manual retry trigger.
    WaitingManual,
    /// Suspended until a wall-clock deadline.
    WaitingTimer,
    /// Completed successfully.
    Succeeded,
    /// Failed terminally.
    Failed,
    /// Abort observed before or during the node.
    Aborted,
}

impl NodeState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// The overall state of one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Submitted and executing.
    Running,
    /// All nodes completed successfully.
    Succeeded,
    /// At least one branch failed terminally.
    Failed,
    /// Aborted externally. Distinct terminal state, not a failure.
    Aborted,
}

/// A point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// The node id.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: NodeState,
}

/// A point-in-time view of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Overall state.
    pub overall: PipelineState,
    /// Per-node states, ordered by node id.
    pub nodes: Vec<NodeStatus>,
}

/// Shared mutable state board written by the engine, read by handles.
#[derive(Debug)]
pub struct StatusBoard {
    nodes: RwLock<BTreeMap<NodeId, NodeStatus>>,
    overall: RwLock<PipelineState>,
}

impl StatusBoard {
    /// Creates a board with every node in `Created` state.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        let map = nodes
            .into_iter()
            .map(|(id, name)| {
                (
                    id,
                    NodeStatus {
                        id,
                        name,
                        state: NodeState::Created,
                    },
                )
            })
            .collect();
        Self {
            nodes: RwLock::new(map),
            overall: RwLock::new(PipelineState::Running),
        }
    }

    /// Records a node state transition.
    pub fn set_node(&self, id: NodeId, state: NodeState) {
        if let Some(status) = self.nodes.write().get_mut(&id) {
            status.state = state;
        }
    }

    /// Returns one node's state, if the id exists.
    #[must_use]
    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.read().get(&id).map(|s| s.state)
    }

    /// Records the overall state.
    pub fn set_overall(&self, state: PipelineState) {
        *self.overall.write() = state;
    }

    /// Returns the overall state.
    #[must_use]
    pub fn overall(&self) -> PipelineState {
        *self.overall.read()
    }

    /// Returns a full snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PipelineStatus {
        PipelineStatus {
            overall: self.overall(),
            nodes: self.nodes.read().values().cloned().collect(),
        }
    }
}
