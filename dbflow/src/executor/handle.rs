//! The caller-side handle for a submitted pipeline.

use super::gate::GateDecision;
use super::state::{PipelineState, PipelineStatus};
use super::RunShared;
use crate::context::Context;
use crate::errors::FlowError;
use crate::executor::StatusBoard;
use crate::node::NodeId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Observes and steers one running pipeline instance.
///
/// Dropping the handle does not stop the pipeline; use [`abort`] for that.
///
/// [`abort`]: PipelineHandle::abort
#[derive(Debug)]
pub struct PipelineHandle {
    shared: Arc<RunShared>,
    board: Arc<StatusBoard>,
    context: Arc<Context>,
    join: JoinHandle<Result<(), FlowError>>,
}

impl PipelineHandle {
    pub(crate) fn new(
        shared: Arc<RunShared>,
        board: Arc<StatusBoard>,
        context: Arc<Context>,
        join: JoinHandle<Result<(), FlowError>>,
    ) -> Self {
        Self {
            shared,
            board,
            context,
            join,
        }
    }

    /// Returns the pipeline instance id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.pipeline_id
    }

    /// Returns a point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.board.snapshot()
    }

    /// Returns the overall state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.board.overall()
    }

    /// Returns the shared context.
    ///
    /// Bindings completed before a failure or abort stay readable here.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Delivers an operator decision to a suspended node.
    ///
    /// Returns false if that node is not currently waiting.
    pub fn signal(&self, node_id: NodeId, decision: GateDecision) -> bool {
        self.shared
            .gates
            .signal(self.shared.pipeline_id, node_id, decision)
    }

    /// Re-triggers an activity halted under a manual retry policy.
    ///
    /// Equivalent to `signal(node_id, GateDecision::Approve)`. Returns false
    /// if that node is not currently halted.
    pub fn retry_node(&self, node_id: NodeId) -> bool {
        self.signal(node_id, GateDecision::Approve)
    }

    /// Lists nodes currently suspended on a manual signal.
    #[must_use]
    pub fn waiting_nodes(&self) -> Vec<NodeId> {
        self.shared.gates.waiting_nodes(self.shared.pipeline_id)
    }

    /// Requests an abort.
    ///
    /// Running invocations are not interrupted; the abort takes effect before
    /// each branch starts its next node, and suspended gates and timers wake
    /// immediately. Completed context bindings are retained.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_waiters();
        tracing::warn!(pipeline_id = %self.shared.pipeline_id, "abort requested");
    }

    /// Waits for the pipeline to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the first terminal error, `Aborted` after an abort, or
    /// `Internal` if the run task panicked.
    pub async fn join(self) -> Result<(), FlowError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) => Err(FlowError::Internal(format!(
                "pipeline task failed: {join_err}"
            ))),
        }
    }
}
