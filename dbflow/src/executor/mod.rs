//! The execution engine.
//!
//! Runs a built pipeline: strict sequential order within a branch, one task
//! per parallel branch, fan-in waiting for all branches. The shared context
//! is append/merge-only during concurrent execution; branch writes are
//! reconciled at fan-in, so no fine-grained locking is needed beyond the
//! build-time conflict check.

mod gate;
mod handle;
mod integration_tests;
mod retry;
mod state;

pub use gate::{GateDecision, GateService};
pub use handle::PipelineHandle;
pub use retry::{attempts_remain, backoff_delay, jittered_backoff_delay};
pub use state::{NodeState, NodeStatus, PipelineState, PipelineStatus, StatusBoard};

use crate::component::{ComponentRegistry, OutcomeStatus};
use crate::context::{Context, ContextDelta};
use crate::errors::{FlowError, NodeFailedError};
use crate::node::{Activity, Approval, Node, Pause, RetryPolicy, Timer};
use crate::pipeline::{Pipeline, Step};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// How a parallel group reacts to one branch's fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Let sibling branches run to completion, then report group failure.
    ///
    /// The default: never leaves a cluster half cut-over because a sibling
    /// shard failed first.
    #[default]
    WaitAll,
    /// Stop sibling branches from starting further nodes once a branch
    /// fails.
    FailFast,
}

/// Runs built pipelines against a component registry.
#[derive(Debug, Default)]
pub struct Executor {
    registry: Arc<ComponentRegistry>,
    gates: Arc<GateService>,
}

impl Executor {
    /// Creates an executor over a component registry.
    #[must_use]
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            gates: Arc::new(GateService::new()),
        }
    }

    /// Returns the gate service operators signal through.
    #[must_use]
    pub fn gates(&self) -> &Arc<GateService> {
        &self.gates
    }

    /// Submits a pipeline for execution.
    ///
    /// Returns once submission succeeds or fails validation; execution
    /// continues in the background behind the returned handle.
    ///
    /// # Errors
    ///
    /// Returns `ComponentNotRegistered` if any activity names an unknown
    /// component. Nothing runs in that case.
    pub fn submit(
        &self,
        pipeline: Pipeline,
        policy: CompletionPolicy,
    ) -> Result<PipelineHandle, FlowError> {
        for node in pipeline.nodes() {
            if let Node::Activity(activity) = node {
                if !self.registry.contains(&activity.component) {
                    return Err(FlowError::ComponentNotRegistered(
                        activity.component.to_string(),
                    ));
                }
            }
        }

        let board = Arc::new(StatusBoard::new(
            pipeline
                .nodes()
                .iter()
                .map(|n| (n.id(), n.name().to_string())),
        ));

        let shared = Arc::new(RunShared {
            pipeline_id: pipeline.id,
            registry: self.registry.clone(),
            gates: self.gates.clone(),
            board: board.clone(),
            aborted: AtomicBool::new(false),
            wakeup: Notify::new(),
            policy,
        });

        let context = pipeline.context().clone();
        let steps = pipeline.steps.clone();
        let run_shared = shared.clone();
        let run_context = context.clone();

        tracing::info!(
            pipeline = %pipeline.name,
            pipeline_id = %pipeline.id,
            nodes = pipeline.nodes().len(),
            "pipeline submitted"
        );

        let join = tokio::spawn(async move {
            let mut branch = Branch {
                ctx: run_context,
                delta: ContextDelta::new(),
            };
            let result = run_steps(&run_shared, &steps, &mut branch, &[]).await;

            let overall = match &result {
                Ok(()) => PipelineState::Succeeded,
                Err(FlowError::Aborted(_)) => PipelineState::Aborted,
                Err(_) if run_shared.is_aborted() => PipelineState::Aborted,
                Err(_) => PipelineState::Failed,
            };
            run_shared.board.set_overall(overall);
            tracing::info!(
                pipeline_id = %run_shared.pipeline_id,
                state = ?overall,
                "pipeline finished"
            );
            result
        });

        Ok(PipelineHandle::new(shared, board, context, join))
    }
}

impl Pipeline {
    /// Hands the built tree to an executor. Convenience for
    /// [`Executor::submit`].
    ///
    /// # Errors
    ///
    /// Returns `ComponentNotRegistered` when submission validation fails.
    pub fn run(
        self,
        executor: &Executor,
        policy: CompletionPolicy,
    ) -> Result<PipelineHandle, FlowError> {
        executor.submit(self, policy)
    }
}

/// State shared between the engine tasks and the handle.
#[derive(Debug)]
pub(crate) struct RunShared {
    pub(crate) pipeline_id: Uuid,
    registry: Arc<ComponentRegistry>,
    pub(crate) gates: Arc<GateService>,
    pub(crate) board: Arc<StatusBoard>,
    pub(crate) aborted: AtomicBool,
    /// Wakes suspended nodes to re-check abort/cancel flags.
    pub(crate) wakeup: Notify,
    policy: CompletionPolicy,
}

impl RunShared {
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self, cancels: &[Arc<AtomicBool>]) -> bool {
        self.is_aborted() || cancels.iter().any(|c| c.load(Ordering::SeqCst))
    }
}

/// One branch's execution view: its visible context and the write set it
/// surfaces at fan-in.
struct Branch {
    ctx: Arc<Context>,
    delta: ContextDelta,
}

impl Branch {
    fn bind(&mut self, key: &str, value: serde_json::Value) {
        self.ctx.bind(key, value.clone());
        self.delta.bind(key, value);
    }
}

fn run_steps<'a>(
    shared: &'a Arc<RunShared>,
    steps: &'a [Step],
    branch: &'a mut Branch,
    cancels: &'a [Arc<AtomicBool>],
) -> BoxFuture<'a, Result<(), FlowError>> {
    async move {
        for step in steps {
            if shared.is_cancelled(cancels) {
                return Err(abort_error(shared));
            }
            match step {
                Step::Node(node) => run_node(shared, node, branch, cancels).await?,
                Step::SubProcess(sub) => {
                    run_steps(shared, sub.steps(), branch, cancels).await?;
                }
                Step::Parallel(group) => {
                    run_parallel(shared, group.branches(), branch, cancels).await?;
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// Runs a parallel group: one task per branch, fan-in waits for all.
async fn run_parallel(
    shared: &Arc<RunShared>,
    branches: &[crate::pipeline::SubProcess],
    parent: &mut Branch,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    let group_cancel = Arc::new(AtomicBool::new(false));
    let mut child_cancels: Vec<Arc<AtomicBool>> = cancels.to_vec();
    if shared.policy == CompletionPolicy::FailFast {
        child_cancels.push(group_cancel.clone());
    }

    let mut tasks = Vec::with_capacity(branches.len());
    for sub in branches {
        let sub = sub.clone();
        let shared = shared.clone();
        let cancels = child_cancels.clone();
        let group_cancel = group_cancel.clone();
        // Copy-on-fork: the branch sees the parent context as of group
        // start; its own writes stay invisible to siblings until fan-in.
        let mut child = Branch {
            ctx: Arc::new(parent.ctx.as_ref().clone()),
            delta: ContextDelta::new(),
        };
        tasks.push(tokio::spawn(async move {
            let result = run_steps(&shared, sub.steps(), &mut child, &cancels).await;
            if result.is_err() {
                group_cancel.store(true, Ordering::SeqCst);
                shared.wakeup.notify_waiters();
            }
            (child.delta, result)
        }));
    }

    let mut first_error: Option<FlowError> = None;
    for joined in join_all(tasks).await {
        match joined {
            Ok((delta, result)) => {
                // Completed writes are kept even when the branch failed, so
                // operators can resume from a precise point.
                parent.ctx.merge(&delta);
                parent.delta.extend(&delta);
                if let Err(err) = result {
                    record_group_error(&mut first_error, err);
                }
            }
            Err(join_err) => {
                record_group_error(
                    &mut first_error,
                    FlowError::Internal(format!("branch task failed: {join_err}")),
                );
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Keeps the group's most telling error. A branch cancelled after a sibling
/// failure reports `Aborted`; the sibling's real failure must win over it.
fn record_group_error(slot: &mut Option<FlowError>, err: FlowError) {
    match slot {
        None => *slot = Some(err),
        Some(FlowError::Aborted(_)) if !matches!(err, FlowError::Aborted(_)) => {
            *slot = Some(err);
        }
        Some(_) => {}
    }
}

async fn run_node(
    shared: &Arc<RunShared>,
    node: &Node,
    branch: &mut Branch,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    match node {
        Node::Activity(activity) => run_activity(shared, activity, branch, cancels).await,
        Node::Pause(pause) => run_pause(shared, pause, cancels).await,
        Node::Timer(timer) => run_timer(shared, timer, cancels).await,
        Node::Approval(approval) => run_approval(shared, approval, cancels).await,
    }
}

async fn run_activity(
    shared: &Arc<RunShared>,
    activity: &Activity,
    branch: &mut Branch,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    let component = shared.registry.resolve(&activity.component)?;
    shared.board.set_node(activity.id, NodeState::Running);
    tracing::info!(
        pipeline_id = %shared.pipeline_id,
        node = %activity.name,
        component = %activity.component,
        payload = activity.payload.kind(),
        "activity started"
    );

    let mut attempts: u32 = 0;
    loop {
        if shared.is_cancelled(cancels) {
            shared.board.set_node(activity.id, NodeState::Aborted);
            return Err(abort_error(shared));
        }

        // A dispatched invocation is never force-cancelled; the remote
        // executor owns the process. Abort takes effect before the next node.
        let outcome = component.execute(&activity.payload, &branch.ctx).await;
        attempts += 1;

        match outcome.status {
            OutcomeStatus::Success => {
                if let Some(binding) = &activity.output_binding {
                    let value = outcome.output.unwrap_or(serde_json::Value::Null);
                    branch.bind(binding, value);
                }
                shared.board.set_node(activity.id, NodeState::Succeeded);
                tracing::info!(
                    pipeline_id = %shared.pipeline_id,
                    node = %activity.name,
                    attempts,
                    "activity succeeded"
                );
                return Ok(());
            }
            OutcomeStatus::RetryableFailure => {
                let reason = outcome.error.clone().unwrap_or_default();
                match &activity.retry {
                    RetryPolicy::Automatic(config) if attempts_remain(config, attempts) => {
                        let delay = jittered_backoff_delay(config, attempts - 1);
                        tracing::warn!(
                            pipeline_id = %shared.pipeline_id,
                            node = %activity.name,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %reason,
                            "retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryPolicy::Manual => {
                        shared.board.set_node(activity.id, NodeState::WaitingManual);
                        tracing::warn!(
                            pipeline_id = %shared.pipeline_id,
                            node = %activity.name,
                            error = %reason,
                            "activity halted awaiting operator retry"
                        );
                        match wait_for_signal(shared, activity.id, cancels).await? {
                            GateDecision::Approve => {
                                shared.board.set_node(activity.id, NodeState::Running);
                            }
                            GateDecision::Reject => {
                                return fail_node(shared, activity, branch, "retry rejected by operator");
                            }
                        }
                    }
                    RetryPolicy::None | RetryPolicy::Automatic(_) => {
                        return fail_node(shared, activity, branch, &reason);
                    }
                }
            }
            OutcomeStatus::FatalFailure => {
                let reason = outcome.error.clone().unwrap_or_default();
                return fail_node(shared, activity, branch, &reason);
            }
        }
    }
}

fn fail_node(
    shared: &Arc<RunShared>,
    activity: &Activity,
    branch: &Branch,
    reason: &str,
) -> Result<(), FlowError> {
    shared.board.set_node(activity.id, NodeState::Failed);
    tracing::error!(
        pipeline_id = %shared.pipeline_id,
        node = %activity.name,
        component = %activity.component,
        error = %reason,
        "activity failed"
    );
    Err(NodeFailedError::new(
        &activity.name,
        activity.component.as_str(),
        reason,
    )
    .with_bound_keys(branch.ctx.keys())
    .into())
}

async fn run_pause(
    shared: &Arc<RunShared>,
    pause: &Pause,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    shared.board.set_node(pause.id, NodeState::WaitingManual);
    tracing::info!(
        pipeline_id = %shared.pipeline_id,
        node = %pause.name,
        node_id = %pause.id,
        "paused for manual confirmation"
    );

    match wait_for_signal(shared, pause.id, cancels).await? {
        GateDecision::Approve => {
            shared.board.set_node(pause.id, NodeState::Succeeded);
            Ok(())
        }
        GateDecision::Reject => {
            shared.board.set_node(pause.id, NodeState::Failed);
            Err(NodeFailedError::new(&pause.name, "manual-gate", "rejected by operator").into())
        }
    }
}

async fn run_approval(
    shared: &Arc<RunShared>,
    approval: &Approval,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    shared.board.set_node(approval.id, NodeState::WaitingManual);
    tracing::info!(
        pipeline_id = %shared.pipeline_id,
        node = %approval.name,
        service = %approval.spec.service,
        "awaiting external approval"
    );

    match wait_for_signal(shared, approval.id, cancels).await? {
        GateDecision::Approve => {
            shared.board.set_node(approval.id, NodeState::Succeeded);
            Ok(())
        }
        GateDecision::Reject => {
            shared.board.set_node(approval.id, NodeState::Failed);
            Err(NodeFailedError::new(
                &approval.name,
                "approval-gate",
                format!("rejected by {}", approval.spec.service),
            )
            .into())
        }
    }
}

async fn run_timer(
    shared: &Arc<RunShared>,
    timer: &Timer,
    cancels: &[Arc<AtomicBool>],
) -> Result<(), FlowError> {
    shared.board.set_node(timer.id, NodeState::WaitingTimer);

    // A deadline already in the past completes immediately.
    if timer.deadline > chrono::Utc::now() {
        tracing::info!(
            pipeline_id = %shared.pipeline_id,
            node = %timer.name,
            deadline = %timer.deadline,
            "timer suspended"
        );
        loop {
            if shared.is_cancelled(cancels) {
                shared.board.set_node(timer.id, NodeState::Aborted);
                return Err(abort_error(shared));
            }
            let remaining = (timer.deadline - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                break;
            }
            let woken = shared.wakeup.notified();
            // Capped nap: a wakeup can race the waiter registration, so the
            // cancel flags are re-checked on a bounded interval regardless.
            tokio::select! {
                () = tokio::time::sleep(remaining.min(Duration::from_millis(100))) => {}
                () = woken => {}
            }
        }
    }

    shared.board.set_node(timer.id, NodeState::Succeeded);
    Ok(())
}

/// Parks the branch on the gate service until a decision, abort, or group
/// cancellation arrives.
async fn wait_for_signal(
    shared: &Arc<RunShared>,
    node_id: crate::node::NodeId,
    cancels: &[Arc<AtomicBool>],
) -> Result<GateDecision, FlowError> {
    let mut rx = shared.gates.register(shared.pipeline_id, node_id);
    loop {
        let woken = shared.wakeup.notified();
        if shared.is_cancelled(cancels) {
            shared.gates.unregister(shared.pipeline_id, node_id);
            shared.board.set_node(node_id, NodeState::Aborted);
            return Err(abort_error(shared));
        }
        tokio::select! {
            decision = &mut rx => {
                return match decision {
                    Ok(d) => Ok(d),
                    // Sender dropped without a decision; treat as abort.
                    Err(_) => Err(abort_error(shared)),
                };
            }
            () = woken => {}
            // A wakeup can race the waiter registration; re-check the
            // cancel flags on a bounded interval regardless.
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}

fn abort_error(shared: &RunShared) -> FlowError {
    if shared.is_aborted() {
        FlowError::Aborted("pipeline aborted by operator".to_string())
    } else {
        FlowError::Aborted("branch cancelled after sibling failure".to_string())
    }
}
