//! The immutable node tree produced by the builders.

use crate::context::Context;
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One child of a subprocess: a node, a nested subprocess, or a parallel
/// group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// An atomic node.
    Node(Node),
    /// A nested named sequence.
    SubProcess(SubProcess),
    /// A fan-out/fan-in group of independent subprocesses.
    Parallel(ParallelGroup),
}

impl Step {
    /// Returns the context variables written anywhere under this step.
    #[must_use]
    pub fn write_set(&self) -> Vec<String> {
        match self {
            Self::Node(node) => node.output_binding().map(String::from).into_iter().collect(),
            Self::SubProcess(sub) => sub.write_set(),
            Self::Parallel(group) => group
                .branches
                .iter()
                .flat_map(SubProcess::write_set)
                .collect(),
        }
    }

    /// Returns the context variables read anywhere under this step.
    #[must_use]
    pub fn read_set(&self) -> Vec<String> {
        match self {
            Self::Node(node) => node.reads(),
            Self::SubProcess(sub) => sub.read_set(),
            Self::Parallel(group) => group
                .branches
                .iter()
                .flat_map(SubProcess::read_set)
                .collect(),
        }
    }

    pub(crate) fn assign_ids(&mut self, next: &mut u32) {
        match self {
            Self::Node(node) => {
                node.set_id(NodeId(*next));
                *next += 1;
            }
            Self::SubProcess(sub) => sub.assign_ids(next),
            Self::Parallel(group) => {
                for branch in &mut group.branches {
                    branch.assign_ids(next);
                }
            }
        }
    }
}

/// A named, ordered sequence of steps: the unit of reuse and composition.
///
/// Immutable once built. Ownership enforces the single-parent invariant: a
/// subprocess is moved into its parent and cannot be attached twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProcess {
    /// Display name.
    pub name: String,
    /// Children in execution order.
    pub(crate) steps: Vec<Step>,
}

impl SubProcess {
    pub(crate) fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Returns the children in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the context variables written anywhere in this subprocess.
    #[must_use]
    pub fn write_set(&self) -> Vec<String> {
        self.steps.iter().flat_map(Step::write_set).collect()
    }

    /// Returns the context variables read anywhere in this subprocess.
    #[must_use]
    pub fn read_set(&self) -> Vec<String> {
        self.steps.iter().flat_map(Step::read_set).collect()
    }

    pub(crate) fn assign_ids(&mut self, next: &mut u32) {
        for step in &mut self.steps {
            step.assign_ids(next);
        }
    }
}

/// A set of independent subprocesses that must all complete before the
/// pipeline continues.
///
/// Branches have no declared ordering or mutual data dependency; the builder
/// rejects wiring where one branch reads a sibling's write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    /// The independent branches.
    pub(crate) branches: Vec<SubProcess>,
}

impl ParallelGroup {
    pub(crate) fn new(branches: Vec<SubProcess>) -> Self {
        Self { branches }
    }

    /// Returns the branches.
    #[must_use]
    pub fn branches(&self) -> &[SubProcess] {
        &self.branches
    }
}

/// The root of one operation instance: owns the context and the node tree.
#[derive(Debug)]
pub struct Pipeline {
    /// Unique id of this pipeline instance.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// The shared context, seeded at construction.
    pub(crate) context: Arc<Context>,
    /// Top-level steps in execution order.
    pub(crate) steps: Vec<Step>,
}

impl Pipeline {
    pub(crate) fn new(name: impl Into<String>, context: Context, mut steps: Vec<Step>) -> Self {
        let mut next = 0u32;
        for step in &mut steps {
            step.assign_ids(&mut next);
        }
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            context: Arc::new(context),
            steps,
        }
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Returns the top-level steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Collects every node in depth-first order.
    #[must_use]
    pub fn nodes(&self) -> Vec<&Node> {
        fn walk<'a>(steps: &'a [Step], out: &mut Vec<&'a Node>) {
            for step in steps {
                match step {
                    Step::Node(node) => out.push(node),
                    Step::SubProcess(sub) => walk(&sub.steps, out),
                    Step::Parallel(group) => {
                        for branch in &group.branches {
                            walk(&branch.steps, out);
                        }
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.steps, &mut out);
        out
    }
}
