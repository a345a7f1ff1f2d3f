//! Validating builders for subprocesses and pipelines.
//!
//! Builders construct the node tree incrementally and reject malformed
//! wiring before submission: duplicate output bindings inside a branch,
//! cross-branch reads inside a parallel group, and conflicting writes by
//! sibling branches. All checks run at build time, before any remote side
//! effect.

use super::tree::{ParallelGroup, Pipeline, Step, SubProcess};
use crate::context::Context;
use crate::errors::BuildError;
use crate::node::{
    ActPayload, Activity, Approval, ApprovalSpec, ComponentRef, Node, NodeId, Pause, RetryPolicy,
    Timer,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::HashSet;

/// Builder for one named, ordered sequence of steps.
///
/// Mirrors the call-site shape of flow routines: create, append activities
/// and nested subprocesses in order, then `build` once. The builder cannot
/// be reused after `build`.
#[derive(Debug, Default)]
pub struct SubProcessBuilder {
    steps: Vec<Step>,
    /// Output bindings declared directly in this branch, in order.
    bindings: Vec<String>,
    built: bool,
}

impl SubProcessBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an activity node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOutputBinding` if `output_binding` collides with a
    /// name already bound earlier in this branch, or `AlreadyBuilt` after
    /// `build`.
    pub fn add_activity(
        &mut self,
        name: impl Into<String>,
        component: impl Into<ComponentRef>,
        payload: ActPayload,
        output_binding: Option<&str>,
        retry: RetryPolicy,
    ) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        let name = name.into();

        if let Some(binding) = output_binding {
            if self.bindings.iter().any(|b| b == binding) {
                return Err(BuildError::DuplicateOutputBinding {
                    node: name,
                    binding: binding.to_string(),
                });
            }
            self.bindings.push(binding.to_string());
        }

        self.steps.push(Step::Node(Node::Activity(Activity {
            id: NodeId(0),
            name,
            component: component.into(),
            payload,
            output_binding: output_binding.map(String::from),
            retry,
        })));
        Ok(self)
    }

    /// Appends a pause node blocking for manual confirmation.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt` after `build`.
    pub fn add_pause(&mut self, name: impl Into<String>) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        self.steps.push(Step::Node(Node::Pause(Pause {
            id: NodeId(0),
            name: name.into(),
        })));
        Ok(self)
    }

    /// Appends a timer node suspending until `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt` after `build`.
    pub fn add_timer(
        &mut self,
        name: impl Into<String>,
        deadline: DateTime<Utc>,
    ) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        self.steps.push(Step::Node(Node::Timer(Timer {
            id: NodeId(0),
            name: name.into(),
            deadline,
        })));
        Ok(self)
    }

    /// Appends an approval node awaiting an external ITSM decision.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt` after `build`.
    pub fn add_approval(
        &mut self,
        name: impl Into<String>,
        spec: ApprovalSpec,
    ) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        self.steps.push(Step::Node(Node::Approval(Approval {
            id: NodeId(0),
            name: name.into(),
            spec,
        })));
        Ok(self)
    }

    /// Appends a previously built subprocess as a single composite child.
    ///
    /// The child's context writes become visible to this branch's later
    /// siblings once the child completes, and count against this branch's
    /// binding namespace like direct activity bindings do.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOutputBinding` if the child binds a name already
    /// bound earlier in this branch, or `AlreadyBuilt` after `build`.
    pub fn add_sub_process(&mut self, sub: SubProcess) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        self.absorb_bindings(&sub.name, sub.write_set())?;
        self.steps.push(Step::SubProcess(sub));
        Ok(self)
    }

    /// Appends a parallel group of independent branches.
    ///
    /// Validated statically: no branch may read a variable written by a
    /// sibling in the same group, and no two branches may bind the same
    /// output name. Execution order across branches is not guaranteed, so
    /// both are correctness invariants rather than style rules.
    ///
    /// # Errors
    ///
    /// Returns `CrossBranchRead`, `ConflictingWrite`,
    /// `DuplicateOutputBinding` if a branch binds a name already bound
    /// earlier in this branch, or `AlreadyBuilt`.
    pub fn add_parallel_group(
        &mut self,
        branches: Vec<SubProcess>,
    ) -> Result<&mut Self, BuildError> {
        self.ensure_open()?;
        validate_parallel_group(&branches)?;
        for branch in &branches {
            self.absorb_bindings(&branch.name, branch.write_set())?;
        }
        self.steps.push(Step::Parallel(ParallelGroup::new(branches)));
        Ok(self)
    }

    /// Finalizes the builder into an immutable subprocess.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt` if `build` was already called.
    pub fn build(&mut self, name: impl Into<String>) -> Result<SubProcess, BuildError> {
        let name = name.into();
        if self.built {
            return Err(BuildError::AlreadyBuilt { name });
        }
        self.built = true;
        Ok(SubProcess::new(name, std::mem::take(&mut self.steps)))
    }

    /// Returns the number of steps appended so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn ensure_open(&self) -> Result<(), BuildError> {
        if self.built {
            return Err(BuildError::AlreadyBuilt {
                name: "<subprocess>".to_string(),
            });
        }
        Ok(())
    }

    /// Claims a composite child's output bindings in this branch's namespace.
    fn absorb_bindings(&mut self, node: &str, writes: Vec<String>) -> Result<(), BuildError> {
        for binding in writes {
            if self.bindings.iter().any(|b| *b == binding) {
                return Err(BuildError::DuplicateOutputBinding {
                    node: node.to_string(),
                    binding,
                });
            }
            self.bindings.push(binding);
        }
        Ok(())
    }
}

/// Builder for the root pipeline.
///
/// Pre-populated with seed context values (ticket-level parameters); the
/// engine checks declared required keys but not business semantics.
#[derive(Debug)]
pub struct PipelineBuilder {
    context: Context,
    inner: SubProcessBuilder,
}

impl PipelineBuilder {
    /// Creates a builder seeded with initial context values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSeed` when a required seed key is absent.
    pub fn new(
        seed: HashMap<String, serde_json::Value>,
        required_keys: &[&str],
    ) -> Result<Self, BuildError> {
        Ok(Self {
            context: Context::with_seed(seed, required_keys)?,
            inner: SubProcessBuilder::new(),
        })
    }

    /// Appends an activity node. See [`SubProcessBuilder::add_activity`].
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOutputBinding` or `AlreadyBuilt`.
    pub fn add_activity(
        &mut self,
        name: impl Into<String>,
        component: impl Into<ComponentRef>,
        payload: ActPayload,
        output_binding: Option<&str>,
        retry: RetryPolicy,
    ) -> Result<&mut Self, BuildError> {
        self.inner
            .add_activity(name, component, payload, output_binding, retry)?;
        Ok(self)
    }

    /// Appends a pause node.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt`.
    pub fn add_pause(&mut self, name: impl Into<String>) -> Result<&mut Self, BuildError> {
        self.inner.add_pause(name)?;
        Ok(self)
    }

    /// Appends a timer node.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt`.
    pub fn add_timer(
        &mut self,
        name: impl Into<String>,
        deadline: DateTime<Utc>,
    ) -> Result<&mut Self, BuildError> {
        self.inner.add_timer(name, deadline)?;
        Ok(self)
    }

    /// Appends an approval node.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt`.
    pub fn add_approval(
        &mut self,
        name: impl Into<String>,
        spec: ApprovalSpec,
    ) -> Result<&mut Self, BuildError> {
        self.inner.add_approval(name, spec)?;
        Ok(self)
    }

    /// Appends a built subprocess.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBuilt`.
    pub fn add_sub_process(&mut self, sub: SubProcess) -> Result<&mut Self, BuildError> {
        self.inner.add_sub_process(sub)?;
        Ok(self)
    }

    /// Appends a parallel group, validated statically.
    ///
    /// # Errors
    ///
    /// Returns `CrossBranchRead`, `ConflictingWrite`, or `AlreadyBuilt`.
    pub fn add_parallel_group(
        &mut self,
        branches: Vec<SubProcess>,
    ) -> Result<&mut Self, BuildError> {
        self.inner.add_parallel_group(branches)?;
        Ok(self)
    }

    /// Finalizes into an immutable pipeline with node ids assigned in
    /// depth-first order.
    ///
    /// # Errors
    ///
    /// Returns `Empty` for a pipeline without steps, or `AlreadyBuilt`.
    pub fn build(&mut self, name: impl Into<String>) -> Result<Pipeline, BuildError> {
        let name = name.into();
        if self.inner.steps.is_empty() && !self.inner.built {
            return Err(BuildError::Empty { name });
        }
        let sub = self.inner.build(name.clone())?;
        Ok(Pipeline::new(name, self.context.clone(), sub.steps))
    }
}

/// Static read/write analysis over a parallel group's branches.
fn validate_parallel_group(branches: &[SubProcess]) -> Result<(), BuildError> {
    let sets: Vec<(HashSet<String>, HashSet<String>)> = branches
        .iter()
        .map(|b| {
            (
                b.read_set().into_iter().collect(),
                b.write_set().into_iter().collect(),
            )
        })
        .collect();

    for (i, reader) in branches.iter().enumerate() {
        for (j, writer) in branches.iter().enumerate() {
            if i == j {
                continue;
            }
            if let Some(binding) = sets[i].0.intersection(&sets[j].1).min() {
                return Err(BuildError::CrossBranchRead {
                    binding: binding.clone(),
                    reader_branch: reader.name.clone(),
                    writer_branch: writer.name.clone(),
                });
            }
            if i < j {
                if let Some(binding) = sets[i].1.intersection(&sets[j].1).min() {
                    return Err(BuildError::ConflictingWrite {
                        binding: binding.clone(),
                        first_branch: reader.name.clone(),
                        second_branch: writer.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
