//! Error types for the dbflow engine.
//!
//! The taxonomy separates build-time errors (detected before any remote side
//! effect), precondition errors (raised while assembling flow parameters from
//! live queries), context errors, and execution-time failures.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The main error type for dbflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A pipeline build-time validation error.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A flow precondition was not met while gathering facts.
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    /// A context variable read failed.
    #[error("{0}")]
    UnboundVariable(#[from] UnboundVariableError),

    /// A node failed during execution.
    #[error("{0}")]
    NodeFailed(#[from] NodeFailedError),

    /// The pipeline was aborted. Distinct terminal state, not a failure.
    #[error("Pipeline aborted: {0}")]
    Aborted(String),

    /// A component reference could not be resolved at submission.
    #[error("Component not registered: {0}")]
    ComponentNotRegistered(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors detected while constructing a pipeline, before submission.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The seed context is missing required keys.
    #[error("Invalid seed context: missing keys [{}]", missing.join(", "))]
    InvalidSeed {
        /// The absent required keys.
        missing: Vec<String>,
    },

    /// An output binding collides with one bound earlier in the same branch.
    #[error("Duplicate output binding '{binding}' at node '{node}'")]
    DuplicateOutputBinding {
        /// The node declaring the binding.
        node: String,
        /// The colliding variable name.
        binding: String,
    },

    /// Two sibling branches of one parallel group bind the same output name.
    #[error(
        "Conflicting write of '{binding}' by parallel branches '{first_branch}' and '{second_branch}'"
    )]
    ConflictingWrite {
        /// The variable bound by both branches.
        binding: String,
        /// The first branch binding it.
        first_branch: String,
        /// The second branch binding it.
        second_branch: String,
    },

    /// A branch reads a variable written by a sibling in the same group.
    ///
    /// Execution order across branches is not guaranteed, so this wiring is
    /// rejected statically.
    #[error(
        "Branch '{reader_branch}' reads '{binding}' written by sibling branch '{writer_branch}' in the same parallel group"
    )]
    CrossBranchRead {
        /// The variable being read.
        binding: String,
        /// The branch reading it.
        reader_branch: String,
        /// The sibling branch writing it.
        writer_branch: String,
    },

    /// The builder was used after `build` consumed it.
    #[error("Builder '{name}' has already been built")]
    AlreadyBuilt {
        /// The builder name.
        name: String,
    },

    /// A (cluster type, raw role) pair outside the documented mapping table.
    #[error("No role mapping for cluster type '{cluster_type}' and role '{raw_role}'")]
    UnknownRoleMapping {
        /// The cluster type.
        cluster_type: String,
        /// The unmapped raw role.
        raw_role: String,
    },

    /// A built subprocess was attached to more than one parent.
    #[error("SubProcess '{name}' is already attached to a parent")]
    AlreadyAttached {
        /// The subprocess name.
        name: String,
    },

    /// The pipeline has no steps.
    #[error("Pipeline '{name}' has no steps")]
    Empty {
        /// The pipeline name.
        name: String,
    },
}

/// Errors raised while assembling flow parameters from live queries.
///
/// These abort flow construction before any pipeline is created.
#[derive(Debug, Clone, Error)]
pub enum PreconditionError {
    /// No full backup exists at or before the requested restore time.
    #[error("No backup found for cluster {cluster_id} at or before {target_time}")]
    NoBackupFound {
        /// The cluster being restored.
        cluster_id: u64,
        /// The requested restore instant.
        target_time: DateTime<Utc>,
    },

    /// The binlog catalog has a gap inside the replay window.
    #[error("No binlog coverage for cluster {cluster_id} in window [{start}, {end}]")]
    NoBinlogCoverage {
        /// The cluster being restored.
        cluster_id: u64,
        /// Window start (snapshot time minus safety margin).
        start: DateTime<Utc>,
        /// Window end (target restore time).
        end: DateTime<Utc>,
    },

    /// Cluster topology facts were missing or inconsistent.
    #[error("Topology error for cluster {cluster_id}: {message}")]
    Topology {
        /// The cluster queried.
        cluster_id: u64,
        /// What was missing or inconsistent.
        message: String,
    },
}

/// Error raised when reading a context variable that was never bound.
///
/// Reads never silently return a default value.
#[derive(Debug, Clone, Error)]
#[error("Unbound context variable '{key}'")]
pub struct UnboundVariableError {
    /// The variable name.
    pub key: String,
}

impl UnboundVariableError {
    /// Creates a new unbound variable error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Error describing a node failure during execution.
///
/// Carries enough to let an operator resume from a precise point: the failing
/// node's name, the component reference, and the last successfully bound
/// context keys.
#[derive(Debug, Clone, Error)]
#[error("Node '{node}' failed (component '{component}'): {reason}")]
pub struct NodeFailedError {
    /// The failing node's display name.
    pub node: String,
    /// The component reference the node invoked.
    pub component: String,
    /// Why the node failed.
    pub reason: String,
    /// Context keys bound successfully before the failure.
    pub bound_keys: Vec<String>,
}

impl NodeFailedError {
    /// Creates a new node failure error.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        component: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            component: component.into(),
            reason: reason.into(),
            bound_keys: Vec::new(),
        }
    }

    /// Attaches the context keys bound before the failure.
    #[must_use]
    pub fn with_bound_keys(mut self, keys: Vec<String>) -> Self {
        self.bound_keys = keys;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_seed_message() {
        let err = BuildError::InvalidSeed {
            missing: vec!["cluster_id".to_string(), "target_time".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid seed context: missing keys [cluster_id, target_time]"
        );
    }

    #[test]
    fn test_conflicting_write_names_both_branches() {
        let err = BuildError::ConflictingWrite {
            binding: "backup_file".to_string(),
            first_branch: "shard-0".to_string(),
            second_branch: "shard-1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("shard-0"));
        assert!(msg.contains("shard-1"));
        assert!(msg.contains("backup_file"));
    }

    #[test]
    fn test_node_failed_carries_bound_keys() {
        let err = NodeFailedError::new("restore-data", "remote-script", "exit 1")
            .with_bound_keys(vec!["backup_manifest".to_string()]);

        assert_eq!(err.node, "restore-data");
        assert_eq!(err.bound_keys, vec!["backup_manifest".to_string()]);
        assert!(err.to_string().contains("remote-script"));
    }

    #[test]
    fn test_flow_error_from_build_error() {
        let err: FlowError = BuildError::AlreadyBuilt {
            name: "rollback".to_string(),
        }
        .into();
        assert!(matches!(err, FlowError::Build(_)));
    }
}
