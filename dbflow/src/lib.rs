//! # dbflow
//!
//! A workflow composition and execution engine for multi-step database
//! fleet operations (install, data-sync, cut-over, point-in-time rollback,
//! decommission).
//!
//! dbflow provides:
//!
//! - **Composable pipelines**: nested subprocesses and parallel groups built
//!   through validating builders
//! - **Context propagation**: named outputs flow between steps through a
//!   shared variable store, with cross-branch conflicts rejected at build time
//! - **Typed activity payloads**: one explicit record per activity kind,
//!   dispatched through a component registry
//! - **Retry and gate semantics**: per-activity retry policies, manual
//!   confirmation gates, external approvals, and timers
//! - **Fact-driven assembly**: backup catalog queries and topology prechecks
//!   run before the pipeline exists, so bad inputs never reach a remote host
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dbflow::prelude::*;
//!
//! // Assemble a pipeline from catalog facts
//! let pipeline = build_rollback_pipeline(&catalog, &params).await?;
//!
//! // Run it against a component registry
//! let executor = Executor::new(registry);
//! let handle = pipeline.run(&executor, CompletionPolicy::WaitAll)?;
//! handle.join().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod catalog;
pub mod component;
pub mod context;
pub mod errors;
pub mod executor;
pub mod flows;
pub mod node;
pub mod pipeline;
pub mod topology;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::{
        select_restore_point, select_restore_point_by_id, BackupCatalog,
        BackupSnapshot, BinlogFile, RestorePoint,
    };
    pub use crate::component::{
        Component, ComponentOutcome, ComponentRegistry, OutcomeStatus,
    };
    pub use crate::context::{Context, ContextDelta};
    pub use crate::errors::{
        BuildError, FlowError, NodeFailedError, PreconditionError,
        UnboundVariableError,
    };
    pub use crate::executor::{
        CompletionPolicy, Executor, GateDecision, GateService, NodeState,
        PipelineHandle, PipelineState, PipelineStatus,
    };
    pub use crate::flows::{
        build_add_slave_pipeline, build_migrate_pipeline,
        build_rollback_pipeline, AddSlaveParams, MigrateCluster,
        MigrateParams, RollbackParams, RollbackSource, ShardPair,
    };
    pub use crate::node::{
        ActPayload, Activity, ApprovalSpec, BackoffConfig, ComponentRef,
        Node, NodeId, RetryPolicy,
    };
    pub use crate::pipeline::{
        ParallelGroup, Pipeline, PipelineBuilder, Step, SubProcess,
        SubProcessBuilder,
    };
    pub use crate::topology::{
        aggregate_instances, resolve_role, BucketKey, ClusterType, Instance,
        MachineRole,
    };
}
