//! Component invocation contract and registry.
//!
//! The engine treats components as opaque executors honoring one contract:
//! `execute(payload, ctx) -> outcome`. A registry maps stable identifiers to
//! implementations, resolved once at submission.

use crate::context::Context;
use crate::errors::FlowError;
use crate::node::{ActPayload, ComponentRef};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// How a component invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The invocation succeeded.
    Success,
    /// The invocation failed but may succeed on retry.
    RetryableFailure,
    /// The invocation failed permanently.
    FatalFailure,
}

/// The result of one component invocation.
#[derive(Debug, Clone)]
pub struct ComponentOutcome {
    /// Final status.
    pub status: OutcomeStatus,
    /// The value written to the activity's output binding, if any.
    pub output: Option<serde_json::Value>,
    /// Failure detail for diagnostics.
    pub error: Option<String>,
}

impl ComponentOutcome {
    /// Creates a success with no output value.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            status: OutcomeStatus::Success,
            output: None,
            error: None,
        }
    }

    /// Creates a success carrying an output value.
    #[must_use]
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::RetryableFailure,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::FatalFailure,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Returns true on success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// An externally-executed behavior invoked by activity nodes.
#[async_trait]
pub trait Component: Send + Sync + Debug {
    /// Executes the component with the activity's payload and the shared
    /// context. Reads go through the context; the returned output is bound
    /// by the engine, not by the component.
    async fn execute(&self, payload: &ActPayload, ctx: &Context) -> ComponentOutcome;
}

/// Maps component references to implementations.
///
/// Populated at startup; the executor resolves every activity's reference
/// once at submission and rejects pipelines naming unregistered components
/// before any node runs.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<ComponentRef, Arc<dyn Component>>>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component under a reference. Re-registration replaces.
    pub fn register(&self, reference: ComponentRef, component: Arc<dyn Component>) {
        self.components.write().insert(reference, component);
    }

    /// Resolves a reference.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::ComponentNotRegistered` for unknown references.
    pub fn resolve(&self, reference: &ComponentRef) -> Result<Arc<dyn Component>, FlowError> {
        self.components
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| FlowError::ComponentNotRegistered(reference.to_string()))
    }

    /// Returns true if the reference is registered.
    #[must_use]
    pub fn contains(&self, reference: &ComponentRef) -> bool {
        self.components.read().contains_key(reference)
    }

    /// Returns the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}
