//! The atomic unit of work: activity, pause, timer, and approval nodes.

mod payload;

pub use payload::ActPayload;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for an externally-executed behavior.
///
/// Resolved to a concrete [`crate::component::Component`] once at submission
/// through the registry, never reflectively per call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRef(String);

impl ComponentRef {
    /// Creates a component reference.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one node inside a built pipeline.
///
/// Assigned in depth-first build order, so identical trees carry identical
/// ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What the executor does when an activity reports a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetryPolicy {
    /// Fail the branch immediately.
    #[default]
    None,
    /// Halt the branch and wait for an operator retry trigger.
    Manual,
    /// Retry with backoff up to a bounded attempt count, then escalate.
    Automatic(BackoffConfig),
}

/// Backoff configuration for automatic retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Maximum attempts including the initial one.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Creates a config with the given attempt bound.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }
}

/// Spec for an approval node awaiting an external ITSM decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSpec {
    /// The ITSM service the request is filed against.
    pub service: String,
    /// Human-readable summary shown to the approver.
    pub summary: String,
}

impl ApprovalSpec {
    /// Creates an approval spec.
    #[must_use]
    pub fn new(service: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            summary: summary.into(),
        }
    }
}

/// An activity node: one external component invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Node id, assigned at build time.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Which component to invoke.
    pub component: ComponentRef,
    /// Immutable input payload.
    pub payload: ActPayload,
    /// Context variable the component's result is written to, if any.
    pub output_binding: Option<String>,
    /// Failure handling policy.
    pub retry: RetryPolicy,
}

/// A pause node blocking for manual confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pause {
    /// Node id, assigned at build time.
    pub id: NodeId,
    /// Display name.
    pub name: String,
}

/// A timer node suspending until a wall-clock deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    /// Node id, assigned at build time.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// The instant the branch resumes. A past deadline completes immediately.
    pub deadline: DateTime<Utc>,
}

/// An approval node blocking for an external ITSM decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Node id, assigned at build time.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// The approval request spec.
    pub spec: ApprovalSpec,
}

/// The atomic unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Invokes one external component.
    Activity(Activity),
    /// Blocks for manual confirmation.
    Pause(Pause),
    /// Suspends until a scheduled instant.
    Timer(Timer),
    /// Blocks for an external ITSM decision.
    Approval(Approval),
}

impl Node {
    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        match self {
            Self::Activity(a) => a.id,
            Self::Pause(p) => p.id,
            Self::Timer(t) => t.id,
            Self::Approval(a) => a.id,
        }
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Activity(a) => &a.name,
            Self::Pause(p) => &p.name,
            Self::Timer(t) => &t.name,
            Self::Approval(a) => &a.name,
        }
    }

    /// Returns the output binding, if this is an activity that declares one.
    #[must_use]
    pub fn output_binding(&self) -> Option<&str> {
        match self {
            Self::Activity(a) => a.output_binding.as_deref(),
            _ => None,
        }
    }

    /// Returns the context variables this node reads at execution time.
    #[must_use]
    pub fn reads(&self) -> Vec<String> {
        match self {
            Self::Activity(a) => a.payload.reads(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        match self {
            Self::Activity(a) => a.id = id,
            Self::Pause(p) => p.id = id,
            Self::Timer(t) => t.id = id,
            Self::Approval(a) => a.id = id,
        }
    }
}
