//! Shared pipeline context and per-branch write sets.

mod bag;

pub use bag::{Context, ContextDelta};
