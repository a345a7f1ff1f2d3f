//! The shared key/value store for one pipeline instance.

use crate::errors::{BuildError, UnboundVariableError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The mutable key/value store shared by all nodes of one pipeline instance.
///
/// Created at pipeline construction from a validated seed, mutated by
/// completed activities, read until completion, discarded after. Values are
/// never deleted during a pipeline's lifetime; last-writer-wins within a
/// branch. Across concurrent branches the context is append/merge-only: each
/// branch records its writes into a [`ContextDelta`] which is reconciled at
/// the group's fan-in point.
#[derive(Debug, Default)]
pub struct Context {
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from seed values, checking required keys.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidSeed` listing every absent required key.
    pub fn with_seed(
        seed: HashMap<String, serde_json::Value>,
        required: &[&str],
    ) -> Result<Self, BuildError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|k| !seed.contains_key(**k))
            .map(|k| (*k).to_string())
            .collect();

        if !missing.is_empty() {
            return Err(BuildError::InvalidSeed { missing });
        }

        Ok(Self {
            data: RwLock::new(seed),
        })
    }

    /// Gets a bound variable.
    ///
    /// # Errors
    ///
    /// Returns `UnboundVariableError` if the key was never bound. Reads never
    /// fall back to a default value.
    pub fn get(&self, key: &str) -> Result<serde_json::Value, UnboundVariableError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| UnboundVariableError::new(key))
    }

    /// Gets a variable if bound.
    #[must_use]
    pub fn try_get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Checks whether a variable is bound.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Binds a variable. Last-writer-wins within a branch.
    pub fn bind(&self, key: impl Into<String>, value: serde_json::Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Merges a branch delta into this context.
    ///
    /// Called at a parallel group's fan-in point, once per branch. Conflict
    /// detection across sibling deltas happens at build time; by the time a
    /// delta reaches merge its bindings are disjoint from its siblings'.
    pub fn merge(&self, delta: &ContextDelta) {
        let mut data = self.data.write();
        for (key, value) in &delta.writes {
            data.insert(key.clone(), value.clone());
        }
    }

    /// Returns all bound keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns a copy of all bound values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
        }
    }
}

/// The append-only write set recorded by one parallel branch.
///
/// Branches never mutate the parent context directly while the group runs;
/// their writes are collected here and merged at fan-in.
#[derive(Debug, Default, Clone)]
pub struct ContextDelta {
    /// Writes in binding order.
    writes: Vec<(String, serde_json::Value)>,
}

impl ContextDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write.
    pub fn bind(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.writes.push((key.into(), value));
    }

    /// Returns the recorded binding names in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.writes.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Appends another delta's writes, preserving order.
    ///
    /// Used when a nested group's fan-in surfaces its branches' writes to an
    /// enclosing branch.
    pub fn extend(&mut self, other: &ContextDelta) {
        self.writes.extend(other.writes.iter().cloned());
    }

    /// Returns true if no writes were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_validation_lists_all_missing_keys() {
        let mut seed = HashMap::new();
        seed.insert("uid".to_string(), serde_json::json!("u1"));

        let result = Context::with_seed(seed, &["uid", "cluster_id", "target_time"]);
        match result {
            Err(BuildError::InvalidSeed { missing }) => {
                assert_eq!(missing, vec!["cluster_id", "target_time"]);
            }
            other => panic!("expected InvalidSeed, got {other:?}"),
        }
    }

    #[test]
    fn test_seed_success() {
        let mut seed = HashMap::new();
        seed.insert("cluster_id".to_string(), serde_json::json!(7));

        let ctx = Context::with_seed(seed, &["cluster_id"]).unwrap();
        assert_eq!(ctx.get("cluster_id").unwrap(), serde_json::json!(7));
    }

    #[test]
    fn test_unbound_read_is_an_error() {
        let ctx = Context::new();
        let err = ctx.get("never_bound").unwrap_err();
        assert_eq!(err.key, "never_bound");
        assert!(ctx.try_get("never_bound").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let ctx = Context::new();
        ctx.bind("master_backup_file", serde_json::json!("a"));
        ctx.bind("master_backup_file", serde_json::json!("b"));

        assert_eq!(
            ctx.get("master_backup_file").unwrap(),
            serde_json::json!("b")
        );
    }

    #[test]
    fn test_delta_merge() {
        let ctx = Context::new();
        ctx.bind("seed", serde_json::json!(1));

        let mut delta = ContextDelta::new();
        delta.bind("branch_result", serde_json::json!("ok"));

        ctx.merge(&delta);
        assert_eq!(ctx.get("branch_result").unwrap(), serde_json::json!("ok"));
        assert_eq!(ctx.keys(), vec!["branch_result", "seed"]);
    }
}
