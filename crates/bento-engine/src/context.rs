//! Data-flow context threaded through one run.

use std::collections::HashMap;

use serde_json::Value;

/// Reserved parameter key carrying the data-flow snapshot into a node
pub const CONTEXT_KEY: &str = "_context";

/// Shared, additive state for a single run.
///
/// `data` accumulates every completed node's outputs (last write wins).
/// Only the task driving a sequential path mutates it; parallel regions
/// work on snapshots and are merged back afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    data: HashMap<String, Value>,
    node_id: String,
    depth: usize,
}

impl ExecutionContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with initial data.
    pub fn with_data(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Get a value from the context.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set a value in the context, returning any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Remove a value from the context.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Get all data as a reference.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    /// Get all data, consuming the context.
    pub fn into_data(self) -> HashMap<String, Value> {
        self.data
    }

    /// Merge node outputs into the data map (last write wins).
    pub fn merge(&mut self, outputs: HashMap<String, Value>) {
        self.data.extend(outputs);
    }

    /// The data map as a JSON object, as handed to nodes under `_context`.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// ID of the node currently being dispatched.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub(crate) fn set_node_id(&mut self, node_id: &str) {
        self.node_id.clear();
        self.node_id.push_str(node_id);
    }

    /// Current nesting level (root is 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// A detached copy for an isolated branch (parallel worker, snapshot run).
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Entries added or changed relative to `base`, consuming the context.
    ///
    /// Removed keys are not reported.
    pub fn into_changes(self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        self.data
            .into_iter()
            .filter(|(key, value)| base.get(key) != Some(value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_last_write_wins() {
        let mut ctx = ExecutionContext::new();
        ctx.set("a", json!(1));
        ctx.merge(HashMap::from([
            ("a".to_string(), json!(2)),
            ("b".to_string(), json!("x")),
        ]));
        assert_eq!(ctx.get("a"), Some(&json!(2)));
        assert_eq!(ctx.get("b"), Some(&json!("x")));
        assert_eq!(ctx.snapshot(), json!({"a": 2, "b": "x"}));
    }

    #[test]
    fn test_depth_tracking() {
        let mut ctx = ExecutionContext::new();
        ctx.enter();
        ctx.enter();
        assert_eq!(ctx.depth(), 2);
        ctx.leave();
        ctx.leave();
        ctx.leave();
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_fork_is_detached() {
        let mut ctx = ExecutionContext::with_data(HashMap::from([("k".to_string(), json!(1))]));
        let mut forked = ctx.fork();
        forked.set("k", json!(2));
        ctx.set("other", json!(true));
        assert_eq!(ctx.get("k"), Some(&json!(1)));
        assert!(forked.get("other").is_none());
    }

    #[test]
    fn test_into_changes_reports_added_and_changed() {
        let base = HashMap::from([
            ("same".to_string(), json!(1)),
            ("changed".to_string(), json!(1)),
            ("dropped".to_string(), json!(1)),
        ]);
        let mut branch = ExecutionContext::with_data(base.clone());
        branch.set("changed", json!(2));
        branch.set("added", json!("x"));
        branch.remove("dropped");

        let changes = branch.into_changes(&base);
        assert_eq!(
            changes,
            HashMap::from([
                ("changed".to_string(), json!(2)),
                ("added".to_string(), json!("x")),
            ])
        );
    }
}
