//! Typed extension map for non-serializable dependency injection.
//!
//! Hosts use `ExecutorExtensions` to hand runtime objects (HTTP clients,
//! credentials providers) to leaf nodes. The map is owned by the
//! [`Orchestrator`](crate::Orchestrator) and reachable from every
//! [`NodeScope`](crate::NodeScope) during a run.
//!
//! # Example
//!
//! ```ignore
//! use bento_engine::{extension_keys, ExecutorExtensions};
//!
//! let mut ext = ExecutorExtensions::new();
//! ext.set(extension_keys::HTTP_CLIENT, reqwest::Client::new());
//!
//! // In a NodeExecutor:
//! if let Some(client) = scope.extensions().get::<reqwest::Client>(extension_keys::HTTP_CLIENT) {
//!     client.get(url).send().await?;
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;

/// Typed extension map for injecting non-serializable dependencies
/// into workflow execution.
///
/// Unlike the data-flow [`ExecutionContext`](crate::ExecutionContext), which
/// stores `serde_json::Value`, this map holds arbitrary `Send + Sync` types
/// via `Box<dyn Any>`.
pub struct ExecutorExtensions {
    inner: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ExecutorExtensions {
    /// Create an empty extension map.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Insert a typed value under the given key.
    ///
    /// If a value already exists for this key, it is replaced.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Box::new(value));
    }

    /// Get a reference to a typed value by key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|v| v.downcast_ref())
    }

    /// Check whether a key exists in the map.
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

impl Default for ExecutorExtensions {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known extension keys for standard dependencies.
pub mod extension_keys {
    /// Key for a shared `reqwest::Client` used by `http-request` nodes.
    pub const HTTP_CLIENT: &str = "http_client";

    /// Key for an `Arc<HashMap<String, String>>` of variables that take precedence
    /// over the process environment when expanding `{{.VAR}}` placeholders.
    pub const VARIABLES: &str = "variables";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_get() {
        let mut ext = ExecutorExtensions::new();
        ext.set("token", "s3cret".to_string());

        assert_eq!(ext.get::<String>("token"), Some(&"s3cret".to_string()));
        assert!(ext.has("token"));
        assert!(!ext.has("missing"));
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let mut ext = ExecutorExtensions::new();
        ext.set("count", 42u32);

        // Wrong type
        assert!(ext.get::<String>("count").is_none());
        // Correct type
        assert_eq!(ext.get::<u32>("count"), Some(&42));
    }

    #[test]
    fn test_variables_key() {
        let mut ext = ExecutorExtensions::new();
        let vars = HashMap::from([("API_HOST".to_string(), "localhost".to_string())]);
        ext.set(extension_keys::VARIABLES, Arc::new(vars));

        let retrieved = ext
            .get::<Arc<HashMap<String, String>>>(extension_keys::VARIABLES)
            .unwrap();
        assert_eq!(retrieved.get("API_HOST").map(String::as_str), Some("localhost"));
    }

    #[test]
    fn test_replace_value() {
        let mut ext = ExecutorExtensions::new();
        ext.set("key", "first".to_string());
        ext.set("key", "second".to_string());

        assert_eq!(ext.get::<String>("key"), Some(&"second".to_string()));
    }
}
