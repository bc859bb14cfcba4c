//! Executable registry
//!
//! Maps a node type string to a factory producing the executor for that
//! type. This is the engine's only extension point: leaf nodes, composite
//! nodes and test doubles are all registered the same way.
//!
//! # Usage
//!
//! ```ignore
//! use bento_engine::NodeRegistry;
//!
//! let mut registry = NodeRegistry::new();
//! registry.register_type::<MyExecutor>("my-node");
//! registry.register_fn("echo", |_node_id, params, _cancel| async move {
//!     Ok(serde_json::json!({ "echo": params.get("text") }))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::control::{GroupExecutor, LoopExecutor, ParallelExecutor};
use crate::error::{EngineError, Result};
use crate::orchestrator::NodeScope;
use crate::types::{node_types, Parameters};

/// Outputs a node merges into the data-flow context
pub type Outputs = HashMap<String, Value>;

/// Per-node-type executor
///
/// Implementations must be stateless across invocations: the engine may
/// resolve and run the same type many times concurrently.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute one node.
    ///
    /// `params` holds the node's declared parameters plus the `_context`
    /// snapshot. `scope` exposes the definition being run, the mutable
    /// data-flow context and the dispatcher for running children.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs>;
}

/// Factory for creating a NodeExecutor per resolution
pub trait NodeExecutorFactory: Send + Sync {
    fn create_executor(&self) -> Arc<dyn NodeExecutor>;
}

/// Factory that builds a fresh default instance on every resolution
struct DefaultFactory<E>(std::marker::PhantomData<fn() -> E>);

impl<E> NodeExecutorFactory for DefaultFactory<E>
where
    E: NodeExecutor + Default + 'static,
{
    fn create_executor(&self) -> Arc<dyn NodeExecutor> {
        Arc::new(E::default())
    }
}

/// Factory that wraps one callback in a new executor per resolution
struct CallbackFactory {
    callback: Arc<BoxedCallback>,
}

impl NodeExecutorFactory for CallbackFactory {
    fn create_executor(&self) -> Arc<dyn NodeExecutor> {
        Arc::new(CallbackNodeExecutor {
            callback: self.callback.clone(),
        })
    }
}

/// Registry of node types and their executor factories
///
/// Registries compose by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_control_flow();
/// registry.merge(plugin_registry);
/// ```
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeExecutorFactory>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with `group`, `loop` and `parallel` already registered
    pub fn with_control_flow() -> Self {
        let mut registry = Self::new();
        registry.register_type::<GroupExecutor>(node_types::GROUP);
        registry.register_type::<LoopExecutor>(node_types::LOOP);
        registry.register_type::<ParallelExecutor>(node_types::PARALLEL);
        registry
    }

    /// Register a factory under an exact type name
    ///
    /// Re-registering a type replaces the previous factory.
    pub fn register(&mut self, node_type: impl Into<String>, factory: Arc<dyn NodeExecutorFactory>) {
        self.factories.insert(node_type.into(), factory);
    }

    /// Register an executor type constructed with `Default` on every resolution
    pub fn register_type<E>(&mut self, node_type: impl Into<String>)
    where
        E: NodeExecutor + Default + 'static,
    {
        self.register(
            node_type,
            Arc::new(DefaultFactory::<E>(std::marker::PhantomData)),
        );
    }

    /// Register a node type backed by an async closure
    ///
    /// The closure receives `(node_id, params, cancel)`. An object result
    /// becomes the node's outputs; any other value is stored under `result`.
    pub fn register_fn<F, Fut>(&mut self, node_type: impl Into<String>, callback: F)
    where
        F: Fn(String, Parameters, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let callback: BoxedCallback = Box::new(move |node_id, params, cancel| {
            Box::pin(callback(node_id, params, cancel))
        });
        self.register(
            node_type,
            Arc::new(CallbackFactory {
                callback: Arc::new(callback),
            }),
        );
    }

    /// Resolve an executor for a node type
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>> {
        self.factories
            .get(node_type)
            .map(|f| f.create_executor())
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// All registered type names, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.factories.extend(other.factories);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize an executor's value result into outputs
///
/// Objects are used as-is; any other value is stored under `result`.
pub fn into_outputs(value: Value) -> Outputs {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => Outputs::new(),
        other => Outputs::from([("result".to_string(), other)]),
    }
}

type BoxedCallback = Box<
    dyn Fn(String, Parameters, CancellationToken) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Async callback-based NodeExecutor
///
/// The callback itself is shared between resolutions and only ever called
/// through `&self`.
pub struct CallbackNodeExecutor {
    callback: Arc<BoxedCallback>,
}

#[async_trait]
impl NodeExecutor for CallbackNodeExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let value = (self.callback)(scope.node.id.clone(), params, cancel.clone()).await?;
        Ok(into_outputs(value))
    }
}
