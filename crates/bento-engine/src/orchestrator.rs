//! Run orchestration
//!
//! The [`Orchestrator`] drives one run of a bento: it validates the root
//! definition, derives a cancellable unit of work bounded by the configured
//! deadline, and dispatches the root node like any other. The
//! [`Dispatcher`] does the per-node work (progress events, registry
//! resolution, `_context` injection, merging outputs back into the
//! [`ExecutionContext`]) and is handed to composite executors through
//! [`NodeScope`] so they can run their children.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::context::{ExecutionContext, CONTEXT_KEY};
use crate::control::{PoolOutcome, WorkerPool};
use crate::error::{EngineError, Result};
use crate::events::{EventSink, NodeStatus, NullEventSink, WorkflowEvent};
use crate::extensions::{extension_keys, ExecutorExtensions};
use crate::registry::{NodeRegistry, Outputs};
use crate::types::Definition;
use crate::validation::Validator;

/// What a node sees while it executes
pub struct NodeScope<'a> {
    /// The definition being executed
    pub node: &'a Definition,
    /// The data-flow context of the current path
    pub context: &'a mut ExecutionContext,
    dispatcher: &'a Dispatcher,
}

impl<'a> NodeScope<'a> {
    pub fn new(
        node: &'a Definition,
        context: &'a mut ExecutionContext,
        dispatcher: &'a Dispatcher,
    ) -> Self {
        Self {
            node,
            context,
            dispatcher,
        }
    }

    /// Dispatcher for running child nodes
    pub fn dispatcher(&self) -> &'a Dispatcher {
        self.dispatcher
    }

    pub fn extensions(&self) -> &'a ExecutorExtensions {
        self.dispatcher.extensions()
    }

    pub fn config(&self) -> &'a RunConfig {
        self.dispatcher.config()
    }

    /// Stream one line of output for this node
    pub fn emit_output(&self, line: impl Into<String>) {
        self.dispatcher
            .emit(WorkflowEvent::output(&self.node.id, line));
    }
}

struct Shared {
    registry: Arc<NodeRegistry>,
    event_sink: Arc<dyn EventSink>,
    extensions: Arc<ExecutorExtensions>,
    config: RunConfig,
    completed: AtomicUsize,
}

/// Per-run node dispatcher; cheap to clone
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        event_sink: Arc<dyn EventSink>,
        extensions: Arc<ExecutorExtensions>,
        config: RunConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                event_sink,
                extensions,
                config,
                completed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.shared.config
    }

    pub fn extensions(&self) -> &ExecutorExtensions {
        &self.shared.extensions
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.shared.registry
    }

    /// Nodes that have reached `completed` in this run
    pub fn nodes_completed(&self) -> usize {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Send an event; a failing sink never affects the run
    pub fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.shared.event_sink.send(event) {
            log::warn!("Dropping run event: {}", e);
        }
    }

    /// Execute one node and merge its outputs into `context`.
    ///
    /// Cancellation is checked before the node starts; a node already
    /// running is never preempted. Errors are annotated with the id of the
    /// node where they originated.
    pub fn dispatch<'a>(
        &'a self,
        node: &'a Definition,
        cancel: &'a CancellationToken,
        context: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Outputs>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let depth = context.depth();
            log::debug!(
                "Starting node '{}' ({}) at depth {}",
                node.id,
                node.node_type,
                depth
            );
            self.emit(WorkflowEvent::progress(&node.id, NodeStatus::Starting, depth));

            let parent_id = context.node_id().to_string();
            let outcome = self.execute(node, cancel, context).await;
            context.set_node_id(&parent_id);

            match outcome {
                Ok(outputs) => {
                    context.merge(outputs.clone());
                    let completed = self.shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit(WorkflowEvent::progress(&node.id, NodeStatus::Completed, depth));
                    log::debug!("Completed node '{}' ({} so far)", node.id, completed);
                    Ok(outputs)
                }
                Err(err) => {
                    if !err.is_cancellation() && err.node_id().is_none() {
                        log::debug!("Node '{}' failed: {}", node.id, err);
                        self.emit(WorkflowEvent::NodeFailed {
                            node_id: node.id.clone(),
                            error: err.to_string(),
                        });
                    }
                    Err(err.at_node(&node.id))
                }
            }
        })
    }

    async fn execute(
        &self,
        node: &Definition,
        cancel: &CancellationToken,
        context: &mut ExecutionContext,
    ) -> Result<Outputs> {
        let max_depth = self.shared.config.max_depth;
        if context.depth() > max_depth {
            return Err(EngineError::MaxDepthExceeded {
                node_id: node.id.clone(),
                max_depth,
            });
        }

        let executor = self.shared.registry.resolve(&node.node_type)?;

        let mut params = node.parameters.clone();
        params.insert(CONTEXT_KEY.to_string(), context.snapshot());

        context.set_node_id(&node.id);
        let mut scope = NodeScope::new(node, context, self);
        executor.execute(cancel, params, &mut scope).await
    }

    /// Run `nodes` one after another in array order, threading `context`.
    ///
    /// Stops at the first error. Returns the union of the children's
    /// outputs, later children overriding earlier ones.
    pub async fn run_sequence(
        &self,
        nodes: &[Definition],
        cancel: &CancellationToken,
        context: &mut ExecutionContext,
    ) -> Result<Outputs> {
        context.enter();
        let mut combined = Outputs::new();
        let mut outcome = Ok(());
        for node in nodes {
            match self.dispatch(node, cancel, context).await {
                Ok(outputs) => combined.extend(outputs),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        context.leave();
        outcome.map(|()| combined)
    }

    /// Run `nodes` concurrently on `pool`.
    ///
    /// Each child works on its own fork of `context`; nothing is merged
    /// back here. Callers merge each [`Branch`]'s `changes` in input order
    /// once the region has finished.
    pub async fn run_concurrent(
        &self,
        nodes: &[Definition],
        cancel: &CancellationToken,
        context: &ExecutionContext,
        pool: &WorkerPool,
    ) -> Result<PoolOutcome<Branch>> {
        let base = Arc::new(context.data().clone());
        let tasks: Vec<(Definition, ExecutionContext)> = nodes
            .iter()
            .map(|node| {
                let mut fork = context.fork();
                fork.enter();
                (node.clone(), fork)
            })
            .collect();

        let dispatcher = self.clone();
        pool.run(tasks, cancel, move |(node, mut fork), token| {
            let dispatcher = dispatcher.clone();
            let base = base.clone();
            async move {
                let outputs = dispatcher.dispatch(&node, &token, &mut fork).await?;
                Ok(Branch {
                    outputs,
                    changes: fork.into_changes(&base),
                })
            }
        })
        .await
    }
}

/// What one child of a concurrent region produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Branch {
    /// The child's own outputs
    pub outputs: Outputs,
    /// Everything the child's fork added or changed, including writes made
    /// by nested children of a composite
    pub changes: HashMap<String, Value>,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a dry-run plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub depth: usize,
    pub node_id: String,
    pub node_type: String,
    pub name: String,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub execution_id: String,
    /// Nodes that reached `completed`
    pub nodes_executed: usize,
    /// Final data-flow context
    pub data: HashMap<String, Value>,
    pub elapsed: Duration,
    /// Present when the run was a dry run
    pub plan: Option<Vec<PlanStep>>,
}

/// A run that did not complete
#[derive(Debug, Error)]
#[error("Run {state} after {nodes_executed} node(s) in {elapsed:?}: {error}")]
pub struct RunFailure {
    /// `Failed` or `Cancelled`
    pub state: RunState,
    pub nodes_executed: usize,
    pub elapsed: Duration,
    #[source]
    pub error: EngineError,
}

impl RunFailure {
    pub fn is_cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }
}

/// Top-level driver for running a bento
pub struct Orchestrator {
    registry: Arc<NodeRegistry>,
    event_sink: Arc<dyn EventSink>,
    extensions: Arc<ExecutorExtensions>,
    config: RunConfig,
    state: RunState,
}

impl Orchestrator {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            event_sink: Arc::new(NullEventSink),
            extensions: Arc::new(ExecutorExtensions::new()),
            config: RunConfig::default(),
            state: RunState::Idle,
        }
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    pub fn with_extensions(mut self, extensions: ExecutorExtensions) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// State of the most recent run
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Structural validation followed by preflight (unless skipped)
    pub fn validate(&self, root: &Definition) -> Result<()> {
        let variables = self
            .extensions
            .get::<Arc<HashMap<String, String>>>(extension_keys::VARIABLES)
            .map(|vars| vars.as_ref().clone())
            .unwrap_or_default();
        let validator = Validator::new(&self.registry)
            .with_variables(variables)
            .with_working_dir(self.config.working_dir.clone());

        validator.validate(root)?;
        if !self.config.skip_preflight && !self.config.dry_run {
            validator.preflight(root)?;
        }
        Ok(())
    }

    /// Nodes in dispatch order with their depth; no side effects
    pub fn plan(&self, root: &Definition) -> Vec<PlanStep> {
        root.walk()
            .into_iter()
            .map(|(depth, node)| PlanStep {
                depth,
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                name: node.name.clone(),
            })
            .collect()
    }

    /// Run `root` with an empty data-flow context
    pub async fn run(
        &mut self,
        root: &Definition,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunResult, RunFailure> {
        self.run_with_data(root, HashMap::new(), cancel).await
    }

    /// Run `root` starting from `initial` data
    pub async fn run_with_data(
        &mut self,
        root: &Definition,
        initial: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunResult, RunFailure> {
        let execution_id = format!("bento-exec-{}", uuid::Uuid::new_v4());
        let start = Instant::now();
        self.state = RunState::Running;
        log::info!("Run {} started for '{}'", execution_id, root.id);
        self.emit(WorkflowEvent::RunStarted {
            execution_id: execution_id.clone(),
            root_id: root.id.clone(),
        });

        if let Err(err) = self.validate(root) {
            return Err(self.fail(&execution_id, err, 0, start));
        }

        if self.config.dry_run {
            let plan = self.plan(root);
            log::info!("Dry run {} planned {} node(s)", execution_id, plan.len());
            self.state = RunState::Completed;
            self.emit_completed(&execution_id, 0, start);
            return Ok(RunResult {
                execution_id,
                nodes_executed: 0,
                data: initial,
                elapsed: start.elapsed(),
                plan: Some(plan),
            });
        }

        let token = cancel.child_token();
        let dispatcher = Dispatcher::new(
            self.registry.clone(),
            self.event_sink.clone(),
            self.extensions.clone(),
            self.config.clone(),
        );
        let mut context = ExecutionContext::with_data(initial);

        let outcome = {
            let run = dispatcher.dispatch(root, &token, &mut context);
            let deadline = async {
                match self.config.timeout() {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                result = run => result,
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                _ = deadline => Err(EngineError::DeadlineExceeded),
            }
        };
        // In-flight work observes the token even when its future was dropped.
        token.cancel();

        let nodes_executed = dispatcher.nodes_completed();
        match outcome {
            Ok(_) => {
                self.state = RunState::Completed;
                self.emit_completed(&execution_id, nodes_executed, start);
                log::info!(
                    "Run {} completed: {} node(s) in {:?}",
                    execution_id,
                    nodes_executed,
                    start.elapsed()
                );
                Ok(RunResult {
                    execution_id,
                    nodes_executed,
                    data: context.into_data(),
                    elapsed: start.elapsed(),
                    plan: None,
                })
            }
            Err(err) => Err(self.fail(&execution_id, err, nodes_executed, start)),
        }
    }

    fn fail(
        &mut self,
        execution_id: &str,
        error: EngineError,
        nodes_executed: usize,
        start: Instant,
    ) -> RunFailure {
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if error.is_cancellation() {
            self.state = RunState::Cancelled;
            log::info!("Run {} cancelled: {}", execution_id, error);
            self.emit(WorkflowEvent::RunCancelled {
                execution_id: execution_id.to_string(),
                nodes_executed,
                elapsed_ms,
            });
        } else {
            self.state = RunState::Failed;
            log::info!("Run {} failed: {}", execution_id, error);
            self.emit(WorkflowEvent::RunFailed {
                execution_id: execution_id.to_string(),
                error: error.to_string(),
                nodes_executed,
                elapsed_ms,
            });
        }
        RunFailure {
            state: self.state,
            nodes_executed,
            elapsed,
            error,
        }
    }

    fn emit_completed(&self, execution_id: &str, nodes_executed: usize, start: Instant) {
        self.emit(WorkflowEvent::RunCompleted {
            execution_id: execution_id.to_string(),
            nodes_executed,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("Dropping run event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use serde_json::json;

    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::with_control_flow();
        registry.register_fn("set", |node_id, params, _| async move {
            let value = params.get("value").cloned().unwrap_or(Value::Null);
            Ok(json!({ node_id: value }))
        });
        registry.register_fn("fail", |_, _, _| async { Err(EngineError::failed("nope")) });
        Arc::new(registry)
    }

    fn set(id: &str, value: Value) -> Definition {
        Definition::new(id, "set").with_parameter("value", value)
    }

    #[tokio::test]
    async fn test_sequential_run_merges_outputs() {
        let sink = Arc::new(VecEventSink::new());
        let root = Definition::new("root", "group")
            .with_child(set("a", json!(1)))
            .with_child(set("b", json!(2)));

        let mut orchestrator = Orchestrator::new(registry()).with_event_sink(sink.clone());
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.nodes_executed, 3);
        assert_eq!(result.data.get("a"), Some(&json!(1)));
        assert_eq!(result.data.get("b"), Some(&json!(2)));
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert_eq!(
            sink.progress(),
            vec![
                ("root".to_string(), NodeStatus::Starting),
                ("a".to_string(), NodeStatus::Starting),
                ("a".to_string(), NodeStatus::Completed),
                ("b".to_string(), NodeStatus::Starting),
                ("b".to_string(), NodeStatus::Completed),
                ("root".to_string(), NodeStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_is_annotated_with_origin() {
        let root = Definition::new("root", "group")
            .with_child(set("a", json!(1)))
            .with_child(Definition::new("inner", "group").with_child(Definition::new("bad", "fail")))
            .with_child(set("never", json!(3)));

        let mut orchestrator = Orchestrator::new(registry());
        let failure = orchestrator
            .run(&root, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.state, RunState::Failed);
        assert_eq!(failure.nodes_executed, 1);
        assert_eq!(failure.error.node_id(), Some("bad"));
        assert_eq!(orchestrator.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_validation_failure_runs_nothing() {
        let root = Definition::new("root", "group").with_child(Definition::new("x", "unknown"));
        let mut orchestrator = Orchestrator::new(registry());
        let failure = orchestrator
            .run(&root, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, EngineError::Validation(_)));
        assert_eq!(failure.nodes_executed, 0);
    }

    #[tokio::test]
    async fn test_max_depth() {
        let root = Definition::new("root", "group")
            .with_child(Definition::new("g1", "group").with_child(set("leaf", json!(1))));
        let mut orchestrator = Orchestrator::new(registry())
            .with_config(RunConfig::default().with_max_depth(1));
        let failure = orchestrator
            .run(&root, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            EngineError::NodeFailed { ref node_id, ref source }
                if node_id == "leaf" && matches!(**source, EngineError::MaxDepthExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_executing() {
        let root = Definition::new("root", "group")
            .with_child(Definition::new("inner", "group").with_child(set("a", json!(1))));
        let mut orchestrator =
            Orchestrator::new(registry()).with_config(RunConfig::default().with_dry_run(true));
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.nodes_executed, 0);
        assert!(result.data.is_empty());
        let plan = result.plan.unwrap();
        let ids: Vec<(usize, &str)> = plan.iter().map(|s| (s.depth, s.node_id.as_str())).collect();
        assert_eq!(ids, vec![(0, "root"), (1, "inner"), (2, "a")]);
    }
}
