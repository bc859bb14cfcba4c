//! Bento Engine - execution engine for declarative workflow graphs
//!
//! A bento is a tree of [`Definition`]s. Composite nodes (`group`, `loop`,
//! `parallel`) own ordered children; leaf nodes are resolved by type name
//! through a [`NodeRegistry`]. This crate provides:
//!
//! - The graph model and its JSON wire shape
//! - Structural validation and environment preflight
//! - An orchestrator with progress events, cooperative cancellation and
//!   an overall deadline
//! - Sequential and concurrent groups, loops and a bounded worker pool
//!   with fail-fast / collect-all error strategies
//! - A small expression language for conditions and data mapping
//!
//! # Architecture
//!
//! - `Orchestrator`: validates, plans and runs one bento
//! - `Dispatcher`: per-node execution shared with composite executors
//! - `NodeRegistry`: the only extension point; maps type names to executors
//! - `EventSink`: observer for run and node events (not tied to any UI)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bento_engine::{Definition, NodeRegistry, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let root = Definition::from_json_str(&std::fs::read_to_string("flow.bento.json")?)?;
//! let mut orchestrator = Orchestrator::new(Arc::new(NodeRegistry::with_control_flow()));
//! let result = orchestrator.run(&root, &CancellationToken::new()).await?;
//! println!("{} nodes executed", result.nodes_executed);
//! ```

pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod events;
pub mod expression;
pub mod extensions;
pub mod orchestrator;
pub mod params;
pub mod registry;
pub mod template;
pub mod types;
pub mod validation;

// Re-export key types
pub use config::RunConfig;
pub use context::{ExecutionContext, CONTEXT_KEY};
pub use control::{
    GroupExecutor, LoopExecutor, ParallelExecutor, PoolOutcome, TaskFailure, WorkerPool,
    WHILE_ITERATION_LIMIT,
};
pub use error::{EngineError, Result};
pub use events::{
    ChannelEventSink, EventError, EventSink, NodeStatus, NullEventSink, VecEventSink,
    WorkflowEvent,
};
pub use extensions::{extension_keys, ExecutorExtensions};
pub use orchestrator::{
    Branch, Dispatcher, NodeScope, Orchestrator, PlanStep, RunFailure, RunResult, RunState,
};
pub use params::{ErrorStrategy, NodeParameters, ParameterError};
pub use registry::{into_outputs, NodeExecutor, NodeExecutorFactory, NodeRegistry, Outputs};
pub use types::{node_types, Definition, Edge, Fields, Metadata, Parameters, Port, Position};
pub use validation::{PreflightError, PreflightIssue, ValidationError, Validator};
