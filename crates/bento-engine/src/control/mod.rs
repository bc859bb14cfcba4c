//! Composite node executors
//!
//! `group`, `loop` and `parallel` run their children through the
//! [`Dispatcher`](crate::Dispatcher) exposed on the node scope, so nested
//! composites get the same progress events, depth tracking and error
//! annotation as top-level nodes.

mod group;
mod loops;
mod parallel;
mod pool;

pub use group::GroupExecutor;
pub use loops::{LoopExecutor, WHILE_ITERATION_LIMIT};
pub use parallel::ParallelExecutor;
pub use pool::{PoolOutcome, TaskFailure, WorkerPool};
