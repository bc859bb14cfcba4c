//! `loop`: repeat the child sequence by collection, count or condition.
//!
//! Each iteration binds `item` (forEach only) and `index` in the context
//! while its children run, then restores whatever those keys held before.
//! Iteration results are objects of the children's outputs plus `index`
//! and `item`; the node returns `{results, iterations}`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expression::{self, EnvShape, Program};
use crate::orchestrator::{Dispatcher, NodeScope};
use crate::params::{LoopMode, LoopParams, MAX_LOOP_COUNT};
use crate::registry::{NodeExecutor, Outputs};
use crate::types::{Definition, Parameters};

/// Safety ceiling for `while` loops
pub const WHILE_ITERATION_LIMIT: usize = 1000;

/// Executor for `loop` nodes
#[derive(Debug, Default)]
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = LoopParams::parse(&params)?;
        let mut run = LoopRun {
            dispatcher: scope.dispatcher(),
            node: scope.node,
            cancel,
            context: &mut *scope.context,
            break_condition: params
                .break_condition
                .as_deref()
                .map(|src| expression::compile(src, &EnvShape::any()))
                .transpose()?,
            results: Vec::new(),
        };

        match params.mode {
            LoopMode::ForEach => {
                let items = resolve_items(params.items.as_ref(), run.context)?;
                for (index, item) in items.into_iter().enumerate() {
                    if run.step(index, Some(item)).await? {
                        break;
                    }
                }
            }
            LoopMode::Times => {
                let count = resolve_count(params.count.as_ref(), run.context)?;
                for index in 0..count {
                    if run.step(index, None).await? {
                        break;
                    }
                }
            }
            LoopMode::While => {
                let condition = params
                    .condition
                    .as_deref()
                    .ok_or_else(|| EngineError::invalid_parameter("condition", "is required"))?;
                let condition = expression::compile(condition, &EnvShape::any())?;
                let mut index = 0;
                loop {
                    if index >= WHILE_ITERATION_LIMIT {
                        log::warn!(
                            "Loop '{}' stopped at the {} iteration ceiling",
                            run.node.id,
                            WHILE_ITERATION_LIMIT
                        );
                        break;
                    }
                    if run.cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let env = iteration_env(run.context, index, None);
                    if !condition.run_bool(&env)? {
                        break;
                    }
                    if run.step(index, None).await? {
                        break;
                    }
                    index += 1;
                }
            }
        }

        let iterations = run.results.len();
        log::debug!("Loop '{}' finished after {} iteration(s)", run.node.id, iterations);
        Ok(Outputs::from([
            ("results".to_string(), Value::Array(run.results)),
            ("iterations".to_string(), json!(iterations)),
        ]))
    }
}

struct LoopRun<'s> {
    dispatcher: &'s Dispatcher,
    node: &'s Definition,
    cancel: &'s CancellationToken,
    context: &'s mut ExecutionContext,
    break_condition: Option<Program>,
    results: Vec<Value>,
}

impl LoopRun<'_> {
    /// Run one iteration and record its result; returns whether to stop
    async fn step(&mut self, index: usize, item: Option<Value>) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let previous_index = self.context.set("index", json!(index));
        let previous_item = item
            .as_ref()
            .map(|value| self.context.set("item", value.clone()));

        let outcome = self
            .dispatcher
            .run_sequence(&self.node.nodes, self.cancel, self.context)
            .await;

        restore(self.context, "index", previous_index);
        if let Some(previous) = previous_item {
            restore(self.context, "item", previous);
        }
        let outputs = outcome?;

        let mut result: serde_json::Map<String, Value> = outputs.into_iter().collect();
        result.insert("index".to_string(), json!(index));
        if let Some(item) = &item {
            result.insert("item".to_string(), item.clone());
        }
        self.results.push(Value::Object(result));

        match &self.break_condition {
            Some(program) => {
                let env = iteration_env(self.context, index, item);
                Ok(program.run_bool(&env)?)
            }
            None => Ok(false),
        }
    }
}

fn restore(context: &mut ExecutionContext, key: &str, previous: Option<Value>) {
    match previous {
        Some(value) => {
            context.set(key, value);
        }
        None => {
            context.remove(key);
        }
    }
}

/// Context data plus the loop variables
fn iteration_env(
    context: &ExecutionContext,
    index: usize,
    item: Option<Value>,
) -> HashMap<String, Value> {
    let mut env = context.data().clone();
    env.insert("index".to_string(), json!(index));
    if let Some(item) = item {
        env.insert("item".to_string(), item);
    }
    env
}

fn resolve_items(items: Option<&Value>, context: &ExecutionContext) -> Result<Vec<Value>> {
    let value = match items {
        Some(Value::String(src)) => expression::eval(src, context.data())?,
        Some(other) => other.clone(),
        None => return Err(EngineError::invalid_parameter("items", "is required")),
    };
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(EngineError::invalid_parameter(
            "items",
            format!("must evaluate to an array, got {}", other),
        )),
    }
}

fn resolve_count(count: Option<&Value>, context: &ExecutionContext) -> Result<usize> {
    let value = match count {
        Some(Value::String(src)) => expression::eval(src, context.data())?,
        Some(other) => other.clone(),
        None => return Err(EngineError::invalid_parameter("count", "is required")),
    };
    let invalid = |reason: &str| EngineError::invalid_parameter("count", reason);
    match value.as_f64() {
        Some(n) if n < 0.0 => Err(invalid("must not be negative")),
        Some(n) if n.fract() != 0.0 => Err(invalid("must be an integer")),
        Some(n) if n > MAX_LOOP_COUNT as f64 => {
            Err(invalid(&format!("must not exceed {}", MAX_LOOP_COUNT)))
        }
        Some(n) => Ok(n as usize),
        None => Err(invalid("must be a number")),
    }
}
