//! `parallel`: run children on a bounded worker pool.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::orchestrator::NodeScope;
use crate::params::ParallelParams;
use crate::registry::{NodeExecutor, Outputs};
use crate::types::Parameters;

use super::pool::WorkerPool;

/// Executor for `parallel` nodes
///
/// Returns `{results, errors}`: `results[i]` holds the outputs of child `i`
/// (or null when it failed), `errors` lists `{index, nodeId, error}` for
/// failures collected under `collectAll`. Everything a successful child
/// wrote, nested children included, is merged into the context in child
/// order.
#[derive(Debug, Default)]
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let node = scope.node;
        let dispatcher = scope.dispatcher();
        let params = ParallelParams::parse(&params)?;

        let workers = params
            .max_workers
            .or(dispatcher.config().default_max_workers)
            .unwrap_or(node.nodes.len());
        let pool = WorkerPool::new(workers, params.error_strategy);

        let outcome = dispatcher
            .run_concurrent(&node.nodes, cancel, scope.context, &pool)
            .await?;

        let errors: Vec<Value> = outcome
            .errors
            .iter()
            .map(|failure| {
                let node_id = node
                    .nodes
                    .get(failure.index)
                    .map(|child| child.id.as_str())
                    .unwrap_or_default();
                json!({
                    "index": failure.index,
                    "nodeId": node_id,
                    "error": failure.error.to_string(),
                })
            })
            .collect();
        if !errors.is_empty() {
            log::warn!(
                "Parallel node '{}' collected {} error(s)",
                node.id,
                errors.len()
            );
        }

        let mut results = Vec::with_capacity(outcome.results.len());
        for slot in outcome.results {
            match slot {
                Some(branch) => {
                    results.push(Value::Object(branch.outputs.into_iter().collect()));
                    scope.context.merge(branch.changes);
                }
                None => results.push(Value::Null),
            }
        }

        Ok(Outputs::from([
            ("results".to_string(), Value::Array(results)),
            ("errors".to_string(), Value::Array(errors)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::RunConfig;
    use crate::error::EngineError;
    use crate::events::{NodeStatus, VecEventSink};
    use crate::orchestrator::Orchestrator;
    use crate::registry::NodeRegistry;
    use crate::types::Definition;

    use super::*;

    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::with_control_flow();
        registry.register_fn("task", |node_id, params, cancel| async move {
            let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            }
            if params.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                return Err(EngineError::failed(format!("{} was told to fail", node_id)));
            }
            Ok(json!({ node_id: ms }))
        });
        Arc::new(registry)
    }

    fn task(id: &str, ms: u64, fail: bool) -> Definition {
        Definition::new(id, "task")
            .with_parameter("ms", json!(ms))
            .with_parameter("fail", json!(fail))
    }

    fn parallel(strategy: &str, children: Vec<Definition>) -> Definition {
        children.into_iter().fold(
            Definition::new("par", "parallel").with_parameter("errorStrategy", json!(strategy)),
            Definition::with_child,
        )
    }

    #[tokio::test]
    async fn test_collect_all_reports_errors_in_output() {
        let root = parallel(
            "collectAll",
            vec![
                task("t0", 10, false),
                task("t1", 10, true),
                task("t2", 10, false),
                task("t3", 10, true),
            ],
        );
        let mut orchestrator = Orchestrator::new(registry());
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        let errors = result.data["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        let results = result.data["results"].as_array().unwrap();
        assert_eq!(results[0], json!({"t0": 10}));
        assert_eq!(results[1], Value::Null);
        assert_eq!(result.data.get("t2"), Some(&json!(10)));
        assert!(result.data.get("t1").is_none());
    }

    #[tokio::test]
    async fn test_fail_fast_fails_the_node() {
        let root = parallel(
            "failFast",
            vec![task("slow", 2_000, false), task("bad", 10, true)],
        );
        let mut orchestrator = Orchestrator::new(registry());
        let failure = orchestrator
            .run(&root, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.error.node_id(), Some("bad"));
        assert!(failure.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_default_workers_from_config() {
        let sink = Arc::new(VecEventSink::new());
        let root = parallel(
            "failFast",
            vec![task("a", 30, false), task("b", 30, false), task("c", 30, false)],
        );
        let mut orchestrator = Orchestrator::new(registry())
            .with_event_sink(sink.clone())
            .with_config(RunConfig::default().with_default_max_workers(1));
        orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        // one worker: each child completes before the next starts
        let children: Vec<(String, NodeStatus)> = sink
            .progress()
            .into_iter()
            .filter(|(id, _)| id != "par")
            .collect();
        assert_eq!(
            children,
            vec![
                ("a".to_string(), NodeStatus::Starting),
                ("a".to_string(), NodeStatus::Completed),
                ("b".to_string(), NodeStatus::Starting),
                ("b".to_string(), NodeStatus::Completed),
                ("c".to_string(), NodeStatus::Starting),
                ("c".to_string(), NodeStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_composite_children_merge_nested_writes() {
        let inner = Definition::new("inner", "group")
            .with_child(task("x", 5, false))
            .with_child(task("y", 7, false));
        let root = parallel("failFast", vec![inner, task("z", 1, false)]);

        let mut orchestrator = Orchestrator::new(registry());
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.nodes_executed, 5);
        assert_eq!(result.data.get("x"), Some(&json!(5)));
        assert_eq!(result.data.get("y"), Some(&json!(7)));
        assert_eq!(result.data.get("z"), Some(&json!(1)));
        // a group returns no outputs of its own
        assert_eq!(result.data["results"], json!([{}, {"z": 1}]));
    }
}
