//! Transform Node
//!
//! Maps the data-flow context through expressions.
//!
//! # Parameters
//! - `expression` (optional) - Result stored under `outputKey`; without an
//!   `outputKey`, an object result is spread into the outputs and any other
//!   value lands under `result`
//! - `outputKey` (optional)
//! - `mappings` (optional) - Output key to expression
//!
//! At least one of `expression` and `mappings` is required. Every
//! expression sees the context as it was when the node started.

use async_trait::async_trait;
use bento_engine::params::TransformParams;
use bento_engine::{expression, into_outputs, NodeExecutor, NodeScope, Outputs, Parameters, Result};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = TransformParams::parse(&params)?;
        let env = scope.context.data();
        let mut outputs = Outputs::new();

        if let Some(source) = &params.expression {
            let value = expression::eval(source, env)?;
            match &params.output_key {
                Some(key) => {
                    outputs.insert(key.clone(), value);
                }
                None => outputs.extend(into_outputs(value)),
            }
        }
        for (key, source) in &params.mappings {
            outputs.insert(key.clone(), expression::eval(source, env)?);
        }

        log::debug!("Transform {}: produced {} key(s)", scope.node.id, outputs.len());
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use bento_engine::{Definition, EngineError, NodeRegistry, Orchestrator};
    use serde_json::{json, Value};

    use super::*;

    async fn transform(params: Value, data: Value) -> Result<HashMap<String, Value>> {
        let mut registry = NodeRegistry::new();
        registry.register_type::<TransformExecutor>("transform");
        let mut def = Definition::new("t", "transform");
        if let Value::Object(map) = params {
            def.parameters = map.into_iter().collect();
        }
        let data = match data {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Orchestrator::new(Arc::new(registry))
            .run_with_data(&def, data, &CancellationToken::new())
            .await
            .map(|r| r.data)
            .map_err(|f| f.error)
    }

    #[tokio::test]
    async fn test_expression_with_output_key() {
        let data = transform(
            json!({"expression": "price > 100 ? price * 0.9 : price", "outputKey": "finalPrice"}),
            json!({"price": 150}),
        )
        .await
        .unwrap();
        assert_eq!(data["finalPrice"], json!(135));
    }

    #[tokio::test]
    async fn test_object_result_is_spread() {
        let data = transform(
            json!({"expression": "{total: sum(map(orders, #.amount)), n: len(orders)}"}),
            json!({"orders": [{"amount": 5}, {"amount": 7}]}),
        )
        .await
        .unwrap();
        assert_eq!(data["total"], json!(12));
        assert_eq!(data["n"], json!(2));
    }

    #[tokio::test]
    async fn test_mappings() {
        let data = transform(
            json!({"mappings": {"shout": "upper(name)", "big": "filter(xs, # > 2)"}}),
            json!({"name": "bento", "xs": [1, 2, 3, 4]}),
        )
        .await
        .unwrap();
        assert_eq!(data["shout"], json!("BENTO"));
        assert_eq!(data["big"], json!([3, 4]));
    }

    #[tokio::test]
    async fn test_runtime_error_is_attributed() {
        let err = transform(json!({"expression": "1 / zero"}), json!({"zero": 0}))
            .await
            .unwrap_err();
        assert_eq!(err.node_id(), Some("t"));
        assert!(matches!(
            err,
            EngineError::NodeFailed { ref source, .. } if matches!(**source, EngineError::Expression(_))
        ));
    }
}
