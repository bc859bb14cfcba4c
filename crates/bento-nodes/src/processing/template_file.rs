//! Template Node
//!
//! `replace` operation: reads `input`, substitutes `{{.key}}` placeholders
//! from `replacements` and writes the result to `output`. Replacement
//! values may themselves reference the context. Placeholders without a
//! replacement are left in place.

use async_trait::async_trait;
use bento_engine::params::TemplateParams;
use bento_engine::{template, EngineError, NodeExecutor, NodeScope, Outputs, Parameters, Result};
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::vars::{to_text, Resolver};

#[derive(Debug, Default)]
pub struct TemplateExecutor;

#[async_trait]
impl NodeExecutor for TemplateExecutor {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = TemplateParams::parse(&params)?;
        let config = scope.config();
        let resolver = Resolver::new(scope);

        let input = config.resolve_path(&resolver.render_strict("input", &params.input)?);
        let output = config.resolve_path(&resolver.render_strict("output", &params.output)?);

        let source = fs::read_to_string(&input).await.map_err(|e| {
            EngineError::failed(format!(
                "Failed to read template '{}': {}",
                input.display(),
                e
            ))
        })?;

        let replaced = template::placeholders(&source)
            .into_iter()
            .filter(|name| params.replacements.contains_key(*name))
            .count();
        let rendered = template::render(&source, |name| {
            params
                .replacements
                .get(name)
                .map(|value| resolver.render(&to_text(value)))
        });

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&output, rendered.as_bytes()).await.map_err(|e| {
            EngineError::failed(format!("Failed to write '{}': {}", output.display(), e))
        })?;

        log::debug!(
            "Template {}: {} placeholder(s) replaced into '{}'",
            scope.node.id,
            replaced,
            output.display()
        );

        Ok(Outputs::from([
            ("outputPath".to_string(), json!(output.display().to_string())),
            ("replaced".to_string(), json!(replaced)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bento_engine::{Definition, NodeRegistry, Orchestrator, RunConfig};

    use super::*;

    #[tokio::test]
    async fn test_replace_into_output_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greeting.tmpl"),
            "Dear {{.name}}, your order {{ .order }} ships {{.when}}.",
        )
        .unwrap();

        let mut registry = NodeRegistry::new();
        registry.register_type::<TemplateExecutor>("template");
        let def = Definition::new("tmpl", "template")
            .with_parameter("operation", json!("replace"))
            .with_parameter("input", json!("greeting.tmpl"))
            .with_parameter("output", json!("out/greeting.txt"))
            .with_parameter(
                "replacements",
                json!({"name": "{{.customer}}", "order": 42}),
            );

        let data = std::collections::HashMap::from([("customer".to_string(), json!("Ada"))]);
        let result = Orchestrator::new(Arc::new(registry))
            .with_config(RunConfig::default().with_working_dir(dir.path()))
            .run_with_data(&def, data, &CancellationToken::new())
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("out/greeting.txt")).unwrap();
        assert_eq!(written, "Dear Ada, your order 42 ships {{.when}}.");
        assert_eq!(result.data["replaced"], json!(2));
    }
}
