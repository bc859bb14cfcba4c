//! File System Node
//!
//! Reads, writes, checks and lists paths. Relative paths resolve against
//! the run's working directory; `{{.name}}` placeholders in `path` are
//! rendered from the context first.
//!
//! # Parameters
//! - `operation` (required) - `read`, `write`, `exists` or `list`
//! - `path` (required)
//! - `content` (write only) - Strings are rendered like `path`, other
//!   values are written as pretty JSON
//! - `createDirs` (optional) - Create missing parent directories on write
//!
//! # Outputs
//! - read: `content`, `path`
//! - write: `path`, `bytesWritten`
//! - exists: `exists`, `path`
//! - list: `entries` (sorted file names), `path`

use async_trait::async_trait;
use bento_engine::params::{FileOperation, FileSystemParams};
use bento_engine::{EngineError, NodeExecutor, NodeScope, Outputs, Parameters, Result};
use serde_json::{json, Value};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::vars::Resolver;

#[derive(Debug, Default)]
pub struct FileSystemExecutor;

#[async_trait]
impl NodeExecutor for FileSystemExecutor {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = FileSystemParams::parse(&params)?;
        let (path, content) = {
            let resolver = Resolver::new(scope);
            let rendered = resolver.render_strict("path", &params.path)?;
            let content = match &params.content {
                Some(Value::String(text)) => Some(resolver.render(text)),
                Some(other) => Some(serde_json::to_string_pretty(other)?),
                None => None,
            };
            (scope.config().resolve_path(&rendered), content)
        };
        let shown = path.display().to_string();

        log::debug!(
            "FileSystem {}: {:?} '{}'",
            scope.node.id,
            params.operation,
            shown
        );

        let mut outputs = Outputs::from([("path".to_string(), json!(shown))]);
        match params.operation {
            FileOperation::Read => {
                let content = fs::read_to_string(&path).await.map_err(|e| {
                    EngineError::failed(format!("Failed to read file '{}': {}", shown, e))
                })?;
                outputs.insert("content".to_string(), json!(content));
            }
            FileOperation::Write => {
                let content = content
                    .ok_or_else(|| EngineError::invalid_parameter("content", "is required"))?;
                if params.create_dirs {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                }
                fs::write(&path, content.as_bytes()).await.map_err(|e| {
                    EngineError::failed(format!("Failed to write file '{}': {}", shown, e))
                })?;
                outputs.insert("bytesWritten".to_string(), json!(content.len()));
            }
            FileOperation::Exists => {
                let exists = fs::try_exists(&path).await.unwrap_or(false);
                outputs.insert("exists".to_string(), json!(exists));
            }
            FileOperation::List => {
                let mut reader = fs::read_dir(&path).await.map_err(|e| {
                    EngineError::failed(format!("Failed to list directory '{}': {}", shown, e))
                })?;
                let mut entries = Vec::new();
                while let Some(entry) = reader.next_entry().await? {
                    entries.push(entry.file_name().to_string_lossy().into_owned());
                }
                entries.sort();
                outputs.insert("entries".to_string(), json!(entries));
            }
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bento_engine::{Definition, NodeRegistry, Orchestrator, PreflightIssue, RunConfig};

    use super::*;

    fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let mut registry = NodeRegistry::with_control_flow();
        registry.register_type::<FileSystemExecutor>("file-system");
        Orchestrator::new(Arc::new(registry))
            .with_config(RunConfig::default().with_working_dir(dir))
    }

    fn fs_node(id: &str, params: Value) -> Definition {
        let mut def = Definition::new(id, "file-system");
        if let Value::Object(map) = params {
            def.parameters = map.into_iter().collect();
        }
        def
    }

    #[tokio::test]
    async fn test_write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let root = Definition::new("root", "group")
            .with_child(fs_node(
                "w",
                json!({"operation": "write", "path": "out/a.txt", "content": "alpha", "createDirs": true}),
            ))
            .with_child(fs_node("r", json!({"operation": "read", "path": "out/a.txt"})))
            .with_child(fs_node("l", json!({"operation": "list", "path": "out"})))
            .with_child(fs_node("e", json!({"operation": "exists", "path": "out/missing.txt"})));

        // read/list targets do not exist before the run
        let mut orchestrator = orchestrator(dir.path())
            .with_config(RunConfig::default().with_working_dir(dir.path()).with_skip_preflight(true));
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.data["content"], json!("alpha"));
        assert_eq!(result.data["entries"], json!(["a.txt"]));
        assert_eq!(result.data["exists"], json!(false));
        assert_eq!(result.data["bytesWritten"], json!(5));
    }

    #[tokio::test]
    async fn test_write_json_content() {
        let dir = tempfile::tempdir().unwrap();
        let node = fs_node(
            "w",
            json!({"operation": "write", "path": "data.json", "content": {"k": [1, 2]}}),
        );
        orchestrator(dir.path())
            .run(&node, &CancellationToken::new())
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, json!({"k": [1, 2]}));
    }

    #[tokio::test]
    async fn test_templated_path_from_loop_item() {
        let dir = tempfile::tempdir().unwrap();
        let node = Definition::new("loop", "loop")
            .with_parameter("mode", json!("forEach"))
            .with_parameter("items", json!(["one", "two"]))
            .with_child(fs_node(
                "w",
                json!({"operation": "write", "path": "{{.item}}.txt", "content": "x"}),
            ));
        orchestrator(dir.path())
            .run(&node, &CancellationToken::new())
            .await
            .unwrap();

        assert!(dir.path().join("one.txt").exists());
        assert!(dir.path().join("two.txt").exists());
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let node = fs_node("r", json!({"operation": "read", "path": "nope.txt"}));
        let failure = orchestrator(dir.path())
            .run(&node, &CancellationToken::new())
            .await
            .unwrap_err();

        match failure.error {
            EngineError::Preflight(err) => {
                assert!(matches!(
                    err.issues.as_slice(),
                    [PreflightIssue::FileNotFound { node_id, .. }] if node_id == "r"
                ));
            }
            other => panic!("expected preflight error, got {}", other),
        }
    }
}
