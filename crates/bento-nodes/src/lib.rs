//! Bento Nodes
//!
//! Built-in leaf node implementations for the bento engine.
//! Each node is an atomic building block composed into bentos by the
//! engine's `group`, `loop` and `parallel` nodes.
//!
//! # Categories
//!
//! - **Processing**: `edit-fields`, `transform`, `template`
//! - **Network**: `http-request`
//! - **Storage**: `file-system`
//! - **System**: `shell-command`

pub mod network;
pub mod processing;
pub mod setup;
pub mod storage;
pub mod system;

mod vars;

use bento_engine::{node_types, NodeRegistry};

pub use network::*;
pub use processing::*;
pub use setup::{setup_extensions, setup_extensions_with_variables};
pub use storage::*;
pub use system::*;

/// Register every built-in leaf node
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register_type::<EditFieldsExecutor>(node_types::EDIT_FIELDS);
    registry.register_type::<TransformExecutor>(node_types::TRANSFORM);
    registry.register_type::<TemplateExecutor>(node_types::TEMPLATE);
    registry.register_type::<HttpRequestExecutor>(node_types::HTTP_REQUEST);
    registry.register_type::<FileSystemExecutor>(node_types::FILE_SYSTEM);
    registry.register_type::<ShellCommandExecutor>(node_types::SHELL_COMMAND);
}

/// Control flow plus every built-in leaf node
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_control_flow();
    register_builtins(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bento_engine::{Definition, Orchestrator, RunConfig};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn test_builtin_registry_is_enumerable() {
        let registry = builtin_registry();
        assert_eq!(
            registry.node_types(),
            vec![
                "edit-fields",
                "file-system",
                "group",
                "http-request",
                "loop",
                "parallel",
                "shell-command",
                "template",
                "transform",
            ]
        );
        assert!(!registry.has_node_type(node_types::SPREADSHEET));
        assert!(!registry.has_node_type(node_types::IMAGE));
    }

    #[tokio::test]
    async fn test_pipeline_over_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let root = Definition::new("root", "group")
            .with_child(
                Definition::new("prices", "transform")
                    .with_parameter("expression", json!("[80, 120, 200]"))
                    .with_parameter("outputKey", json!("prices")),
            )
            .with_child(
                Definition::new("each", "loop")
                    .with_parameter("mode", json!("forEach"))
                    .with_parameter("items", json!("prices"))
                    .with_child(
                        Definition::new("discount", "transform")
                            .with_parameter("expression", json!("item > 100 ? item * 0.9 : item"))
                            .with_parameter("outputKey", json!("price")),
                    ),
            )
            .with_child(
                Definition::new("save", "file-system")
                    .with_parameter("operation", json!("write"))
                    .with_parameter("path", json!("prices.json"))
                    .with_parameter("content", json!("{{.results}}")),
            );

        let mut orchestrator = Orchestrator::new(Arc::new(builtin_registry()))
            .with_config(RunConfig::default().with_working_dir(dir.path()));
        let result = orchestrator.run(&root, &CancellationToken::new()).await.unwrap();

        let prices: Vec<_> = result.data["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["price"].clone())
            .collect();
        assert_eq!(prices, vec![json!(80), json!(108), json!(180)]);
        assert_eq!(result.nodes_executed, 7);

        let saved = std::fs::read_to_string(dir.path().join("prices.json")).unwrap();
        assert!(saved.contains("108"));
    }
}
