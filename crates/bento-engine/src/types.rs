//! Core types for bento definitions
//!
//! A bento is a tree of [`Definition`]s. Composite nodes (group, loop,
//! parallel) own their children through `nodes`; `edges` describe data
//! lineage between siblings and are validated but never used for ordering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Unique identifier for a node within its sibling set
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Open key-value parameter map, interpreted per node type
pub type Parameters = HashMap<String, serde_json::Value>;

/// Well-known node type names
pub mod node_types {
    pub const GROUP: &str = "group";
    pub const LOOP: &str = "loop";
    pub const PARALLEL: &str = "parallel";
    pub const EDIT_FIELDS: &str = "edit-fields";
    pub const TRANSFORM: &str = "transform";
    pub const HTTP_REQUEST: &str = "http-request";
    pub const SHELL_COMMAND: &str = "shell-command";
    pub const FILE_SYSTEM: &str = "file-system";
    pub const TEMPLATE: &str = "template";
    pub const SPREADSHEET: &str = "spreadsheet";
    pub const IMAGE: &str = "image";

    /// Types that own child nodes
    pub const COMPOSITE: [&str; 3] = [GROUP, LOOP, PARALLEL];
}

/// Editor position; ignored by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Descriptive metadata, opaque to execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<HashMap<String, serde_json::Value>>,
}

/// Static or templated field values used by field-editing nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fields {
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_only_set: Option<bool>,
}

/// A named attachment point on a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl Port {
    /// Create a port with matching id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            handle: None,
        }
    }
}

/// An edge between two sibling nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique identifier for this edge
    #[serde(default)]
    pub id: EdgeId,
    /// Source node ID
    #[serde(default)]
    pub source: NodeId,
    /// Target node ID
    #[serde(default)]
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }
}

/// A node in a bento, and (when composite) its children
///
/// Identity fields default to empty strings on deserialization so the
/// validator, not serde, reports what is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    #[serde(default)]
    pub id: NodeId,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub version: String,
    /// Back-reference for tooling; ownership is the parent's `nodes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    #[serde(default)]
    pub input_ports: Vec<Port>,
    #[serde(default)]
    pub output_ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Definition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

impl Definition {
    /// Create a new node with version "1.0"
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: node_type.into(),
            version: "1.0".to_string(),
            ..Default::default()
        }
    }

    /// Set a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Append a child node, recording this node as its parent
    pub fn with_child(mut self, mut child: Definition) -> Self {
        child.parent_id = Some(self.id.clone());
        self.nodes.push(child);
        self
    }

    /// Append an edge between two children
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Set the field values for field-editing nodes
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Parse a definition from its JSON form
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this definition to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether this node type owns children
    pub fn is_composite(&self) -> bool {
        node_types::COMPOSITE.contains(&self.node_type.as_str())
    }

    /// Find a direct child by ID
    pub fn find_child(&self, id: &str) -> Option<&Definition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// IDs of the direct children, in array order
    pub fn child_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Edges whose source is the given child
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Edges whose target is the given child
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Depth-first, pre-order traversal yielding each node with its depth
    /// (this node is depth 0)
    pub fn walk(&self) -> Vec<(usize, &Definition)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.nodes.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    /// Total number of nodes in this subtree, including this one
    pub fn count_nodes(&self) -> usize {
        1 + self.nodes.iter().map(Definition::count_nodes).sum::<usize>()
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Definition {
        Definition::new("root", "group")
            .with_child(Definition::new("a", "transform"))
            .with_child(
                Definition::new("b", "loop").with_child(Definition::new("b1", "edit-fields")),
            )
            .with_edge(Edge::new("e1", "a", "b"))
    }

    #[test]
    fn test_json_field_names() {
        let mut def = sample();
        def.fields = Some(Fields {
            values: HashMap::from([("k".to_string(), json!("v"))]),
            keep_only_set: Some(true),
        });
        let value = serde_json::to_value(&def).unwrap();

        assert_eq!(value["type"], json!("group"));
        assert_eq!(value["position"], json!({"x": 0.0, "y": 0.0}));
        assert_eq!(value["fields"]["keepOnlySet"], json!(true));
        assert!(value.get("inputPorts").is_some());
        assert!(value.get("outputPorts").is_some());
        assert_eq!(value["nodes"][0]["parentId"], json!("root"));
        assert_eq!(value["edges"][0]["source"], json!("a"));
        assert!(value.get("parentId").is_none());
    }

    #[test]
    fn test_parse_stored_graph() {
        let json = r#"{
            "id": "root", "type": "group", "version": "1.0", "name": "Root",
            "position": {"x": 10, "y": 20},
            "metadata": {"tags": ["demo"], "customData": {"owner": "ops"}},
            "parameters": {"mode": "sequential"},
            "inputPorts": [{"id": "in", "name": "In"}],
            "outputPorts": [],
            "nodes": [{"id": "a", "type": "transform", "version": "1.0",
                       "edges": [], "parameters": {"expression": "1 + 1"}}],
            "edges": [{"id": "e1", "source": "a", "target": "a", "sourceHandle": "out"}]
        }"#;
        let def = Definition::from_json_str(json).unwrap();
        assert_eq!(def.node_type, "group");
        assert_eq!(def.position.y, 20.0);
        assert_eq!(def.metadata.tags.as_deref(), Some(&["demo".to_string()][..]));
        assert_eq!(def.param_str("mode"), Some("sequential"));
        assert_eq!(def.nodes[0].param_str("expression"), Some("1 + 1"));
        assert_eq!(def.edges[0].source_handle.as_deref(), Some("out"));
    }

    #[test]
    fn test_missing_identity_fields_default_empty() {
        let def = Definition::from_json_str(r#"{"name": "nameless"}"#).unwrap();
        assert!(def.id.is_empty());
        assert!(def.node_type.is_empty());
        assert!(def.version.is_empty());
    }

    #[test]
    fn test_walk_and_count() {
        let def = sample();
        let order: Vec<(usize, &str)> = def.walk().iter().map(|(d, n)| (*d, n.id.as_str())).collect();
        assert_eq!(order, vec![(0, "root"), (1, "a"), (1, "b"), (2, "b1")]);
        assert_eq!(def.count_nodes(), 4);
    }

    #[test]
    fn test_navigation() {
        let def = sample();
        assert!(def.is_composite());
        assert!(!def.nodes[0].is_composite());
        assert_eq!(def.child_ids(), vec!["a", "b"]);
        assert!(def.find_child("b").is_some());
        assert!(def.find_child("b1").is_none());
        assert_eq!(def.outgoing_edges("a").count(), 1);
        assert_eq!(def.incoming_edges("b").count(), 1);
    }
}
