//! Validation for bento definitions
//!
//! Structural validation is depth-first and stops at the first problem.
//! Preflight checks the environment (commands on PATH, variables, input
//! files) and reports every problem it finds.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::params::{FileOperation, NodeParameters, ParameterError};
use crate::registry::NodeRegistry;
use crate::template;
use crate::types::Definition;

/// Structural validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `id`, `type` or `version` is empty; `node_id` is absent when the id itself is missing
    MissingField {
        node_id: Option<String>,
        field: &'static str,
    },
    /// A node has a type with no registered executable
    UnknownNodeType { node_id: String, node_type: String },
    /// A required parameter is absent
    MissingParameter { node_id: String, parameter: String },
    /// A parameter has the wrong shape or value
    InvalidParameter {
        node_id: String,
        parameter: String,
        reason: String,
    },
    /// Two siblings share an id
    DuplicateNodeId { node_id: String },
    /// An edge references a node that is not a sibling
    UnknownEdgeEndpoint {
        edge_id: String,
        endpoint: &'static str,
        node_id: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField {
                node_id: Some(node_id),
                field,
            } => write!(f, "Node '{}' is missing required field '{}'", node_id, field),
            Self::MissingField { node_id: None, field } => {
                write!(f, "Node is missing required field '{}'", field)
            }
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::MissingParameter { node_id, parameter } => {
                write!(
                    f,
                    "Node '{}' is missing required parameter '{}'",
                    node_id, parameter
                )
            }
            Self::InvalidParameter {
                node_id,
                parameter,
                reason,
            } => {
                write!(
                    f,
                    "Node '{}' has invalid parameter '{}': {}",
                    node_id, parameter, reason
                )
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "Duplicate node id '{}' among siblings", node_id)
            }
            Self::UnknownEdgeEndpoint {
                edge_id,
                endpoint,
                node_id,
            } => {
                write!(
                    f,
                    "Edge '{}' {} references unknown node '{}'",
                    edge_id, endpoint, node_id
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// The node the error is attributed to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::MissingField { node_id, .. } => node_id.as_deref(),
            Self::UnknownNodeType { node_id, .. }
            | Self::MissingParameter { node_id, .. }
            | Self::InvalidParameter { node_id, .. }
            | Self::DuplicateNodeId { node_id } => Some(node_id),
            Self::UnknownEdgeEndpoint { .. } => None,
        }
    }
}

/// A single failed environment check
#[derive(Debug, Clone, PartialEq)]
pub enum PreflightIssue {
    CommandNotFound { node_id: String, command: String },
    MissingVariable { node_id: String, variable: String },
    FileNotFound { node_id: String, path: PathBuf },
}

impl std::fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandNotFound { node_id, command } => {
                write!(f, "node '{}': command '{}' not found on PATH", node_id, command)
            }
            Self::MissingVariable { node_id, variable } => {
                write!(
                    f,
                    "node '{}': environment variable '{}' is not set",
                    node_id, variable
                )
            }
            Self::FileNotFound { node_id, path } => {
                write!(f, "node '{}': file '{}' does not exist", node_id, path.display())
            }
        }
    }
}

/// Every environment check that failed
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightError {
    pub issues: Vec<PreflightIssue>,
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} issue(s): ", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for PreflightError {}

/// Validates definitions against a registry and the local environment
pub struct Validator<'r> {
    registry: &'r NodeRegistry,
    variables: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl<'r> Validator<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self {
            registry,
            variables: HashMap::new(),
            working_dir: None,
        }
    }

    /// Variables that satisfy `{{.VAR}}` placeholders besides the process environment
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Base directory for relative file paths
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Check structure and parameters, stopping at the first error
    pub fn validate(&self, def: &Definition) -> Result<(), ValidationError> {
        self.validate_node(def)
    }

    fn validate_node(&self, def: &Definition) -> Result<(), ValidationError> {
        validate_identity(def)?;

        if !self.registry.has_node_type(&def.node_type) {
            return Err(ValidationError::UnknownNodeType {
                node_id: def.id.clone(),
                node_type: def.node_type.clone(),
            });
        }

        validate_parameters(def)?;

        if descends(def) {
            validate_unique_children(def)?;
            for child in &def.nodes {
                self.validate_node(child)?;
            }
            validate_edges(def)?;
        }

        Ok(())
    }

    /// Check the environment, collecting every failed check
    pub fn preflight(&self, def: &Definition) -> Result<(), PreflightError> {
        let mut issues = Vec::new();
        self.preflight_node(def, &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(PreflightError { issues })
        }
    }

    fn preflight_node(&self, def: &Definition, issues: &mut Vec<PreflightIssue>) {
        // Parameter errors are reported by `validate`; preflight only inspects
        // nodes whose parameters parse.
        match NodeParameters::from_definition(def) {
            Ok(NodeParameters::ShellCommand(params)) => {
                let program = params.program();
                if !template::has_template(program) && which::which(program).is_err() {
                    issues.push(PreflightIssue::CommandNotFound {
                        node_id: def.id.clone(),
                        command: program.to_string(),
                    });
                }
            }
            Ok(NodeParameters::HttpRequest(params)) => {
                let texts = std::iter::once(params.url.as_str())
                    .chain(params.headers.values().map(String::as_str));
                let mut seen = HashSet::new();
                for name in texts.flat_map(template::placeholders) {
                    if template::is_loop_variable(name) || !seen.insert(name) {
                        continue;
                    }
                    if !self.has_variable(name) {
                        issues.push(PreflightIssue::MissingVariable {
                            node_id: def.id.clone(),
                            variable: name.to_string(),
                        });
                    }
                }
            }
            Ok(NodeParameters::FileSystem(params))
                if matches!(params.operation, FileOperation::Read | FileOperation::List) =>
            {
                self.check_file(def, &params.path, issues);
            }
            Ok(NodeParameters::Template(params)) => {
                self.check_file(def, &params.input, issues);
            }
            _ => {}
        }

        if descends(def) {
            for child in &def.nodes {
                self.preflight_node(child, issues);
            }
        }
    }

    fn check_file(&self, def: &Definition, path: &str, issues: &mut Vec<PreflightIssue>) {
        if template::has_template(path) {
            return;
        }
        let resolved = match &self.working_dir {
            Some(base) if std::path::Path::new(path).is_relative() => base.join(path),
            _ => PathBuf::from(path),
        };
        if !resolved.exists() {
            issues.push(PreflightIssue::FileNotFound {
                node_id: def.id.clone(),
                path: resolved,
            });
        }
    }

    fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name) || std::env::var_os(name).is_some()
    }
}

/// Validate `def` against `registry`
pub fn validate(def: &Definition, registry: &NodeRegistry) -> Result<(), ValidationError> {
    Validator::new(registry).validate(def)
}

/// Run preflight checks against the process environment
pub fn preflight(def: &Definition, registry: &NodeRegistry) -> Result<(), PreflightError> {
    Validator::new(registry).preflight(def)
}

/// Whether checks recurse into `def.nodes`
fn descends(def: &Definition) -> bool {
    def.is_composite() || !def.nodes.is_empty()
}

fn validate_identity(def: &Definition) -> Result<(), ValidationError> {
    if def.id.trim().is_empty() {
        return Err(ValidationError::MissingField {
            node_id: None,
            field: "id",
        });
    }
    if def.node_type.trim().is_empty() {
        return Err(ValidationError::MissingField {
            node_id: Some(def.id.clone()),
            field: "type",
        });
    }
    if def.version.trim().is_empty() {
        return Err(ValidationError::MissingField {
            node_id: Some(def.id.clone()),
            field: "version",
        });
    }
    Ok(())
}

fn validate_parameters(def: &Definition) -> Result<(), ValidationError> {
    NodeParameters::from_definition(def)
        .map(|_| ())
        .map_err(|err| match err {
            ParameterError::Missing { parameter } => ValidationError::MissingParameter {
                node_id: def.id.clone(),
                parameter,
            },
            ParameterError::Invalid { parameter, reason } => ValidationError::InvalidParameter {
                node_id: def.id.clone(),
                parameter,
                reason,
            },
        })
}

fn validate_unique_children(def: &Definition) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for child in &def.nodes {
        if !child.id.is_empty() && !seen.insert(child.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId {
                node_id: child.id.clone(),
            });
        }
    }
    Ok(())
}

/// Check that every edge source/target is a sibling
fn validate_edges(def: &Definition) -> Result<(), ValidationError> {
    let node_ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &def.edges {
        if !node_ids.contains(edge.source.as_str()) {
            return Err(ValidationError::UnknownEdgeEndpoint {
                edge_id: edge.id.clone(),
                endpoint: "source",
                node_id: edge.source.clone(),
            });
        }
        if !node_ids.contains(edge.target.as_str()) {
            return Err(ValidationError::UnknownEdgeEndpoint {
                edge_id: edge.id.clone(),
                endpoint: "target",
                node_id: edge.target.clone(),
            });
        }
    }
    Ok(())
}
