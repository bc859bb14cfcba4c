//! Typed node parameters
//!
//! Definitions keep parameters as an open map on the wire. At the boundary
//! where a node is validated or executed the map is parsed into the
//! [`NodeParameters`] variant for its type, which checks required keys and
//! value shapes.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::expression::{self, EnvShape};
use crate::types::{node_types, Definition, Parameters};

/// HTTP methods accepted by `http-request`
pub const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Largest `count` a `times` loop accepts
pub const MAX_LOOP_COUNT: u64 = 1_000_000;

/// Shell that runs `shell-command` strings when no `args` are given
pub const SHELL: &str = "sh";

/// Words `sh` handles itself, so there is no binary to look up
const SHELL_BUILTINS: [&str; 16] = [
    "cd", "export", "unset", "set", "exit", "source", ".", ":", "eval", "exec", "test", "[",
    "true", "false", "read", "ulimit",
];

/// A parameter that is missing or malformed
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterError {
    Missing { parameter: String },
    Invalid { parameter: String, reason: String },
}

impl ParameterError {
    pub fn missing(parameter: &str) -> Self {
        Self::Missing {
            parameter: parameter.to_string(),
        }
    }

    pub fn invalid(parameter: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending parameter
    pub fn parameter(&self) -> &str {
        match self {
            Self::Missing { parameter } | Self::Invalid { parameter, .. } => parameter,
        }
    }
}

impl std::fmt::Display for ParameterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { parameter } => write!(f, "parameter '{}' is required", parameter),
            Self::Invalid { parameter, reason } => {
                write!(f, "parameter '{}' {}", parameter, reason)
            }
        }
    }
}

impl std::error::Error for ParameterError {}

impl From<ParameterError> for EngineError {
    fn from(err: ParameterError) -> Self {
        match err {
            ParameterError::Missing { parameter } => EngineError::InvalidParameter {
                name: parameter,
                reason: "is required".to_string(),
            },
            ParameterError::Invalid { parameter, reason } => {
                EngineError::InvalidParameter { name: parameter, reason }
            }
        }
    }
}

/// Group execution mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupMode {
    #[default]
    Sequential,
    Parallel,
}

/// Loop iteration mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    ForEach,
    Times,
    While,
}

/// What a worker pool does when a task fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorStrategy {
    /// Cancel remaining work and surface the first error
    #[default]
    FailFast,
    /// Run every task and report errors alongside results
    CollectAll,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParams {
    #[serde(default)]
    pub mode: GroupMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopParams {
    pub mode: LoopMode,
    /// Literal array, or an expression evaluated against the context
    #[serde(default)]
    pub items: Option<Value>,
    /// Literal count, or an expression evaluated against the context
    #[serde(default)]
    pub count: Option<Value>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub break_condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelParams {
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestParams {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommandParams {
    pub command: String,
    /// When empty, `command` is run through `sh -c`
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ShellCommandParams {
    /// The executable that must be resolvable on PATH.
    ///
    /// Without `args` this is the first word after any `NAME=value`
    /// assignments, or the shell itself when that word is a builtin.
    pub fn program(&self) -> &str {
        if !self.args.is_empty() {
            return &self.command;
        }
        match self.command.split_whitespace().find(|word| !is_assignment(word)) {
            Some(word) if !SHELL_BUILTINS.contains(&word) => word,
            _ => SHELL,
        }
    }
}

/// `NAME=value` prefix as understood by `sh`
fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParams {
    pub operation: String,
    pub input: String,
    pub output: String,
    pub replacements: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOperation {
    Read,
    Write,
    Exists,
    List,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemParams {
    pub operation: FileOperation,
    pub path: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub create_dirs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformParams {
    #[serde(default)]
    pub expression: Option<String>,
    /// Output key to expression
    #[serde(default)]
    pub mappings: HashMap<String, String>,
    #[serde(default)]
    pub output_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditFieldsParams {
    pub values: HashMap<String, Value>,
    pub keep_only_set: bool,
}

/// Parameters of a node, parsed according to its type
#[derive(Debug, Clone, PartialEq)]
pub enum NodeParameters {
    Group(GroupParams),
    Loop(LoopParams),
    Parallel(ParallelParams),
    HttpRequest(HttpRequestParams),
    ShellCommand(ShellCommandParams),
    Template(TemplateParams),
    FileSystem(FileSystemParams),
    Transform(TransformParams),
    EditFields(EditFieldsParams),
    /// A type without a schema; parameters are passed through untouched
    Other(Parameters),
}

impl NodeParameters {
    /// Parse and check the parameters of `def` for its declared type
    pub fn from_definition(def: &Definition) -> Result<Self, ParameterError> {
        let params = &def.parameters;
        let parsed = match def.node_type.as_str() {
            node_types::GROUP => Self::Group(GroupParams::parse(params)?),
            node_types::LOOP => Self::Loop(LoopParams::parse(params)?),
            node_types::PARALLEL => Self::Parallel(ParallelParams::parse(params)?),
            node_types::HTTP_REQUEST => Self::HttpRequest(HttpRequestParams::parse(params)?),
            node_types::SHELL_COMMAND => Self::ShellCommand(ShellCommandParams::parse(params)?),
            node_types::TEMPLATE => Self::Template(TemplateParams::parse(params)?),
            node_types::FILE_SYSTEM => Self::FileSystem(FileSystemParams::parse(params)?),
            node_types::TRANSFORM => Self::Transform(TransformParams::parse(params)?),
            node_types::EDIT_FIELDS => Self::EditFields(EditFieldsParams::from_definition(def)?),
            _ => Self::Other(params.clone()),
        };
        Ok(parsed)
    }
}

impl GroupParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        deserialize(params, &[], &[("mode", typed::<GroupMode>)])
    }
}

impl LoopParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &["mode"],
            &[
                ("mode", typed::<LoopMode>),
                ("condition", typed::<String>),
                ("breakCondition", typed::<String>),
            ],
        )?;
        match parsed.mode {
            LoopMode::ForEach => match &parsed.items {
                None | Some(Value::Null) => return Err(ParameterError::missing("items")),
                Some(Value::Array(_)) => {}
                Some(Value::String(src)) => check_expression("items", src)?,
                Some(_) => {
                    return Err(ParameterError::invalid(
                        "items",
                        "must be an array or an expression",
                    ))
                }
            },
            LoopMode::Times => match &parsed.count {
                None | Some(Value::Null) => return Err(ParameterError::missing("count")),
                Some(Value::Number(n)) => {
                    if n.as_i64().is_some_and(|c| c < 0) || n.as_f64().is_some_and(|c| c < 0.0) {
                        return Err(ParameterError::invalid("count", "must not be negative"));
                    }
                    match n.as_u64() {
                        None => return Err(ParameterError::invalid("count", "must be an integer")),
                        Some(c) if c > MAX_LOOP_COUNT => {
                            return Err(ParameterError::invalid(
                                "count",
                                format!("must not exceed {}", MAX_LOOP_COUNT),
                            ))
                        }
                        Some(_) => {}
                    }
                }
                Some(Value::String(src)) => check_expression("count", src)?,
                Some(_) => {
                    return Err(ParameterError::invalid(
                        "count",
                        "must be an integer or an expression",
                    ))
                }
            },
            LoopMode::While => match &parsed.condition {
                None => return Err(ParameterError::missing("condition")),
                Some(src) => check_expression("condition", src)?,
            },
        }
        if let Some(src) = &parsed.break_condition {
            check_expression("breakCondition", src)?;
        }
        Ok(parsed)
    }
}

impl ParallelParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &[],
            &[
                ("maxWorkers", typed::<usize>),
                ("errorStrategy", typed::<ErrorStrategy>),
            ],
        )?;
        if parsed.max_workers == Some(0) {
            return Err(ParameterError::invalid("maxWorkers", "must be at least 1"));
        }
        Ok(parsed)
    }
}

impl HttpRequestParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &["url", "method"],
            &[
                ("url", typed::<String>),
                ("method", typed::<String>),
                ("headers", typed::<HashMap<String, String>>),
                ("timeoutMs", typed::<u64>),
            ],
        )?;
        if parsed.url.trim().is_empty() {
            return Err(ParameterError::missing("url"));
        }
        if !HTTP_METHODS.contains(&parsed.method.to_ascii_uppercase().as_str()) {
            return Err(ParameterError::invalid(
                "method",
                format!(
                    "'{}' is not one of {}",
                    parsed.method,
                    HTTP_METHODS.join(", ")
                ),
            ));
        }
        Ok(parsed)
    }
}

impl ShellCommandParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &["command"],
            &[
                ("command", typed::<String>),
                ("args", typed::<Vec<String>>),
                ("workingDir", typed::<String>),
                ("env", typed::<HashMap<String, String>>),
                ("timeoutMs", typed::<u64>),
            ],
        )?;
        if parsed.command.trim().is_empty() {
            return Err(ParameterError::missing("command"));
        }
        Ok(parsed)
    }
}

impl TemplateParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &["operation", "input", "output", "replacements"],
            &[
                ("operation", typed::<String>),
                ("input", typed::<String>),
                ("output", typed::<String>),
                ("replacements", typed::<HashMap<String, Value>>),
            ],
        )?;
        if parsed.operation != "replace" {
            return Err(ParameterError::invalid(
                "operation",
                format!("unsupported operation '{}', expected 'replace'", parsed.operation),
            ));
        }
        Ok(parsed)
    }
}

impl FileSystemParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &["operation", "path"],
            &[
                ("operation", typed::<FileOperation>),
                ("path", typed::<String>),
                ("createDirs", typed::<bool>),
            ],
        )?;
        if parsed.operation == FileOperation::Write && parsed.content.is_none() {
            return Err(ParameterError::missing("content"));
        }
        Ok(parsed)
    }
}

impl TransformParams {
    pub fn parse(params: &Parameters) -> Result<Self, ParameterError> {
        let parsed: Self = deserialize(
            params,
            &[],
            &[
                ("expression", typed::<String>),
                ("mappings", typed::<HashMap<String, String>>),
                ("outputKey", typed::<String>),
            ],
        )?;
        if parsed.expression.is_none() && parsed.mappings.is_empty() {
            return Err(ParameterError::missing("expression"));
        }
        if let Some(src) = &parsed.expression {
            check_expression("expression", src)?;
        }
        for (key, src) in &parsed.mappings {
            check_expression(&format!("mappings.{}", key), src)?;
        }
        Ok(parsed)
    }
}

impl EditFieldsParams {
    /// Field values come from the definition's `fields`, falling back to a
    /// `fields` parameter
    pub fn from_definition(def: &Definition) -> Result<Self, ParameterError> {
        if let Some(fields) = &def.fields {
            return Ok(Self {
                values: fields.values.clone(),
                keep_only_set: fields.keep_only_set.unwrap_or(false),
            });
        }

        let values = match def.parameters.get("fields") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None | Some(Value::Null) => HashMap::new(),
            Some(_) => return Err(ParameterError::invalid("fields", "must be an object")),
        };
        let keep_only_set = def
            .parameters
            .get("keepOnlySet")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self {
            values,
            keep_only_set,
        })
    }
}

/// Shape check for one parameter value
type FieldCheck = (&'static str, fn(&Value) -> Result<(), String>);

fn typed<T: DeserializeOwned>(value: &Value) -> Result<(), String> {
    T::deserialize(value).map(|_| ()).map_err(|e| e.to_string())
}

/// Parse `params` into `T` after checking `required` keys and the shape of
/// each key in `fields`, so errors name the offending parameter.
fn deserialize<T: DeserializeOwned>(
    params: &Parameters,
    required: &[&str],
    fields: &[FieldCheck],
) -> Result<T, ParameterError> {
    for key in required {
        if params.get(*key).map_or(true, Value::is_null) {
            return Err(ParameterError::missing(key));
        }
    }
    for (key, check) in fields {
        if let Some(value) = params.get(*key).filter(|v| !v.is_null()) {
            check(value).map_err(|reason| ParameterError::invalid(key, reason))?;
        }
    }
    let object: serde_json::Map<String, Value> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|e| ParameterError::invalid("parameters", e.to_string()))
}

fn check_expression(parameter: &str, source: &str) -> Result<(), ParameterError> {
    expression::compile(source, &EnvShape::any())
        .map(|_| ())
        .map_err(|e| ParameterError::invalid(parameter, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(node_type: &str, params: Value) -> Definition {
        let mut def = Definition::new("n1", node_type);
        if let Value::Object(map) = params {
            def.parameters = map.into_iter().collect();
        }
        def
    }

    #[test]
    fn test_group_mode_defaults_to_sequential() {
        let parsed = NodeParameters::from_definition(&def("group", json!({}))).unwrap();
        assert_eq!(parsed, NodeParameters::Group(GroupParams::default()));

        let err = NodeParameters::from_definition(&def("group", json!({"mode": "random"})))
            .unwrap_err();
        assert_eq!(err.parameter(), "mode");
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_bad_values_name_their_parameter() {
        let cases = [
            ("loop", json!({"mode": "sometimes", "count": 1}), "mode"),
            ("parallel", json!({"errorStrategy": "ignore"}), "errorStrategy"),
            ("parallel", json!({"maxWorkers": "four"}), "maxWorkers"),
            ("shell-command", json!({"command": "ls", "args": "-la"}), "args"),
            ("file-system", json!({"operation": "delete", "path": "a"}), "operation"),
            ("http-request", json!({"url": "http://x", "method": "GET", "timeoutMs": -5}), "timeoutMs"),
        ];
        for (node_type, params, parameter) in cases {
            let err = NodeParameters::from_definition(&def(node_type, params)).unwrap_err();
            assert_eq!(err.parameter(), parameter, "{}", node_type);
        }
    }

    #[test]
    fn test_loop_mode_requirements() {
        let err = LoopParams::parse(&def("loop", json!({"mode": "times"})).parameters)
            .unwrap_err();
        assert_eq!(err, ParameterError::missing("count"));

        let err = LoopParams::parse(&def("loop", json!({"mode": "times", "count": -1})).parameters)
            .unwrap_err();
        assert_eq!(err.parameter(), "count");

        let err = LoopParams::parse(
            &def("loop", json!({"mode": "times", "count": MAX_LOOP_COUNT + 1})).parameters,
        )
        .unwrap_err();
        assert_eq!(err.parameter(), "count");

        let err = LoopParams::parse(&def("loop", json!({})).parameters).unwrap_err();
        assert_eq!(err, ParameterError::missing("mode"));

        let err = LoopParams::parse(
            &def("loop", json!({"mode": "while", "condition": "index <"})).parameters,
        )
        .unwrap_err();
        assert_eq!(err.parameter(), "condition");

        let ok = LoopParams::parse(
            &def(
                "loop",
                json!({"mode": "forEach", "items": [1, 2], "breakCondition": "item >= 2"}),
            )
            .parameters,
        )
        .unwrap();
        assert_eq!(ok.mode, LoopMode::ForEach);
        assert_eq!(ok.break_condition.as_deref(), Some("item >= 2"));
    }

    #[test]
    fn test_http_method_is_checked() {
        let err = HttpRequestParams::parse(
            &def("http-request", json!({"url": "http://x", "method": "FETCH"})).parameters,
        )
        .unwrap_err();
        assert_eq!(err.parameter(), "method");

        let err = HttpRequestParams::parse(&def("http-request", json!({"method": "GET"})).parameters)
            .unwrap_err();
        assert_eq!(err, ParameterError::missing("url"));

        let ok = HttpRequestParams::parse(
            &def("http-request", json!({"url": "http://x", "method": "post"})).parameters,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_template_requires_replace() {
        let params = json!({"operation": "render", "input": "a", "output": "b", "replacements": {}});
        let err = TemplateParams::parse(&def("template", params).parameters).unwrap_err();
        assert_eq!(err.parameter(), "operation");
    }

    #[test]
    fn test_parallel_workers_must_be_positive() {
        let err = ParallelParams::parse(&def("parallel", json!({"maxWorkers": 0})).parameters)
            .unwrap_err();
        assert_eq!(err.parameter(), "maxWorkers");

        let ok = ParallelParams::parse(
            &def("parallel", json!({"maxWorkers": 2, "errorStrategy": "collectAll"})).parameters,
        )
        .unwrap();
        assert_eq!(ok.error_strategy, ErrorStrategy::CollectAll);
    }

    #[test]
    fn test_shell_program() {
        let parsed = ShellCommandParams::parse(
            &def("shell-command", json!({"command": "echo hello world"})).parameters,
        )
        .unwrap();
        assert_eq!(parsed.program(), "echo");

        let program = |command: &str| {
            ShellCommandParams::parse(&def("shell-command", json!({ "command": command })).parameters)
                .unwrap()
                .program()
                .to_string()
        };
        assert_eq!(program("FOO=1 BAR_2=x make all"), "make");
        assert_eq!(program("cd build && make"), "sh");
        assert_eq!(program("export X=1"), "sh");
        assert_eq!(program("A=1"), "sh");
        assert_eq!(program("./run.sh --fast"), "./run.sh");
        assert_eq!(program("1X=2 ls"), "1X=2");

        let explicit = ShellCommandParams::parse(
            &def("shell-command", json!({"command": "cd", "args": ["/tmp"]})).parameters,
        )
        .unwrap();
        assert_eq!(explicit.program(), "cd");
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let parsed = NodeParameters::from_definition(&def("custom", json!({"x": 1}))).unwrap();
        assert!(matches!(parsed, NodeParameters::Other(p) if p.get("x") == Some(&json!(1))));
    }
}
