//! Placeholder resolution for leaf nodes.
//!
//! `{{.name}}` resolves against the data-flow context first (dotted paths
//! such as `item.id` walk into objects), then host variables installed in
//! the extensions, then the process environment.

use std::collections::HashMap;
use std::sync::Arc;

use bento_engine::{extension_keys, template, ExecutionContext, NodeScope};
use serde_json::Value;

/// Text form of a JSON value as it appears in rendered strings
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn lookup_value(context: &ExecutionContext, name: &str) -> Option<Value> {
    let (root, rest) = match name.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (name, None),
    };
    let value = context.get(root)?;
    match rest {
        Some(path) => template::lookup_path(value, path).cloned(),
        None => Some(value.clone()),
    }
}

/// Resolves placeholders for one node invocation
pub(crate) struct Resolver<'a> {
    context: &'a ExecutionContext,
    variables: Option<&'a HashMap<String, String>>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(scope: &'a NodeScope<'_>) -> Self {
        Self {
            context: &*scope.context,
            variables: scope
                .extensions()
                .get::<Arc<HashMap<String, String>>>(extension_keys::VARIABLES)
                .map(|vars| vars.as_ref()),
        }
    }

    pub(crate) fn context(&self) -> &'a ExecutionContext {
        self.context
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = lookup_value(self.context, name) {
            return Some(to_text(&value));
        }
        if let Some(value) = self.variables.and_then(|vars| vars.get(name)) {
            return Some(value.clone());
        }
        std::env::var(name).ok()
    }

    pub(crate) fn render(&self, text: &str) -> String {
        template::render(text, |name| self.lookup(name))
    }

    /// Render `text`, failing if any placeholder stays unresolved
    pub(crate) fn render_strict(&self, parameter: &str, text: &str) -> bento_engine::Result<String> {
        let rendered = self.render(text);
        match template::placeholders(&rendered).first() {
            Some(name) => Err(bento_engine::EngineError::invalid_parameter(
                parameter,
                format!("placeholder '{}' has no value", name),
            )),
            None => Ok(rendered),
        }
    }
}
