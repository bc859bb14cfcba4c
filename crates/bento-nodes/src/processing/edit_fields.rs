//! Edit Fields Node
//!
//! Sets static or templated values. Values come from the definition's
//! `fields` block (or a `fields` parameter). A string that is exactly one
//! placeholder, such as `"{{.item.tags}}"`, takes the referenced value with
//! its JSON type; any other string is rendered as text. Arrays and objects
//! are resolved element by element.
//!
//! With `keepOnlySet` the data-flow context is emptied first, so only the
//! fields set here remain.

use async_trait::async_trait;
use bento_engine::params::EditFieldsParams;
use bento_engine::{template, NodeExecutor, NodeScope, Outputs, Parameters, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::vars::{lookup_value, Resolver};

#[derive(Debug, Default)]
pub struct EditFieldsExecutor;

#[async_trait]
impl NodeExecutor for EditFieldsExecutor {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = EditFieldsParams::from_definition(scope.node)?;

        let outputs: Outputs = {
            let resolver = Resolver::new(scope);
            params
                .values
                .iter()
                .map(|(key, value)| (key.clone(), resolve(value, &resolver)))
                .collect()
        };

        if params.keep_only_set {
            log::debug!(
                "EditFields {}: keeping only {} set field(s)",
                scope.node.id,
                outputs.len()
            );
            scope.context.clear();
        }
        Ok(outputs)
    }
}

fn resolve(value: &Value, resolver: &Resolver<'_>) -> Value {
    match value {
        Value::String(text) => resolve_text(text, resolver),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, resolver)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, resolver)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_text(text: &str, resolver: &Resolver<'_>) -> Value {
    if !template::has_template(text) {
        return Value::String(text.to_string());
    }
    if let [name] = template::placeholders(text).as_slice() {
        let bare = template::render(text, |_| Some(String::new()));
        if bare.trim().is_empty() {
            if let Some(value) = lookup_value(resolver.context(), name) {
                return value;
            }
        }
    }
    Value::String(resolver.render(text))
}
