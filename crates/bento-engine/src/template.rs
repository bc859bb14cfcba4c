//! `{{.NAME}}` placeholder scanning and substitution.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").ok())
        .as_ref()
}

/// Whether `text` still contains unresolved template syntax
pub fn has_template(text: &str) -> bool {
    text.contains("{{")
}

/// Names referenced by `{{.NAME}}` placeholders, in order of appearance
pub fn placeholders(text: &str) -> Vec<&str> {
    let Some(re) = pattern() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Loop variables that are bound at run time rather than by the environment
pub fn is_loop_variable(name: &str) -> bool {
    name == "item" || name == "index" || name.starts_with("item.")
}

/// Replace each placeholder with `lookup(name)`; unresolved ones are left as-is
pub fn render(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let Some(re) = pattern() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Look up a dotted path such as `item.name` in a JSON object
pub fn lookup_path<'v>(root: &'v serde_json::Value, path: &str) -> Option<&'v serde_json::Value> {
    path.split('.').try_fold(root, |value, segment| match value {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
