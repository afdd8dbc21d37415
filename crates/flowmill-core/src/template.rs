// Template resolution and condition evaluation
//
// Placeholders have the form `{{ node_id.output_key }}` and are substituted
// from prior node outputs before dispatch. Placeholders with missing bindings
// are left literally intact so downstream handlers can validate them.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\.(\w+)\s*\}\}").expect("valid placeholder regex"));

/// Variable substitution over node outputs
pub struct TemplateResolver;

impl TemplateResolver {
    /// Substitute every placeholder whose `(node_id, output_key)` binding
    /// exists in `outputs`; unresolved placeholders are preserved verbatim.
    pub fn resolve(text: &str, outputs: &HashMap<String, Value>) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| {
                let node_id = &caps[1];
                let output_key = &caps[2];
                match outputs
                    .get(node_id)
                    .and_then(|o| o.as_object())
                    .and_then(|o| o.get(output_key))
                {
                    Some(value) => render(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Recursively resolve templates within a config tree: strings are
    /// resolved, objects and arrays recursed into, other values passed
    /// through unchanged.
    pub fn resolve_config(config: &Value, outputs: &HashMap<String, Value>) -> Value {
        match config {
            Value::String(s) => Value::String(Self::resolve(s, outputs)),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve_config(v, outputs)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items.iter().map(|v| Self::resolve_config(v, outputs)).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Evaluate a branch condition against resolved outputs.
    ///
    /// Empty or absent conditions are true. `==`/`!=` compare both sides as
    /// strings after trimming quotes and whitespace. Otherwise the resolved
    /// text coerces: true/1/yes and false/0/no, any other non-empty string is
    /// truthy.
    pub fn evaluate_condition(condition: Option<&str>, outputs: &HashMap<String, Value>) -> bool {
        let condition = match condition {
            Some(c) if !c.is_empty() => c,
            _ => return true,
        };

        let resolved = Self::resolve(condition, outputs);
        let resolved = resolved.trim();

        if resolved.contains("==") {
            let mut parts = resolved.split("==");
            let left = parts.next().unwrap_or_default();
            let right = parts.next().unwrap_or_default();
            return strip_quotes(left) == strip_quotes(right);
        }
        if resolved.contains("!=") {
            let mut parts = resolved.split("!=");
            let left = parts.next().unwrap_or_default();
            let right = parts.next().unwrap_or_default();
            return strip_quotes(left) != strip_quotes(right);
        }

        match resolved.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => !other.is_empty(),
        }
    }
}

/// Render an output value into template text. Strings substitute bare (no
/// surrounding quotes); every other value uses its JSON serialization.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\'' || c == '"' || c == ' ')
}
