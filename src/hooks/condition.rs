//! Condition expressions for conditional hooks.
//!
//! `{{name}}` placeholders are replaced with the variable rendered in literal syntax
//! (strings quoted, booleans and numbers bare, missing or null values empty). The
//! rendered text is then `true`, `false`, or truthy when non-empty.

use crate::types::Variables;
use serde_json::Value;

fn render_literal(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::String(s)) => format!("\"{}\"", s),
        Some(other) => other.to_string(),
    }
}

/// Substitute every `{{name}}` placeholder in `expression`
pub fn render(expression: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = after[..end].trim();
        out.push_str(&render_literal(variables.get(name)));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn evaluate(expression: &str, variables: &Variables) -> bool {
    let rendered = render(expression, variables);
    match rendered.trim() {
        "true" => true,
        "false" => false,
        other => !other.is_empty(),
    }
}
