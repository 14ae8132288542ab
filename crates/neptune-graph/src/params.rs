//! `$name` placeholder substitution for SPARQL text.
//!
//! SPARQL over HTTP has no parameter channel, so values are rendered as
//! literals and spliced into the query before it is signed.

use serde_json::{Map, Value};

/// Replace every `$name` in `query` with the rendered value of `params[name]`.
///
/// Names are substituted longest first so `$id` never rewrites the prefix of `$id2`.
pub fn bind_sparql(query: &str, params: &Map<String, Value>) -> String {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    names.into_iter().fold(query.to_string(), |text, name| {
        text.replace(&format!("${name}"), &render(&params[name.as_str()]))
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "\"\"".to_string(),
        Value::String(s) => quote(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => quote(s),
                    other => other.to_string(),
                })
                .collect();
            format!("({})", rendered.join(", "))
        }
        Value::Object(_) => quote(&value.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}
