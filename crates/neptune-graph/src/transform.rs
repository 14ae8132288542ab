//! Normalization of protocol-specific payloads into [`UniformResult`].
//!
//! Each protocol's response is decoded into a small sum type over the shapes
//! the cluster actually returns, with an opaque passthrough for anything
//! else. Parseable input never fails here: unknown shapes degrade into a
//! single row carrying the untransformed payload.

use serde::Deserialize;
use serde_json::{Map, Value};

use neptune_core::{Row, UniformResult};

use crate::error::{excerpt, GraphError, Result};

/// A response as it came off the wire. Consumed immediately by a transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// Whether the declared content type is any JSON flavour.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_lowercase().contains("json"))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| {
            GraphError::InvalidResponse(format!(
                "expected JSON ({e}), got: {}",
                excerpt(&self.body)
            ))
        })
    }
}

/// Wrap any JSON value as one row: objects as-is, everything else under `value`.
fn passthrough_row(value: &Value) -> Row {
    match value {
        Value::Object(map) => map.clone(),
        other => single("value", other.clone()),
    }
}

fn single(key: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(key.to_string(), value);
    row
}

// ── SPARQL ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SparqlResponse {
    /// `SELECT` / `CONSTRUCT` results.
    Bindings { results: BindingSet },
    /// `ASK` result.
    Boolean { boolean: bool },
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct BindingSet {
    bindings: Vec<Map<String, Value>>,
}

/// Normalize a SPARQL endpoint response.
///
/// Non-JSON responses are updates: an empty `200` is a bare success, any
/// other status becomes a single error row with the response text.
pub fn sparql(raw: &RawResponse) -> Result<UniformResult> {
    if !raw.is_json() {
        if raw.status == 200 {
            return Ok(UniformResult::status_only(200));
        }
        return Ok(UniformResult::error_row(raw.status, &raw.text()));
    }

    let value = raw.json()?;
    let rows = match serde_json::from_value::<SparqlResponse>(value)? {
        SparqlResponse::Bindings { results } => results
            .bindings
            .into_iter()
            .map(|binding| {
                binding
                    .into_iter()
                    .map(|(var, bound)| {
                        // Keep the literal or IRI, drop type/datatype/xml:lang.
                        let value = bound.get("value").cloned().unwrap_or(Value::Null);
                        (var, value)
                    })
                    .collect::<Row>()
            })
            .collect(),
        SparqlResponse::Boolean { boolean } => vec![single("boolean", Value::Bool(boolean))],
        SparqlResponse::Other(other) => vec![passthrough_row(&other)],
    };
    Ok(UniformResult::with_rows(rows))
}

// ── openCypher ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CypherResponse {
    Rows { results: Vec<Value> },
    Other(Value),
}

/// openCypher responses are already row-oriented and pass through unchanged.
pub fn opencypher(raw: &RawResponse) -> Result<UniformResult> {
    let rows = match serde_json::from_value::<CypherResponse>(raw.json()?)? {
        CypherResponse::Rows { results } => results.iter().map(passthrough_row).collect(),
        CypherResponse::Other(other) => vec![passthrough_row(&other)],
    };
    Ok(UniformResult::with_rows(rows))
}

// ── Gremlin ──────────────────────────────────────────────────────

/// One element of a Gremlin result list.
enum GremlinItem<'a> {
    Vertex(&'a Value),
    Edge(&'a Value),
    /// Any other `{"@type", "@value"}` pair; holds the `@value`.
    Typed(&'a Value),
    Plain(&'a Map<String, Value>),
    Scalar(&'a Value),
}

impl<'a> GremlinItem<'a> {
    fn classify(item: &'a Value) -> Self {
        let Value::Object(map) = item else {
            return Self::Scalar(item);
        };
        match (map.get("@type").and_then(Value::as_str), map.get("@value")) {
            (Some("g:Vertex"), Some(inner)) => Self::Vertex(inner),
            (Some("g:Edge"), Some(inner)) => Self::Edge(inner),
            (Some(_), Some(inner)) => Self::Typed(inner),
            _ => Self::Plain(map),
        }
    }

    fn into_row(self) -> std::result::Result<Row, String> {
        match self {
            Self::Vertex(inner) => vertex_row(inner),
            Self::Edge(inner) => edge_row(inner),
            Self::Typed(inner) => Ok(single("value", inner.clone())),
            Self::Plain(map) => Ok(map.clone()),
            Self::Scalar(value) => Ok(single("value", value.clone())),
        }
    }
}

/// Normalize a Gremlin HTTP response.
///
/// If the response cannot be flattened, the whole payload is returned as a
/// single row instead of being dropped.
pub fn gremlin(raw: &RawResponse) -> Result<UniformResult> {
    let value = raw.json()?;
    let rows = match gremlin_rows(&value) {
        Ok(rows) => rows,
        Err(reason) => {
            tracing::warn!(reason = %reason, "Failed to transform Gremlin results, returning raw payload");
            vec![passthrough_row(&value)]
        }
    };
    Ok(UniformResult::with_rows(rows))
}

fn gremlin_rows(response: &Value) -> std::result::Result<Vec<Row>, String> {
    let Some(result) = response.get("result") else {
        return Ok(vec![passthrough_row(response)]);
    };

    let items: Vec<&Value> = match result {
        Value::Object(map) if map.contains_key("data") => list_items(&map["data"]),
        other => list_items(other),
    };

    items
        .into_iter()
        .map(|item| GremlinItem::classify(item).into_row())
        .collect()
}

/// `[...]`, `{"@type": "g:List", "@value": [...]}`, `null`, or a lone value.
fn list_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if map.get("@type").and_then(Value::as_str) == Some("g:List") => {
            match map.get("@value") {
                Some(Value::Array(items)) => items.iter().collect(),
                _ => vec![value],
            }
        }
        other => vec![other],
    }
}

fn vertex_row(inner: &Value) -> std::result::Result<Row, String> {
    let vertex = inner
        .as_object()
        .ok_or_else(|| format!("g:Vertex value is not an object: {inner}"))?;

    let mut row = Row::new();
    row.insert("id".into(), field(vertex, "id"));
    row.insert("label".into(), field(vertex, "label"));
    row.insert("type".into(), "vertex".into());

    if let Some(props) = vertex.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| format!("g:Vertex properties are not an object: {props}"))?;
        for (name, values) in props {
            row.insert(name.clone(), first_value(values));
        }
    }
    Ok(row)
}

fn edge_row(inner: &Value) -> std::result::Result<Row, String> {
    let edge = inner
        .as_object()
        .ok_or_else(|| format!("g:Edge value is not an object: {inner}"))?;

    let mut row = Row::new();
    row.insert("id".into(), field(edge, "id"));
    row.insert("label".into(), field(edge, "label"));
    row.insert("type".into(), "edge".into());
    row.insert("inV".into(), field(edge, "inV"));
    row.insert("outV".into(), field(edge, "outV"));

    if let Some(props) = edge.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| format!("g:Edge properties are not an object: {props}"))?;
        for (name, value) in props {
            row.insert(name.clone(), edge_property(value));
        }
    }
    Ok(row)
}

fn field(map: &Map<String, Value>, key: &str) -> Value {
    map.get(key).map(scalar).unwrap_or(Value::Null)
}

/// A vertex property's first bound value. Later values of a multi-valued
/// property are dropped.
fn first_value(values: &Value) -> Value {
    match values {
        Value::Array(list) if !list.is_empty() => bound_value(&list[0]),
        other => other.clone(),
    }
}

/// `{"@type": "g:VertexProperty", "@value": {"value": ..}}`, `{"value": ..}`, or a bare value.
fn bound_value(property: &Value) -> Value {
    if let Some(Value::Object(inner)) = property.get("@value") {
        return inner.get("value").map(scalar).unwrap_or(Value::Null);
    }
    if let Some(value) = property.get("value") {
        return scalar(value);
    }
    scalar(property)
}

/// `{"@type": "g:Property", "@value": {"key": .., "value": ..}}` or a bare value.
fn edge_property(property: &Value) -> Value {
    match property.get("@value") {
        Some(Value::Object(inner)) if inner.contains_key("value") => scalar(&inner["value"]),
        _ => scalar(property),
    }
}

/// Unwrap typed scalars such as `{"@type": "g:Int64", "@value": 7}`.
fn scalar(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.contains_key("@type") => match map.get("@value") {
            Some(inner) if !inner.is_object() && !inner.is_array() => inner.clone(),
            _ => value.clone(),
        },
        other => other.clone(),
    }
}
