//! Per-language request construction and response dispatch.
//!
//! Each query language is one variant of [`Protocol`]. A variant knows its
//! path on the cluster, how its body and content type are built, how long a
//! request may run, and which transformer reads its responses.

use serde_json::json;

use neptune_core::{QueryLanguage, UniformResult};

use crate::error::Result;
use crate::retry::TimeoutClass;
use crate::transform::{self, RawResponse};

pub const SPARQL_QUERY: &str = "application/sparql-query";
pub const SPARQL_UPDATE: &str = "application/sparql-update";
pub const JSON: &str = "application/json";

/// Tokens that turn a SPARQL body into an update payload.
const SPARQL_UPDATE_TOKENS: [&str; 6] = ["INSERT", "DELETE", "CLEAR", "CREATE", "DROP", "LOAD"];

/// Tokens that give a SPARQL request the extended timeout budget.
const SPARQL_EXTENDED_TOKENS: [&str; 2] = ["DELETE", "CLEAR"];

/// A query protocol together with its per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Sparql,
    OpenCypher {
        /// JSON-encoded parameter map forwarded verbatim.
        parameters: Option<String>,
    },
    Gremlin,
}

/// Everything needed to sign and send one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub language: QueryLanguage,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub timeout_class: TimeoutClass,
}

impl Protocol {
    pub fn language(&self) -> QueryLanguage {
        match self {
            Self::Sparql => QueryLanguage::Sparql,
            Self::OpenCypher { .. } => QueryLanguage::OpenCypher,
            Self::Gremlin => QueryLanguage::Gremlin,
        }
    }

    /// Content type for `query` under this protocol.
    pub fn classify_content_type(&self, query: &str) -> &'static str {
        match self {
            Self::Sparql if contains_any(query, &SPARQL_UPDATE_TOKENS) => SPARQL_UPDATE,
            Self::Sparql => SPARQL_QUERY,
            Self::OpenCypher { .. } | Self::Gremlin => JSON,
        }
    }

    /// Timeout budget class for `query` under this protocol.
    pub fn classify_timeout(&self, query: &str) -> TimeoutClass {
        match self {
            Self::Sparql if contains_any(query, &SPARQL_EXTENDED_TOKENS) => TimeoutClass::Extended,
            _ => TimeoutClass::Standard,
        }
    }

    /// Build the request body and metadata for `query`.
    pub fn build_request(&self, query: &str) -> Result<PreparedRequest> {
        let body = match self {
            Self::Sparql => query.as_bytes().to_vec(),
            Self::OpenCypher { parameters } => {
                let mut body = json!({ "query": query });
                if let Some(params) = parameters {
                    body["parameters"] = json!(params);
                }
                serde_json::to_vec(&body)?
            }
            Self::Gremlin => serde_json::to_vec(&json!({ "gremlin": query }))?,
        };

        Ok(PreparedRequest {
            language: self.language(),
            content_type: self.classify_content_type(query),
            body,
            timeout_class: self.classify_timeout(query),
        })
    }

    /// Normalize a raw response from this protocol's endpoint.
    pub fn transform_response(&self, raw: &RawResponse) -> Result<UniformResult> {
        match self {
            Self::Sparql => transform::sparql(raw),
            Self::OpenCypher { .. } => transform::opencypher(raw),
            Self::Gremlin => transform::gremlin(raw),
        }
    }
}

impl From<QueryLanguage> for Protocol {
    fn from(language: QueryLanguage) -> Self {
        match language {
            QueryLanguage::Sparql => Self::Sparql,
            QueryLanguage::OpenCypher => Self::OpenCypher { parameters: None },
            QueryLanguage::Gremlin => Self::Gremlin,
        }
    }
}

/// Case-insensitive substring scan.
fn contains_any(query: &str, tokens: &[&str]) -> bool {
    let upper = query.to_uppercase();
    tokens.iter().any(|token| upper.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparql_select_is_a_query() {
        let p = Protocol::Sparql;
        assert_eq!(
            p.classify_content_type("SELECT ?s WHERE { ?s ?p ?o } LIMIT 10"),
            SPARQL_QUERY
        );
        assert_eq!(p.classify_content_type("ASK { ?s ?p ?o }"), SPARQL_QUERY);
    }

    #[test]
    fn sparql_mutations_are_updates_case_insensitively() {
        let p = Protocol::Sparql;
        for q in [
            "insert data { <a> <b> <c> }",
            "DELETE WHERE { ?s ?p ?o }",
            "Clear all",
            "CREATE GRAPH <g>",
            "drop graph <g>",
            "LOAD <http://example.com/data.ttl>",
        ] {
            assert_eq!(p.classify_content_type(q), SPARQL_UPDATE, "{q}");
        }
    }

    #[test]
    fn only_delete_and_clear_get_extended_timeouts() {
        let p = Protocol::Sparql;
        assert_eq!(p.classify_timeout("DELETE WHERE { ?s ?p ?o }"), TimeoutClass::Extended);
        assert_eq!(p.classify_timeout("clear default"), TimeoutClass::Extended);
        assert_eq!(p.classify_timeout("INSERT DATA { <a> <b> <c> }"), TimeoutClass::Standard);
        assert_eq!(p.classify_timeout("SELECT * { ?s ?p ?o }"), TimeoutClass::Standard);

        let cypher = Protocol::OpenCypher { parameters: None };
        assert_eq!(cypher.classify_timeout("MATCH (n) DELETE n"), TimeoutClass::Standard);
        assert_eq!(Protocol::Gremlin.classify_timeout("g.V().drop()"), TimeoutClass::Standard);
    }

    #[test]
    fn sparql_body_is_raw_text() {
        let req = Protocol::Sparql.build_request("ASK { ?s ?p ?o }").unwrap();
        assert_eq!(req.body, b"ASK { ?s ?p ?o }");
        assert_eq!(req.content_type, SPARQL_QUERY);
        assert_eq!(req.language, QueryLanguage::Sparql);
    }

    #[test]
    fn opencypher_body_is_json_with_optional_parameters() {
        let plain = Protocol::OpenCypher { parameters: None }
            .build_request("MATCH (n) RETURN n LIMIT 1")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&plain.body).unwrap();
        assert_eq!(body, json!({ "query": "MATCH (n) RETURN n LIMIT 1" }));
        assert_eq!(plain.content_type, JSON);

        let with_params = Protocol::OpenCypher {
            parameters: Some(r#"{"name":"Alice"}"#.to_string()),
        }
        .build_request("MATCH (n {name: $name}) RETURN n")
        .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&with_params.body).unwrap();
        assert_eq!(body["parameters"], r#"{"name":"Alice"}"#);
    }

    #[test]
    fn gremlin_body_is_json() {
        let req = Protocol::Gremlin.build_request("g.V().limit(1)").unwrap();
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body, json!({ "gremlin": "g.V().limit(1)" }));
        assert_eq!(req.content_type, JSON);
        assert_eq!(req.timeout_class, TimeoutClass::Standard);
    }
}
