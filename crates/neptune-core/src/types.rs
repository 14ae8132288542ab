//! Core domain types shared by the Neptune client and its consumers.
//!
//! Every protocol response is normalized into a [`UniformResult`] before it
//! leaves the client, so nothing downstream needs to know which query
//! language produced a row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Query Languages ───────────────────────────────────────────────

/// Query languages served by a Neptune cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    Sparql,
    OpenCypher,
    Gremlin,
}

impl QueryLanguage {
    pub const ALL: [QueryLanguage; 3] = [Self::Sparql, Self::OpenCypher, Self::Gremlin];

    /// Lowercase identifier, also the HTTP path segment on the cluster.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sparql => "sparql",
            Self::OpenCypher => "opencypher",
            Self::Gremlin => "gremlin",
        }
    }

    /// Uppercase name for display.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sparql => "SPARQL",
            Self::OpenCypher => "OPENCYPHER",
            Self::Gremlin => "GREMLIN",
        }
    }
}

impl fmt::Display for QueryLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryLanguage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == lower)
            .ok_or_else(|| CoreError::UnknownLanguage(s.to_string()))
    }
}

// ── Endpoint ──────────────────────────────────────────────────────

/// The cluster endpoint a client talks to. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    region: String,
    tls: bool,
}

impl Endpoint {
    /// Create an HTTPS endpoint. `host` is a bare hostname, without scheme or port.
    pub fn new(host: &str, port: u16, region: &str) -> Result<Self, CoreError> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(CoreError::InvalidEndpoint("host is empty".to_string()));
        }
        if host.contains("://") || host.contains('/') {
            return Err(CoreError::InvalidEndpoint(format!(
                "expected a bare hostname, got {host}"
            )));
        }
        if region.trim().is_empty() {
            return Err(CoreError::InvalidEndpoint("region is empty".to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            region: region.trim().to_string(),
            tls: true,
        })
    }

    /// Switch between `https` (default) and plain `http`.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    /// `scheme://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// URL of the query endpoint for a language.
    pub fn query_url(&self, language: QueryLanguage) -> String {
        format!("{}/{}", self.base_url(), language.as_str())
    }

    /// URL of the system (administrative) endpoint.
    pub fn system_url(&self) -> String {
        format!("{}/system", self.base_url())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Uniform Results ───────────────────────────────────────────────

/// One flat result record. Keys keep the order the transformer produced.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome marker carried alongside the rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// The only result shape exposed past the client boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniformResult {
    pub rows: Vec<Row>,
    pub status: ResultStatus,
    pub code: u16,
}

impl UniformResult {
    /// Successful result carrying data rows.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            status: ResultStatus::Success,
            code: 200,
        }
    }

    /// Successful result with no data rows, e.g. an update that returned an empty body.
    pub fn status_only(code: u16) -> Self {
        Self {
            rows: Vec::new(),
            status: ResultStatus::Success,
            code,
        }
    }

    /// A single diagnostic row describing a response that could not be read as data.
    pub fn error_row(code: u16, message: &str) -> Self {
        let mut row = Row::new();
        row.insert("status".to_string(), "error".into());
        row.insert("code".to_string(), code.into());
        row.insert("message".to_string(), message.into());
        Self {
            rows: vec![row],
            status: ResultStatus::Error,
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
