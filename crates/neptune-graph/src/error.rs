//! Error types for the Neptune graph client.

use std::time::Duration;

use thiserror::Error;

use neptune_core::{CoreError, QueryLanguage};

/// How the retry executor treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The attempt ran out of time.
    Timeout,
    /// The connection could not be established.
    Connection,
    /// Anything else. Never retried.
    Fatal,
}

/// Errors from graph operations.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Neptune client could not be initialized")]
    NotInitialized,

    #[error("Unsupported query language: {0}")]
    UnsupportedProtocol(String),

    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Neptune connection error: {0}")]
    Connection(String),

    #[error("Caller deadline exceeded")]
    DeadlineExceeded,

    #[error("Neptune returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("HTTP session error: {0}")]
    Session(String),

    #[error("Database reset failed: {0}")]
    Reset(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{language} query against {endpoint} failed: {source}")]
    Query {
        language: QueryLanguage,
        endpoint: String,
        query: String,
        #[source]
        source: Box<GraphError>,
    },
}

impl GraphError {
    /// Classify for retry purposes. Context wrappers classify as their cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Query { source, .. } => source.kind(),
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }

    /// The innermost error, past any `Query` context.
    pub fn root_cause(&self) -> &GraphError {
        match self {
            Self::Query { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Attach the query text and endpoint for diagnosis.
    pub fn in_query(self, language: QueryLanguage, endpoint: &str, query: &str) -> Self {
        Self::Query {
            language,
            endpoint: endpoint.to_string(),
            query: query.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not report the budget; the executor's own timer normally fires first.
            GraphError::Timeout {
                timeout: Duration::ZERO,
            }
        } else if e.is_connect() {
            GraphError::Connection(e.to_string())
        } else {
            GraphError::Http(e.to_string())
        }
    }
}

impl From<url::ParseError> for GraphError {
    fn from(e: url::ParseError) -> Self {
        GraphError::Core(CoreError::InvalidEndpoint(e.to_string()))
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Cut a response body down to something that fits in a log line or error message.
pub(crate) fn excerpt(body: &[u8]) -> String {
    const MAX_LEN: usize = 1024;
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_LEN {
        return text.into_owned();
    }
    let mut end = MAX_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
