//! Query execution with bounded result retention.
//!
//! The service keeps the complete rows of the most recent query (up to a
//! memory limit) so they can be revisited, while handing callers a shorter
//! slice when results feed a size-limited consumer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use neptune_core::{QueryLanguage, ResultStatus, Row, UniformResult};

use crate::error::Result;

/// Default number of rows retained from the last query.
pub const DEFAULT_MAX_RESULTS: usize = 50_000;

/// Retention is never allowed above this many rows.
pub const MEMORY_SAFE_LIMIT: usize = 100_000;

/// Stored row count above which [`MemoryStatus::is_near_limit`] is set.
pub const WARNING_THRESHOLD: usize = 10_000;

pub const DEFAULT_MAX_AI_RESULTS: usize = 10;

/// Anything that can run a query and return normalized rows.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute_query(&self, text: &str, language: QueryLanguage) -> Result<UniformResult>;
}

/// How many rows [`QueryExecutionService::execute`] hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Cut returned rows to `max_ai_results`. Stored rows are unaffected.
    pub for_ai_context: bool,
    pub max_ai_results: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            for_ai_context: true,
            max_ai_results: DEFAULT_MAX_AI_RESULTS,
        }
    }
}

impl ExecuteOptions {
    /// Return every stored row.
    pub fn complete() -> Self {
        Self {
            for_ai_context: false,
            ..Self::default()
        }
    }
}

/// What is known about the most recent query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryMetadata {
    pub query: String,
    pub query_language: QueryLanguage,
    pub timestamp: DateTime<Utc>,
    /// Rows the cluster returned.
    pub total_result_count: usize,
    /// Rows kept in memory.
    pub stored_result_count: usize,
    pub memory_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one [`QueryExecutionService::execute`] call. Failures are
/// reported here with `success: false` instead of as an `Err`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub query: String,
    pub query_language: QueryLanguage,
    pub results: Vec<Row>,
    pub result_count: usize,
    pub returned_count: usize,
    /// Set when either the memory limit or the AI limit removed rows.
    pub truncated: bool,
    pub memory_truncated: bool,
    pub memory_limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultsSummary {
    pub has_results: bool,
    pub result_count: usize,
    pub total_result_count: usize,
    pub memory_truncated: bool,
    pub memory_limit: usize,
    /// Keys of the first stored row.
    pub sample_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_info: Option<QueryMetadata>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryStatus {
    pub current_result_count: usize,
    pub max_results_limit: usize,
    /// Rounded to one decimal place.
    pub usage_percent: f64,
    pub is_near_limit: bool,
    pub is_truncated: bool,
    pub warning_threshold: usize,
}

/// Runs queries through an executor and retains the last result set.
pub struct QueryExecutionService<E> {
    executor: E,
    max_results: usize,
    last_results: Vec<Row>,
    last_query: Option<QueryMetadata>,
    memory_truncated: bool,
}

impl<E: QueryExecutor> QueryExecutionService<E> {
    /// `max_results` is capped at [`MEMORY_SAFE_LIMIT`].
    pub fn new(executor: E, max_results: usize) -> Self {
        Self {
            executor,
            max_results: max_results.min(MEMORY_SAFE_LIMIT),
            last_results: Vec::new(),
            last_query: None,
            memory_truncated: false,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Run `query` and replace the stored result set with its rows.
    pub async fn execute(
        &mut self,
        query: &str,
        language: QueryLanguage,
        options: ExecuteOptions,
    ) -> ExecutionOutcome {
        match self.executor.execute_query(query, language).await {
            Ok(result) => self.record_success(query, language, result, options),
            Err(e) => {
                tracing::warn!(language = %language, error = %e, "Query execution failed");
                self.record_failure(query, language, e.to_string())
            }
        }
    }

    fn record_success(
        &mut self,
        query: &str,
        language: QueryLanguage,
        result: UniformResult,
        options: ExecuteOptions,
    ) -> ExecutionOutcome {
        let UniformResult { mut rows, status, code } = result;
        let total = rows.len();
        let memory_truncated = total > self.max_results;
        if memory_truncated {
            tracing::warn!(
                total,
                limit = self.max_results,
                "Result set exceeds memory limit, keeping the first rows only"
            );
            rows.truncate(self.max_results);
        }

        let ai_truncated = options.for_ai_context && rows.len() > options.max_ai_results;
        let returned: Vec<Row> = if ai_truncated {
            rows[..options.max_ai_results].to_vec()
        } else {
            rows.clone()
        };

        self.last_query = Some(QueryMetadata {
            query: query.to_string(),
            query_language: language,
            timestamp: Utc::now(),
            total_result_count: total,
            stored_result_count: rows.len(),
            memory_truncated,
            execution_status: Some(status),
            execution_code: Some(code),
            error: None,
        });
        self.last_results = rows;
        self.memory_truncated = memory_truncated;

        ExecutionOutcome {
            success: true,
            query: query.to_string(),
            query_language: language,
            result_count: total,
            returned_count: returned.len(),
            results: returned,
            truncated: ai_truncated || memory_truncated,
            memory_truncated,
            memory_limit: self.max_results,
            execution_status: Some(status),
            execution_code: Some(code),
            error: None,
        }
    }

    fn record_failure(&mut self, query: &str, language: QueryLanguage, error: String) -> ExecutionOutcome {
        self.last_results.clear();
        self.memory_truncated = false;
        self.last_query = Some(QueryMetadata {
            query: query.to_string(),
            query_language: language,
            timestamp: Utc::now(),
            total_result_count: 0,
            stored_result_count: 0,
            memory_truncated: false,
            execution_status: None,
            execution_code: None,
            error: Some(error.clone()),
        });

        ExecutionOutcome {
            success: false,
            query: query.to_string(),
            query_language: language,
            results: Vec::new(),
            result_count: 0,
            returned_count: 0,
            truncated: false,
            memory_truncated: false,
            memory_limit: self.max_results,
            execution_status: None,
            execution_code: None,
            error: Some(error),
        }
    }

    /// Every stored row of the last query.
    pub fn last_results(&self) -> &[Row] {
        &self.last_results
    }

    pub fn last_query_info(&self) -> Option<&QueryMetadata> {
        self.last_query.as_ref()
    }

    pub fn results_summary(&self) -> ResultsSummary {
        let Some(first) = self.last_results.first() else {
            return ResultsSummary {
                has_results: false,
                result_count: 0,
                total_result_count: 0,
                memory_truncated: false,
                memory_limit: self.max_results,
                sample_keys: Vec::new(),
                query_info: None,
            };
        };

        let stored = self.last_results.len();
        ResultsSummary {
            has_results: true,
            result_count: stored,
            total_result_count: self
                .last_query
                .as_ref()
                .map_or(stored, |q| q.total_result_count),
            memory_truncated: self.memory_truncated,
            memory_limit: self.max_results,
            sample_keys: first.keys().cloned().collect(),
            query_info: self.last_query.clone(),
        }
    }

    pub fn memory_status(&self) -> MemoryStatus {
        let current = self.last_results.len();
        let usage_percent = if self.max_results > 0 {
            (current as f64 / self.max_results as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        MemoryStatus {
            current_result_count: current,
            max_results_limit: self.max_results,
            usage_percent,
            is_near_limit: current > WARNING_THRESHOLD,
            is_truncated: self.memory_truncated,
            warning_threshold: WARNING_THRESHOLD,
        }
    }

    /// Drop stored rows and metadata.
    pub fn clear_results(&mut self) {
        self.last_results.clear();
        self.last_query = None;
        self.memory_truncated = false;
    }
}
