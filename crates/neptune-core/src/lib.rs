//! neptune-core: Shared types, configuration, and error handling for the Neptune query client.
//!
//! This crate provides the foundational types used across all Neptune components:
//! - Query languages and the cluster endpoint they are served from
//! - The uniform row-oriented result shape every protocol is normalized into
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::{NeptuneConfig, ResetSettings, RetrySettings};
pub use error::CoreError;
pub use types::{Endpoint, QueryLanguage, ResultStatus, Row, UniformResult};
