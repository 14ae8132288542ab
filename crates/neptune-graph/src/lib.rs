//! Neptune Graph: signed protocol client for Amazon Neptune.
//!
//! Every SPARQL, openCypher, and Gremlin request leaves through
//! [`NeptuneClient`], which signs it with SigV4, retries transient failures
//! with escalating timeouts, and normalizes the response into a
//! [`neptune_core::UniformResult`]. Cluster resets go through the
//! [`ResetOrchestrator`].

pub mod client;
pub mod credentials;
pub mod error;
pub mod params;
pub mod protocol;
pub mod reset;
pub mod retry;
pub mod service;
pub mod session;
pub mod signing;
pub mod transform;

pub use client::{ConnectionInfo, NeptuneClient};
pub use credentials::{
    ContainerCredentials, CredentialProvider, Credentials, DefaultCredentialsChain,
    EnvironmentCredentials, StaticCredentials,
};
pub use error::{ErrorKind, GraphError, Result};
pub use protocol::Protocol;
pub use reset::{ResetOrchestrator, ResetState, ResetToken, SystemEndpoint};
pub use retry::{execute_with_retry, RetryPolicy, RetryState, TimeoutClass};
pub use service::{ExecuteOptions, ExecutionOutcome, QueryExecutionService, QueryExecutor};
pub use session::TransportSession;
pub use signing::RequestSigner;
pub use transform::RawResponse;
