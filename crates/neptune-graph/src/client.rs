//! The Neptune client: one cluster endpoint, three query protocols.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;

use neptune_core::{
    CoreError, Endpoint, NeptuneConfig, QueryLanguage, ResetSettings, UniformResult,
};

use crate::credentials::CredentialProvider;
use crate::error::{excerpt, GraphError, Result};
use crate::params::bind_sparql;
use crate::protocol::{self, Protocol};
use crate::reset::{ResetOrchestrator, SystemEndpoint};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::service::QueryExecutor;
use crate::session::TransportSession;
use crate::signing::{RequestSigner, UnsignedRequest};
use crate::transform::RawResponse;

/// Trivial existence check used by [`NeptuneClient::test_connectivity`].
const CONNECTIVITY_QUERY: &str = "ASK { ?s ?p ?o }";

/// Connection details, safe to print.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub endpoint: String,
    pub region: String,
    pub port: u16,
    pub initialized: bool,
    pub sparql_endpoint: String,
}

/// Signed, retrying client for a single Neptune cluster.
///
/// Clone is cheap (inner Arc). Clones share the HTTP session and readiness.
/// Concurrent calls share the pooled `reqwest::Client` and are safe exactly as
/// far as that pool is; there is no operation-level lock.
///
/// Queries and system actions initialize the client on first use, and again
/// after [`close`](Self::close).
#[derive(Clone)]
pub struct NeptuneClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    signer: RequestSigner,
    credentials: Arc<dyn CredentialProvider>,
    session: TransportSession,
    policy: RetryPolicy,
    reset: ResetSettings,
    ready: AtomicBool,
}

impl NeptuneClient {
    /// Build a client that opens and owns its own HTTP session. Nothing is
    /// sent until [`init`](Self::init).
    pub fn new(config: &NeptuneConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::build(config, credentials, TransportSession::new())
    }

    /// Build a client over a caller-owned `reqwest::Client`. [`close`](Self::close)
    /// leaves that client open.
    pub fn with_session(
        config: &NeptuneConfig,
        credentials: Arc<dyn CredentialProvider>,
        http: reqwest::Client,
    ) -> Result<Self> {
        Self::build(config, credentials, TransportSession::borrowed(http))
    }

    fn build(
        config: &NeptuneConfig,
        credentials: Arc<dyn CredentialProvider>,
        session: TransportSession,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;
        Ok(Self {
            inner: Arc::new(Inner {
                signer: RequestSigner::neptune(endpoint.region()),
                endpoint,
                credentials,
                session,
                policy: RetryPolicy::from_settings(&config.retry),
                reset: config.reset.clone(),
                ready: AtomicBool::new(false),
            }),
        })
    }

    /// Build and initialize in one step.
    pub async fn connect(
        config: &NeptuneConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let client = Self::new(config, credentials)?;
        client.init().await?;
        Ok(client)
    }

    /// Open the session and check that credentials resolve.
    ///
    /// On failure any owned session is closed again and the client stays not ready.
    pub async fn init(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let opened = async {
            self.inner.session.acquire().await?;
            self.inner.credentials.credentials().await?;
            Ok::<_, GraphError>(())
        }
        .await;

        match opened {
            Ok(()) => {
                self.inner.ready.store(true, Ordering::SeqCst);
                tracing::info!(
                    endpoint = %self.inner.endpoint,
                    region = self.inner.endpoint.region(),
                    "Connected to Neptune"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.session.close().await;
                self.inner.ready.store(false, Ordering::SeqCst);
                tracing::error!(endpoint = %self.inner.endpoint, error = %e, "Neptune initialization failed");
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let endpoint = &self.inner.endpoint;
        ConnectionInfo {
            endpoint: endpoint.host().to_string(),
            region: endpoint.region().to_string(),
            port: endpoint.port(),
            initialized: self.is_ready(),
            sparql_endpoint: endpoint.query_url(QueryLanguage::Sparql),
        }
    }

    /// Run `text` in `language` and return normalized rows.
    pub async fn execute_query(&self, text: &str, language: QueryLanguage) -> Result<UniformResult> {
        self.execute(Protocol::from(language), text, None).await
    }

    /// Like [`execute_query`](Self::execute_query), but never runs past `deadline`.
    pub async fn execute_query_until(
        &self,
        text: &str,
        language: QueryLanguage,
        deadline: Instant,
    ) -> Result<UniformResult> {
        self.execute(Protocol::from(language), text, Some(deadline))
            .await
    }

    /// Run `text` with the language named by `selector` (`sparql`, `opencypher`, `gremlin`).
    pub async fn execute_selector(&self, text: &str, selector: &str) -> Result<UniformResult> {
        let language: QueryLanguage = selector.parse().map_err(|e| match e {
            CoreError::UnknownLanguage(name) => GraphError::UnsupportedProtocol(name),
            other => GraphError::Core(other),
        })?;
        self.execute_query(text, language).await
    }

    /// SPARQL with optional `$name` parameters.
    pub async fn execute_sparql(
        &self,
        query: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<UniformResult> {
        let query = match params {
            Some(params) if !params.is_empty() => bind_sparql(query, params),
            _ => query.to_string(),
        };
        self.execute(Protocol::Sparql, &query, None).await
    }

    /// openCypher with an optional JSON parameter string.
    pub async fn execute_opencypher(
        &self,
        query: &str,
        parameters: Option<&str>,
    ) -> Result<UniformResult> {
        let protocol = Protocol::OpenCypher {
            parameters: parameters.map(str::to_string),
        };
        self.execute(protocol, query, None).await
    }

    pub async fn execute_gremlin(&self, query: &str) -> Result<UniformResult> {
        self.execute(Protocol::Gremlin, query, None).await
    }

    /// Whether a trivial ASK query comes back as a well-formed result.
    /// Initializes the client first if needed. Never returns an error.
    pub async fn test_connectivity(&self) -> bool {
        if let Err(e) = self.init().await {
            tracing::warn!(error = %e, "Connectivity check could not initialize");
            return false;
        }
        match self.execute_query(CONNECTIVITY_QUERY, QueryLanguage::Sparql).await {
            Ok(result) => result.is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "Connectivity check failed");
                false
            }
        }
    }

    /// Erase every graph in the cluster. `Ok(false)` if the cluster declined.
    pub async fn reset_database(&self) -> Result<bool> {
        self.ensure_ready().await?;
        self.reset_orchestrator().fast_reset().await
    }

    /// Step through the reset protocol manually.
    pub fn reset_orchestrator(&self) -> ResetOrchestrator<'_, Self> {
        ResetOrchestrator::new(self, &self.inner.reset)
    }

    /// Close an owned session. A borrowed session is left to its owner.
    pub async fn close(&self) {
        let was_ready = self.inner.ready.swap(false, Ordering::SeqCst);
        let closed = self.inner.session.close().await;
        if was_ready {
            tracing::info!(endpoint = %self.inner.endpoint, session_closed = closed, "Neptune client closed");
        }
    }

    /// Initialize on demand. The cause of a failed init is logged by `init`.
    async fn ensure_ready(&self) -> Result<()> {
        self.init().await.map_err(|_| GraphError::NotInitialized)
    }

    async fn execute(
        &self,
        protocol: Protocol,
        query: &str,
        deadline: Option<Instant>,
    ) -> Result<UniformResult> {
        self.ensure_ready().await?;

        let language = protocol.language();
        let endpoint = self.inner.endpoint.to_string();
        let request_id = uuid::Uuid::new_v4();

        let run = async {
            let prepared = protocol.build_request(query)?;
            let url = Url::parse(&self.inner.endpoint.query_url(language))?;
            tracing::debug!(
                content_type = prepared.content_type,
                timeout_class = ?prepared.timeout_class,
                "Submitting query"
            );

            let (url, content_type, body) = (&url, prepared.content_type, prepared.body.as_slice());
            let raw = execute_with_retry(
                &self.inner.policy,
                prepared.timeout_class,
                deadline,
                move |_state| self.send(url, content_type, body),
            )
            .await?;

            let result = protocol.transform_response(&raw)?;
            tracing::debug!(rows = result.len(), code = result.code, "Query complete");
            Ok::<_, GraphError>(result)
        };

        run.instrument(tracing::debug_span!(
            "neptune_query",
            %request_id,
            language = %language,
            endpoint = %endpoint
        ))
        .await
        .map_err(|e| e.in_query(language, &endpoint, query))
    }

    /// One signed POST. Credentials are fetched fresh for every attempt.
    async fn send(&self, url: &Url, content_type: &str, body: &[u8]) -> Result<RawResponse> {
        let http = self.inner.session.acquire().await?;
        let credentials = self.inner.credentials.credentials().await?;
        let signed = self.inner.signer.sign(
            UnsignedRequest::post(url.clone(), content_type, body.to_vec()),
            &credentials,
        )?;

        let response = http
            .request(signed.method, signed.url)
            .headers(signed.headers)
            .body(signed.body)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %excerpt(&body), "Neptune rejected request");
            return Err(GraphError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        Ok(RawResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[async_trait]
impl SystemEndpoint for NeptuneClient {
    async fn post_action(&self, body: Value, timeout: Duration) -> Result<Value> {
        self.ensure_ready().await?;
        let url = Url::parse(&self.inner.endpoint.system_url())?;
        let payload = serde_json::to_vec(&body)?;

        let raw = tokio::time::timeout(timeout, self.send(&url, protocol::JSON, &payload))
            .await
            .map_err(|_| GraphError::Timeout { timeout })??;

        serde_json::from_slice(&raw.body).map_err(|e| {
            GraphError::InvalidResponse(format!(
                "system endpoint returned non-JSON ({e}): {}",
                excerpt(&raw.body)
            ))
        })
    }
}

#[async_trait]
impl QueryExecutor for NeptuneClient {
    async fn execute_query(&self, text: &str, language: QueryLanguage) -> Result<UniformResult> {
        NeptuneClient::execute_query(self, text, language).await
    }
}

impl std::fmt::Debug for NeptuneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeptuneClient")
            .field("endpoint", &self.inner.endpoint)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, StaticCredentials};

    fn config() -> NeptuneConfig {
        NeptuneConfig::new("db.cluster.neptune.amazonaws.com", "us-east-1")
    }

    fn creds() -> Arc<dyn CredentialProvider> {
        Arc::new(StaticCredentials::new(Credentials::new("AKID", "secret", None)))
    }

    struct NoCredentials;

    #[async_trait]
    impl CredentialProvider for NoCredentials {
        async fn credentials(&self) -> Result<Credentials> {
            Err(GraphError::Credentials("none configured".into()))
        }
    }

    fn assert_shareable<T: Clone + Send + Sync + 'static>() {}

    #[test]
    fn client_is_shareable_across_tasks() {
        assert_shareable::<NeptuneClient>();
    }

    #[test]
    fn connection_info_reports_sparql_endpoint() {
        let client = NeptuneClient::new(&config(), creds()).unwrap();
        let info = client.connection_info();
        assert_eq!(info.endpoint, "db.cluster.neptune.amazonaws.com");
        assert_eq!(info.region, "us-east-1");
        assert_eq!(info.port, 8182);
        assert!(!info.initialized);
        assert_eq!(
            info.sparql_endpoint,
            "https://db.cluster.neptune.amazonaws.com:8182/sparql"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected_at_construction() {
        let config = NeptuneConfig::new("https://db.example.com", "us-east-1");
        let err = NeptuneClient::new(&config, creds()).unwrap_err();
        assert!(matches!(err, GraphError::Core(CoreError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn queries_fail_when_init_cannot_complete() {
        let client = NeptuneClient::new(&config(), Arc::new(NoCredentials)).unwrap();
        let err = client
            .execute_query("ASK { ?s ?p ?o }", QueryLanguage::Sparql)
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), GraphError::NotInitialized));

        let err = client.reset_database().await.unwrap_err();
        assert!(matches!(err, GraphError::NotInitialized));
        assert!(!client.is_ready());
        assert!(!client.inner.session.is_open().await);
    }

    #[tokio::test]
    async fn closed_client_reinitializes_on_demand() {
        let client = NeptuneClient::new(&config(), creds()).unwrap();
        client.ensure_ready().await.unwrap();
        assert!(client.is_ready());

        client.close().await;
        assert!(!client.is_ready());
        assert!(!client.inner.session.is_open().await);

        client.ensure_ready().await.unwrap();
        assert!(client.is_ready());
        assert!(client.inner.session.is_open().await);
    }

    #[tokio::test]
    async fn unknown_selector_is_unsupported() {
        let client = NeptuneClient::new(&config(), creds()).unwrap();
        let err = client.execute_selector("SELECT 1", "sql").await.unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedProtocol(name) if name == "sql"));
    }

    #[tokio::test]
    async fn failed_init_leaves_client_not_ready() {
        let client = NeptuneClient::new(&config(), Arc::new(NoCredentials)).unwrap();
        assert!(matches!(client.init().await, Err(GraphError::Credentials(_))));
        assert!(!client.is_ready());
        assert!(!client.inner.session.is_open().await);
        assert!(!client.test_connectivity().await);
    }

    #[tokio::test]
    async fn borrowed_session_survives_close() {
        let client =
            NeptuneClient::with_session(&config(), creds(), reqwest::Client::new()).unwrap();
        client.init().await.unwrap();
        assert!(client.is_ready());

        client.close().await;
        client.close().await;
        assert!(!client.is_ready());
        assert!(client.inner.session.is_open().await);
    }
}
