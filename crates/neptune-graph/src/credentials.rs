//! AWS credential snapshots and the providers that produce them.
//!
//! Providers are asked for a fresh snapshot on every signed request; nothing
//! here caches, so rotated session tokens are picked up immediately.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{GraphError, Result};

/// Frozen (access key, secret key, session token) triple used to sign one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: &str, secret_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// Source of credential snapshots.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a snapshot for signing one request.
    async fn credentials(&self) -> Result<Credentials>;
}

// ── Static ───────────────────────────────────────────────────────

/// Fixed credentials, for tests and explicitly configured keys.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

// ── Environment ──────────────────────────────────────────────────

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCredentials;

#[async_trait]
impl CredentialProvider for EnvironmentCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        let access_key = non_empty_var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| GraphError::Credentials("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_key = non_empty_var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| GraphError::Credentials("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        Ok(Credentials {
            access_key,
            secret_key,
            session_token: non_empty_var("AWS_SESSION_TOKEN"),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Container ────────────────────────────────────────────────────

const CONTAINER_HOST: &str = "http://169.254.170.2";
const CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials served by the ECS/EKS container credentials endpoint.
#[derive(Debug, Clone)]
pub struct ContainerCredentials {
    uri: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentialsResponse {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
}

impl ContainerCredentials {
    /// Use an explicit credentials URI. Lookups give up after 5s.
    pub fn with_uri(uri: &str, auth_token: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CONTAINER_TIMEOUT)
            .build()
            .map_err(|e| GraphError::Credentials(format!("container HTTP client: {e}")))?;
        Ok(Self {
            uri: uri.to_string(),
            auth_token: auth_token.map(str::to_string),
            http,
        })
    }

    /// Discover the endpoint from `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or
    /// `AWS_CONTAINER_CREDENTIALS_FULL_URI`. `Ok(None)` outside a container.
    pub fn from_env() -> Result<Option<Self>> {
        let auth_token = non_empty_var("AWS_CONTAINER_AUTHORIZATION_TOKEN");
        let uri = match non_empty_var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
            Some(relative) => format!("{CONTAINER_HOST}{relative}"),
            None => match non_empty_var("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
                Some(full) => full,
                None => return Ok(None),
            },
        };
        Self::with_uri(&uri, auth_token.as_deref()).map(Some)
    }
}

#[async_trait]
impl CredentialProvider for ContainerCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        let mut request = self.http.get(&self.uri);
        if let Some(token) = &self.auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GraphError::Credentials(format!("container endpoint: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::Credentials(format!(
                "container endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: ContainerCredentialsResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Credentials(format!("container endpoint: {e}")))?;
        Ok(Credentials {
            access_key: body.access_key_id,
            secret_key: body.secret_access_key,
            session_token: body.token,
        })
    }
}

// ── Default chain ────────────────────────────────────────────────

/// Environment variables first, then the container endpoint.
#[derive(Debug, Clone)]
pub struct DefaultCredentialsChain {
    container: Option<ContainerCredentials>,
}

impl DefaultCredentialsChain {
    /// Look up the container endpoint once, at construction.
    pub fn new() -> Self {
        let container = ContainerCredentials::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Container credentials endpoint unusable");
            None
        });
        Self { container }
    }
}

impl Default for DefaultCredentialsChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for DefaultCredentialsChain {
    async fn credentials(&self) -> Result<Credentials> {
        match EnvironmentCredentials.credentials().await {
            Ok(creds) => return Ok(creds),
            Err(e) => tracing::debug!(error = %e, "Environment credentials unavailable"),
        }

        match &self.container {
            Some(container) => container.credentials().await,
            None => Err(GraphError::Credentials(
                "no credentials in environment and no container credentials endpoint".into(),
            )),
        }
    }
}
