//! Two-phase fast reset of a Neptune cluster.
//!
//! `initiateDatabaseReset` issues a one-time token; `performDatabaseReset`
//! spends it. Each phase is a single attempt with its own budget.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use neptune_core::ResetSettings;

use crate::error::{GraphError, Result};

/// The cluster's administrative endpoint.
#[async_trait]
pub trait SystemEndpoint: Send + Sync {
    /// POST a JSON action to `/system` and return the parsed JSON reply.
    async fn post_action(&self, body: Value, timeout: Duration) -> Result<Value>;
}

/// One-time reset authorization. Consumed by [`ResetOrchestrator::perform_reset`].
pub struct ResetToken(String);

impl ResetToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for logs.
    pub fn prefix(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResetToken({}...)", self.prefix())
    }
}

/// Where the reset protocol stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    Idle,
    TokenRequested,
    /// `perform` returned; `accepted` is whether the cluster reported `200 OK`.
    Completed { accepted: bool },
    /// A remote call failed outright.
    Failed,
}

/// Drives the initiate → perform exchange against a [`SystemEndpoint`].
pub struct ResetOrchestrator<'a, E: SystemEndpoint + ?Sized> {
    endpoint: &'a E,
    initiate_timeout: Duration,
    perform_timeout: Duration,
    state: ResetState,
}

impl<'a, E: SystemEndpoint + ?Sized> ResetOrchestrator<'a, E> {
    pub fn new(endpoint: &'a E, settings: &ResetSettings) -> Self {
        Self {
            endpoint,
            initiate_timeout: Duration::from_secs(settings.initiate_timeout_secs),
            perform_timeout: Duration::from_secs(settings.perform_timeout_secs),
            state: ResetState::Idle,
        }
    }

    pub fn state(&self) -> ResetState {
        self.state
    }

    /// Ask the cluster for a reset token.
    pub async fn initiate_reset(&mut self) -> Result<ResetToken> {
        tracing::info!("Initiating Neptune database reset");
        let reply = self
            .endpoint
            .post_action(
                json!({ "action": "initiateDatabaseReset" }),
                self.initiate_timeout,
            )
            .await;

        let token = reply.and_then(|body| {
            body.pointer("/payload/token")
                .and_then(Value::as_str)
                .map(ResetToken::new)
                .ok_or_else(|| GraphError::InvalidResponse(format!("no payload.token in {body}")))
        });

        match token {
            Ok(token) => {
                tracing::info!(token_prefix = token.prefix(), "Reset token obtained");
                self.state = ResetState::TokenRequested;
                Ok(token)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initiate database reset");
                self.state = ResetState::Failed;
                Err(GraphError::Reset(format!("failed to get reset token: {e}")))
            }
        }
    }

    /// Spend `token`. `Ok(false)` means the cluster declined the reset.
    pub async fn perform_reset(&mut self, token: ResetToken) -> Result<bool> {
        tracing::info!(token_prefix = token.prefix(), "Performing Neptune database reset");
        let body = json!({ "action": "performDatabaseReset", "token": token.as_str() });

        match self.endpoint.post_action(body, self.perform_timeout).await {
            Ok(reply) => {
                let accepted = reply.get("status").and_then(Value::as_str) == Some("200 OK");
                if accepted {
                    tracing::info!("Database reset completed");
                } else {
                    tracing::error!(response = %reply, "Database reset was not accepted");
                }
                self.state = ResetState::Completed { accepted };
                Ok(accepted)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to perform database reset");
                self.state = ResetState::Failed;
                Err(GraphError::Reset(e.to_string()))
            }
        }
    }

    /// Initiate then perform. Nothing is performed if initiation fails.
    pub async fn fast_reset(&mut self) -> Result<bool> {
        let token = self.initiate_reset().await?;
        self.perform_reset(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned replies and records every request body.
    struct FakeSystem {
        replies: Mutex<Vec<Result<Value>>>,
        seen: Mutex<Vec<(Value, Duration)>>,
    }

    impl FakeSystem {
        fn new(replies: Vec<Result<Value>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn actions(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|(body, _)| body["action"].as_str().unwrap().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl SystemEndpoint for FakeSystem {
        async fn post_action(&self, body: Value, timeout: Duration) -> Result<Value> {
            self.seen.lock().unwrap().push((body, timeout));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GraphError::Connection("no reply scripted".into())))
        }
    }

    fn settings() -> ResetSettings {
        ResetSettings::default()
    }

    #[tokio::test]
    async fn fast_reset_spends_the_issued_token() {
        let system = FakeSystem::new(vec![
            Ok(json!({ "status": "200 OK", "payload": { "token": "abcdef0123456789" } })),
            Ok(json!({ "status": "200 OK" })),
        ]);
        let mut orchestrator = ResetOrchestrator::new(&system, &settings());

        assert!(orchestrator.fast_reset().await.unwrap());
        assert_eq!(orchestrator.state(), ResetState::Completed { accepted: true });

        let seen = system.seen.lock().unwrap();
        assert_eq!(seen[0].0, json!({ "action": "initiateDatabaseReset" }));
        assert_eq!(seen[0].1, Duration::from_secs(60));
        assert_eq!(
            seen[1].0,
            json!({ "action": "performDatabaseReset", "token": "abcdef0123456789" })
        );
        assert_eq!(seen[1].1, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn perform_is_never_attempted_when_initiate_fails() {
        let system = FakeSystem::new(vec![Err(GraphError::Status {
            status: 403,
            body: "AccessDeniedException".into(),
        })]);
        let mut orchestrator = ResetOrchestrator::new(&system, &settings());

        let err = orchestrator.fast_reset().await.unwrap_err();
        assert!(matches!(err, GraphError::Reset(msg) if msg.contains("reset token")));
        assert_eq!(system.actions(), vec!["initiateDatabaseReset"]);
        assert_eq!(orchestrator.state(), ResetState::Failed);
    }

    #[tokio::test]
    async fn missing_token_is_an_initiate_failure() {
        let system = FakeSystem::new(vec![Ok(json!({ "status": "200 OK", "payload": {} }))]);
        let mut orchestrator = ResetOrchestrator::new(&system, &settings());

        assert!(orchestrator.fast_reset().await.is_err());
        assert_eq!(system.actions(), vec!["initiateDatabaseReset"]);
    }

    #[tokio::test]
    async fn declined_reset_is_false_not_an_error() {
        let system = FakeSystem::new(vec![Ok(json!({ "status": "400 Bad Request" }))]);
        let mut orchestrator = ResetOrchestrator::new(&system, &settings());

        let accepted = orchestrator
            .perform_reset(ResetToken::new("token-1"))
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(orchestrator.state(), ResetState::Completed { accepted: false });
    }

    #[tokio::test]
    async fn failed_perform_call_is_an_error() {
        let system = FakeSystem::new(vec![Err(GraphError::Timeout {
            timeout: Duration::from_secs(600),
        })]);
        let mut orchestrator = ResetOrchestrator::new(&system, &settings());

        let result = orchestrator.perform_reset(ResetToken::new("token-1")).await;
        assert!(matches!(result, Err(GraphError::Reset(_))));
        assert_eq!(orchestrator.state(), ResetState::Failed);
    }

    #[test]
    fn token_debug_shows_only_a_prefix() {
        let token = ResetToken::new("0123456789abcdef");
        assert_eq!(token.prefix(), "01234567");
        assert_eq!(format!("{token:?}"), "ResetToken(01234567...)");
        assert_eq!(ResetToken::new("abc").prefix(), "abc");
    }
}
