//! Bounded retry with per-attempt timeout escalation and exponential backoff.
//!
//! Attempt `k` (1-based) runs under `base × k`, where the base depends on the
//! request's [`TimeoutClass`]. Before every attempt after the first the
//! executor sleeps `backoff_base × 2^(k−2)`. Only timeouts and connection
//! failures are retried; every other error is returned at once.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use neptune_core::RetrySettings;

use crate::error::{ErrorKind, GraphError, Result};

/// Which base timeout a request runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Ordinary reads and writes.
    Standard,
    /// SPARQL DELETE/CLEAR.
    Extended,
}

/// Retry knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub standard_timeout: Duration,
    pub extended_timeout: Duration,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Per-attempt values handed to the operation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Budget for this attempt.
    pub timeout: Duration,
    /// Delay slept before this attempt; zero for the first.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            standard_timeout: Duration::from_secs(settings.standard_timeout_secs),
            extended_timeout: Duration::from_secs(settings.extended_timeout_secs),
            backoff_base: Duration::from_secs(settings.backoff_base_secs),
        }
    }

    pub fn base_timeout(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Standard => self.standard_timeout,
            TimeoutClass::Extended => self.extended_timeout,
        }
    }

    /// `base × attempt`.
    pub fn timeout_for(&self, class: TimeoutClass, attempt: u32) -> Duration {
        self.base_timeout(class).saturating_mul(attempt.max(1))
    }

    /// Zero before the first attempt, then `backoff_base × 2^(attempt − 2)`.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.backoff_base.saturating_mul(factor)
    }

    pub fn state(&self, class: TimeoutClass, attempt: u32) -> RetryState {
        RetryState {
            attempt,
            timeout: self.timeout_for(class, attempt),
            backoff: self.backoff_before(attempt),
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or `policy.max_attempts` is reached.
///
/// Each attempt is bounded by its [`RetryState::timeout`]; an attempt that
/// overruns yields [`GraphError::Timeout`]. When `deadline` is set it clamps
/// every attempt and every backoff sleep, and running into it returns
/// [`GraphError::DeadlineExceeded`] without further attempts.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    class: TimeoutClass,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T>
where
    F: FnMut(RetryState) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let state = policy.state(class, attempt);

        if !state.backoff.is_zero() {
            tracing::debug!(
                attempt,
                max_attempts,
                backoff_secs = state.backoff.as_secs_f64(),
                "Waiting before retry"
            );
            sleep_within(state.backoff, deadline).await?;
            tracing::debug!(
                attempt,
                timeout_secs = state.timeout.as_secs_f64(),
                "Retrying with escalated timeout"
            );
        }

        let (budget, clamped) = clamp_to_deadline(state.timeout, deadline)?;
        let outcome = match tokio::time::timeout(budget, op(state)).await {
            Ok(result) => result,
            Err(_) if clamped => return Err(GraphError::DeadlineExceeded),
            Err(_) => Err(GraphError::Timeout {
                timeout: state.timeout,
            }),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::Fatal => {
                tracing::error!(attempt, error = %err, "Request failed with non-retryable error");
                return Err(err);
            }
            kind if attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    kind = ?kind,
                    error = %err,
                    "Retryable request failure"
                );
                attempt += 1;
            }
            _ => {
                tracing::error!(
                    attempts = max_attempts,
                    timeout_secs = state.timeout.as_secs_f64(),
                    error = %err,
                    "Request failed after all attempts"
                );
                return Err(err);
            }
        }
    }
}

/// Shorten `budget` to fit before `deadline`. Returns whether it was shortened.
fn clamp_to_deadline(budget: Duration, deadline: Option<Instant>) -> Result<(Duration, bool)> {
    let Some(deadline) = deadline else {
        return Ok((budget, false));
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(GraphError::DeadlineExceeded);
    }
    if remaining < budget {
        Ok((remaining, true))
    } else {
        Ok((budget, false))
    }
}

async fn sleep_within(delay: Duration, deadline: Option<Instant>) -> Result<()> {
    let (budget, clamped) = clamp_to_deadline(delay, deadline)?;
    tokio::time::sleep(budget).await;
    if clamped {
        return Err(GraphError::DeadlineExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use std::sync::{Arc, Mutex};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn timeouts_escalate_linearly() {
        let policy = RetryPolicy::default();
        let standard: Vec<_> = (1..=3)
            .map(|k| policy.timeout_for(TimeoutClass::Standard, k))
            .collect();
        assert_eq!(standard, vec![secs(120), secs(240), secs(360)]);

        let extended: Vec<_> = (1..=3)
            .map(|k| policy.timeout_for(TimeoutClass::Extended, k))
            .collect();
        assert_eq!(extended, vec![secs(300), secs(600), secs(900)]);
    }

    #[test]
    fn backoff_doubles_and_skips_first_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_before(1), Duration::ZERO);
        assert_eq!(policy.backoff_before(2), secs(5));
        assert_eq!(policy.backoff_before(3), secs(10));
        assert_eq!(policy.backoff_before(4), secs(20));
    }

    #[test]
    fn policy_reads_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 5,
            standard_timeout_secs: 10,
            extended_timeout_secs: 30,
            backoff_base_secs: 1,
        });
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.state(TimeoutClass::Extended, 2).timeout, secs(60));
        assert_eq!(policy.state(TimeoutClass::Standard, 3).backoff, secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn three_timeouts_exhaust_attempts_with_5s_then_10s_backoff() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let seen: Arc<Mutex<Vec<(RetryState, Duration)>>> = Arc::default();

        let log = seen.clone();
        let result: Result<()> = execute_with_retry(&policy, TimeoutClass::Standard, None, |state| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push((state, started.elapsed()));
                Err(GraphError::Timeout {
                    timeout: state.timeout,
                })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, GraphError::Timeout { timeout } if timeout == secs(360)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].1, Duration::ZERO);
        assert_eq!(seen[1].1 - seen[0].1, secs(5));
        assert_eq!(seen[2].1 - seen[1].1, secs(10));
        assert_eq!(
            seen.iter().map(|(s, _)| s.timeout).collect::<Vec<_>>(),
            vec![secs(120), secs(240), secs(360)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sparql_select_escalates_from_the_standard_base() {
        let prepared = Protocol::Sparql
            .build_request("SELECT ?s WHERE { ?s ?p ?o }")
            .unwrap();
        assert_eq!(prepared.timeout_class, TimeoutClass::Standard);

        let policy = RetryPolicy::default();
        let started = Instant::now();
        let seen: Arc<Mutex<Vec<(RetryState, Duration)>>> = Arc::default();

        let log = seen.clone();
        let result: Result<()> =
            execute_with_retry(&policy, prepared.timeout_class, None, |state| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((state, started.elapsed()));
                    Err(GraphError::Timeout {
                        timeout: state.timeout,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(GraphError::Timeout { timeout }) if timeout == secs(360)));

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|(s, _)| s.timeout).collect::<Vec<_>>(),
            vec![secs(120), secs(240), secs(360)]
        );
        assert_eq!(seen[1].1 - seen[0].1, secs(5));
        assert_eq!(seen[2].1 - seen[1].1, secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_are_cut_off_by_escalating_timeouts() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let attempts = Arc::new(Mutex::new(0u32));

        let counter = attempts.clone();
        let result: Result<()> =
            execute_with_retry(&policy, TimeoutClass::Extended, None, |_state| {
                *counter.lock().unwrap() += 1;
                std::future::pending::<Result<()>>()
            })
            .await;

        assert!(matches!(result, Err(GraphError::Timeout { timeout }) if timeout == secs(900)));
        assert_eq!(*attempts.lock().unwrap(), 3);
        // 300 + 5 + 600 + 10 + 900
        assert_eq!(started.elapsed(), secs(1815));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_then_success() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(Mutex::new(0u32));

        let counter = attempts.clone();
        let value = execute_with_retry(&policy, TimeoutClass::Standard, None, |state| {
            *counter.lock().unwrap() += 1;
            async move {
                if state.attempt == 1 {
                    Err(GraphError::Connection("connection refused".into()))
                } else {
                    Ok(state.attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let attempts = Arc::new(Mutex::new(0u32));

        let counter = attempts.clone();
        let result: Result<()> = execute_with_retry(&policy, TimeoutClass::Standard, None, |_| {
            *counter.lock().unwrap() += 1;
            async {
                Err(GraphError::Status {
                    status: 400,
                    body: "MalformedQueryException".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(GraphError::Status { status: 400, .. })));
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_clamps_attempts_and_stops_retrying() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let deadline = started + secs(30);

        let result: Result<()> =
            execute_with_retry(&policy, TimeoutClass::Standard, Some(deadline), |_| {
                std::future::pending::<Result<()>>()
            })
            .await;

        assert!(matches!(result, Err(GraphError::DeadlineExceeded)));
        assert_eq!(started.elapsed(), secs(30));
    }
}
