//! Completion gateway: timeout, retry with backoff, and failure typing
//! around a `CompletionService`.
//!
//! Transient failures (timeouts, connection errors, rate limits, 5xx) are
//! retried up to `max_retries` times with exponential backoff and jitter.
//! Permanent failures surface immediately. Running out of retries is a
//! typed `GatewayError::Exhausted`, which the orchestrator treats as
//! "this agent has no output for this stage".

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::llm::client::LlmError;
use crate::llm::types::Message;
use crate::llm::{Completion, CompletionService, ModelParams};

/// Whether a failed call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Classify an LLM error.
pub fn classify(err: &LlmError) -> FailureKind {
    match err {
        LlmError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            FailureKind::Transient
        }
        LlmError::Http(e) => match e.status() {
            Some(status) if status.is_client_error() => FailureKind::Permanent,
            _ => FailureKind::Transient,
        },
        LlmError::RateLimited { .. } => FailureKind::Transient,
        LlmError::ApiError { status, .. } => match status {
            408 | 409 | 429 => FailureKind::Transient,
            s if *s >= 500 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        },
        // A garbled or empty body is usually a hiccup on the service side.
        LlmError::InvalidResponse(_) => FailureKind::Transient,
        LlmError::MissingApiKey(_) => FailureKind::Permanent,
    }
}

/// Errors surfaced by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("permanent service error: {0}")]
    Permanent(#[source] LlmError),

    #[error("gateway exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Retry schedule: `base_delay * 2^(attempt-1)` plus up to `max_jitter`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Wraps a completion service with per-attempt timeout and retries.
#[derive(Clone)]
pub struct CompletionGateway {
    service: Arc<dyn CompletionService>,
    policy: RetryPolicy,
    call_timeout: Duration,
    params: ModelParams,
}

impl CompletionGateway {
    pub fn new(
        service: Arc<dyn CompletionService>,
        policy: RetryPolicy,
        call_timeout: Duration,
        params: ModelParams,
    ) -> Self {
        Self {
            service,
            policy,
            call_timeout,
            params,
        }
    }

    /// Send the turns as-is, retrying transient failures.
    pub async fn complete(&self, turns: &[Message]) -> Result<Completion, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut hinted = Duration::ZERO;

            let last_error = match tokio::time::timeout(
                self.call_timeout,
                self.service.complete(turns, &self.params),
            )
            .await
            {
                Ok(Ok(completion)) => {
                    if attempt > 1 {
                        debug!(attempt, "completion succeeded after retry");
                    }
                    return Ok(completion);
                }
                Ok(Err(e)) => {
                    if classify(&e) == FailureKind::Permanent {
                        warn!(error = %e, "permanent completion failure; not retrying");
                        return Err(GatewayError::Permanent(e));
                    }
                    if let LlmError::RateLimited {
                        retry_after: Some(secs),
                    } = &e
                    {
                        hinted = Duration::from_secs(*secs);
                    }
                    e.to_string()
                }
                Err(_) => format!("timed out after {:?}", self.call_timeout),
            };

            if attempt > self.policy.max_retries {
                warn!(attempts = attempt, error = %last_error, "completion retries exhausted");
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.policy.delay(attempt).max(hinted) + self.policy.jitter();
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "transient completion failure; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::UsageStats;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with `make_err`, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        make_err: fn() -> LlmError,
    }

    impl Flaky {
        fn new(failures: u32, make_err: fn() -> LlmError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
                make_err,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for Flaky {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &ModelParams,
        ) -> Result<Completion, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.make_err)())
            } else {
                Ok(Completion {
                    text: "done".into(),
                    usage: Some(UsageStats {
                        prompt_tokens: 3,
                        completion_tokens: 1,
                        ..UsageStats::default()
                    }),
                })
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl CompletionService for Slow {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &ModelParams,
        ) -> Result<Completion, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Completion::new("too late"))
        }
    }

    fn gateway(service: Arc<dyn CompletionService>, retries: u32) -> CompletionGateway {
        CompletionGateway::new(
            service,
            RetryPolicy::immediate(retries),
            Duration::from_secs(5),
            ModelParams::default(),
        )
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited { retry_after: None }
    }

    fn server_error() -> LlmError {
        LlmError::ApiError {
            status: 503,
            message: "overloaded".into(),
        }
    }

    fn unauthorized() -> LlmError {
        LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_is_a_floor_on_the_delay() {
        let service = Flaky::new(1, || LlmError::RateLimited {
            retry_after: Some(5),
        });
        let gw = gateway(service.clone(), 2);

        let started = tokio::time::Instant::now();
        let out = gw.complete(&[Message::user("hi")]).await.unwrap();

        assert_eq!(out.text, "done");
        assert_eq!(service.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn immediate_policy_has_no_delay_or_jitter() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay(3), Duration::ZERO);
        assert_eq!(policy.jitter(), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            assert!(policy.jitter() <= Duration::from_millis(250));
        }
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&rate_limited()), FailureKind::Transient);
        assert_eq!(classify(&server_error()), FailureKind::Transient);
        assert_eq!(
            classify(&LlmError::InvalidResponse("bad json".into())),
            FailureKind::Transient
        );
        assert_eq!(classify(&unauthorized()), FailureKind::Permanent);
        assert_eq!(
            classify(&LlmError::ApiError {
                status: 400,
                message: "content_policy_violation".into()
            }),
            FailureKind::Permanent
        );
        assert_eq!(
            classify(&LlmError::MissingApiKey("unset".into())),
            FailureKind::Permanent
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let service = Flaky::new(2, rate_limited);
        let gw = gateway(service.clone(), 3);

        let completion = gw.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(completion.text, "done");
        assert_eq!(completion.usage.unwrap().prompt_tokens, 3);
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let service = Flaky::new(10, unauthorized);
        let gw = gateway(service.clone(), 3);

        let err = gw.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_typed() {
        let service = Flaky::new(u32::MAX, server_error);
        let gw = gateway(service.clone(), 3);

        let err = gw.complete(&[Message::user("hi")]).await.unwrap_err();
        match err {
            GatewayError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(service.calls(), 4);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let service = Flaky::new(1, rate_limited);
        let gw = gateway(service.clone(), 0);
        assert!(gw.complete(&[]).await.is_err());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_transient() {
        let gw = CompletionGateway::new(
            Arc::new(Slow),
            RetryPolicy::immediate(1),
            Duration::from_millis(20),
            ModelParams::default(),
        );
        let err = gw.complete(&[Message::user("hi")]).await.unwrap_err();
        match err {
            GatewayError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
