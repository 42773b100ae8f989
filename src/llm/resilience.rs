//! LLM resilience wrapper: bounded retries and a circuit breaker.
//!
//! Transient failures (timeouts, 5xx, rate limits) are retried with
//! exponential backoff; once the retry budget is exhausted the error is
//! promoted to its fatal counterpart. Consecutive failures open the
//! breaker, which rejects calls until a cooldown elapses, then admits a
//! half-open trial.

use super::{Completion, LlmClient};
use crate::config::LlmConfig;
use crate::{Error, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resilience configuration for LLM calls.
#[derive(Debug, Clone, Copy)]
pub struct LlmResilienceConfig {
    /// Maximum number of retries for transient failures.
    pub max_retries: u32,
    /// Initial backoff between retries; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
        }
    }
}

impl LlmResilienceConfig {
    /// Extracts the resilience settings from the LLM config section.
    #[must_use]
    pub const fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_reset_timeout_ms: config.breaker_reset_timeout_ms,
        }
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

/// Process-wide circuit breaker; shared by the LLM wrapper and the
/// reranker adapter.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub(crate) fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout: Duration::from_millis(reset_timeout_ms),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether a call may proceed. Transitions open → half-open after the
    /// cooldown.
    pub(crate) fn allow(&self) -> bool {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a success, closing the circuit.
    pub(crate) fn on_success(&self) {
        *self.lock() = BreakerState::Closed { failures: 0 };
    }

    /// Records a failure. Returns true when this failure tripped the
    /// breaker open.
    pub(crate) fn on_failure(&self) -> bool {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
                false
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(*self.lock(), BreakerState::Open { .. })
    }
}

/// LLM client wrapper with retries and a circuit breaker.
pub struct ResilientLlmClient<C: LlmClient> {
    inner: C,
    config: LlmResilienceConfig,
    breaker: CircuitBreaker,
}

impl<C: LlmClient> ResilientLlmClient<C> {
    /// Wraps a client with the given resilience configuration.
    #[must_use]
    pub fn new(inner: C, config: LlmResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            config.breaker_reset_timeout_ms,
        );
        Self {
            inner,
            config,
            breaker,
        }
    }

    fn execute<T>(&self, operation: &'static str, call: impl Fn() -> Result<T>) -> Result<T> {
        let provider = self.inner.name();
        let span = tracing::info_span!("llm.request", provider, operation);
        let _enter = span.enter();

        if !self.breaker.allow() {
            metrics::counter!(
                "llm_circuit_breaker_rejections_total",
                "provider" => provider,
                "operation" => operation
            )
            .increment(1);
            return Err(Error::LlmFatal {
                operation: operation.to_string(),
                cause: "circuit breaker open".to_string(),
            });
        }

        let max_attempts = self.config.max_retries + 1;
        let mut backoff_ms = self.config.retry_backoff_ms;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=max_attempts {
            let start = Instant::now();
            match call() {
                Ok(value) => {
                    self.breaker.on_success();
                    metrics::counter!(
                        "llm_requests_total",
                        "provider" => provider,
                        "operation" => operation,
                        "status" => "success"
                    )
                    .increment(1);
                    metrics::histogram!(
                        "llm_request_duration_ms",
                        "provider" => provider,
                        "operation" => operation
                    )
                    .record(start.elapsed().as_secs_f64() * 1000.0);
                    return Ok(value);
                }
                Err(err) => {
                    let tripped = self.breaker.on_failure();
                    if tripped {
                        metrics::counter!(
                            "llm_circuit_breaker_trips_total",
                            "provider" => provider
                        )
                        .increment(1);
                        tracing::warn!(provider, operation, "LLM circuit breaker opened");
                    }
                    metrics::counter!(
                        "llm_requests_total",
                        "provider" => provider,
                        "operation" => operation,
                        "status" => "error"
                    )
                    .increment(1);

                    if err.is_transient() && attempt < max_attempts {
                        metrics::counter!(
                            "llm_retries_total",
                            "provider" => provider,
                            "operation" => operation
                        )
                        .increment(1);
                        tracing::warn!(
                            provider,
                            operation,
                            attempt,
                            error = %err,
                            "retrying transient LLM failure"
                        );
                        if backoff_ms > 0 {
                            std::thread::sleep(Duration::from_millis(backoff_ms));
                            backoff_ms = backoff_ms.saturating_mul(2);
                        }
                        last_error = Some(err);
                        continue;
                    }
                    if err.is_transient() {
                        return Err(err.into_fatal());
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error.map_or_else(
            || Error::LlmFatal {
                operation: operation.to_string(),
                cause: "exhausted retries".to_string(),
            },
            Error::into_fatal,
        ))
    }
}

impl<C: LlmClient> LlmClient for ResilientLlmClient<C> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Completion> {
        self.execute("generate", || self.inner.generate(prompt, max_tokens))
    }
}
