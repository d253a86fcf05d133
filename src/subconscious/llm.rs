//! LLM client boundary.
//!
//! The core never talks to a model directly: consolidation and reasoning
//! layers are collaborators behind [`LlmClient`]. What lives here is the
//! resilience envelope every implementation gets wrapped in — circuit
//! breaker, retry with `Retry-After` awareness, a token-bucket rate limiter
//! that refunds on abort, and secrets filtering of outbound prompts.

use crate::security::{FilterAction, SecretsFilter};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Prompt text (filtered before leaving the process).
    pub prompt: String,
    /// Token budget for the response.
    pub max_tokens: u32,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text.
    pub text: String,
    /// Tokens the provider reports having consumed.
    pub tokens_used: u32,
}

/// Interface implemented by concrete providers (out of core scope).
pub trait LlmClient: Send + Sync {
    /// Stable provider name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Performs one completion call.
    ///
    /// # Errors
    ///
    /// Provider-defined; transient failures should mention a retry-after
    /// duration when the provider communicates one.
    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

/// Resilience settings for LLM calls.
#[derive(Debug, Clone)]
pub struct LlmResilienceConfig {
    /// Maximum retries for retryable failures.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Token bucket capacity.
    pub bucket_capacity: u64,
    /// Token bucket refill per second.
    pub bucket_refill_per_sec: u64,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_backoff_ms: 200,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
            bucket_capacity: 100_000,
            bucket_refill_per_sec: 1_000,
        }
    }
}

/// Token-bucket rate limiter with refund on abort.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let capacity_f = capacity as f64;
        #[allow(clippy::cast_precision_loss)]
        let refill_f = refill_per_sec as f64;
        Self {
            capacity: capacity_f,
            refill_per_sec: refill_f,
            state: Mutex::new(BucketState {
                tokens: capacity_f,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes `tokens` from the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] with the wait that would make the
    /// request admissible.
    pub fn acquire(&self, tokens: u64) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let wanted = (tokens as f64).min(self.capacity);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= wanted {
            state.tokens -= wanted;
            return Ok(());
        }

        let deficit = wanted - state.tokens;
        let wait_ms = if self.refill_per_sec > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ms = (deficit / self.refill_per_sec * 1000.0).ceil() as u64;
            Some(ms)
        } else {
            None
        };
        metrics::counter!("engram_llm_rate_limited_total").increment(1);
        Err(Error::RateLimited {
            retry_after_ms: wait_ms,
        })
    }

    /// Returns tokens from an aborted or cheaper-than-estimated call.
    pub fn refund(&self, tokens: u64) {
        #[allow(clippy::cast_precision_loss)]
        let returned = tokens as f64;
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.tokens = (state.tokens + returned).min(self.capacity);
    }
}

/// Circuit breaker state machine (closed / open / half-open with bounded
/// trial calls).
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl Breaker {
    fn new(config: &LlmResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }
}

/// Wraps any [`LlmClient`] with the resilience envelope.
pub struct ResilientLlmClient<C: LlmClient> {
    inner: C,
    config: LlmResilienceConfig,
    breaker: Mutex<Breaker>,
    bucket: TokenBucket,
    secrets: Arc<SecretsFilter>,
}

impl<C: LlmClient> ResilientLlmClient<C> {
    /// Creates the wrapper.
    #[must_use]
    pub fn new(inner: C, config: LlmResilienceConfig, secrets: Arc<SecretsFilter>) -> Self {
        let breaker = Breaker::new(&config);
        let bucket = TokenBucket::new(config.bucket_capacity, config.bucket_refill_per_sec);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
            bucket,
            secrets,
        }
    }

    /// Completes with filtering, rate limiting, breaker, and retry.
    ///
    /// # Errors
    ///
    /// - [`Error::ContentBlocked`] when the prompt carries a blocked secret
    /// - [`Error::RateLimited`] when the bucket is empty
    /// - Provider errors after the breaker and retries are exhausted
    pub fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let provider = self.inner.name();

        // Prompts never leave with raw secrets in them.
        let outcome = self.secrets.filter(&request.prompt, "llm", None);
        if outcome.action == FilterAction::Blocked {
            return Err(Error::ContentBlocked {
                reason: "prompt contains blocked content".to_string(),
            });
        }
        let filtered = LlmRequest {
            prompt: outcome.content,
            max_tokens: request.max_tokens,
        };

        let estimate = estimate_tokens(&filtered);
        self.bucket.acquire(estimate)?;

        {
            let mut breaker = self
                .breaker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !breaker.allow() {
                drop(breaker);
                self.bucket.refund(estimate);
                metrics::counter!("engram_llm_breaker_rejections_total", "provider" => provider)
                    .increment(1);
                return Err(Error::RateLimited {
                    retry_after_ms: Some(self.config.breaker_reset_timeout_ms),
                });
            }
        }

        let mut attempts = 0;
        let max_attempts = self.config.max_retries + 1;
        loop {
            attempts += 1;
            match self.inner.complete(&filtered) {
                Ok(response) => {
                    self.record_success();
                    // Refund the over-estimate.
                    let used = u64::from(response.tokens_used);
                    if used < estimate {
                        self.bucket.refund(estimate - used);
                    }
                    return Ok(response);
                },
                Err(e) => {
                    let tripped = self.record_failure();
                    if tripped {
                        tracing::warn!(provider, "LLM circuit breaker opened");
                        metrics::counter!("engram_llm_breaker_trips_total", "provider" => provider)
                            .increment(1);
                    }
                    if attempts >= max_attempts {
                        // Aborted: the call consumed nothing we can bill.
                        self.bucket.refund(estimate);
                        return Err(e);
                    }
                    let backoff = parse_retry_after(&e.to_string())
                        .unwrap_or(Duration::from_millis(self.config.retry_backoff_ms));
                    std::thread::sleep(backoff);
                },
            }
        }
    }

    fn record_success(&self) {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_success();
    }

    fn record_failure(&self) -> bool {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_failure()
    }
}

/// Rough token estimate: four bytes per token plus the response budget.
fn estimate_tokens(request: &LlmRequest) -> u64 {
    u64::try_from(request.prompt.len()).unwrap_or(u64::MAX) / 4 + u64::from(request.max_tokens)
}

static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)retry[- ]after[:\s]+(\d+)").unwrap()
});

/// Extracts a `Retry-After`-style seconds hint from an error message.
#[must_use]
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    RETRY_AFTER_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            parse_retry_after("429 too many requests, Retry-After: 7"),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            parse_retry_after("retry after 30 seconds"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after("connection refused"), None);
    }

    #[test]
    fn test_bucket_acquire_and_refund() {
        let bucket = TokenBucket::new(100, 0);
        bucket.acquire(60).unwrap();
        let err = bucket.acquire(60).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        bucket.refund(60);
        bucket.acquire(60).unwrap();
    }

    #[test]
    fn test_bucket_refund_caps_at_capacity() {
        let bucket = TokenBucket::new(100, 0);
        bucket.refund(1_000);
        bucket.acquire(100).unwrap();
        assert!(bucket.acquire(1).is_err());
    }

    #[test]
    fn test_breaker_trips_and_half_opens() {
        let config = LlmResilienceConfig {
            breaker_failure_threshold: 2,
            breaker_reset_timeout_ms: 0,
            ..LlmResilienceConfig::default()
        };
        let mut breaker = Breaker::new(&config);

        assert!(breaker.allow());
        assert!(!breaker.on_failure());
        assert!(breaker.on_failure());
        // Zero reset: immediately half-open, one trial allowed.
        assert!(breaker.allow());
        breaker.on_success();
        assert!(breaker.allow());
    }

    #[test]
    fn test_estimate_includes_response_budget() {
        let request = LlmRequest {
            prompt: "x".repeat(400),
            max_tokens: 50,
        };
        assert_eq!(estimate_tokens(&request), 150);
    }
}
