//
//  bitbucket-cli
//  api/retry.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Retry policy for the HTTP executor
//!
//! A [`RetryPolicy`] bundles the attempt budget, the [`Backoff`] schedule,
//! the retryable predicate and the [`Sleeper`] used to wait between
//! attempts. Tests swap the sleeper for an [`InstantSleeper`] so retry
//! behaviour can be checked without waiting in real time.
//!
//! The default predicate ([`default_retryable`]) only repeats requests that
//! cannot duplicate side effects:
//!
//! | Failure | GET | POST / PUT / DELETE |
//! |---------|-----|---------------------|
//! | connection refused, DNS | retried | retried |
//! | timeout, reset, body error | retried | not retried |
//! | 429, 5xx | retried | not retried |
//! | other statuses | not retried | not retried |

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Method;

use super::common::{BitbucketError, ErrorKind};

/// Why a single attempt did not produce a successful response.
#[derive(Debug)]
pub enum AttemptFailure {
    /// The request never reached the server (connection refused, DNS).
    Connect(reqwest::Error),

    /// Transport failure after the request may have been sent.
    Transport(reqwest::Error),

    /// The server answered with a non-success status.
    Status {
        error: BitbucketError,
        /// `Retry-After` from the response, whatever the status.
        retry_after: Option<Duration>,
    },

    /// Failed before anything was sent (auth preparation, request building).
    Rejected(BitbucketError),
}

impl AttemptFailure {
    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) | Self::Transport(_) => ErrorKind::Network,
            Self::Status { error, .. } | Self::Rejected(error) => error.kind,
        }
    }

    /// Converts the failure into the error surfaced to the caller.
    pub fn into_error(self, attempts: u32) -> BitbucketError {
        let error = match self {
            Self::Connect(e) | Self::Transport(e) => BitbucketError::network(e),
            Self::Status { error, .. } | Self::Rejected(error) => error,
        };
        error.with_attempts(attempts)
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Status { error, .. } | Self::Rejected(error) => write!(f, "{error}"),
        }
    }
}

/// Decides whether a failed attempt may be repeated.
pub type RetryPredicate = fn(&Method, &AttemptFailure) -> bool;

/// The default retryable predicate.
///
/// GET is repeated on any transport failure, 429 and 5xx. Other methods are
/// only repeated when the request provably never reached the server.
pub fn default_retryable(method: &Method, failure: &AttemptFailure) -> bool {
    let idempotent = *method == Method::GET;
    match failure {
        AttemptFailure::Connect(_) => true,
        AttemptFailure::Transport(_) => idempotent,
        AttemptFailure::Status { error, .. } => {
            idempotent && matches!(error.kind, ErrorKind::RateLimit | ErrorKind::Server)
        }
        AttemptFailure::Rejected(_) => false,
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,

    /// Same delay before every retry.
    Constant(Duration),

    /// `initial * 2^retry`, capped at `max`, plus up to `initial / 2` of jitter.
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => *delay,
            Self::Exponential {
                initial,
                max,
                jitter,
            } => {
                let multiplier = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                let capped = initial.checked_mul(multiplier).unwrap_or(*max).min(*max);

                if !jitter {
                    return capped;
                }

                // Jitter never pushes the delay past `max`.
                let jitter_range_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX) / 2;
                let headroom_ms = u64::try_from(max.saturating_sub(capped).as_millis()).unwrap_or(0);
                let limit_ms = jitter_range_ms.min(headroom_ms);
                if limit_ms == 0 {
                    return capped;
                }

                let jitter_ms = rand::rng().random_range(0..limit_ms);
                (capped + Duration::from_millis(jitter_ms)).min(*max)
            }
        }
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested delay.
///
/// Used by tests to observe backoff decisions without waiting.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Attempt budget, backoff schedule, predicate and sleeper.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use bitbucket_client::api::{Backoff, RetryPolicy};
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(5)
///     .with_backoff(Backoff::Constant(Duration::from_millis(250)));
/// assert_eq!(policy.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,

    pub backoff: Backoff,

    /// Upper bound on time spent across all attempts and waits.
    pub max_elapsed: Option<Duration>,

    pub retryable: RetryPredicate,

    pub sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("max_elapsed", &self.max_elapsed)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(8),
                jitter: true,
            },
            max_elapsed: Some(Duration::from_secs(60)),
            retryable: default_retryable,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn with_predicate(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Whether `failure` on attempt number `attempt` (1-based) may be retried.
    pub fn should_retry(&self, method: &Method, failure: &AttemptFailure, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.retryable)(method, failure)
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    ///
    /// A server-supplied `Retry-After` replaces the computed backoff.
    pub fn next_delay(&self, failure: &AttemptFailure, attempt: u32) -> Duration {
        failure
            .retry_after()
            .unwrap_or_else(|| self.backoff.delay(attempt.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    use crate::api::common::classify_response;

    fn status_failure(code: u16, retry_after: Option<Duration>) -> AttemptFailure {
        AttemptFailure::Status {
            error: classify_response(StatusCode::from_u16(code).unwrap(), &HeaderMap::new(), ""),
            retry_after,
        }
    }

    #[test]
    fn test_exponential_without_jitter() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(300),
            jitter: true,
        };
        for _ in 0..32 {
            let first = backoff.delay(0);
            assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(150));
            assert!(backoff.delay(5) <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_get_retries_server_and_rate_limit() {
        assert!(default_retryable(&Method::GET, &status_failure(500, None)));
        assert!(default_retryable(&Method::GET, &status_failure(429, None)));
        assert!(!default_retryable(&Method::GET, &status_failure(404, None)));
        assert!(!default_retryable(&Method::GET, &status_failure(401, None)));
    }

    #[test]
    fn test_mutations_never_retry_statuses() {
        for method in [Method::POST, Method::PUT, Method::DELETE] {
            assert!(!default_retryable(&method, &status_failure(500, None)));
            assert!(!default_retryable(&method, &status_failure(429, None)));
        }
    }

    #[test]
    fn test_rejected_is_never_retried() {
        let failure = AttemptFailure::Rejected(BitbucketError::authentication("no session"));
        assert!(!default_retryable(&Method::GET, &failure));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default().with_backoff(Backoff::Constant(Duration::from_secs(1)));
        let failure = status_failure(429, Some(Duration::from_secs(9)));
        assert_eq!(policy.next_delay(&failure, 1), Duration::from_secs(9));
        assert_eq!(policy.next_delay(&status_failure(503, None), 1), Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        let failure = status_failure(502, None);
        assert!(policy.should_retry(&Method::GET, &failure, 1));
        assert!(policy.should_retry(&Method::GET, &failure, 2));
        assert!(!policy.should_retry(&Method::GET, &failure, 3));
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_instant_sleeper_records_delays() {
        let sleeper = InstantSleeper::new();
        tokio_test::block_on(async {
            sleeper.sleep(Duration::from_millis(500)).await;
            sleeper.sleep(Duration::from_secs(2)).await;
        });
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(500), Duration::from_secs(2)]
        );
    }
}
