//
//  bitbucket-cli
//  api/context.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Caller-supplied cancellation and deadline for a request.
//!
//! A [`RequestContext`] travels with every call through the client: the
//! executor races each attempt and each backoff sleep against it, and the
//! paginator forwards it to every page fetch. Clones share the same
//! cancellation token.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::common::{BitbucketError, ErrorKind};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The token was cancelled explicitly.
    Canceled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for Cancellation {}

impl Cancellation {
    /// Converts the cause into the error surfaced to callers.
    pub fn into_error(self, attempts: u32) -> BitbucketError {
        BitbucketError::new(ErrorKind::Network, self.to_string())
            .with_attempts(attempts)
            .with_source(self)
    }
}

/// Cancellation token plus optional deadline.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use bitbucket_client::api::RequestContext;
///
/// let ctx = RequestContext::background().with_timeout(Duration::from_secs(10));
/// assert!(ctx.cause().is_none());
///
/// ctx.cancel();
/// assert!(ctx.cause().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. one tied to Ctrl+C handling.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Returns a context whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    /// A context that is cancelled when this one is, and can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The reason this context is done, if it is.
    pub fn cause(&self) -> Option<Cancellation> {
        if self.token.is_cancelled() {
            return Some(Cancellation::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Cancellation::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fails fast when the context is already done.
    pub fn check(&self, attempts: u32) -> Result<(), BitbucketError> {
        match self.cause() {
            Some(cause) => Err(cause.into_error(attempts)),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Cancellation {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Cancellation::Canceled,
                    _ = tokio::time::sleep_until(deadline) => Cancellation::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Cancellation::Canceled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let ctx = RequestContext::background();
        let waiter = ctx.clone();
        ctx.cancel();
        assert_eq!(waiter.done().await, Cancellation::Canceled);
        let err = waiter.check(0).unwrap_err();
        assert!(err.to_string().contains("context canceled"));
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(err.cancellation(), Some(Cancellation::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_done() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(5));
        assert!(ctx.cause().is_none());
        assert_eq!(ctx.done().await, Cancellation::DeadlineExceeded);
        assert_eq!(ctx.cause(), Some(Cancellation::DeadlineExceeded));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(1));
        let longer = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), longer.deadline());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = RequestContext::background();
        let child = parent.child();
        child.cancel();
        assert!(parent.cause().is_none());
        parent.cancel();
        assert_eq!(parent.child().cause(), Some(Cancellation::Canceled));
    }
}
