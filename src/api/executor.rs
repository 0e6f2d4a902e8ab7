//
//  bitbucket-cli
//  api/executor.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Request Execution
//!
//! [`HttpExecutor`] turns one logical request into one or more HTTP
//! attempts:
//!
//! 1. Resolve the path against the base URL (absolute URLs on the same
//!    origin are accepted, which is how `next` links are followed)
//! 2. Attach `Accept: application/json` and, through the
//!    [`AuthManager`], the `Authorization` header
//! 3. Send, racing the attempt against the caller's [`RequestContext`]
//! 4. Classify failures and consult the [`RetryPolicy`]
//! 5. Sleep the backoff (or the server's `Retry-After`), again racing the
//!    context, and go back to 3
//!
//! The executor keeps no per-request state between calls besides its
//! counters, so one instance can be shared freely between tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::AuthManager;

use super::common::{classify_response, parse_retry_after, BitbucketError, ErrorKind, Result};
use super::context::RequestContext;
use super::retry::{AttemptFailure, RetryPolicy};

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Attempts it took to get this response, including the successful one.
    pub attempts: u32,
}

impl Response {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let mut error = BitbucketError::new(
                ErrorKind::Unknown,
                format!("failed to decode response: {e}"),
            )
            .with_attempts(self.attempts)
            .with_source(e);
            error.status_code = Some(self.status.as_u16());
            error
        })
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Counters since the executor was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Logical requests passed to [`HttpExecutor::execute`].
    pub requests: u64,
    /// HTTP attempts sent.
    pub attempts: u64,
    /// Attempts that were repeats of a failed one.
    pub retries: u64,
}

/// Issues requests with authentication, retry and cancellation.
#[derive(Debug)]
pub struct HttpExecutor {
    http: Client,
    base_url: Url,
    auth: Option<Arc<AuthManager>>,
    policy: RetryPolicy,
    requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl HttpExecutor {
    /// `http` should already carry the User-Agent and per-attempt timeout.
    pub fn new(
        http: Client,
        base_url: &str,
        auth: Option<Arc<AuthManager>>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            BitbucketError::validation(format!("invalid base URL {base_url}")).with_source(e)
        })?;

        Ok(Self {
            http,
            base_url,
            auth,
            policy,
            requests: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn auth(&self) -> Option<&Arc<AuthManager>> {
        self.auth.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            requests: self.requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Resolves `path` to the URL to request.
    ///
    /// Relative paths must start with `/`. Absolute URLs must share the
    /// base URL's origin so credentials are never sent elsewhere.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if path.trim().is_empty() {
            return Err(BitbucketError::validation("request path must not be empty"));
        }

        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path).map_err(|e| {
                BitbucketError::validation(format!("invalid URL {path}")).with_source(e)
            })?;
            if url.origin() != self.base_url.origin() {
                return Err(BitbucketError::validation(format!(
                    "refusing to send credentials to {}",
                    url.origin().ascii_serialization()
                )));
            }
            return Ok(url);
        }

        if !path.starts_with('/') {
            return Err(BitbucketError::validation(format!(
                "request path must start with '/': {path}"
            )));
        }

        let joined = format!("{}{}", self.base_url(), path);
        Url::parse(&joined).map_err(|e| {
            BitbucketError::validation(format!("invalid request path {path}")).with_source(e)
        })
    }

    /// Executes one logical request.
    ///
    /// Returns the first 2xx response. Failures are classified into
    /// [`ErrorKind`]s and retried per the policy; the surfaced error
    /// carries the number of attempts made. A cancelled or expired
    /// `ctx` aborts the in-flight attempt or backoff immediately.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let url = self.resolve(path)?;
        ctx.check(0)?;

        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%method, url = %url, attempt, "Sending request");

            let mut sent_auth = None;
            let outcome = tokio::select! {
                cause = ctx.done() => {
                    tracing::debug!(%method, url = %url, attempt, %cause, "Request aborted");
                    return Err(cause.into_error(attempt));
                }
                outcome = self.attempt(ctx, &method, &url, body, &mut sent_auth) => outcome,
            };

            let failure = match outcome {
                Ok(mut response) => {
                    response.attempts = attempt;
                    tracing::debug!(%method, url = %url, attempt, status = response.status.as_u16(), "Request succeeded");
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            if let (AttemptFailure::Status { error, .. }, Some(auth), Some(header)) =
                (&failure, &self.auth, &sent_auth)
            {
                if error.kind == ErrorKind::Authentication {
                    auth.reject_credential(header, format!("credential rejected: {}", error.message))
                        .await;
                }
            }

            if !self.policy.should_retry(&method, &failure, attempt) {
                tracing::debug!(%method, url = %url, attempt, error = %failure, "Request failed");
                return Err(failure.into_error(attempt));
            }

            let delay = self.policy.next_delay(&failure, attempt);

            if let Some(max_elapsed) = self.policy.max_elapsed {
                if started.elapsed() + delay > max_elapsed {
                    tracing::warn!(%method, url = %url, attempt, delay_ms = delay.as_millis() as u64, "Retry budget exhausted");
                    return Err(failure.into_error(attempt));
                }
            }
            if let Some(remaining) = ctx.remaining() {
                if delay >= remaining {
                    tracing::warn!(%method, url = %url, attempt, delay_ms = delay.as_millis() as u64, "Backoff would pass the deadline");
                    return Err(failure.into_error(attempt));
                }
            }

            tracing::warn!(
                %method,
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Request failed, retrying"
            );
            self.retries.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                cause = ctx.done() => return Err(cause.into_error(attempt)),
                _ = self.policy.sleeper.sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        sent_auth: &mut Option<String>,
    ) -> std::result::Result<Response, AttemptFailure> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(auth) = &self.auth {
            request = auth
                .prepare_request(ctx, request)
                .await
                .map_err(AttemptFailure::Rejected)?;
        }

        let request = request.build().map_err(transport_failure)?;
        *sent_auth = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let response = self.http.execute(request).await.map_err(transport_failure)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(AttemptFailure::Transport)?
            .to_vec();

        if status.is_success() {
            return Ok(Response {
                status,
                headers,
                body,
                attempts: 0,
            });
        }

        let error = classify_response(status, &headers, &String::from_utf8_lossy(&body));
        Err(AttemptFailure::Status {
            error,
            retry_after: parse_retry_after(&headers),
        })
    }
}

fn transport_failure(e: reqwest::Error) -> AttemptFailure {
    if e.is_builder() {
        AttemptFailure::Rejected(
            BitbucketError::validation(format!("could not build request: {e}")).with_source(e),
        )
    } else if e.is_connect() {
        AttemptFailure::Connect(e)
    } else {
        AttemptFailure::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(base_url: &str) -> HttpExecutor {
        HttpExecutor::new(Client::new(), base_url, None, RetryPolicy::no_retry()).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let executor = executor("https://api.bitbucket.org/2.0/");

        assert_eq!(
            executor.resolve("/user").unwrap().as_str(),
            "https://api.bitbucket.org/2.0/user"
        );
        assert_eq!(
            executor
                .resolve("https://api.bitbucket.org/2.0/repositories/ws?page=2")
                .unwrap()
                .as_str(),
            "https://api.bitbucket.org/2.0/repositories/ws?page=2"
        );
    }

    #[test]
    fn test_resolve_rejects_bad_paths() {
        let executor = executor("https://api.bitbucket.org/2.0");

        for path in ["", "user", "https://evil.example.com/2.0/user"] {
            let err = executor.resolve(path).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{path}");
        }
    }

    #[tokio::test]
    async fn test_validation_error_makes_no_attempt() {
        let executor = executor("http://127.0.0.1:9");
        let err = executor
            .execute(&RequestContext::background(), Method::GET, "", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(executor.stats().attempts, 0);
    }

    #[test]
    fn test_response_json_failure_keeps_status() {
        let response = Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: b"not json".to_vec(),
            attempts: 2,
        };

        let err = response.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.status_code, Some(200));
        assert_eq!(err.attempts, 2);
        assert_eq!(response.text(), "not json");
    }
}
