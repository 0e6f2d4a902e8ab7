//
//  bitbucket-cli
//  api/common/error.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Error taxonomy for the Bitbucket client core
//!
//! Every failure produced by the client is a [`BitbucketError`] carrying an
//! [`ErrorKind`]. The kind is derived from the HTTP status (and, for the
//! message, the body shape) by [`classify_response`]; it never depends on
//! which endpoint was called.
//!
//! # Classification
//!
//! | Status | Kind |
//! |--------|------|
//! | 401 | `Authentication` |
//! | 403 | `Permission` |
//! | 404 | `NotFound` |
//! | 429 | `RateLimit` |
//! | 5xx | `Server` |
//! | other non-2xx | `Unknown` |
//!
//! `Network` covers transport failures and cancellation, `Validation` covers
//! malformed requests rejected before any network call.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used throughout the client core.
pub type Result<T, E = BitbucketError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a [`BitbucketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 404, or a credential lookup that found nothing.
    NotFound,
    /// HTTP 401, or a rejected refresh token.
    Authentication,
    /// HTTP 403.
    Permission,
    /// HTTP 429.
    RateLimit,
    /// Malformed request detected client-side.
    Validation,
    /// Connection, DNS, timeout or cancellation.
    Network,
    /// HTTP 5xx.
    Server,
    /// Any other non-2xx response.
    Unknown,
}

impl ErrorKind {
    /// Maps a non-success HTTP status to its kind.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => Self::Authentication,
            403 => Self::Permission,
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not found",
            Self::Authentication => "authentication failed",
            Self::Permission => "permission denied",
            Self::RateLimit => "rate limit exceeded",
            Self::Validation => "invalid request",
            Self::Network => "network error",
            Self::Server => "server error",
            Self::Unknown => "unexpected response",
        };
        f.write_str(label)
    }
}

/// The typed error returned by every client operation.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::{BitbucketError, ErrorKind};
///
/// let err = BitbucketError::validation("workspace must not be empty");
/// assert_eq!(err.kind, ErrorKind::Validation);
/// assert!(err.status_code.is_none());
/// ```
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct BitbucketError {
    /// The classification of this failure.
    pub kind: ErrorKind,

    /// HTTP status of the response, when one was received.
    pub status_code: Option<u16>,

    /// Human readable message, extracted from the response body when possible.
    pub message: String,

    /// Server-requested wait before retrying (rate limiting only).
    pub retry_after: Option<Duration>,

    /// Number of attempts made before this error was surfaced.
    pub attempts: u32,

    #[source]
    source: Option<BoxError>,
}

impl BitbucketError {
    /// Creates an error of the given kind with no HTTP status.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
            attempts: 0,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Wraps a transport-level failure.
    pub fn network(source: reqwest::Error) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::Network, message).with_source(source)
    }

    /// Attaches an underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_auth_error(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }

    /// Set when the request stopped because its context was cancelled or
    /// its deadline passed.
    pub fn cancellation(&self) -> Option<crate::api::Cancellation> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<crate::api::Cancellation>())
            .copied()
    }

    /// Returns a short, actionable hint for command-line users.
    pub fn hint(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::Authentication => Some("Run `bb auth login` to authenticate again."),
            ErrorKind::Permission => Some("Check that your credential has the required scopes."),
            ErrorKind::RateLimit => Some("Wait a moment before retrying."),
            _ => None,
        }
    }
}

/// Builds the error for a non-success response.
///
/// The kind is a pure function of `status`; `headers` only contribute the
/// `Retry-After` value for 429 responses, and `body` only the message.
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> BitbucketError {
    let kind = ErrorKind::from_status(status);
    let message = extract_error_message(body).unwrap_or_else(|| generic_message(status));

    let retry_after = if kind == ErrorKind::RateLimit {
        parse_retry_after(headers)
    } else {
        None
    };

    BitbucketError {
        kind,
        status_code: Some(status.as_u16()),
        message,
        retry_after,
        attempts: 0,
        source: None,
    }
}

fn generic_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// Pulls a message out of a Bitbucket JSON error body.
///
/// Recognises `{"error": {"message": ..}}`, `{"error": {"detail": ..}}`,
/// `{"errors": [{"message": ..}]}` and `{"message": ..}`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;

    let candidates = [
        json.get("error").and_then(|e| e.get("message")),
        json.get("errors")
            .and_then(|e| e.as_array())
            .and_then(|arr| arr.first())
            .and_then(|e| e.get("message")),
        json.get("error").and_then(|e| e.get("detail")),
        json.get("message"),
    ];

    let message = candidates
        .into_iter()
        .flatten()
        .filter_map(|m| m.as_str())
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(String::from);
    message
}

/// Parses a `Retry-After` header as delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}
