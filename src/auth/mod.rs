//
//  bitbucket-cli
//  auth/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Authentication Module
//!
//! Credential handling for Bitbucket Cloud, supporting four schemes:
//!
//! - **API Token**: Atlassian account email plus API token, sent as Basic auth.
//! - **App Password**: Legacy username plus app password, sent as Basic auth.
//! - **Access Token**: Repository/workspace access token, sent as Bearer.
//! - **OAuth 2.0**: Access token with refresh token and expiry, sent as Bearer
//!   and refreshed shortly before it expires.
//!
//! ## Module Structure
//!
//! - [`store`]: Persistence of the single active credential (file or keyring)
//! - [`token`]: Shape validation and the `GET /user` identity check
//! - [`oauth`]: OAuth 2.0 refresh and interactive PKCE login
//! - [`authenticator`]: The per-scheme authenticators
//! - [`manager`]: [`AuthManager`], which selects and coordinates them
//!
//! ## Example
//!
//! ```rust
//! use bitbucket_client::auth::{AuthMethod, Credential};
//!
//! let credential = Credential::access_token("abc123");
//! assert_eq!(credential.method(), AuthMethod::AccessToken);
//! assert_eq!(credential.authorization_header(), "Bearer abc123");
//! ```

mod authenticator;
mod manager;
mod oauth;
mod store;
mod token;

pub use authenticator::*;
pub use manager::*;
pub use oauth::*;
pub use store::*;
pub use token::*;

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{BitbucketError, Result};

/// The credential schemes understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiToken,
    AppPassword,
    AccessToken,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ApiToken => "API token",
            Self::AppPassword => "app password",
            Self::AccessToken => "access token",
            Self::OAuth2 => "OAuth 2.0",
        };
        f.write_str(label)
    }
}

/// A single set of credentials for one scheme.
///
/// Exactly one variant is active at a time; only the OAuth 2.0 variant
/// carries an expiry. `Debug` output never includes secrets.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::auth::Credential;
///
/// let credential = Credential::api_token("alice@example.com", "s3cr3t");
/// assert_eq!(
///     credential.authorization_header(),
///     "Basic YWxpY2VAZXhhbXBsZS5jb206czNjcjN0"
/// );
/// assert!(!format!("{credential:?}").contains("s3cr3t"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Atlassian account email plus API token.
    ApiToken { email: String, token: String },

    /// Legacy username plus app password.
    AppPassword { username: String, password: String },

    /// Repository, project or workspace access token.
    AccessToken {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },

    /// OAuth 2.0 token pair.
    #[serde(rename = "oauth2")]
    OAuth2 {
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
}

impl Credential {
    pub fn api_token(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self::ApiToken {
            email: email.into(),
            token: token.into(),
        }
    }

    pub fn app_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::AppPassword {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn access_token(token: impl Into<String>) -> Self {
        Self::AccessToken {
            token: token.into(),
            scope: None,
        }
    }

    pub fn oauth2(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self::OAuth2 {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Self::ApiToken { .. } => AuthMethod::ApiToken,
            Self::AppPassword { .. } => AuthMethod::AppPassword,
            Self::AccessToken { .. } => AuthMethod::AccessToken,
            Self::OAuth2 { .. } => AuthMethod::OAuth2,
        }
    }

    /// The value of the `Authorization` header for this credential.
    ///
    /// API tokens and app passwords produce `Basic base64(id:secret)`;
    /// access tokens and OAuth 2.0 tokens produce `Bearer <token>`.
    pub fn authorization_header(&self) -> String {
        match self {
            Self::ApiToken { email, token } => basic_header(email, token),
            Self::AppPassword { username, password } => basic_header(username, password),
            Self::AccessToken { token, .. } => format!("Bearer {token}"),
            Self::OAuth2 { access_token, .. } => format!("Bearer {access_token}"),
        }
    }

    /// Checks that every required field is present and well formed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ApiToken { email, token } => {
                require_identifier("email", email)?;
                if !email.contains('@') {
                    return Err(BitbucketError::validation(
                        "API token authentication requires an Atlassian account email",
                    ));
                }
                require_secret("API token", token)
            }
            Self::AppPassword { username, password } => {
                require_identifier("username", username)?;
                require_secret("app password", password)
            }
            Self::AccessToken { token, .. } => require_secret("access token", token),
            Self::OAuth2 {
                access_token,
                refresh_token,
                ..
            } => {
                require_secret("OAuth access token", access_token)?;
                require_secret("OAuth refresh token", refresh_token)
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::OAuth2 { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    /// Whether an OAuth 2.0 token expires within `skew` of `now`.
    ///
    /// Always `false` for the other schemes.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self {
            Self::OAuth2 { expires_at, .. } => now + skew >= *expires_at,
            _ => false,
        }
    }

    /// The secret with all but its last four characters hidden.
    pub fn masked_secret(&self) -> String {
        let secret = match self {
            Self::ApiToken { token, .. } => token,
            Self::AppPassword { password, .. } => password,
            Self::AccessToken { token, .. } => token,
            Self::OAuth2 { access_token, .. } => access_token,
        };
        mask(secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiToken { email, .. } => f
                .debug_struct("ApiToken")
                .field("email", email)
                .field("token", &"<redacted>")
                .finish(),
            Self::AppPassword { username, .. } => f
                .debug_struct("AppPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::AccessToken { scope, .. } => f
                .debug_struct("AccessToken")
                .field("token", &"<redacted>")
                .field("scope", scope)
                .finish(),
            Self::OAuth2 { expires_at, .. } => f
                .debug_struct("OAuth2")
                .field("access_token", &"<redacted>")
                .field("refresh_token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

fn basic_header(identifier: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{identifier}:{secret}")))
}

fn require_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BitbucketError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_secret(field: &str, value: &str) -> Result<()> {
    if !validate_token(value) {
        return Err(BitbucketError::validation(format!(
            "{field} must be non-empty and contain no whitespace"
        )));
    }
    Ok(())
}

/// Hides all but the last four characters of a secret.
pub fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_for_app_password() {
        let credential = Credential::app_password("alice", "pw");
        assert_eq!(credential.authorization_header(), "Basic YWxpY2U6cHc=");
    }

    #[test]
    fn test_bearer_header_for_oauth() {
        let credential = Credential::oauth2("acc", "ref", Utc::now());
        assert_eq!(credential.authorization_header(), "Bearer acc");
    }

    #[test]
    fn test_needs_refresh_within_skew() {
        let now = Utc::now();
        let skew = Duration::seconds(60);
        let soon = Credential::oauth2("a", "r", now + Duration::seconds(30));
        let later = Credential::oauth2("a", "r", now + Duration::hours(1));
        assert!(soon.needs_refresh(now, skew));
        assert!(!later.needs_refresh(now, skew));
        assert!(!Credential::access_token("t").needs_refresh(now, skew));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(Credential::api_token("", "t").validate().is_err());
        assert!(Credential::api_token("not-an-email", "t").validate().is_err());
        assert!(Credential::app_password("bob", "has space").validate().is_err());
        assert!(Credential::access_token("").validate().is_err());
        assert!(Credential::api_token("a@b.co", "tok").validate().is_ok());
    }

    #[test]
    fn test_serde_tagging() {
        let credential = Credential::access_token("tok");
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["type"], "access_token");

        let oauth = Credential::oauth2("a", "r", Utc::now());
        let text = serde_json::to_string(&oauth).unwrap();
        assert!(text.contains("\"type\":\"oauth2\""));
        let back: Credential = serde_json::from_str(&text).unwrap();
        assert_eq!(back, oauth);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abcdefgh"), "****efgh");
        assert_eq!(mask("abc"), "***");
    }
}
