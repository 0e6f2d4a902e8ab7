//
//  bitbucket-cli
//  config/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Configuration Module
//!
//! Loads the client configuration from a TOML file in the platform config
//! directory and captures credential environment variables once.
//!
//! ## Configuration File Location
//!
//! - **Linux**: `~/.config/bb/config.toml`
//! - **macOS**: `~/Library/Application Support/bb/config.toml`
//! - **Windows**: `C:\Users\<User>\AppData\Roaming\bb\config.toml`
//!
//! ## Example Configuration File
//!
//! ```toml
//! [api]
//! base_url = "https://api.bitbucket.org/2.0"
//! timeout_secs = 30
//! max_attempts = 3
//!
//! [auth]
//! store = "keyring"
//! refresh_skew_secs = 60
//! oauth_client_id = "my-consumer-key"
//! ```
//!
//! Every field is optional. `BB_API_URL` overrides `api.base_url`.
//!
//! ## Submodules
//!
//! - [`file`]: Atomic file writes shared with the credential store

mod file;

pub use file::*;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::api::{Backoff, RetryPolicy};
use crate::auth::{OAuthClientConfig, DEFAULT_AUTHORIZE_URL, DEFAULT_CLIENT_ID, DEFAULT_TOKEN_URL};

/// Bitbucket Cloud REST API v2.0 endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.bitbucket.org/2.0";

/// Environment variable overriding the API base URL.
pub const BASE_URL_ENV: &str = "BB_API_URL";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Per-attempt timeout.
    pub timeout_secs: u64,

    /// Total attempts per request, including the first.
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Bound on total time spent retrying one request.
    pub max_elapsed_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            max_elapsed_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy described by these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(Backoff::Exponential {
                initial: Duration::from_millis(self.initial_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms),
                jitter: true,
            })
            .with_max_elapsed(Some(Duration::from_secs(self.max_elapsed_secs)))
    }
}

/// Where the active credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Keyring,
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub store: StoreBackend,

    /// OAuth tokens expiring within this window are refreshed before use.
    pub refresh_skew_secs: u64,

    pub oauth_client_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,

    pub token_url: String,

    pub authorize_url: String,

    /// Local port for the OAuth redirect listener.
    pub callback_port: u16,

    /// How long interactive login waits for the browser redirect.
    pub login_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::File,
            refresh_skew_secs: 60,
            oauth_client_id: DEFAULT_CLIENT_ID.to_string(),
            oauth_client_secret: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            callback_port: 8085,
            login_timeout_secs: 300,
        }
    }
}

impl AuthConfig {
    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.refresh_skew_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn oauth_client(&self) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: self.oauth_client_id.clone(),
            client_secret: self.oauth_client_secret.clone(),
            token_url: self.token_url.clone(),
            authorize_url: self.authorize_url.clone(),
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults when it is absent,
    /// then applies environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let content = read_config_file(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.api.base_url = url.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        write_atomic(&path, &content, None)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", crate::APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().to_path_buf())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

/// Credential environment variables, read once at startup.
///
/// Empty values are treated as unset.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvCredentials {
    /// `BITBUCKET_EMAIL`
    pub email: Option<String>,
    /// `BITBUCKET_API_TOKEN`
    pub api_token: Option<String>,
    /// `BITBUCKET_USERNAME`
    pub username: Option<String>,
    /// `BITBUCKET_PASSWORD`
    pub password: Option<String>,
    /// `BITBUCKET_TOKEN`
    pub token: Option<String>,
}

impl std::fmt::Debug for EnvCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredentials")
            .field("email", &self.email)
            .field("api_token", &self.api_token.as_ref().map(|_| "<set>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .field("token", &self.token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the set from an arbitrary lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            email: read("BITBUCKET_EMAIL"),
            api_token: read("BITBUCKET_API_TOKEN"),
            username: read("BITBUCKET_USERNAME"),
            password: read("BITBUCKET_PASSWORD"),
            token: read("BITBUCKET_TOKEN"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.auth.store, StoreBackend::File);
        assert_eq!(config.auth.refresh_skew_secs, 60);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            "[api]\nmax_attempts = 5\n\n[auth]\nstore = \"keyring\"\n",
        )
        .unwrap();
        assert_eq!(config.api.max_attempts, 5);
        assert_eq!(config.api.initial_backoff_ms, 500);
        assert_eq!(config.auth.store, StoreBackend::Keyring);
        assert_eq!(config.api.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_env_lookup_ignores_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("BITBUCKET_EMAIL", "a@b.co"),
            ("BITBUCKET_API_TOKEN", "  "),
            ("BITBUCKET_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let env = EnvCredentials::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(env.email.as_deref(), Some("a@b.co"));
        assert!(env.api_token.is_none());
        assert_eq!(env.token.as_deref(), Some("tok"));
        assert!(format!("{env:?}").contains("<set>"));
    }
}
