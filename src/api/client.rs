//
//  bitbucket-cli
//  api/client.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # HTTP Client Wrapper for Bitbucket API
//!
//! [`BitbucketClient`] is the façade every feature service uses. It wires
//! the [`AuthManager`] and the [`HttpExecutor`] together and offers
//! `get`/`post`/`put`/`delete`, typed JSON helpers and pagination.
//!
//! ## Features
//!
//! - Authentication header injection with OAuth refresh
//! - Retry with exponential backoff and `Retry-After` support
//! - Cancellation through [`RequestContext`]
//! - Typed errors ([`BitbucketError`]) for every failure
//! - Custom User-Agent header
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bitbucket_client::api::{BitbucketClient, RequestContext, User};
//! use bitbucket_client::auth::AuthManager;
//! use bitbucket_client::config::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let http = bitbucket_client::api::build_http_client(config.api.timeout())?;
//! let auth = Arc::new(AuthManager::from_config(&config, http)?);
//! let client = BitbucketClient::from_config(&config, Some(auth))?;
//!
//! let ctx = RequestContext::background();
//! let user: User = client.get_json(&ctx, "/user").await?;
//! println!("Logged in as {}", user.label());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::AuthManager;
use crate::config::{Config, DEFAULT_BASE_URL};

use super::common::{BitbucketError, ErrorKind, PageOptions, Result, User};
use super::context::RequestContext;
use super::executor::{ExecutorStats, HttpExecutor, Response};
use super::paginator::Paginator;
use super::retry::RetryPolicy;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the `reqwest` client shared by the executor and the auth layer.
///
/// `timeout` bounds each attempt, not the whole retry sequence.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(format!("bb/{}", crate::VERSION))
        .timeout(timeout)
        .build()
        .map_err(|e| {
            BitbucketError::new(ErrorKind::Unknown, "failed to create HTTP client").with_source(e)
        })
}

/// Builder for [`BitbucketClient`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use bitbucket_client::api::{BitbucketClient, RetryPolicy};
///
/// let client = BitbucketClient::builder()
///     .base_url("https://api.bitbucket.org/2.0")
///     .timeout(Duration::from_secs(10))
///     .retry_policy(RetryPolicy::default().with_max_attempts(5))
///     .build()
///     .unwrap();
/// assert_eq!(client.base_url(), "https://api.bitbucket.org/2.0");
/// ```
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    base_url: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
    auth: Option<Arc<AuthManager>>,
    http: Option<Client>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            auth: None,
            http: None,
        }
    }
}

impl ClientBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Per-attempt timeout. Ignored when a client is supplied with
    /// [`http_client`](Self::http_client).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Uses an existing `reqwest` client instead of building one.
    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<BitbucketClient> {
        let http = match self.http {
            Some(http) => http,
            None => build_http_client(self.timeout)?,
        };
        let executor = HttpExecutor::new(http, &self.base_url, self.auth, self.retry_policy)?;
        Ok(BitbucketClient {
            executor: Arc::new(executor),
        })
    }
}

/// The main HTTP client for interacting with the Bitbucket Cloud API.
///
/// Cheap to clone; clones share the executor, its counters and the
/// authentication session.
#[derive(Debug, Clone)]
pub struct BitbucketClient {
    executor: Arc<HttpExecutor>,
}

impl BitbucketClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Unauthenticated client for `https://api.bitbucket.org/2.0` with the
    /// default retry policy.
    pub fn cloud() -> Result<Self> {
        Self::builder().build()
    }

    /// Client configured from `config`, authenticating through `auth`.
    pub fn from_config(config: &Config, auth: Option<Arc<AuthManager>>) -> Result<Self> {
        let mut builder = Self::builder()
            .base_url(config.api.base_url.clone())
            .timeout(config.api.timeout())
            .retry_policy(config.api.retry_policy());
        if let Some(auth) = auth {
            builder = builder.auth(auth);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }

    pub fn auth(&self) -> Option<&Arc<AuthManager>> {
        self.executor.auth()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Sends a request with an optional JSON body.
    ///
    /// `path` is relative to the base URL (`/user`) or an absolute URL on
    /// the same host.
    pub async fn request(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        self.executor.execute(ctx, method, path, body).await
    }

    pub async fn get(&self, ctx: &RequestContext, path: &str) -> Result<Response> {
        self.request(ctx, Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        let body = to_json_body(body)?;
        self.request(ctx, Method::POST, path, Some(&body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        let body = to_json_body(body)?;
        self.request(ctx, Method::PUT, path, Some(&body)).await
    }

    pub async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<Response> {
        self.request(ctx, Method::DELETE, path, None).await
    }

    /// GETs `path` and decodes the JSON body into `T`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bitbucket_client::api::{BitbucketClient, RequestContext, User};
    ///
    /// # async fn example(client: BitbucketClient) -> bitbucket_client::api::Result<()> {
    /// let user: User = client.get_json(&RequestContext::background(), "/user").await?;
    /// println!("{}", user.username);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &RequestContext, path: &str) -> Result<T> {
        self.get(ctx, path).await?.json()
    }

    pub async fn post_json<T, B>(&self, ctx: &RequestContext, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.post(ctx, path, body).await?.json()
    }

    pub async fn put_json<T, B>(&self, ctx: &RequestContext, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.put(ctx, path, body).await?.json()
    }

    /// Starts a lazy traversal of a list endpoint.
    pub fn paginate<T: DeserializeOwned>(&self, path: &str, options: PageOptions) -> Result<Paginator<T>> {
        Paginator::new(Arc::clone(&self.executor), path, options)
    }

    /// The authenticated account.
    ///
    /// With an [`AuthManager`] the identity is checked once per session;
    /// without one this is a plain `GET /user`.
    pub async fn current_user(&self, ctx: &RequestContext) -> Result<User> {
        match self.auth() {
            Some(auth) => auth.authenticated_user(ctx).await,
            None => self.get_json(ctx, "/user").await,
        }
    }
}

fn to_json_body<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| {
        BitbucketError::validation(format!("request body is not valid JSON: {e}")).with_source(e)
    })
}

fn require_segment(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BitbucketError::validation(format!("{name} must not be empty")));
    }
    if value.contains('/') || value.contains('?') || value.contains('#') {
        return Err(BitbucketError::validation(format!(
            "{name} must be a single path segment: {value}"
        )));
    }
    Ok(())
}

/// `/repositories/{workspace}`, rejecting empty or multi-segment input.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::{workspace_path, ErrorKind};
///
/// assert_eq!(workspace_path("acme").unwrap(), "/repositories/acme");
/// assert_eq!(workspace_path("").unwrap_err().kind, ErrorKind::Validation);
/// ```
pub fn workspace_path(workspace: &str) -> Result<String> {
    require_segment("workspace", workspace)?;
    Ok(format!("/repositories/{workspace}"))
}

/// `/repositories/{workspace}/{repo}`.
pub fn repository_path(workspace: &str, repo: &str) -> Result<String> {
    require_segment("workspace", workspace)?;
    require_segment("repository", repo)?;
    Ok(format!("/repositories/{workspace}/{repo}"))
}
