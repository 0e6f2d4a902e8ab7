//
//  bitbucket-cli
//  api/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # API Client Layer
//!
//! The request substrate every Bitbucket Cloud feature builds on.
//!
//! ## Architecture
//!
//! - [`client`]: [`BitbucketClient`] façade and its builder
//! - [`executor`]: [`HttpExecutor`], one logical request with retries
//! - [`retry`]: [`RetryPolicy`], backoff schedules and the injectable sleeper
//! - [`context`]: [`RequestContext`], cancellation and deadlines
//! - [`paginator`]: [`Paginator`], lazy traversal of list endpoints
//! - [`common`]: Shared types (pagination, errors, user)
//!
//! ## Error Handling
//!
//! Every operation returns [`BitbucketError`], classified by [`ErrorKind`]:
//!
//! - `NotFound`: 404 Not Found
//! - `Authentication`: 401 Unauthorized, or a rejected token refresh
//! - `Permission`: 403 Forbidden
//! - `RateLimit`: 429 Too Many Requests
//! - `Server`: 5xx Server Errors
//! - `Network`: transport failures and cancellation
//! - `Validation`: bad input caught before any request is sent
//! - `Unknown`: any other non-success response
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bitbucket_client::api::{BitbucketClient, ErrorKind, RequestContext};
//!
//! # async fn example() -> bitbucket_client::api::Result<()> {
//! let client = BitbucketClient::cloud()?;
//! let ctx = RequestContext::background();
//!
//! match client.get(&ctx, "/repositories/ghost/ghost").await {
//!     Ok(response) => println!("{}", response.text()),
//!     Err(e) if e.kind == ErrorKind::NotFound => println!("no such repository"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;

pub mod common;

pub mod context;

pub mod executor;

pub mod paginator;

pub mod retry;

pub use client::{
    build_http_client, repository_path, workspace_path, BitbucketClient, ClientBuilder,
    DEFAULT_TIMEOUT,
};
pub use common::*;
pub use context::{Cancellation, RequestContext};
pub use executor::{ExecutorStats, HttpExecutor, Response};
pub use paginator::Paginator;
pub use retry::{
    default_retryable, AttemptFailure, Backoff, InstantSleeper, RetryPolicy, RetryPredicate,
    Sleeper, TokioSleeper,
};
