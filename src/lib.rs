//
//  bitbucket-cli
//  lib.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Bitbucket Client Library
//!
//! The HTTP client core behind the `bb` command-line tool: an authenticated,
//! retrying, cancellable client for the Bitbucket Cloud REST API v2.0.
//!
//! ## Features
//!
//! - **Authentication**: API tokens, app passwords, access tokens and OAuth 2.0
//!   with PKCE, resolved from explicit input, environment or the credential store
//! - **Token Refresh**: OAuth tokens refreshed before expiry, once per session
//!   even under concurrent use
//! - **Retries**: Exponential backoff with jitter and `Retry-After` support
//! - **Pagination**: Lazy traversal of Bitbucket's `next`-linked list pages
//! - **Cancellation**: Every request honors a [`api::RequestContext`]
//! - **Typed Errors**: [`api::BitbucketError`] classified by [`api::ErrorKind`]
//!
//! ## Module Structure
//!
//! - [`cli`]: Command-line interface definitions using clap
//! - [`api`]: Client façade, executor, retry policy and pagination
//! - [`auth`]: Credentials, authenticators, the auth manager and storage
//! - [`config`]: Configuration file and environment handling
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bitbucket_client::api::{BitbucketClient, PageOptions, RequestContext};
//! use serde_json::Value;
//!
//! # async fn example() -> bitbucket_client::api::Result<()> {
//! let client = BitbucketClient::cloud()?;
//! let ctx = RequestContext::background();
//!
//! let mut pages = client.paginate::<Value>(
//!     "/repositories/atlassian",
//!     PageOptions::new().page_len(25).limit(100),
//! )?;
//! while let Some(page) = pages.next_page(&ctx).await? {
//!     println!("{} repositories", page.values.len());
//! }
//! # Ok(())
//! # }
//! ```

/// Command-line interface definitions.
///
/// Contains the `bb` commands, arguments, and subcommands defined using the
/// clap derive API.
pub mod cli;

/// Bitbucket Cloud API client.
///
/// The client handles authentication, request building, retries, pagination,
/// and error classification.
pub mod api;

/// Authentication and credential management.
///
/// Handles multiple authentication methods:
/// - Atlassian API tokens and app passwords (HTTP Basic)
/// - Repository, project and workspace access tokens (Bearer)
/// - OAuth 2.0 with PKCE and automatic refresh
/// - Credential storage in the system keychain or a private file
pub mod auth;

/// Configuration file management.
///
/// Manages the CLI's configuration stored in platform-specific locations:
/// - Linux: `~/.config/bb/config.toml`
/// - macOS: `~/Library/Application Support/bb/config.toml`
/// - Windows: `%APPDATA%\bb\config.toml`
pub mod config;

/// Re-export of the main CLI struct for convenient access.
///
/// # Example
///
/// ```rust,no_run
/// use clap::Parser;
/// use bitbucket_client::Cli;
///
/// let cli = Cli::parse();
/// // Handle cli.command...
/// ```
pub use cli::Cli;

/// Re-export of the configuration struct.
///
/// # Example
///
/// ```rust,no_run
/// use bitbucket_client::Config;
///
/// let config = Config::load().expect("Failed to load config");
/// println!("API: {}", config.api.base_url);
/// ```
pub use config::Config;

/// Application name constant.
///
/// The name of the CLI binary, used for display purposes and configuration paths.
pub const APP_NAME: &str = "bb";

/// Application version constant.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::VERSION;
///
/// println!("bb version {}", VERSION);
/// ```
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes for the CLI.
///
/// Standardized exit codes following Unix conventions, allowing scripts
/// to programmatically detect the outcome of CLI operations.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::{BitbucketError, ErrorKind};
/// use bitbucket_client::exit_codes;
///
/// let err = BitbucketError::not_found("Repository not found");
/// assert_eq!(exit_codes::for_error(&err), exit_codes::NOT_FOUND);
/// ```
pub mod exit_codes {
    use crate::api::{BitbucketError, ErrorKind};

    /// Successful execution.
    pub const SUCCESS: i32 = 0;

    /// General error.
    ///
    /// An unspecified error occurred during execution.
    /// Check stderr for details.
    pub const ERROR: i32 = 1;

    /// Invalid usage or arguments.
    pub const USAGE: i32 = 2;

    /// Authentication required or failed.
    ///
    /// Run `bb auth login` to authenticate.
    pub const AUTH_ERROR: i32 = 4;

    /// Resource not found.
    pub const NOT_FOUND: i32 = 8;

    /// Operation cancelled by user, typically with Ctrl+C, or the
    /// `--deadline` passed.
    pub const CANCELLED: i32 = 16;

    /// API rate limit exceeded.
    pub const RATE_LIMIT: i32 = 32;

    /// Maps a client error to the process exit code.
    pub fn for_error(error: &BitbucketError) -> i32 {
        if error.cancellation().is_some() {
            return CANCELLED;
        }
        match error.kind {
            ErrorKind::Authentication => AUTH_ERROR,
            ErrorKind::NotFound => NOT_FOUND,
            ErrorKind::RateLimit => RATE_LIMIT,
            ErrorKind::Validation => USAGE,
            _ => ERROR,
        }
    }

}
