//
//  bitbucket-cli
//  cli/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! CLI command definitions using clap derive macros

mod api;
mod auth;

pub use api::ApiCommand;
pub use auth::AuthCommand;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::api::{build_http_client, BitbucketClient, RequestContext};
use crate::auth::AuthManager;
use crate::config::Config;

/// Bitbucket CLI - Work with the Bitbucket Cloud API from the command line
#[derive(Parser, Debug)]
#[command(
    name = "bb",
    version,
    about = "Work with the Bitbucket Cloud API from the command line",
    propagate_version = true,
    after_help = "Use 'bb <command> --help' for more information about a command."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Overall deadline for the command, in seconds
    #[arg(long, global = true, env = "BB_DEADLINE")]
    pub deadline: Option<u64>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Bitbucket
    #[command(visible_alias = "login")]
    Auth(AuthCommand),

    /// Make API requests
    Api(ApiCommand),

    /// Print version information
    Version,
}

/// Everything a command needs to talk to Bitbucket.
pub struct Session {
    pub config: Config,
    pub auth: Arc<AuthManager>,
    pub client: BitbucketClient,
    pub ctx: RequestContext,
}

impl Session {
    /// Loads configuration, selects the credential and builds the client.
    ///
    /// `cancel` is tied to Ctrl+C by the binary.
    pub fn open(global: &GlobalOptions, cancel: CancellationToken) -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        let http = build_http_client(config.api.timeout())?;
        let auth = Arc::new(AuthManager::from_config(&config, http.clone())?);
        let client = BitbucketClient::builder()
            .base_url(config.api.base_url.clone())
            .retry_policy(config.api.retry_policy())
            .http_client(http)
            .auth(Arc::clone(&auth))
            .build()?;

        let mut ctx = RequestContext::with_token(cancel);
        if let Some(secs) = global.deadline {
            ctx = ctx.with_timeout(std::time::Duration::from_secs(secs));
        }

        Ok(Self {
            config,
            auth,
            client,
            ctx,
        })
    }
}
