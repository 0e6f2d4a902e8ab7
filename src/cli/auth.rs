//
//  bitbucket-cli
//  cli/auth.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Authentication commands for the Bitbucket CLI.
//!
//! `bb auth login` stores a credential after confirming it against
//! `GET /user`; `status`, `refresh` and `logout` operate on the stored
//! session. Credentials from `BITBUCKET_*` environment variables take
//! precedence over the stored one.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::api::build_http_client;
use crate::auth::{oauth_login, read_token_from_stdin, validate_token, Credential};

use super::{GlobalOptions, Session};

/// Authenticate with Bitbucket.
#[derive(Args, Debug)]
pub struct AuthCommand {
    #[command(subcommand)]
    pub command: AuthSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthSubcommand {
    /// Log in to Bitbucket
    Login(LoginArgs),

    /// Log out of Bitbucket
    Logout,

    /// View authentication status
    Status(StatusArgs),

    /// Refresh OAuth token
    Refresh,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Read the secret from standard input
    #[arg(long)]
    pub with_token: bool,

    /// Atlassian account email; the secret is an API token
    #[arg(long, conflicts_with = "username")]
    pub email: Option<String>,

    /// Bitbucket username; the secret is an app password
    #[arg(long)]
    pub username: Option<String>,

    /// Open browser for OAuth authentication
    #[arg(long, conflicts_with_all = ["with_token", "email", "username"])]
    pub web: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show the authentication token (masked)
    #[arg(long, short = 't')]
    pub show_token: bool,
}

impl AuthCommand {
    pub async fn run(&self, global: &GlobalOptions, cancel: CancellationToken) -> Result<()> {
        let session = Session::open(global, cancel)?;
        match &self.command {
            AuthSubcommand::Login(args) => login(&session, args).await,
            AuthSubcommand::Logout => logout(&session).await,
            AuthSubcommand::Status(args) => status(&session, args, global).await,
            AuthSubcommand::Refresh => refresh(&session).await,
        }
    }
}

/// Performs the login flow.
async fn login(session: &Session, args: &LoginArgs) -> Result<()> {
    let credential = if args.web {
        let auth = &session.config.auth;
        let http = build_http_client(session.config.api.timeout())?;
        eprintln!("Opening browser for authentication...");
        oauth_login(
            &http,
            &auth.oauth_client(),
            auth.callback_port,
            Duration::from_secs(auth.login_timeout_secs),
            &session.ctx,
            |url| {
                eprintln!("If the browser doesn't open, visit this URL:");
                eprintln!("{url}");
            },
        )
        .await?
    } else if args.with_token {
        let secret = read_token_from_stdin().context("Failed to read token from stdin")?;
        if !validate_token(&secret) {
            bail!("Invalid token format");
        }
        match (&args.email, &args.username) {
            (Some(email), _) => Credential::api_token(email.as_str(), secret),
            (None, Some(username)) => Credential::app_password(username.as_str(), secret),
            (None, None) => Credential::access_token(secret),
        }
    } else {
        bail!("Use --with-token to read a token from stdin, or --web to log in with a browser");
    };

    eprintln!("Validating credential...");
    let user = session.auth.login(&session.ctx, credential).await?;
    println!("Logged in as {}", user.label());
    Ok(())
}

async fn logout(session: &Session) -> Result<()> {
    session.auth.logout().await?;
    println!("Logged out");
    Ok(())
}

async fn status(session: &Session, args: &StatusArgs, global: &GlobalOptions) -> Result<()> {
    let mut status = session.auth.status().await;
    if status.authenticated && status.user.is_none() {
        match session.auth.authenticated_user(&session.ctx).await {
            Ok(user) => status.user = Some(user),
            Err(e) => {
                tracing::debug!(error = %e, "Identity check failed");
                status = session.auth.status().await;
            }
        }
    }

    if global.json {
        let json = serde_json::json!({
            "authenticated": status.authenticated,
            "method": status.method.map(|m| m.to_string()),
            "source": status.source.map(|s| s.to_string()),
            "user": status.user.as_ref().map(|u| u.username.clone()),
            "expires_at": status.expires_at.map(|t| t.to_rfc3339()),
        });
        println!("{json}");
        return Ok(());
    }

    if !status.authenticated {
        println!("Not logged in to Bitbucket");
        if let Some(reason) = &status.reason {
            println!("  Reason: {reason}");
        }
        println!();
        println!("Run 'bb auth login' to authenticate");
        return Ok(());
    }

    println!("{}", session.config.api.base_url);
    if let Some(user) = &status.user {
        println!("  Logged in as: {}", user.label());
    }
    if let Some(method) = status.method {
        println!("  Method: {method}");
    }
    if let Some(source) = status.source {
        println!("  Source: {source}");
    }
    if let Some(expires_at) = status.expires_at {
        println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if args.show_token {
        if let Some(masked) = &status.masked_secret {
            println!("  Token: {masked}");
        }
    }

    Ok(())
}

async fn refresh(session: &Session) -> Result<()> {
    eprintln!("Refreshing token...");
    if session.auth.refresh(&session.ctx).await? {
        println!("Token refreshed successfully");
        if let Some(expires_at) = session.auth.status().await.expires_at {
            let remaining = expires_at - chrono::Utc::now();
            println!(
                "New token expires in {} hours {} minutes",
                remaining.num_hours(),
                remaining.num_minutes() % 60
            );
        }
    } else {
        println!("The active credential does not expire; nothing to refresh");
    }
    Ok(())
}
