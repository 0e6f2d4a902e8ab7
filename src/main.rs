//
//  bitbucket-cli
//  main.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitbucket_client::api::BitbucketError;
use bitbucket_client::cli::{Cli, Commands};
use bitbucket_client::exit_codes;

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Ctrl+C cancels whatever request is in flight
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupted, cancelling in-flight requests");
            on_signal.cancel();
        }
    });

    // Execute command
    let result = run(cli, cancel).await;

    // Handle result and exit
    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = match e.downcast_ref::<BitbucketError>() {
                Some(api_error) => {
                    if let Some(hint) = api_error.hint() {
                        eprintln!("{hint}");
                    }
                    exit_codes::for_error(api_error)
                }
                None => exit_codes::ERROR,
            };
            std::process::exit(code);
        }
    }
}

/// Initialize logging based on environment
fn init_logging() {
    let filter = EnvFilter::try_from_env("BB_DEBUG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Main command dispatcher
async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Commands::Auth(cmd) => cmd.run(&cli.global, cancel).await,
        Commands::Api(cmd) => cmd.run(&cli.global, cancel).await,
        Commands::Version => {
            println!("bb version {}", bitbucket_client::VERSION);
            Ok(())
        }
    }
}
