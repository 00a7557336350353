//! Chalk CLI - operator front end for the offline sync queue
//!
//! Inspect and drain the durable queue, pair teachers with students and
//! manage the signed-in Supabase session from the terminal.

mod auth;
mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{resolve_db_path, AppContext};
use crate::commands::invite::run_invite;
use crate::commands::link::run_link;
use crate::commands::queue::run_queue;
use crate::commands::sync::run_sync;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "chalk=info,chalk_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let ctx = AppContext::open(&db_path).await?;

    match cli.command {
        Commands::Queue { command } => run_queue(command, &ctx).await,
        Commands::Sync { watch, json } => run_sync(watch, json, &ctx).await,
        Commands::Invite { command } => run_invite(command, &ctx).await,
        Commands::Link { command } => run_link(command, &ctx).await,
        Commands::Auth { command } => run_auth(command, &ctx).await,
    }
}
