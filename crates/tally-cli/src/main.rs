//! Tally CLI - Personal finance tracker
//!
//! Usage:
//!   tally init                       Initialize database
//!   tally serve --port 3000          Start web server
//!   tally upload receipt.jpg --watch Upload a document and wait for proposals
//!   tally approve <proposal-id>      Apply a proposal to the ledger

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::ApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let client = || ApiClient::new(&cli.server, cli.email.as_deref());

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            ref host,
            no_auth,
            dev,
            ref upload_dir,
        } => {
            commands::cmd_serve(
                &cli.db,
                host,
                port,
                no_auth,
                dev,
                upload_dir.as_deref(),
                cli.no_encrypt,
            )
            .await
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::Process { ref document_id } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_process(&db, document_id).await
        }
        Commands::Accounts => commands::cmd_accounts(&client()).await,
        Commands::Transactions { ref account, limit } => {
            commands::cmd_transactions(&client(), account.as_deref(), limit).await
        }
        Commands::Upload {
            ref file,
            ref note,
            watch,
        } => commands::cmd_upload(&client(), file, note.as_deref(), watch).await,
        Commands::Proposals => commands::cmd_proposals(&client()).await,
        Commands::Approve { ref id, ref edits } => {
            commands::cmd_approve(&client(), id, edits).await
        }
        Commands::Reject { ref id } => commands::cmd_reject(&client(), id).await,
        Commands::Watch => commands::cmd_watch(&client()).await,
        Commands::Wealth {
            ref interval,
            periods,
        } => commands::cmd_wealth(&client(), interval, periods).await,
    }
}
