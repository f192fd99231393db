//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Turn receipts and statements into a reviewed ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Self-hosted personal finance tracker with AI document intake", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Server URL for client commands
    #[arg(
        long,
        env = "TALLY_SERVER",
        default_value = "http://127.0.0.1:3000",
        global = true
    )]
    pub server: String,

    /// Identity sent to the server (the proxy normally sets this)
    #[arg(long, env = "TALLY_EMAIL", global = true)]
    pub email: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, every request must carry the identity header set by
        /// the authenticating proxy.
        #[arg(long)]
        no_auth: bool,

        /// Allow cross-origin requests from a local frontend dev server
        #[arg(long)]
        dev: bool,

        /// Directory for uploaded documents (default: TALLY_UPLOAD_DIR or ./uploads)
        #[arg(long)]
        upload_dir: Option<PathBuf>,
    },

    /// Show database status (encryption, users, documents, proposals)
    Status,

    /// Process an uploaded document against the local database
    Process {
        /// Document ID
        document_id: String,
    },

    /// List accounts
    Accounts,

    /// List transactions
    Transactions {
        /// Only transactions touching this account
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum number to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Upload a receipt image or statement PDF
    Upload {
        /// File to upload
        file: PathBuf,

        /// Note passed to the AI along with the document
        #[arg(short, long)]
        note: Option<String>,

        /// Wait for processing and show the resulting proposals
        #[arg(short, long)]
        watch: bool,
    },

    /// List pending proposals
    Proposals,

    /// Approve a proposal
    Approve {
        /// Proposal ID
        id: String,

        /// Override a proposed field (key=value, value parsed as JSON when possible)
        #[arg(short, long = "edit", value_name = "KEY=VALUE")]
        edits: Vec<String>,
    },

    /// Reject a proposal
    Reject {
        /// Proposal ID
        id: String,
    },

    /// Poll until every document has finished processing
    Watch,

    /// Show net worth over time
    Wealth {
        /// Bucket size: day, month, year
        #[arg(short, long, default_value = "month")]
        interval: String,

        /// Number of points (defaults depend on the interval)
        #[arg(short, long)]
        periods: Option<u32>,
    },
}
