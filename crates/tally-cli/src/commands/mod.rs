//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Local database commands (init, process) and shared utilities (open_db)
//! - `client` - HTTP client for the Tally API
//! - `documents` - Upload and watch commands
//! - `proposals` - Proposal review commands (list, approve, reject)
//! - `reports` - Report commands (wealth)
//! - `serve` - Web server command
//! - `status` - Local database status
//! - `transactions` - Account and transaction listings

pub mod client;
pub mod core;
pub mod documents;
pub mod proposals;
pub mod reports;
pub mod serve;
pub mod status;
pub mod transactions;

// Re-export command functions for main.rs
pub use client::*;
pub use self::core::*;
pub use documents::*;
pub use proposals::*;
pub use reports::*;
pub use serve::*;
pub use status::*;
pub use transactions::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
