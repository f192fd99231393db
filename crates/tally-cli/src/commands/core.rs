//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database
//! - `cmd_process` - Run the document pipeline without the server

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tally_core::{db::Database, AIBackend, AIClient, DocumentProcessor};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server: tally serve");
    println!("  2. Upload a receipt: tally upload receipt.jpg --watch");

    Ok(())
}

/// Process one document synchronously against the local database
pub async fn cmd_process(db: &Database, document_id: &str) -> Result<()> {
    let ai = AIClient::from_env().ok_or_else(|| {
        anyhow!("No AI backend configured. Set GOOGLE_GENAI_KEY (or AI_BACKEND=openai_compatible)")
    })?;
    println!(
        "🤖 Processing {} with {} ({})",
        document_id,
        ai.model(),
        ai.host()
    );

    let processor = DocumentProcessor::new(db.clone(), ai);
    let summary = processor
        .process(document_id)
        .await
        .with_context(|| format!("Failed to process document {}", document_id))?;

    println!();
    println!("   Status: {}", summary.status);
    println!("   Extracted: {}", summary.extracted);
    if summary.skipped > 0 {
        println!("   Skipped (no amount): {}", summary.skipped);
    }
    println!("   Proposals: {}", summary.proposal_ids.len());
    if let Some(error) = summary.error {
        println!("   ❌ {}", error);
    }

    Ok(())
}
