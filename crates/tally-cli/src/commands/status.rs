//! Status command implementation

use std::path::Path;

use anyhow::Result;
use tally_core::db::{Database, DB_KEY_ENV};
use tally_core::models::DocumentStatus;

use super::open_db;

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => print_counts(&db)?,
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

/// Users, documents by status and the review backlog
pub fn print_counts(db: &Database) -> Result<()> {
    let by_status = db.count_documents_by_status()?;
    let count_of = |status: DocumentStatus| {
        by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    println!();
    println!("   Users: {}", db.count_users()?);
    println!(
        "   Documents: {} uploaded, {} parsing, {} processed, {} failed",
        count_of(DocumentStatus::Uploaded),
        count_of(DocumentStatus::Parsing),
        count_of(DocumentStatus::Processed),
        count_of(DocumentStatus::Error)
    );
    println!("   Pending proposals: {}", db.count_pending_proposals()?);
    Ok(())
}
