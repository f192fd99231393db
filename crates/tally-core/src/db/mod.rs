//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `users` - Lazy registration from the identity header, default categories
//! - `accounts` - Account CRUD and balance recalculation
//! - `categories` - Hierarchical income/expense categories
//! - `merchants` - Merchant directory with default categories
//! - `transactions` - Ledger CRUD, document links, match search
//! - `documents` - Uploaded document records and processing status
//! - `proposals` - Proposal upsert and the one-shot confirm state machine
//! - `reports` - Wealth chart reconstruction
//! - `audit` - Audit log

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod audit;
mod categories;
mod documents;
mod merchants;
mod proposals;
mod reports;
mod transactions;
mod users;

pub use accounts::{CASH_ACCOUNT_NAME, CASH_SUB_TYPE};
pub use audit::AuditEntry;
pub use documents::content_hash;
pub use proposals::{DUPLICATE_AMOUNT_TOLERANCE, NEW_ACCOUNT_KEY, TRANSACTIONS_KEY};
pub use reports::MAX_WEALTH_PERIODS;
pub use transactions::{TransactionSearch, MATCH_AMOUNT_TOLERANCE, MATCH_DATE_WINDOW_DAYS};
pub use users::DEFAULT_CATEGORIES;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Default page size when a caller does not pass `limit`
pub const DEFAULT_PAGE_LIMIT: i64 = 100;

/// Largest page a list operation returns
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path. This allows moving/renaming/restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-ok";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    // Hex-encode the raw hash for use as a SQLCipher raw key
    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Generate a new row identifier
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Clamp pagination parameters to sane values
pub(crate) fn page(skip: i64, limit: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    (skip.max(0), limit)
}

/// Whether `account_id` exists and belongs to `user_id`
pub(crate) fn account_owned(conn: &Connection, user_id: &str, account_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE id = ? AND user_id = ?",
            params![account_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether `category_id` exists and belongs to `user_id`
pub(crate) fn category_owned(conn: &Connection, user_id: &str, category_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM categories WHERE id = ? AND user_id = ?",
            params![category_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `TALLY_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `TALLY_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = match passphrase {
            Some(pass) => Some(format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?)),
            None => None,
        };

        // Every pooled connection needs the key and foreign key enforcement
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            if let Some(ref pragma) = key_pragma {
                conn.execute_batch(pragma)?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block writers (background processing
            -- writes while the API serves reads)
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Users (lazily registered from the identity header)
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                account_type TEXT NOT NULL,                 -- ASSET, LIABILITY
                sub_type TEXT,                              -- CASH, CHECKING, CREDIT_CARD, ...
                opening_balance REAL NOT NULL DEFAULT 0,
                current_balance REAL NOT NULL DEFAULT 0,    -- opening_balance + net of transactions
                currency TEXT NOT NULL DEFAULT 'USD',
                description TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);

            -- Categories (self-referencing hierarchy)
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                category_type TEXT NOT NULL,                -- INCOME, EXPENSE, TRANSFER
                parent_category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);

            -- Merchants
            CREATE TABLE IF NOT EXISTS merchants (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                default_category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_merchants_user ON merchants(user_id);

            -- Transactions (the ledger)
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                target_account_id TEXT REFERENCES accounts(id) ON DELETE CASCADE,
                category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
                amount REAL NOT NULL,
                transaction_type TEXT NOT NULL,             -- INCOME, EXPENSE, TRANSFER
                transaction_date TEXT NOT NULL,             -- YYYY-MM-DDTHH:MM:SS (UTC)
                note TEXT,
                merchant TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, transaction_date);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_target ON transactions(target_account_id);

            -- Uploaded documents
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                original_filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                user_note TEXT,
                status TEXT NOT NULL DEFAULT 'UPLOADED',    -- UPLOADED, PARSING, PROCESSED, ERROR
                error_message TEXT,
                content_hash TEXT,                          -- SHA-256 of file contents
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(user_id, content_hash);

            -- Which documents a transaction originated from
            CREATE TABLE IF NOT EXISTS transaction_documents (
                transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                attached_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (transaction_id, document_id)
            );

            -- Proposed ledger changes awaiting review
            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                target_transaction_id TEXT REFERENCES transactions(id) ON DELETE SET NULL,
                change_type TEXT NOT NULL,                  -- CREATE_NEW, UPDATE_EXISTING, CREATE_ACCOUNT
                status TEXT NOT NULL DEFAULT 'PENDING',     -- PENDING, APPROVED, REJECTED
                proposed_data TEXT NOT NULL,                -- JSON object
                confidence_score REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                decided_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_proposals_user_status ON proposals(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_proposals_document ON proposals(document_id);

            -- Audit log
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                user_email TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id TEXT,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
