//! User registration and lookup

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use super::{new_id, parse_datetime, Database};
use crate::error::Result;
use crate::models::{CategoryType, User};

/// Categories every new user starts with
pub const DEFAULT_CATEGORIES: &[(&str, CategoryType)] = &[
    ("Food", CategoryType::Expense),
    ("Transportation", CategoryType::Expense),
    ("Shopping", CategoryType::Expense),
    ("Housing", CategoryType::Expense),
    ("Utilities", CategoryType::Expense),
    ("Entertainment", CategoryType::Expense),
    ("Health", CategoryType::Expense),
    ("Others", CategoryType::Expense),
    ("Salary", CategoryType::Income),
    ("Investment", CategoryType::Income),
    ("Other Income", CategoryType::Income),
];

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let created_at: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Find a user by email, registering them on first sight
    ///
    /// New users get `full_name` from the local part of the email and the
    /// `DEFAULT_CATEGORIES`, all in one transaction.
    pub fn get_or_create_user(&self, email: &str) -> Result<User> {
        let email = email.trim();
        if let Some(user) = self.get_user_by_email(email)? {
            return Ok(user);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = new_id();
        let full_name = email.split('@').next().unwrap_or(email).to_string();
        // Another request may have registered the same email concurrently
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO users (id, email, full_name) VALUES (?, ?, ?)",
            params![id, email, full_name],
        )?;

        if inserted == 1 {
            for (name, category_type) in DEFAULT_CATEGORIES {
                tx.execute(
                    "INSERT INTO categories (id, user_id, name, category_type) VALUES (?, ?, ?, ?)",
                    params![new_id(), id, name, category_type.as_str()],
                )?;
            }
        }
        tx.commit()?;

        if inserted == 1 {
            info!(email = %email, "Registered new user");
        }

        self.get_user_by_email(email)?
            .ok_or_else(|| crate::error::Error::NotFound(format!("User {}", email)))
    }

    /// Get a user by email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, full_name, created_at FROM users WHERE email = ?",
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Get a user by id
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, full_name, created_at FROM users WHERE id = ?",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Count registered users
    pub fn count_users(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}
