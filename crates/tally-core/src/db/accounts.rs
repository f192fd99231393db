//! Account operations and balance maintenance

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::{new_id, page, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Account, AccountType, AccountUpdate, NewAccount};

/// Name and sub-type of the fallback account for receipts with no known account
pub const CASH_ACCOUNT_NAME: &str = "Petty Cash";
pub const CASH_SUB_TYPE: &str = "CASH";

const ACCOUNT_COLUMNS: &str = "id, user_id, name, account_type, sub_type, current_balance, currency, description, created_at";

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    let account_type: String = row.get(3)?;
    let created_at: String = row.get(8)?;
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        account_type: account_type.parse().unwrap_or(AccountType::Asset),
        sub_type: row.get(4)?,
        current_balance: row.get(5)?,
        currency: row.get(6)?,
        description: row.get(7)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Insert an account row, returning its id
pub(crate) fn insert_account(conn: &Connection, user_id: &str, account: &NewAccount) -> Result<String> {
    let name = account.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidData("Account name is required".into()));
    }
    if !account.current_balance.is_finite() {
        return Err(Error::InvalidData("Opening balance must be a number".into()));
    }

    let id = new_id();
    conn.execute(
        r#"
        INSERT INTO accounts (id, user_id, name, account_type, sub_type, opening_balance,
                              current_balance, currency, description)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)
        "#,
        params![
            id,
            user_id,
            name,
            account.account_type.as_str(),
            account.sub_type,
            account.current_balance,
            account.currency,
            account.description,
        ],
    )?;
    Ok(id)
}

/// Recompute `current_balance` from the opening balance and the ledger
///
/// INCOME and incoming TRANSFERs add; EXPENSE and outgoing TRANSFERs subtract.
pub(crate) fn recalculate_balance(conn: &Connection, account_id: &str) -> Result<f64> {
    conn.execute(
        r#"
        UPDATE accounts SET current_balance = opening_balance
            + COALESCE((
                SELECT SUM(CASE transaction_type
                    WHEN 'INCOME' THEN amount
                    WHEN 'EXPENSE' THEN -amount
                    WHEN 'TRANSFER' THEN -amount
                    ELSE 0 END)
                FROM transactions WHERE account_id = ?1), 0)
            + COALESCE((
                SELECT SUM(amount) FROM transactions
                WHERE target_account_id = ?1 AND transaction_type = 'TRANSFER'), 0)
        WHERE id = ?1
        "#,
        params![account_id],
    )?;

    let balance: Option<f64> = conn
        .query_row(
            "SELECT current_balance FROM accounts WHERE id = ?",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?;
    debug!(account_id = %account_id, balance = ?balance, "Recalculated balance");
    Ok(balance.unwrap_or(0.0))
}

pub(crate) fn fetch_account(conn: &Connection, user_id: &str, id: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!(
                "SELECT {} FROM accounts WHERE id = ? AND user_id = ?",
                ACCOUNT_COLUMNS
            ),
            params![id, user_id],
            row_to_account,
        )
        .optional()?;
    Ok(account)
}

impl Database {
    /// List a user's accounts
    pub fn list_accounts(&self, user_id: &str, skip: i64, limit: Option<i64>) -> Result<Vec<Account>> {
        let (skip, limit) = page(skip, limit);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE user_id = ? ORDER BY created_at, name LIMIT ? OFFSET ?",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![user_id, limit, skip], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Get an account by ID
    pub fn get_account(&self, user_id: &str, id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        fetch_account(&conn, user_id, id)
    }

    /// Find an account by name (case-insensitive)
    pub fn find_account_by_name(&self, user_id: &str, name: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!(
                    "SELECT {} FROM accounts WHERE user_id = ? AND name = ? COLLATE NOCASE LIMIT 1",
                    ACCOUNT_COLUMNS
                ),
                params![user_id, name.trim()],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Create an account; `current_balance` becomes the opening balance
    pub fn create_account(&self, user_id: &str, account: &NewAccount) -> Result<Account> {
        let conn = self.conn()?;
        let id = insert_account(&conn, user_id, account)?;
        fetch_account(&conn, user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", id)))
    }

    /// Update an account
    ///
    /// Setting `current_balance` re-bases the opening balance so the requested
    /// value holds with the existing ledger.
    pub fn update_account(&self, user_id: &str, id: &str, update: &AccountUpdate) -> Result<Account> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if fetch_account(&tx, user_id, id)?.is_none() {
            return Err(Error::NotFound(format!("Account {}", id)));
        }
        if let Some(ref name) = update.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidData("Account name is required".into()));
            }
        }

        tx.execute(
            r#"
            UPDATE accounts SET
                name = COALESCE(?2, name),
                account_type = COALESCE(?3, account_type),
                sub_type = CASE WHEN ?4 THEN ?5 ELSE sub_type END,
                currency = COALESCE(?6, currency),
                description = CASE WHEN ?7 THEN ?8 ELSE description END
            WHERE id = ?1
            "#,
            params![
                id,
                update.name.as_deref().map(str::trim),
                update.account_type.map(|t| t.as_str()),
                update.sub_type.is_some(),
                update.sub_type.clone().flatten(),
                update.currency,
                update.description.is_some(),
                update.description.clone().flatten(),
            ],
        )?;

        recalculate_balance(&tx, id)?;
        if let Some(balance) = update.current_balance {
            if !balance.is_finite() {
                return Err(Error::InvalidData("Balance must be a number".into()));
            }
            tx.execute(
                r#"
                UPDATE accounts SET
                    opening_balance = ?2 - (current_balance - opening_balance),
                    current_balance = ?2
                WHERE id = ?1
                "#,
                params![id, balance],
            )?;
        }

        let account = fetch_account(&tx, user_id, id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", id)))?;
        tx.commit()?;
        Ok(account)
    }

    /// Delete an account with its transactions (as source or target)
    ///
    /// Accounts on the other side of deleted transfers are recalculated.
    pub fn delete_account(&self, user_id: &str, id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if fetch_account(&tx, user_id, id)?.is_none() {
            return Err(Error::NotFound(format!("Account {}", id)));
        }

        let counterparts: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT target_account_id FROM transactions
                WHERE account_id = ?1 AND target_account_id IS NOT NULL AND target_account_id != ?1
                UNION
                SELECT account_id FROM transactions
                WHERE target_account_id = ?1 AND account_id != ?1
                "#,
            )?;
            let rows = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        // Cascades to transactions, their document links and proposal targets
        tx.execute(
            "DELETE FROM accounts WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;

        for other in &counterparts {
            recalculate_balance(&tx, other)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Recalculate an account's balance from its ledger
    pub fn recalculate_balance(&self, account_id: &str) -> Result<f64> {
        let conn = self.conn()?;
        recalculate_balance(&conn, account_id)
    }

    /// The user's cash account, created on demand
    ///
    /// Used as the account for extracted receipts that don't name one.
    pub fn get_or_create_cash_account(&self, user_id: &str) -> Result<Account> {
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {} FROM accounts WHERE user_id = ? AND sub_type = ? ORDER BY created_at LIMIT 1",
                    ACCOUNT_COLUMNS
                ),
                params![user_id, CASH_SUB_TYPE],
                row_to_account,
            )
            .optional()?;
        if let Some(account) = existing {
            return Ok(account);
        }

        let id = insert_account(
            &conn,
            user_id,
            &NewAccount {
                name: CASH_ACCOUNT_NAME.to_string(),
                account_type: AccountType::Asset,
                sub_type: Some(CASH_SUB_TYPE.to_string()),
                current_balance: 0.0,
                currency: crate::models::DEFAULT_CURRENCY.to_string(),
                description: Some("Fallback account for receipts".to_string()),
            },
        )?;
        fetch_account(&conn, user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", id)))
    }
}
