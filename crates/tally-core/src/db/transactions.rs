//! Transaction operations
//!
//! Every mutation recalculates the balances of all accounts it touches, before
//! and after the change.

use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::accounts::recalculate_balance;
use super::documents::{row_to_document, DOCUMENT_COLUMNS};
use super::{account_owned, category_owned, new_id, page, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    parse_transaction_date, Document, NewTransaction, Transaction, TransactionFilter,
    TransactionType, TransactionUpdate, DATE_FORMAT,
};

/// Two amounts closer than this are the same amount
pub const MATCH_AMOUNT_TOLERANCE: f64 = 0.005;

/// How far apart (in days) two dates may be and still match
pub const MATCH_DATE_WINDOW_DAYS: i64 = 1;

const TRANSACTION_COLUMNS: &str = "id, user_id, account_id, target_account_id, category_id, amount, \
     transaction_type, transaction_date, note, merchant, created_at, updated_at";

/// Criteria for `search_transactions`; unset fields don't filter
#[derive(Debug, Clone, Default)]
pub struct TransactionSearch {
    /// Case-insensitive substring of the merchant
    pub merchant: Option<String>,
    /// Amount, matched within `MATCH_AMOUNT_TOLERANCE`
    pub amount: Option<f64>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let transaction_type: String = row.get(6)?;
    let transaction_date: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        target_account_id: row.get(3)?,
        category_id: row.get(4)?,
        amount: row.get(5)?,
        transaction_type: transaction_type.parse().unwrap_or_default(),
        transaction_date: parse_transaction_date(&transaction_date).unwrap_or_default(),
        note: row.get(8)?,
        merchant: row.get(9)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn format_date(date: &NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Check references and transfer rules, normalising the target account
///
/// A target account only has meaning for TRANSFER and is dropped otherwise.
fn validate(conn: &Connection, user_id: &str, tx: &mut NewTransaction) -> Result<()> {
    if !tx.amount.is_finite() {
        return Err(Error::InvalidData("Amount must be a number".into()));
    }
    if !account_owned(conn, user_id, &tx.account_id)? {
        return Err(Error::InvalidData(format!(
            "Account {} not found",
            tx.account_id
        )));
    }
    if let Some(ref category_id) = tx.category_id {
        if !category_owned(conn, user_id, category_id)? {
            return Err(Error::InvalidData(format!(
                "Category {} not found",
                category_id
            )));
        }
    }

    if tx.transaction_type == TransactionType::Transfer {
        let target = tx.target_account_id.as_deref().ok_or_else(|| {
            Error::InvalidData("Transfers require target_account_id".into())
        })?;
        if target == tx.account_id {
            return Err(Error::InvalidData(
                "Transfer target must differ from the source account".into(),
            ));
        }
        if !account_owned(conn, user_id, target)? {
            return Err(Error::InvalidData(format!("Account {} not found", target)));
        }
    } else {
        tx.target_account_id = None;
    }

    tx.merchant = tx
        .merchant
        .take()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    Ok(())
}

fn recalculate_all(conn: &Connection, accounts: &[Option<&str>]) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for id in accounts.iter().flatten() {
        if !seen.contains(id) {
            recalculate_balance(conn, id)?;
            seen.push(*id);
        }
    }
    Ok(())
}

pub(crate) fn fetch_transaction(
    conn: &Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Transaction>> {
    let tx = conn
        .query_row(
            &format!(
                "SELECT {} FROM transactions WHERE id = ? AND user_id = ?",
                TRANSACTION_COLUMNS
            ),
            params![id, user_id],
            row_to_transaction,
        )
        .optional()?;
    Ok(tx)
}

/// Validate and insert a transaction, then recalculate balances
pub(crate) fn insert_transaction(
    conn: &Connection,
    user_id: &str,
    tx: &NewTransaction,
) -> Result<String> {
    let mut tx = tx.clone();
    validate(conn, user_id, &mut tx)?;

    let id = new_id();
    conn.execute(
        r#"
        INSERT INTO transactions (id, user_id, account_id, target_account_id, category_id,
                                  amount, transaction_type, transaction_date, note, merchant)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            user_id,
            tx.account_id,
            tx.target_account_id,
            tx.category_id,
            tx.amount,
            tx.transaction_type.as_str(),
            format_date(&tx.transaction_date),
            tx.note,
            tx.merchant,
        ],
    )?;

    recalculate_all(
        conn,
        &[Some(tx.account_id.as_str()), tx.target_account_id.as_deref()],
    )?;
    debug!(transaction_id = %id, amount = tx.amount, "Inserted transaction");
    Ok(id)
}

/// Apply a partial update, then recalculate every account touched before or after
pub(crate) fn patch_transaction(
    conn: &Connection,
    user_id: &str,
    id: &str,
    update: &TransactionUpdate,
) -> Result<Transaction> {
    let existing = fetch_transaction(conn, user_id, id)?
        .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;

    let mut merged = NewTransaction {
        account_id: update
            .account_id
            .clone()
            .unwrap_or_else(|| existing.account_id.clone()),
        target_account_id: match update.target_account_id {
            Some(ref value) => value.clone(),
            None => existing.target_account_id.clone(),
        },
        category_id: match update.category_id {
            Some(ref value) => value.clone(),
            None => existing.category_id.clone(),
        },
        amount: update.amount.unwrap_or(existing.amount),
        transaction_type: update.transaction_type.unwrap_or(existing.transaction_type),
        transaction_date: update.transaction_date.unwrap_or(existing.transaction_date),
        note: match update.note {
            Some(ref value) => value.clone(),
            None => existing.note.clone(),
        },
        merchant: match update.merchant {
            Some(ref value) => value.clone(),
            None => existing.merchant.clone(),
        },
    };
    validate(conn, user_id, &mut merged)?;

    conn.execute(
        r#"
        UPDATE transactions SET
            account_id = ?2,
            target_account_id = ?3,
            category_id = ?4,
            amount = ?5,
            transaction_type = ?6,
            transaction_date = ?7,
            note = ?8,
            merchant = ?9,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?1
        "#,
        params![
            id,
            merged.account_id,
            merged.target_account_id,
            merged.category_id,
            merged.amount,
            merged.transaction_type.as_str(),
            format_date(&merged.transaction_date),
            merged.note,
            merged.merchant,
        ],
    )?;

    recalculate_all(
        conn,
        &[
            Some(existing.account_id.as_str()),
            existing.target_account_id.as_deref(),
            Some(merged.account_id.as_str()),
            merged.target_account_id.as_deref(),
        ],
    )?;

    fetch_transaction(conn, user_id, id)?
        .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))
}

/// Record that a transaction came from a document (idempotent)
pub(crate) fn link_document(conn: &Connection, transaction_id: &str, document_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO transaction_documents (transaction_id, document_id) VALUES (?, ?)",
        params![transaction_id, document_id],
    )?;
    Ok(())
}

impl Database {
    /// List transactions, newest first
    pub fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        let (skip, limit) = page(filter.skip, filter.limit);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE user_id = ?1
              AND (?2 IS NULL OR account_id = ?2 OR target_account_id = ?2)
            ORDER BY transaction_date DESC, created_at DESC
            LIMIT ?3 OFFSET ?4
            "#,
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(
                params![user_id, filter.account_id, limit, skip],
                row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, user_id: &str, id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        fetch_transaction(&conn, user_id, id)
    }

    /// Create a transaction
    pub fn create_transaction(&self, user_id: &str, tx: &NewTransaction) -> Result<Transaction> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = insert_transaction(&db_tx, user_id, tx)?;
        let created = fetch_transaction(&db_tx, user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;
        db_tx.commit()?;
        Ok(created)
    }

    /// Update a transaction; only fields present in `update` change
    pub fn update_transaction(
        &self,
        user_id: &str,
        id: &str,
        update: &TransactionUpdate,
    ) -> Result<Transaction> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = patch_transaction(&db_tx, user_id, id, update)?;
        db_tx.commit()?;
        Ok(updated)
    }

    /// Delete a transaction and recalculate the accounts it touched
    pub fn delete_transaction(&self, user_id: &str, id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = fetch_transaction(&db_tx, user_id, id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;

        db_tx.execute(
            "DELETE FROM transactions WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        recalculate_all(
            &db_tx,
            &[
                Some(existing.account_id.as_str()),
                existing.target_account_id.as_deref(),
            ],
        )?;

        db_tx.commit()?;
        Ok(())
    }

    /// Link a transaction to the document it came from
    pub fn link_document(&self, user_id: &str, transaction_id: &str, document_id: &str) -> Result<()> {
        let conn = self.conn()?;
        if fetch_transaction(&conn, user_id, transaction_id)?.is_none() {
            return Err(Error::NotFound(format!("Transaction {}", transaction_id)));
        }
        let owned: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ? AND user_id = ?",
                params![document_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(Error::NotFound(format!("Document {}", document_id)));
        }
        link_document(&conn, transaction_id, document_id)
    }

    /// Documents a transaction was created or updated from
    pub fn list_transaction_documents(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        if fetch_transaction(&conn, user_id, transaction_id)?.is_none() {
            return Err(Error::NotFound(format!("Transaction {}", transaction_id)));
        }

        let columns = DOCUMENT_COLUMNS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM documents d
            JOIN transaction_documents td ON td.document_id = d.id
            WHERE td.transaction_id = ? AND d.user_id = ?
            ORDER BY td.attached_at
            "#,
            columns
        ))?;

        let documents = stmt
            .query_map(params![transaction_id, user_id], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(documents)
    }

    /// Search a user's transactions
    pub fn search_transactions(
        &self,
        user_id: &str,
        search: &TransactionSearch,
    ) -> Result<Vec<Transaction>> {
        let (_, limit) = page(0, search.limit);
        let merchant = search
            .merchant
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE user_id = ?1
              AND (?2 IS NULL OR instr(lower(merchant), lower(?2)) > 0)
              AND (?3 IS NULL OR abs(amount - ?3) < ?4)
              AND (?5 IS NULL OR transaction_date >= ?5)
              AND (?6 IS NULL OR transaction_date <= ?6)
            ORDER BY transaction_date DESC
            LIMIT ?7
            "#,
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(
                params![
                    user_id,
                    merchant,
                    search.amount,
                    MATCH_AMOUNT_TOLERANCE,
                    search.date_from.as_ref().map(format_date),
                    search.date_to.as_ref().map(format_date),
                    limit,
                ],
                row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Find an existing transaction that is probably the same purchase
    ///
    /// Same amount, merchant names containing one another (case-insensitive),
    /// and dates within `MATCH_DATE_WINDOW_DAYS`. The closest date wins.
    pub fn find_matching_transaction(
        &self,
        user_id: &str,
        amount: f64,
        merchant: &str,
        date: NaiveDateTime,
    ) -> Result<Option<Transaction>> {
        let merchant = merchant.trim();
        if merchant.is_empty() {
            return Ok(None);
        }
        let window = Duration::days(MATCH_DATE_WINDOW_DAYS);
        let (from, to) = match (date.checked_sub_signed(window), date.checked_add_signed(window)) {
            (Some(from), Some(to)) => (from, to),
            _ => return Ok(None),
        };

        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM transactions
                    WHERE user_id = ?1
                      AND abs(amount - ?2) < ?3
                      AND merchant IS NOT NULL AND merchant != ''
                      AND (instr(lower(merchant), lower(?4)) > 0
                           OR instr(lower(?4), lower(merchant)) > 0)
                      AND transaction_date BETWEEN ?5 AND ?6
                    ORDER BY abs(julianday(transaction_date) - julianday(?7))
                    LIMIT 1
                    "#,
                    TRANSACTION_COLUMNS
                ),
                params![
                    user_id,
                    amount,
                    MATCH_AMOUNT_TOLERANCE,
                    merchant,
                    format_date(&from),
                    format_date(&to),
                    format_date(&date),
                ],
                row_to_transaction,
            )
            .optional()?;
        Ok(found)
    }
}
