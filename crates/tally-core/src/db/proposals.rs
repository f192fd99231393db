//! Proposals and the review state machine
//!
//! A proposal is created `PENDING` and moves exactly once, to `APPROVED` or
//! `REJECTED`. Approval applies the (possibly edited) payload to the ledger in
//! the same SQL transaction as the status change.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::accounts::insert_account;
use super::transactions::{insert_transaction, link_document, patch_transaction};
use super::{new_id, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    coerce_amount, parse_transaction_date, AccountType, ChangeType, ConfirmOutcome, NewAccount,
    NewProposal, NewTransaction, Proposal, ProposalDecision, ProposalStatus, TransactionType,
    TransactionUpdate, DEFAULT_CURRENCY,
};

/// Proposed amounts closer than this describe the same item
pub const DUPLICATE_AMOUNT_TOLERANCE: f64 = 0.01;

/// Key holding the account a CREATE_ACCOUNT proposal inserts
pub const NEW_ACCOUNT_KEY: &str = "_new_account";

/// Key holding the transactions of a CREATE_ACCOUNT proposal
pub const TRANSACTIONS_KEY: &str = "transactions";

const PROPOSAL_COLUMNS: &str = "id, user_id, document_id, target_transaction_id, change_type, status, proposed_data, confidence_score, created_at";

fn row_to_proposal(row: &Row) -> rusqlite::Result<Proposal> {
    let change_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let proposed_data: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    Ok(Proposal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        document_id: row.get(2)?,
        target_transaction_id: row.get(3)?,
        change_type: change_type.parse().unwrap_or(ChangeType::CreateNew),
        status: status.parse().unwrap_or_default(),
        proposed_data: serde_json::from_str(&proposed_data)
            .unwrap_or_else(|_| Value::Object(Map::new())),
        confidence_score: row.get(7)?,
        created_at: parse_datetime(&created_at),
    })
}

fn fetch_proposal(conn: &Connection, user_id: &str, id: &str) -> Result<Option<Proposal>> {
    let proposal = conn
        .query_row(
            &format!(
                "SELECT {} FROM proposals WHERE id = ? AND user_id = ?",
                PROPOSAL_COLUMNS
            ),
            params![id, user_id],
            row_to_proposal,
        )
        .optional()?;
    Ok(proposal)
}

fn normalized(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Whether two payloads describe the same proposed change
fn same_payload(a: &Value, b: &Value) -> bool {
    if let (Some(a_acct), Some(b_acct)) = (a.get(NEW_ACCOUNT_KEY), b.get(NEW_ACCOUNT_KEY)) {
        return normalized(a_acct.get("name")) == normalized(b_acct.get("name"));
    }

    let amounts_match = match (
        a.get("amount").and_then(coerce_amount),
        b.get("amount").and_then(coerce_amount),
    ) {
        (Some(x), Some(y)) => (x - y).abs() < DUPLICATE_AMOUNT_TOLERANCE,
        _ => false,
    };
    amounts_match && normalized(a.get("merchant")) == normalized(b.get("merchant"))
}

fn opt_string(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Present key: `Some(value)`, where `null` or a non-string clears the field
fn opt_patch(data: &Map<String, Value>, key: &str) -> Option<Option<String>> {
    data.get(key).map(|_| opt_string(data, key))
}

fn amount_from(data: &Map<String, Value>) -> Result<f64> {
    let raw = data
        .get("amount")
        .ok_or_else(|| Error::InvalidData("amount is required".into()))?;
    coerce_amount(raw).ok_or_else(|| Error::InvalidData(format!("Invalid amount: {}", raw)))
}

fn type_from(data: &Map<String, Value>) -> Result<Option<TransactionType>> {
    match opt_string(data, "type") {
        Some(raw) => raw.parse().map(Some).map_err(Error::InvalidData),
        None => Ok(None),
    }
}

fn date_from(data: &Map<String, Value>) -> Result<Option<chrono::NaiveDateTime>> {
    match opt_string(data, "transaction_date") {
        Some(raw) => parse_transaction_date(&raw)
            .map(Some)
            .ok_or_else(|| Error::InvalidData(format!("Invalid transaction_date: {}", raw))),
        None => Ok(None),
    }
}

/// Build a new ledger row from proposal data
fn new_transaction_from(data: &Map<String, Value>, account_id: Option<&str>) -> Result<NewTransaction> {
    let account_id = match account_id {
        Some(id) => id.to_string(),
        None => opt_string(data, "account_id")
            .ok_or_else(|| Error::InvalidData("account_id is required".into()))?,
    };
    Ok(NewTransaction {
        account_id,
        target_account_id: opt_string(data, "target_account_id"),
        category_id: opt_string(data, "category_id"),
        amount: amount_from(data)?,
        transaction_type: type_from(data)?.unwrap_or_default(),
        transaction_date: date_from(data)?.unwrap_or_else(|| Utc::now().naive_utc()),
        note: opt_string(data, "note"),
        merchant: opt_string(data, "merchant"),
    })
}

/// Build a patch from the ledger fields present in proposal data
fn update_from(data: &Map<String, Value>) -> Result<TransactionUpdate> {
    Ok(TransactionUpdate {
        account_id: opt_string(data, "account_id"),
        target_account_id: opt_patch(data, "target_account_id"),
        category_id: opt_patch(data, "category_id"),
        amount: match data.get("amount") {
            Some(_) => Some(amount_from(data)?),
            None => None,
        },
        transaction_type: type_from(data)?,
        transaction_date: date_from(data)?,
        note: opt_patch(data, "note"),
        merchant: opt_patch(data, "merchant"),
    })
}

fn new_account_from(data: &Map<String, Value>) -> Result<NewAccount> {
    let spec = data
        .get(NEW_ACCOUNT_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::InvalidData(format!("{} is required", NEW_ACCOUNT_KEY)))?;

    let name = opt_string(spec, "name")
        .ok_or_else(|| Error::InvalidData("New account name is required".into()))?;
    let account_type = match opt_string(spec, "type") {
        Some(raw) => raw.parse().map_err(Error::InvalidData)?,
        None => AccountType::Asset,
    };
    let opening = match spec.get("current_balance") {
        Some(Value::Null) | None => 0.0,
        Some(raw) => coerce_amount(raw)
            .ok_or_else(|| Error::InvalidData(format!("Invalid balance: {}", raw)))?,
    };

    Ok(NewAccount {
        name,
        account_type,
        sub_type: opt_string(spec, "sub_type"),
        current_balance: opening,
        currency: opt_string(spec, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        description: opt_string(spec, "description"),
    })
}

/// Apply an approved proposal's data to the ledger
fn apply_approval(
    conn: &Connection,
    user_id: &str,
    proposal: &Proposal,
    data: &Map<String, Value>,
) -> Result<(Vec<String>, Option<String>)> {
    match proposal.change_type {
        ChangeType::CreateNew => {
            let tx = new_transaction_from(data, None)?;
            let id = insert_transaction(conn, user_id, &tx)?;
            link_document(conn, &id, &proposal.document_id)?;
            Ok((vec![id], None))
        }
        ChangeType::UpdateExisting => {
            let target = opt_string(data, "target_transaction_id")
                .or_else(|| proposal.target_transaction_id.clone())
                .ok_or_else(|| {
                    Error::InvalidData("UPDATE_EXISTING requires target_transaction_id".into())
                })?;
            let update = update_from(data)?;
            let updated = patch_transaction(conn, user_id, &target, &update)?;
            link_document(conn, &updated.id, &proposal.document_id)?;
            Ok((vec![updated.id], None))
        }
        ChangeType::CreateAccount => {
            let account = new_account_from(data)?;
            let account_id = insert_account(conn, user_id, &account)?;

            let items: Vec<&Map<String, Value>> = match data.get(TRANSACTIONS_KEY) {
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
                _ => vec![data],
            };

            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                // A bare account proposal carries no amount
                if item.get("amount").is_none() && std::ptr::eq(item, data) {
                    continue;
                }
                let tx = new_transaction_from(item, Some(&account_id))?;
                let id = insert_transaction(conn, user_id, &tx)?;
                link_document(conn, &id, &proposal.document_id)?;
                ids.push(id);
            }
            Ok((ids, Some(account_id)))
        }
    }
}

impl Database {
    /// Store a proposal unless an equivalent one exists for the same document
    ///
    /// Equivalent means same target and change type, amounts within
    /// `DUPLICATE_AMOUNT_TOLERANCE` and the same merchant (or, for new
    /// accounts, the same account name). A pending duplicate is refreshed in
    /// place; a decided one is returned untouched.
    pub fn upsert_proposal(&self, proposal: &NewProposal) -> Result<Proposal> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidates: Vec<Proposal> = {
            let mut stmt = tx.prepare(&format!(
                r#"
                SELECT {} FROM proposals
                WHERE document_id = ? AND user_id = ? AND change_type = ?
                  AND target_transaction_id IS ?
                ORDER BY created_at
                "#,
                PROPOSAL_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        proposal.document_id,
                        proposal.user_id,
                        proposal.change_type.as_str(),
                        proposal.target_transaction_id,
                    ],
                    row_to_proposal,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let data = serde_json::to_string(&proposal.proposed_data)?;

        let id = match candidates
            .into_iter()
            .find(|p| same_payload(&p.proposed_data, &proposal.proposed_data))
        {
            Some(existing) if existing.status == ProposalStatus::Pending => {
                tx.execute(
                    "UPDATE proposals SET proposed_data = ?, confidence_score = ? WHERE id = ?",
                    params![data, proposal.confidence_score, existing.id],
                )?;
                debug!(proposal_id = %existing.id, "Refreshed pending proposal");
                existing.id
            }
            Some(existing) => {
                debug!(proposal_id = %existing.id, status = %existing.status, "Proposal already decided");
                existing.id
            }
            None => {
                let id = new_id();
                tx.execute(
                    r#"
                    INSERT INTO proposals (id, user_id, document_id, target_transaction_id,
                                           change_type, proposed_data, confidence_score)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        id,
                        proposal.user_id,
                        proposal.document_id,
                        proposal.target_transaction_id,
                        proposal.change_type.as_str(),
                        data,
                        proposal.confidence_score,
                    ],
                )?;
                id
            }
        };

        let stored = fetch_proposal(&tx, &proposal.user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Proposal {}", id)))?;
        tx.commit()?;
        Ok(stored)
    }

    /// List a user's proposals with the given status (all when `None`)
    pub fn list_proposals(
        &self,
        user_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM proposals
            WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at, rowid
            "#,
            PROPOSAL_COLUMNS
        ))?;

        let proposals = stmt
            .query_map(params![user_id, status.map(|s| s.as_str())], row_to_proposal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(proposals)
    }

    /// Get a proposal by ID
    pub fn get_proposal(&self, user_id: &str, id: &str) -> Result<Option<Proposal>> {
        let conn = self.conn()?;
        fetch_proposal(&conn, user_id, id)
    }

    /// All proposals produced from one document
    pub fn list_document_proposals(&self, user_id: &str, document_id: &str) -> Result<Vec<Proposal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proposals WHERE user_id = ? AND document_id = ? ORDER BY created_at, rowid",
            PROPOSAL_COLUMNS
        ))?;

        let proposals = stmt
            .query_map(params![user_id, document_id], row_to_proposal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(proposals)
    }

    /// Count pending proposals across all users
    pub fn count_pending_proposals(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM proposals WHERE status = 'PENDING'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Approve or reject a pending proposal
    ///
    /// The status change and any ledger mutation commit together. A proposal
    /// that is no longer `PENDING` yields `Error::Conflict`, so a repeated or
    /// racing confirmation never applies twice.
    pub fn confirm_proposal(
        &self,
        user_id: &str,
        id: &str,
        decision: &ProposalDecision,
    ) -> Result<ConfirmOutcome> {
        if decision.status == ProposalStatus::Pending {
            return Err(Error::InvalidData(
                "status must be APPROVED or REJECTED".into(),
            ));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let proposal = fetch_proposal(&tx, user_id, id)?
            .ok_or_else(|| Error::NotFound(format!("Proposal {}", id)))?;

        let claimed = tx.execute(
            r#"
            UPDATE proposals SET status = ?, decided_at = CURRENT_TIMESTAMP
            WHERE id = ? AND user_id = ? AND status = 'PENDING'
            "#,
            params![decision.status.as_str(), id, user_id],
        )?;
        if claimed == 0 {
            return Err(Error::Conflict(format!(
                "Proposal {} is already {}",
                id, proposal.status
            )));
        }

        let mut outcome = ConfirmOutcome {
            status: decision.status.as_str().to_lowercase(),
            proposal_id: id.to_string(),
            transaction_ids: Vec::new(),
            account_id: None,
        };

        if decision.status == ProposalStatus::Approved {
            let mut data = proposal
                .proposed_data
                .as_object()
                .cloned()
                .unwrap_or_default();
            if let Some(ref edited) = decision.edited_data {
                for (key, value) in edited {
                    data.insert(key.clone(), value.clone());
                }
            }

            let (transaction_ids, account_id) = apply_approval(&tx, user_id, &proposal, &data)?;
            if !data.is_empty() {
                tx.execute(
                    "UPDATE proposals SET proposed_data = ? WHERE id = ?",
                    params![serde_json::to_string(&Value::Object(data))?, id],
                )?;
            }
            outcome.transaction_ids = transaction_ids;
            outcome.account_id = account_id;
        }

        tx.commit()?;
        info!(
            proposal_id = %id,
            status = %outcome.status,
            change_type = %proposal.change_type,
            "Proposal confirmed"
        );
        Ok(outcome)
    }
}
