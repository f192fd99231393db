//! Document processing pipeline
//!
//! Turns an uploaded receipt or statement into pending proposals:
//!
//! 1. Claim the document (`PARSING`) and read the file
//! 2. Ask the AI backend for candidate transactions
//! 3. For each candidate, let the matching agent search the ledger and decide
//!    between `CREATE_NEW`, `UPDATE_EXISTING` and `CREATE_ACCOUNT`, falling
//!    back to the amount/merchant/date heuristic when it can't
//! 4. Validate the decision against the user's data and upsert a proposal
//! 5. Mark the document `PROCESSED`, or `ERROR` with the reason
//!
//! Nothing here touches the ledger; that only happens when a proposal is
//! confirmed.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::ai::prompts::agent_opening;
use crate::ai::{AIBackend, AIClient, AgentAction, AgentDecision, DocumentInput, ExtractedTransaction, NewAccountSpec};
use crate::db::{Database, TransactionSearch, NEW_ACCOUNT_KEY, TRANSACTIONS_KEY};
use crate::error::{Error, Result};
use crate::models::{
    parse_transaction_date, AccountType, ChangeType, Document, DocumentStatus, NewProposal,
    TransactionType, DATE_FORMAT, DEFAULT_CURRENCY,
};

/// Most agent calls spent on one extracted item before falling back
pub const MAX_AGENT_STEPS: usize = 4;

/// Confidence given to decisions made by the heuristic match
pub const HEURISTIC_CONFIDENCE: f64 = 0.9;

/// Confidence given to agent decisions that don't state one
pub const DEFAULT_AGENT_CONFIDENCE: f64 = 0.7;

/// Rows returned to the agent per search
const AGENT_SEARCH_LIMIT: i64 = 10;

/// Whether the pipeline can read this kind of file
pub fn is_supported_mime(mime_type: &str) -> bool {
    let mime = mime_type.trim().to_lowercase();
    mime == "application/pdf" || mime.starts_with("image/")
}

/// What one processing run did
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSummary {
    pub document_id: String,
    pub status: DocumentStatus,
    /// Items the model returned
    pub extracted: usize,
    /// Items dropped for having no usable amount
    pub skipped: usize,
    /// Proposals created or refreshed
    pub proposal_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decision after validation against the user's data
#[derive(Debug, Clone)]
struct Resolved {
    change_type: ChangeType,
    target_transaction_id: Option<String>,
    account_id: Option<String>,
    category_id: Option<String>,
    new_account: Option<NewAccountSpec>,
    confidence: f64,
}

impl Resolved {
    fn from_agent(decision: AgentDecision) -> Self {
        Self {
            change_type: decision.decision,
            target_transaction_id: decision.target_transaction_id,
            account_id: decision.account_id,
            category_id: decision.category_id,
            new_account: decision.new_account,
            confidence: decision
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(DEFAULT_AGENT_CONFIDENCE),
        }
    }

    fn create_new(confidence: f64) -> Self {
        Self {
            change_type: ChangeType::CreateNew,
            target_transaction_id: None,
            account_id: None,
            category_id: None,
            new_account: None,
            confidence,
        }
    }
}

/// An extracted item with its amount and date pinned down
struct Candidate<'a> {
    item: &'a ExtractedTransaction,
    amount: f64,
    date: Option<NaiveDateTime>,
    transaction_type: TransactionType,
}

/// Proposals for new accounts, one per account name
struct AccountGroup {
    key: String,
    account: NewAccountSpec,
    transactions: Vec<Value>,
    confidence: f64,
}

/// Runs the extraction pipeline for one document at a time
#[derive(Clone)]
pub struct DocumentProcessor {
    db: Database,
    ai: AIClient,
}

impl DocumentProcessor {
    pub fn new(db: Database, ai: AIClient) -> Self {
        Self { db, ai }
    }

    /// Process a document end to end
    ///
    /// Returns `NotFound` for an unknown document and `Conflict` when the
    /// document is already being processed. Every other failure is recorded
    /// on the document as `ERROR` and reported in the summary.
    pub async fn process(&self, document_id: &str) -> Result<ProcessingSummary> {
        let doc = self
            .db
            .load_document(document_id)?
            .ok_or_else(|| Error::NotFound(format!("Document {}", document_id)))?;
        self.db.begin_parsing(document_id)?;
        info!(document_id = %document_id, file = %doc.original_filename, "Processing document");

        let mut summary = ProcessingSummary {
            document_id: document_id.to_string(),
            status: DocumentStatus::Parsing,
            extracted: 0,
            skipped: 0,
            proposal_ids: Vec::new(),
            error: None,
        };

        match self.run(&doc, &mut summary).await {
            Ok(()) => {
                self.db
                    .set_document_status(document_id, DocumentStatus::Processed, None)?;
                summary.status = DocumentStatus::Processed;
                info!(
                    document_id = %document_id,
                    extracted = summary.extracted,
                    proposals = summary.proposal_ids.len(),
                    "Document processed"
                );
            }
            Err(e) => {
                let message = e.to_string();
                warn!(document_id = %document_id, error = %message, "Document processing failed");
                self.db
                    .set_document_status(document_id, DocumentStatus::Error, Some(&message))?;
                summary.status = DocumentStatus::Error;
                summary.error = Some(message);
            }
        }

        Ok(summary)
    }

    async fn run(&self, doc: &Document, summary: &mut ProcessingSummary) -> Result<()> {
        if !is_supported_mime(&doc.mime_type) {
            return Err(Error::InvalidData(format!(
                "Unsupported file type: {}",
                doc.mime_type
            )));
        }

        let data = tokio::fs::read(&doc.file_path)
            .await
            .map_err(|e| Error::InvalidData(format!("Cannot read document file: {}", e)))?;
        if data.is_empty() {
            return Err(Error::InvalidData("Document file is empty".into()));
        }

        let input = DocumentInput {
            data,
            mime_type: doc.mime_type.clone(),
            user_note: doc.user_note.clone(),
            filename: doc.original_filename.clone(),
        };
        let items = self.ai.extract_transactions(&input).await?;
        summary.extracted = items.len();
        debug!(document_id = %doc.id, count = items.len(), "Extracted candidate transactions");

        let mut groups: Vec<AccountGroup> = Vec::new();

        for item in &items {
            let Some(amount) = item.amount.map(f64::abs) else {
                warn!(document_id = %doc.id, merchant = ?item.merchant, "Skipping item without amount");
                summary.skipped += 1;
                continue;
            };
            let candidate = Candidate {
                item,
                amount,
                date: item
                    .transaction_date
                    .as_deref()
                    .and_then(parse_transaction_date),
                transaction_type: extracted_type(item.transaction_type.as_deref()),
            };

            let decision = self.decide(doc, &candidate).await?;
            let resolved = self.resolve(&doc.user_id, &candidate, decision)?;

            match resolved.change_type {
                ChangeType::CreateAccount => {
                    let account = match resolved.new_account.clone() {
                        Some(account) => account,
                        None => continue,
                    };
                    let entry = transaction_data(&candidate, None, resolved.category_id.as_deref());
                    let key = account.name.trim().to_lowercase();
                    match groups.iter_mut().find(|g| g.key == key) {
                        Some(group) => {
                            group.transactions.push(entry);
                            group.confidence = group.confidence.min(resolved.confidence);
                        }
                        None => groups.push(AccountGroup {
                            key,
                            account,
                            transactions: vec![entry],
                            confidence: resolved.confidence,
                        }),
                    }
                }
                ChangeType::UpdateExisting => {
                    let proposal = NewProposal {
                        user_id: doc.user_id.clone(),
                        document_id: doc.id.clone(),
                        target_transaction_id: resolved.target_transaction_id.clone(),
                        change_type: ChangeType::UpdateExisting,
                        proposed_data: update_data(&candidate, &resolved),
                        confidence_score: Some(resolved.confidence),
                    };
                    summary.proposal_ids.push(self.db.upsert_proposal(&proposal)?.id);
                }
                ChangeType::CreateNew => {
                    let proposal = NewProposal {
                        user_id: doc.user_id.clone(),
                        document_id: doc.id.clone(),
                        target_transaction_id: None,
                        change_type: ChangeType::CreateNew,
                        proposed_data: transaction_data(
                            &candidate,
                            resolved.account_id.as_deref(),
                            resolved.category_id.as_deref(),
                        ),
                        confidence_score: Some(resolved.confidence),
                    };
                    summary.proposal_ids.push(self.db.upsert_proposal(&proposal)?.id);
                }
            }
        }

        for group in groups {
            let proposal = NewProposal {
                user_id: doc.user_id.clone(),
                document_id: doc.id.clone(),
                target_transaction_id: None,
                change_type: ChangeType::CreateAccount,
                proposed_data: json!({
                    NEW_ACCOUNT_KEY: {
                        "name": group.account.name.trim(),
                        "type": account_type_of(&group.account).as_str(),
                        "sub_type": group.account.sub_type,
                        "currency": group.account.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    },
                    TRANSACTIONS_KEY: group.transactions,
                }),
                confidence_score: Some(group.confidence),
            };
            summary.proposal_ids.push(self.db.upsert_proposal(&proposal)?.id);
        }

        Ok(())
    }

    /// Run the matching agent for one item, falling back to the heuristic
    async fn decide(&self, doc: &Document, candidate: &Candidate<'_>) -> Result<Resolved> {
        let mut transcript = agent_opening(candidate.item, doc.user_note.as_deref());

        for step in 1..=MAX_AGENT_STEPS {
            let action = match self.ai.agent_step(&transcript).await {
                Ok(action) => action,
                Err(e) => {
                    warn!(document_id = %doc.id, step, error = %e, "Agent step failed, using heuristic match");
                    return self.heuristic(&doc.user_id, candidate);
                }
            };
            let action_json = serde_json::to_string(&action)?;
            debug!(document_id = %doc.id, step, action = %action_json, "Agent action");

            let result = match action {
                AgentAction::Decide(decision) => return Ok(Resolved::from_agent(decision)),
                AgentAction::Search {
                    merchant,
                    amount,
                    date_from,
                    date_to,
                } => {
                    let search = TransactionSearch {
                        merchant,
                        amount: amount.map(f64::abs),
                        date_from: date_from.as_deref().and_then(parse_transaction_date),
                        date_to: date_to.as_deref().and_then(parse_end_of_range),
                        limit: Some(AGENT_SEARCH_LIMIT),
                    };
                    let found = self.db.search_transactions(&doc.user_id, &search)?;
                    Value::Array(
                        found
                            .iter()
                            .map(|t| {
                                json!({
                                    "id": t.id,
                                    "account_id": t.account_id,
                                    "amount": t.amount,
                                    "type": t.transaction_type.as_str(),
                                    "transaction_date": t.transaction_date.format(DATE_FORMAT).to_string(),
                                    "merchant": t.merchant,
                                    "note": t.note,
                                })
                            })
                            .collect(),
                    )
                }
                AgentAction::ListAccounts => {
                    let accounts = self.db.list_accounts(&doc.user_id, 0, None)?;
                    Value::Array(
                        accounts
                            .iter()
                            .map(|a| {
                                json!({
                                    "id": a.id,
                                    "name": a.name,
                                    "type": a.account_type.as_str(),
                                    "sub_type": a.sub_type,
                                    "currency": a.currency,
                                })
                            })
                            .collect(),
                    )
                }
            };

            transcript.push_str(&format!("\nACTION: {}\nRESULT: {}\n", action_json, result));
        }

        warn!(
            document_id = %doc.id,
            steps = MAX_AGENT_STEPS,
            "Agent did not decide, using heuristic match"
        );
        self.heuristic(&doc.user_id, candidate)
    }

    /// Amount, merchant and date match against the ledger
    fn heuristic(&self, user_id: &str, candidate: &Candidate<'_>) -> Result<Resolved> {
        let merchant = candidate.item.merchant.as_deref().unwrap_or_default();
        let date = candidate.date.unwrap_or_else(|| Utc::now().naive_utc());

        match self
            .db
            .find_matching_transaction(user_id, candidate.amount, merchant, date)?
        {
            Some(existing) => Ok(Resolved {
                change_type: ChangeType::UpdateExisting,
                target_transaction_id: Some(existing.id),
                account_id: Some(existing.account_id),
                category_id: existing.category_id,
                new_account: None,
                confidence: HEURISTIC_CONFIDENCE,
            }),
            None => Ok(Resolved::create_new(HEURISTIC_CONFIDENCE)),
        }
    }

    /// Check a decision against what the user actually has, downgrading it
    /// to `CREATE_NEW` when it can't be applied
    fn resolve(&self, user_id: &str, candidate: &Candidate<'_>, mut decision: Resolved) -> Result<Resolved> {
        if decision.change_type == ChangeType::UpdateExisting {
            let target = match decision.target_transaction_id.as_deref() {
                Some(id) => self.db.get_transaction(user_id, id)?,
                None => None,
            };
            match target {
                Some(existing) => {
                    if !self.owns_account(user_id, decision.account_id.as_deref())? {
                        decision.account_id = Some(existing.account_id);
                    }
                }
                None => {
                    warn!(target = ?decision.target_transaction_id, "Update target missing, proposing a new transaction");
                    decision.change_type = ChangeType::CreateNew;
                    decision.target_transaction_id = None;
                }
            }
        }

        if decision.change_type == ChangeType::CreateAccount {
            let name = decision
                .new_account
                .as_ref()
                .map(|a| a.name.trim().to_string())
                .filter(|n| !n.is_empty());
            match name {
                None => {
                    warn!("New account without a name, proposing a new transaction");
                    decision.change_type = ChangeType::CreateNew;
                    decision.new_account = None;
                }
                Some(name) => {
                    if let Some(existing) = self.db.find_account_by_name(user_id, &name)? {
                        debug!(account = %name, "Account already exists, proposing a new transaction");
                        decision.change_type = ChangeType::CreateNew;
                        decision.new_account = None;
                        decision.account_id = Some(existing.id);
                    }
                }
            }
        }

        if decision.change_type != ChangeType::UpdateExisting {
            decision.target_transaction_id = None;
        }

        if decision.change_type == ChangeType::CreateNew
            && !self.owns_account(user_id, decision.account_id.as_deref())?
        {
            decision.account_id = Some(self.fallback_account(user_id, candidate.item)?);
        }

        decision.category_id = self.resolve_category(user_id, candidate.item, decision.category_id)?;
        Ok(decision)
    }

    fn owns_account(&self, user_id: &str, account_id: Option<&str>) -> Result<bool> {
        match account_id {
            Some(id) => Ok(self.db.get_account(user_id, id)?.is_some()),
            None => Ok(false),
        }
    }

    /// The account named by the document's hint, else the cash account
    fn fallback_account(&self, user_id: &str, item: &ExtractedTransaction) -> Result<String> {
        if let Some(hint) = item.account_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            if let Some(account) = self.db.find_account_by_name(user_id, hint)? {
                return Ok(account.id);
            }
        }
        Ok(self.db.get_or_create_cash_account(user_id)?.id)
    }

    /// Keep an owned category, else match the model's hint by name
    fn resolve_category(
        &self,
        user_id: &str,
        item: &ExtractedTransaction,
        category_id: Option<String>,
    ) -> Result<Option<String>> {
        if let Some(id) = category_id {
            if self.db.get_category(user_id, &id)?.is_some() {
                return Ok(Some(id));
            }
        }
        let hint = match item.category_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => hint.to_lowercase(),
            None => return Ok(None),
        };
        Ok(self
            .db
            .list_categories(user_id)?
            .into_iter()
            .find(|c| c.name.to_lowercase() == hint)
            .map(|c| c.id))
    }
}

/// Only income and expense can come out of a document
fn extracted_type(raw: Option<&str>) -> TransactionType {
    match raw.and_then(|r| r.parse::<TransactionType>().ok()) {
        Some(TransactionType::Income) => TransactionType::Income,
        _ => TransactionType::Expense,
    }
}

fn account_type_of(account: &NewAccountSpec) -> AccountType {
    account
        .account_type
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(AccountType::Asset)
}

/// Date-only upper bounds cover the whole day
fn parse_end_of_range(raw: &str) -> Option<NaiveDateTime> {
    let parsed = parse_transaction_date(raw)?;
    if raw.trim().len() == 10 {
        let end_of_day = Duration::days(1) - Duration::seconds(1);
        Some(parsed.checked_add_signed(end_of_day).unwrap_or(parsed))
    } else {
        Some(parsed)
    }
}

fn format_candidate_date(candidate: &Candidate<'_>) -> Value {
    candidate
        .date
        .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
        .unwrap_or(Value::Null)
}

/// Proposed data for a new transaction
fn transaction_data(candidate: &Candidate<'_>, account_id: Option<&str>, category_id: Option<&str>) -> Value {
    let mut data = Map::new();
    if let Some(account_id) = account_id {
        data.insert("account_id".into(), json!(account_id));
        data.insert("target_account_id".into(), Value::Null);
    }
    data.insert("category_id".into(), json!(category_id));
    data.insert("amount".into(), json!(candidate.amount));
    data.insert("type".into(), json!(candidate.transaction_type.as_str()));
    data.insert("transaction_date".into(), format_candidate_date(candidate));
    data.insert("note".into(), json!(candidate.item.note));
    data.insert("merchant".into(), json!(candidate.item.merchant));
    Value::Object(data)
}

/// Proposed patch for an existing transaction; unknown fields are left out
/// so approval doesn't clear them
fn update_data(candidate: &Candidate<'_>, resolved: &Resolved) -> Value {
    let mut data = Map::new();
    data.insert("target_transaction_id".into(), json!(resolved.target_transaction_id));
    if let Some(ref account_id) = resolved.account_id {
        data.insert("account_id".into(), json!(account_id));
    }
    if let Some(ref category_id) = resolved.category_id {
        data.insert("category_id".into(), json!(category_id));
    }
    data.insert("amount".into(), json!(candidate.amount));
    data.insert("type".into(), json!(candidate.transaction_type.as_str()));
    if candidate.date.is_some() {
        data.insert("transaction_date".into(), format_candidate_date(candidate));
    }
    if let Some(ref note) = candidate.item.note {
        data.insert("note".into(), json!(note));
    }
    if let Some(ref merchant) = candidate.item.merchant {
        data.insert("merchant".into(), json!(merchant));
    }
    Value::Object(data)
}
