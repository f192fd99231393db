//! AI backend request and response types
//!
//! These types are backend-agnostic and used across all AI implementations.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{coerce_amount, ChangeType};

/// A document handed to a multimodal model
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Raw file contents
    pub data: Vec<u8>,
    /// `application/pdf` or an `image/*` type
    pub mime_type: String,
    /// Free-text hint from the uploader ("paid with the Visa card")
    pub user_note: Option<String>,
    pub filename: String,
}

/// One candidate transaction read from a document
///
/// Fields are loose because models return whatever they like; the processor
/// validates them before anything reaches the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTransaction {
    /// Amount as a positive magnitude; `None` when the model gave nothing usable
    #[serde(default, deserialize_with = "de_loose_amount")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub merchant: Option<String>,
    /// ISO date or date-time as written by the model
    #[serde(default)]
    pub transaction_date: Option<String>,
    /// `EXPENSE` or `INCOME`
    #[serde(rename = "type", default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Account name or last digits printed on the document
    #[serde(default)]
    pub account_hint: Option<String>,
    /// Category the model thinks fits
    #[serde(default)]
    pub category_hint: Option<String>,
}

/// Account the model wants created for a statement it does not recognise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccountSpec {
    pub name: String,
    /// `ASSET` or `LIABILITY`
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Final verdict of the matching agent for one extracted item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub decision: ChangeType,
    #[serde(default)]
    pub target_transaction_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub new_account: Option<NewAccountSpec>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One step of the matching agent
///
/// `SEARCH` and `LIST_ACCOUNTS` are tool calls whose results are appended to
/// the transcript; `DECIDE` ends the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAction {
    Search {
        #[serde(default)]
        merchant: Option<String>,
        #[serde(default, deserialize_with = "de_loose_amount")]
        amount: Option<f64>,
        #[serde(default)]
        date_from: Option<String>,
        #[serde(default)]
        date_to: Option<String>,
    },
    ListAccounts,
    Decide(AgentDecision),
}

/// Coerce whatever the model put in an amount field, dropping garbage
fn de_loose_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_amount(&value))
}
