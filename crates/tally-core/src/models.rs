//! Domain models for Tally

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Storage format for transaction dates (naive UTC)
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Default currency for new accounts
pub const DEFAULT_CURRENCY: &str = "USD";

/// A registered user (created lazily from the identity header)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ========== Enums ==========

/// Whether an account holds value or represents money owed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ASSET" => Ok(Self::Asset),
            "LIABILITY" => Ok(Self::Liability),
            _ => Err(format!("Unknown account type: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryType {
    Income,
    Expense,
    Transfer,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Transfer => "TRANSFER",
        }
    }
}

impl std::str::FromStr for CategoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INCOME" => Ok(Self::Income),
            "EXPENSE" => Ok(Self::Expense),
            "TRANSFER" => Ok(Self::Transfer),
            _ => Err(format!("Unknown category type: {}", s)),
        }
    }
}

impl std::fmt::Display for CategoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    #[default]
    Expense,
    /// Moves money from `account_id` to `target_account_id`
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Transfer => "TRANSFER",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INCOME" => Ok(Self::Income),
            "EXPENSE" => Ok(Self::Expense),
            "TRANSFER" => Ok(Self::Transfer),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Parsing,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Parsing => "PARSING",
            Self::Processed => "PROCESSED",
            Self::Error => "ERROR",
        }
    }

    /// Processing has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UPLOADED" => Ok(Self::Uploaded),
            "PARSING" => Ok(Self::Parsing),
            "PROCESSED" => Ok(Self::Processed),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Unknown document status: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review state of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(format!("Unknown proposal status: {}", s)),
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What applying a proposal does to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Insert a new transaction
    CreateNew,
    /// Patch the transaction named by `target_transaction_id`
    UpdateExisting,
    /// Insert a new account, then its transactions
    #[serde(alias = "CREATE_ACCOUNT_AND_TRANSACTION")]
    CreateAccount,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateNew => "CREATE_NEW",
            Self::UpdateExisting => "UPDATE_EXISTING",
            Self::CreateAccount => "CREATE_ACCOUNT",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CREATE_NEW" => Ok(Self::CreateNew),
            "UPDATE_EXISTING" => Ok(Self::UpdateExisting),
            "CREATE_ACCOUNT" | "CREATE_ACCOUNT_AND_TRANSACTION" => Ok(Self::CreateAccount),
            _ => Err(format!("Unknown change type: {}", s)),
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ========== Accounts ==========

/// A ledger account (bank account, card, cash, loan)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// Free-form refinement, e.g. CASH, CHECKING, CREDIT_CARD
    pub sub_type: Option<String>,
    pub current_balance: f64,
    pub currency: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Opening balance
    #[serde(default, deserialize_with = "de_amount_or_zero")]
    pub current_balance: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial account update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub account_type: Option<AccountType>,
    #[serde(default, deserialize_with = "double_option")]
    pub sub_type: Option<Option<String>>,
    /// Re-bases the opening balance so this becomes the current balance
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub current_balance: Option<f64>,
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

// ========== Categories & Merchants ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub category_type: CategoryType,
    pub parent_category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(rename = "type")]
    pub category_type: CategoryType,
    #[serde(default)]
    pub parent_category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub default_category_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMerchant {
    pub name: String,
    #[serde(default)]
    pub default_category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MerchantUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub default_category_id: Option<Option<String>>,
}

// ========== Transactions ==========

/// A ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub target_account_id: Option<String>,
    pub category_id: Option<String>,
    /// Always the magnitude; direction comes from `type`
    pub amount: f64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDateTime,
    pub note: Option<String>,
    pub merchant: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub account_id: String,
    #[serde(default)]
    pub target_account_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(rename = "type", default)]
    pub transaction_type: TransactionType,
    #[serde(deserialize_with = "de_transaction_date")]
    pub transaction_date: NaiveDateTime,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
}

/// Partial transaction update; absent fields are left unchanged and
/// explicit `null` clears nullable fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    pub account_id: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub target_account_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub amount: Option<f64>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    #[serde(default, deserialize_with = "de_opt_transaction_date")]
    pub transaction_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub merchant: Option<Option<String>>,
}

impl TransactionUpdate {
    pub fn is_empty(&self) -> bool {
        self.account_id.is_none()
            && self.target_account_id.is_none()
            && self.category_id.is_none()
            && self.amount.is_none()
            && self.transaction_type.is_none()
            && self.transaction_date.is_none()
            && self.note.is_none()
            && self.merchant.is_none()
    }
}

/// Filter for listing transactions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub account_id: Option<String>,
    #[serde(default)]
    pub skip: i64,
    pub limit: Option<i64>,
}

// ========== Documents ==========

/// An uploaded receipt image or statement PDF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub original_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub user_note: Option<String>,
    pub status: DocumentStatus,
    /// Why processing failed (only set in ERROR)
    pub error_message: Option<String>,
    /// SHA-256 of the file contents
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Pre-allocated id so the stored file name can match it
    pub id: Option<String>,
    pub original_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub user_note: Option<String>,
    pub content_hash: Option<String>,
}

// ========== Proposals ==========

/// An AI-suggested ledger mutation awaiting review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    pub target_transaction_id: Option<String>,
    pub change_type: ChangeType,
    pub status: ProposalStatus,
    pub proposed_data: Value,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub user_id: String,
    pub document_id: String,
    pub target_transaction_id: Option<String>,
    pub change_type: ChangeType,
    pub proposed_data: Value,
    pub confidence_score: Option<f64>,
}

/// Reviewer's verdict on a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDecision {
    pub status: ProposalStatus,
    /// Fields overriding the proposed data (shallow merge)
    #[serde(default)]
    pub edited_data: Option<Map<String, Value>>,
}

/// Result of confirming a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    /// "approved" or "rejected"
    pub status: String,
    pub proposal_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transaction_ids: Vec<String>,
    /// Set when a CREATE_ACCOUNT proposal inserted an account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

// ========== Reports ==========

/// Bucket size for the wealth chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WealthInterval {
    Day,
    #[default]
    Month,
    Year,
}

impl WealthInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Number of points returned when the caller does not ask for a count
    pub fn default_periods(&self) -> u32 {
        match self {
            Self::Day => 7,
            Self::Month => 12,
            Self::Year => 5,
        }
    }
}

impl std::str::FromStr for WealthInterval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" => Ok(Self::Year),
            _ => Err(format!("Unknown interval: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WealthDataPoint {
    pub date: String,
    pub assets: f64,
    pub liabilities: f64,
    pub net_worth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WealthReport {
    pub data_points: Vec<WealthDataPoint>,
}

// ========== Value coercion ==========

/// Coerce a loosely-typed JSON amount into a number
///
/// Accepts numbers and strings such as `"$1,234.50"`, `"12.00 USD"` or
/// `"(45.10)"` (negative). Returns `None` for anything that is not a finite
/// number once currency noise is removed.
pub fn coerce_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_amount_str(s),
        _ => None,
    }
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

/// Parse an amount string, ignoring currency symbols, codes and separators
///
/// Only currency symbols, a leading or trailing upper-case ISO code, commas
/// and spaces are dropped. What remains must be `-?digits[.digits]`.
pub fn parse_amount_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (mut negative, inner) = match trimmed
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
    {
        Some(inner) => (true, inner.trim()),
        None => (false, trimmed),
    };

    let mut rest = strip_currency_code(inner);
    // The sign may sit on either side of the symbol: "-$5" or "$-5"
    for _ in 0..2 {
        rest = rest.trim_matches(CURRENCY_SYMBOLS).trim();
        if let Some(unsigned) = rest.strip_prefix('-') {
            if negative && !trimmed.starts_with('(') {
                return None;
            }
            negative = true;
            rest = unsigned.trim();
        }
    }

    let cleaned: String = rest.chars().filter(|c| *c != ',' && *c != ' ').collect();
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (cleaned.as_str(), None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !fraction.map_or(true, all_digits) {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Drop a three-letter currency code such as `USD` from either end
fn strip_currency_code(s: &str) -> &str {
    let is_code = |code: &str| code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase());
    if s.len() > 3 {
        if let Some(code) = s.get(..3).filter(|c| is_code(*c)) {
            return s[code.len()..].trim_start();
        }
        if let Some(code) = s.get(s.len() - 3..).filter(|c| is_code(*c)) {
            return s[..s.len() - code.len()].trim_end();
        }
    }
    s
}

/// Parse the date formats clients and models send for transaction dates
///
/// Years outside 1..=9999 are rejected.
pub fn parse_transaction_date(raw: &str) -> Option<NaiveDateTime> {
    parse_date_any(raw.trim()).filter(|dt| (1..=9999).contains(&dt.year()))
}

fn parse_date_any(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ========== Serde helpers ==========

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`)
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn de_amount<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_amount(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
}

fn de_amount_or_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0.0);
    }
    coerce_amount(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
}

fn de_opt_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    coerce_amount(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
}

fn de_transaction_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_transaction_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid transaction_date: {}", raw)))
}

fn de_opt_transaction_date<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_transaction_date(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid transaction_date: {}", raw))),
    }
}
