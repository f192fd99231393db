//! Prompt text for document extraction and the matching agent

use super::types::ExtractedTransaction;

/// Instructions sent alongside the document bytes
pub const EXTRACTION_PROMPT: &str = r#"Extract all transactions from this document (receipt, invoice or bank statement).
For each transaction provide:
- amount (number, always positive)
- merchant (string)
- transaction_date (ISO format YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
- type (EXPENSE or INCOME)
- note (short description of what was bought or paid)
- account_hint (account name or last card digits printed on the document, if any)
- category_hint (one word category such as Food or Transportation, if obvious)

A receipt usually holds a single transaction for its total, not one per line item.
Format the output as a JSON list of objects. Return ONLY the JSON list."#;

/// System part of the matching agent transcript
pub const AGENT_PROMPT: &str = r#"You reconcile one transaction extracted from an uploaded document against the user's ledger.
Reply with exactly one JSON object per turn. Available actions:

{"action": "SEARCH", "merchant": "...", "amount": 12.5, "date_from": "YYYY-MM-DD", "date_to": "YYYY-MM-DD"}
  Find existing ledger transactions. Every field is optional.
{"action": "LIST_ACCOUNTS"}
  List the user's accounts.
{"action": "DECIDE", "decision": "CREATE_NEW" | "UPDATE_EXISTING" | "CREATE_ACCOUNT",
 "target_transaction_id": "...", "account_id": "...", "category_id": "...",
 "new_account": {"name": "...", "type": "ASSET" | "LIABILITY", "sub_type": "..."},
 "confidence": 0.0-1.0}
  Finish. Use UPDATE_EXISTING with target_transaction_id when the ledger already holds this transaction.
  Use CREATE_NEW with the account_id that paid. Use CREATE_ACCOUNT with new_account only when the
  document clearly belongs to an account the user does not have yet.

Return ONLY the JSON object."#;

/// Build the extraction prompt, appending the uploader's note when present
pub fn extraction_prompt(user_note: Option<&str>) -> String {
    match user_note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("{}\n\nNote from the user about this document: {}", EXTRACTION_PROMPT, note),
        None => EXTRACTION_PROMPT.to_string(),
    }
}

/// Opening of the agent transcript for one extracted item
pub fn agent_opening(item: &ExtractedTransaction, user_note: Option<&str>) -> String {
    let item_json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
    let mut transcript = format!("{}\n\nEXTRACTED TRANSACTION:\n{}\n", AGENT_PROMPT, item_json);
    if let Some(note) = user_note.map(str::trim).filter(|n| !n.is_empty()) {
        transcript.push_str(&format!("USER NOTE: {}\n", note));
    }
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_with_note() {
        let prompt = extraction_prompt(Some("  paid with Visa "));
        assert!(prompt.starts_with(EXTRACTION_PROMPT));
        assert!(prompt.ends_with("paid with Visa"));
        assert_eq!(extraction_prompt(Some("   ")), EXTRACTION_PROMPT);
        assert_eq!(extraction_prompt(None), EXTRACTION_PROMPT);
    }

    #[test]
    fn test_agent_opening_contains_item() {
        let item = ExtractedTransaction {
            amount: Some(9.99),
            merchant: Some("Bookshop".into()),
            ..Default::default()
        };
        let transcript = agent_opening(&item, None);
        assert!(transcript.contains("\"merchant\":\"Bookshop\""));
        assert!(!transcript.contains("USER NOTE"));
    }
}
