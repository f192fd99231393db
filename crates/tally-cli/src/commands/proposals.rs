//! Proposal review commands

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tally_core::db::{NEW_ACCOUNT_KEY, TRANSACTIONS_KEY};
use tally_core::models::{ChangeType, ConfirmOutcome, Proposal};

use super::ApiClient;

pub async fn cmd_proposals(client: &ApiClient) -> Result<()> {
    let proposals: Vec<Proposal> = client.get("/api/proposals").await?;

    if proposals.is_empty() {
        println!("No pending proposals.");
        return Ok(());
    }

    println!();
    println!("📝 Pending proposals");
    println!("   ─────────────────────────────────────────────────────────────");
    for proposal in &proposals {
        print_proposal(proposal);
    }
    println!();
    Ok(())
}

pub async fn cmd_approve(client: &ApiClient, id: &str, edits: &[String]) -> Result<()> {
    let edited = parse_edits(edits)?;
    let mut body = json!({"status": "APPROVED"});
    if let Some(edited) = edited {
        body["edited_data"] = Value::Object(edited);
    }

    let outcome: ConfirmOutcome = client
        .post_json(&format!("/api/proposals/{}/confirm", id), &body)
        .await?;

    println!("✅ Proposal {} {}", id, outcome.status);
    if let Some(account_id) = outcome.account_id {
        println!("   New account: {}", account_id);
    }
    for tx_id in outcome.transaction_ids {
        println!("   Transaction: {}", tx_id);
    }
    Ok(())
}

pub async fn cmd_reject(client: &ApiClient, id: &str) -> Result<()> {
    let outcome: ConfirmOutcome = client
        .post_json(
            &format!("/api/proposals/{}/confirm", id),
            &json!({"status": "REJECTED"}),
        )
        .await?;
    println!("🗑️  Proposal {} {}", id, outcome.status);
    Ok(())
}

/// Parse `key=value` overrides
///
/// Values that parse as JSON (`12.5`, `null`, `"x"`) keep that type; anything
/// else is taken as a string.
pub fn parse_edits(edits: &[String]) -> Result<Option<Map<String, Value>>> {
    if edits.is_empty() {
        return Ok(None);
    }

    let mut map = Map::new();
    for edit in edits {
        let Some((key, raw)) = edit.split_once('=') else {
            bail!("Invalid edit '{}', expected key=value", edit);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid edit '{}', key is empty", edit);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Some(map))
}

/// Print one proposal as a short block
pub fn print_proposal(proposal: &Proposal) {
    let confidence = proposal
        .confidence_score
        .map(|c| format!("{:.0}%", c * 100.0))
        .unwrap_or_else(|| "-".to_string());
    println!();
    println!(
        "   {} {} (confidence {})",
        proposal.change_type, proposal.id, confidence
    );

    let data = &proposal.proposed_data;
    match proposal.change_type {
        ChangeType::CreateAccount => {
            let account = &data[NEW_ACCOUNT_KEY];
            println!(
                "     new account: {} ({})",
                account["name"].as_str().unwrap_or("?"),
                account["type"].as_str().unwrap_or("ASSET")
            );
            let items = data[TRANSACTIONS_KEY].as_array().cloned().unwrap_or_default();
            for item in &items {
                println!("     {}", summarize(item));
            }
        }
        ChangeType::UpdateExisting => {
            println!(
                "     update {}: {}",
                proposal.target_transaction_id.as_deref().unwrap_or("?"),
                summarize(data)
            );
        }
        ChangeType::CreateNew => println!("     {}", summarize(data)),
    }
}

/// `date amount type merchant` from proposed data
pub fn summarize(data: &Value) -> String {
    let amount = data["amount"]
        .as_f64()
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| "?".to_string());
    let date = data["transaction_date"]
        .as_str()
        .map(|d| d.split('T').next().unwrap_or(d))
        .unwrap_or("????-??-??");
    let mut parts = vec![date.to_string(), amount];
    if let Some(t) = data["type"].as_str() {
        parts.push(t.to_string());
    }
    if let Some(m) = data["merchant"].as_str() {
        parts.push(m.to_string());
    }
    parts.join("  ")
}
