//! Account and transaction listings

use anyhow::Result;
use tally_core::models::{Account, Transaction};

use super::{truncate, ApiClient};

pub async fn cmd_accounts(client: &ApiClient) -> Result<()> {
    let accounts: Vec<Account> = client.get("/api/accounts").await?;

    if accounts.is_empty() {
        println!("No accounts yet. Upload a receipt with:");
        println!("  tally upload receipt.jpg --watch");
        return Ok(());
    }

    println!();
    println!("📁 Accounts");
    println!("   ─────────────────────────────────────────────────────────────");

    for account in accounts {
        println!(
            "   {:<28} {:<10} {:>12.2} {}  {}",
            truncate(&account.name, 28),
            account.account_type,
            account.current_balance,
            account.currency,
            account.id
        );
    }

    println!();
    Ok(())
}

pub async fn cmd_transactions(client: &ApiClient, account: Option<&str>, limit: i64) -> Result<()> {
    let mut path = format!("/api/transactions?limit={}", limit);
    if let Some(account) = account {
        path.push_str(&format!("&account_id={}", account));
    }
    let transactions: Vec<Transaction> = client.get(&path).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!();
    println!("📋 Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in &transactions {
        println!("   {}", format_transaction(tx));
    }

    println!();
    println!("   Showing {} transaction(s)", transactions.len());
    Ok(())
}

/// One listing line: date, signed amount, merchant, note
pub fn format_transaction(tx: &Transaction) -> String {
    let sign = match tx.transaction_type {
        tally_core::models::TransactionType::Income => "+",
        tally_core::models::TransactionType::Expense => "-",
        tally_core::models::TransactionType::Transfer => "→",
    };
    format!(
        "{}  {}{:>10.2}  {:<24} {}",
        tx.transaction_date.format("%Y-%m-%d"),
        sign,
        tx.amount,
        truncate(tx.merchant.as_deref().unwrap_or("-"), 24),
        tx.note.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()
}
