//! Document upload and watch commands
//!
//! Processing happens on the server; these commands poll until documents
//! reach `PROCESSED` or `ERROR`.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tally_core::db::MAX_PAGE_LIMIT;
use tally_core::models::{Document, DocumentStatus, Proposal};

use super::{proposals::print_proposal, ApiClient};

/// How often `watch` polls the server
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn cmd_upload(client: &ApiClient, file: &Path, note: Option<&str>, watch: bool) -> Result<()> {
    println!("📤 Uploading {}...", file.display());

    let doc = client.upload(file, note).await?;
    println!("   Document: {}", doc.id);
    println!("   Status: {}", doc.status);

    if !watch {
        println!();
        println!("Run 'tally watch' to follow processing.");
        return Ok(());
    }

    let doc = wait_for_document(client, &doc.id, POLL_INTERVAL).await?;
    report_document(client, &doc).await
}

/// Poll every 2 seconds while any document is still `UPLOADED` or `PARSING`
///
/// Each tick re-reads every document and the pending proposals.
pub async fn cmd_watch(client: &ApiClient) -> Result<()> {
    let mut last_seen = None;

    loop {
        let documents = fetch_all_documents(client).await?;
        let pending: Vec<Proposal> = client.get("/api/proposals").await?;
        let active = documents_in_flight(&documents);

        if active.is_empty() {
            println!("✅ All documents processed. {} proposal(s) awaiting review.", pending.len());
            for doc in documents.iter().filter(|d| d.status == DocumentStatus::Error) {
                println!(
                    "   ❌ {} ({}): {}",
                    doc.original_filename,
                    doc.id,
                    doc.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            return Ok(());
        }

        let seen = (active.len(), pending.len());
        if last_seen != Some(seen) {
            println!(
                "⏳ {} document(s) processing, {} proposal(s) awaiting review...",
                active.len(),
                pending.len()
            );
            for doc in &active {
                println!("   {} {} ({})", doc.status, doc.original_filename, doc.id);
            }
            last_seen = Some(seen);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Every document of the caller, one full page at a time
pub async fn fetch_all_documents(client: &ApiClient) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    loop {
        let page: Vec<Document> = client
            .get(&format!(
                "/api/documents?skip={}&limit={}",
                documents.len(),
                MAX_PAGE_LIMIT
            ))
            .await?;
        let done = (page.len() as i64) < MAX_PAGE_LIMIT;
        documents.extend(page);
        if done {
            return Ok(documents);
        }
    }
}

/// Documents not yet in a terminal state
pub fn documents_in_flight(documents: &[Document]) -> Vec<&Document> {
    documents
        .iter()
        .filter(|d| !d.status.is_terminal())
        .collect()
}

/// Poll one document until it is `PROCESSED` or `ERROR`
pub async fn wait_for_document(client: &ApiClient, id: &str, interval: Duration) -> Result<Document> {
    let path = format!("/api/documents/{}", id);
    let mut last_status = None;

    loop {
        let doc: Document = client.get(&path).await?;
        if last_status != Some(doc.status) {
            println!("   ⏳ {}", doc.status);
            last_status = Some(doc.status);
        }
        if doc.status.is_terminal() {
            return Ok(doc);
        }
        tokio::time::sleep(interval).await;
    }
}

async fn report_document(client: &ApiClient, doc: &Document) -> Result<()> {
    println!();
    if doc.status == DocumentStatus::Error {
        println!(
            "❌ Processing failed: {}",
            doc.error_message.as_deref().unwrap_or("unknown error")
        );
        return Ok(());
    }

    let proposals: Vec<Proposal> = client
        .get(&format!("/api/documents/{}/proposals", doc.id))
        .await?;
    if proposals.is_empty() {
        println!("✅ Processed, but nothing was found in the document.");
        return Ok(());
    }

    println!("✅ {} proposal(s):", proposals.len());
    for proposal in &proposals {
        print_proposal(proposal);
    }
    println!();
    println!("Approve with: tally approve <id> [--edit key=value]");
    Ok(())
}
