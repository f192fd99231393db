//! Integration tests for tally-core
//!
//! These tests exercise the full upload → process → confirm workflow against
//! scripted AI backends.

use chrono::NaiveDate;
use serde_json::json;
use tally_core::{
    ai::{AgentAction, AgentDecision, ExtractedTransaction, MockBackend, NewAccountSpec},
    db::{content_hash, Database, CASH_SUB_TYPE},
    models::{
        Account, AccountType, ChangeType, Document, DocumentStatus, NewAccount, NewDocument,
        NewTransaction, ProposalDecision, ProposalStatus, TransactionFilter, TransactionType,
        User, DEFAULT_CURRENCY,
    },
    AIClient, DocumentProcessor,
};
use tempfile::TempDir;

struct Fixture {
    db: Database,
    user: User,
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let db = Database::in_memory().expect("Failed to create in-memory database");
        let user = db.get_or_create_user("alice@example.com").unwrap();
        Self {
            db,
            user,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn account(&self, name: &str, account_type: AccountType, opening: f64) -> Account {
        self.db
            .create_account(
                &self.user.id,
                &NewAccount {
                    name: name.to_string(),
                    account_type,
                    sub_type: None,
                    current_balance: opening,
                    currency: DEFAULT_CURRENCY.to_string(),
                    description: None,
                },
            )
            .unwrap()
    }

    /// Store `bytes` on disk and record it as an uploaded document
    fn upload(&self, name: &str, mime_type: &str, bytes: &[u8]) -> Document {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        self.db
            .create_document(
                &self.user.id,
                &NewDocument {
                    id: None,
                    original_filename: name.to_string(),
                    file_path: path.to_string_lossy().to_string(),
                    mime_type: mime_type.to_string(),
                    user_note: None,
                    content_hash: Some(content_hash(bytes)),
                },
            )
            .unwrap()
    }

    fn processor(&self, mock: MockBackend) -> DocumentProcessor {
        DocumentProcessor::new(self.db.clone(), AIClient::Mock(mock))
    }
}

fn item(amount: f64, merchant: &str, date: &str) -> ExtractedTransaction {
    ExtractedTransaction {
        amount: Some(amount),
        merchant: Some(merchant.to_string()),
        transaction_date: Some(date.to_string()),
        transaction_type: Some("EXPENSE".to_string()),
        ..Default::default()
    }
}

fn decide(decision: ChangeType) -> AgentDecision {
    AgentDecision {
        decision,
        target_transaction_id: None,
        account_id: None,
        category_id: None,
        new_account: None,
        confidence: None,
    }
}

fn approve() -> ProposalDecision {
    ProposalDecision {
        status: ProposalStatus::Approved,
        edited_data: None,
    }
}

// =============================================================================
// Agent path
// =============================================================================

#[tokio::test]
async fn test_receipt_to_ledger_with_agent() {
    let fx = Fixture::new();
    let checking = fx.account("Checking", AccountType::Asset, 500.0);
    let doc = fx.upload("cafe.jpg", "image/jpeg", b"jpeg bytes");

    let mock = MockBackend::new()
        .with_extraction(vec![item(12.5, "Cafe Luna", "2026-01-05")])
        .with_agent_actions(vec![
            AgentAction::ListAccounts,
            AgentAction::Decide(AgentDecision {
                account_id: Some(checking.id.clone()),
                confidence: Some(0.95),
                ..decide(ChangeType::CreateNew)
            }),
        ]);

    let summary = fx.processor(mock.clone()).process(&doc.id).await.unwrap();
    assert_eq!(summary.status, DocumentStatus::Processed);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.proposal_ids.len(), 1);
    assert_eq!(mock.remaining_actions(), 0);

    let stored = fx.db.get_document(&fx.user.id, &doc.id).unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Processed);

    let proposal = fx
        .db
        .get_proposal(&fx.user.id, &summary.proposal_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(proposal.change_type, ChangeType::CreateNew);
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.confidence_score, Some(0.95));
    assert_eq!(proposal.proposed_data["account_id"], json!(checking.id));
    assert_eq!(proposal.proposed_data["transaction_date"], "2026-01-05T00:00:00");

    let outcome = fx
        .db
        .confirm_proposal(&fx.user.id, &proposal.id, &approve())
        .unwrap();
    assert_eq!(outcome.status, "approved");
    assert_eq!(outcome.transaction_ids.len(), 1);

    let account = fx.db.get_account(&fx.user.id, &checking.id).unwrap().unwrap();
    assert_eq!(account.current_balance, 487.5);

    let linked = fx
        .db
        .list_transaction_documents(&fx.user.id, &outcome.transaction_ids[0])
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, doc.id);
    assert_eq!(fx.db.list_proposals(&fx.user.id, Some(ProposalStatus::Pending)).unwrap().len(), 0);
}

#[tokio::test]
async fn test_agent_budget_exhausted_falls_back_to_cash_account() {
    let fx = Fixture::new();
    let doc = fx.upload("bakery.png", "image/png", b"png bytes");

    let search = AgentAction::Search {
        merchant: Some("Bakery".into()),
        amount: None,
        date_from: Some("2026-02-01".into()),
        date_to: Some("2026-02-02".into()),
    };
    let mock = MockBackend::new()
        .with_extraction(vec![item(4.2, "Bakery", "2026-02-01")])
        .with_agent_actions(vec![search.clone(), search.clone(), search.clone(), search.clone(), search]);

    let summary = fx.processor(mock.clone()).process(&doc.id).await.unwrap();
    assert_eq!(summary.status, DocumentStatus::Processed);
    // The fifth action is never requested
    assert_eq!(mock.remaining_actions(), 1);

    let proposal = fx
        .db
        .get_proposal(&fx.user.id, &summary.proposal_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(proposal.change_type, ChangeType::CreateNew);
    assert_eq!(proposal.confidence_score, Some(0.9));

    let accounts = fx.db.list_accounts(&fx.user.id, 0, None).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].sub_type.as_deref(), Some(CASH_SUB_TYPE));
    assert_eq!(proposal.proposed_data["account_id"], json!(accounts[0].id));
}

#[tokio::test]
async fn test_heuristic_match_proposes_update() {
    let fx = Fixture::new();
    let card = fx.account("Visa", AccountType::Liability, 0.0);
    let existing = fx
        .db
        .create_transaction(
            &fx.user.id,
            &NewTransaction {
                account_id: card.id.clone(),
                target_account_id: None,
                category_id: None,
                amount: 23.40,
                transaction_type: TransactionType::Expense,
                transaction_date: NaiveDate::from_ymd_opt(2026, 3, 14)
                    .unwrap()
                    .and_hms_opt(19, 30, 0)
                    .unwrap(),
                note: None,
                merchant: Some("CORNER BISTRO #12".into()),
            },
        )
        .unwrap();
    let doc = fx.upload("bistro.pdf", "application/pdf", b"%PDF-1.4");

    // Nothing scripted for the agent, so every step fails
    let mock = MockBackend::new().with_extraction(vec![ExtractedTransaction {
        note: Some("Dinner".into()),
        ..item(23.40, "Corner Bistro", "2026-03-14")
    }]);

    let summary = fx.processor(mock).process(&doc.id).await.unwrap();
    let proposal = fx
        .db
        .get_proposal(&fx.user.id, &summary.proposal_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(proposal.change_type, ChangeType::UpdateExisting);
    assert_eq!(proposal.target_transaction_id.as_deref(), Some(existing.id.as_str()));
    assert_eq!(proposal.confidence_score, Some(0.9));

    let outcome = fx
        .db
        .confirm_proposal(&fx.user.id, &proposal.id, &approve())
        .unwrap();
    assert_eq!(outcome.transaction_ids, vec![existing.id.clone()]);

    let updated = fx.db.get_transaction(&fx.user.id, &existing.id).unwrap().unwrap();
    assert_eq!(updated.note.as_deref(), Some("Dinner"));
    assert_eq!(updated.account_id, card.id);

    let all = fx
        .db
        .list_transactions(&fx.user.id, &TransactionFilter::default())
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_invalid_update_target_is_downgraded() {
    let fx = Fixture::new();
    let doc = fx.upload("r.jpg", "image/jpeg", b"bytes");

    let mock = MockBackend::new()
        .with_extraction(vec![item(9.0, "Kiosk", "2026-01-01")])
        .with_agent_actions(vec![AgentAction::Decide(AgentDecision {
            target_transaction_id: Some("does-not-exist".into()),
            ..decide(ChangeType::UpdateExisting)
        })]);

    let summary = fx.processor(mock).process(&doc.id).await.unwrap();
    let proposal = fx
        .db
        .get_proposal(&fx.user.id, &summary.proposal_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(proposal.change_type, ChangeType::CreateNew);
    assert!(proposal.target_transaction_id.is_none());
    assert!(proposal.proposed_data["account_id"].is_string());
}

#[tokio::test]
async fn test_create_account_items_grouped() {
    let fx = Fixture::new();
    let doc = fx.upload("statement.pdf", "application/pdf", b"%PDF statement");

    let new_card = || {
        AgentAction::Decide(AgentDecision {
            new_account: Some(NewAccountSpec {
                name: "Chase Sapphire".into(),
                account_type: Some("LIABILITY".into()),
                sub_type: Some("CREDIT_CARD".into()),
                currency: None,
            }),
            confidence: Some(0.8),
            ..decide(ChangeType::CreateAccount)
        })
    };
    let mock = MockBackend::new()
        .with_extraction(vec![
            item(30.0, "Grocer", "2026-04-02"),
            item(50.0, "Fuel Stop", "2026-04-03"),
        ])
        .with_agent_actions(vec![new_card(), new_card()]);

    let summary = fx.processor(mock).process(&doc.id).await.unwrap();
    assert_eq!(summary.proposal_ids.len(), 1);

    let proposal = fx
        .db
        .get_proposal(&fx.user.id, &summary.proposal_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(proposal.change_type, ChangeType::CreateAccount);
    assert_eq!(proposal.proposed_data["_new_account"]["name"], "Chase Sapphire");
    assert_eq!(proposal.proposed_data["_new_account"]["type"], "LIABILITY");
    assert_eq!(proposal.proposed_data["transactions"].as_array().unwrap().len(), 2);

    let outcome = fx
        .db
        .confirm_proposal(&fx.user.id, &proposal.id, &approve())
        .unwrap();
    assert_eq!(outcome.transaction_ids.len(), 2);
    let account_id = outcome.account_id.unwrap();
    let account = fx.db.get_account(&fx.user.id, &account_id).unwrap().unwrap();
    assert_eq!(account.account_type, AccountType::Liability);
    assert_eq!(account.current_balance, -80.0);
}

// =============================================================================
// Idempotence and failures
// =============================================================================

#[tokio::test]
async fn test_reprocessing_refreshes_instead_of_duplicating() {
    let fx = Fixture::new();
    let doc = fx.upload("again.jpg", "image/jpeg", b"same bytes");

    let mock = MockBackend::new()
        .with_extraction(vec![item(7.0, "Cinema", "2026-05-01")])
        .with_extraction(vec![item(7.004, "cinema ", "2026-05-01")]);
    let processor = fx.processor(mock);

    let first = processor.process(&doc.id).await.unwrap();
    let second = processor.process(&doc.id).await.unwrap();
    assert_eq!(first.proposal_ids, second.proposal_ids);
    assert_eq!(fx.db.list_document_proposals(&fx.user.id, &doc.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_items_without_amount_are_skipped() {
    let fx = Fixture::new();
    let doc = fx.upload("partial.jpg", "image/jpeg", b"bytes");

    let mock = MockBackend::new().with_extraction(vec![
        ExtractedTransaction {
            merchant: Some("Mystery".into()),
            ..Default::default()
        },
        item(3.0, "Kiosk", "2026-01-01"),
    ]);

    let summary = fx.processor(mock).process(&doc.id).await.unwrap();
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.proposal_ids.len(), 1);
}

#[tokio::test]
async fn test_unsupported_mime_type_errors() {
    let fx = Fixture::new();
    let doc = fx.upload("notes.csv", "text/csv", b"a,b,c");

    let summary = fx.processor(MockBackend::new()).process(&doc.id).await.unwrap();
    assert_eq!(summary.status, DocumentStatus::Error);

    let stored = fx.db.get_document(&fx.user.id, &doc.id).unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Error);
    assert!(stored.error_message.unwrap().contains("Unsupported file type"));
}

#[tokio::test]
async fn test_backend_failure_and_missing_file_error() {
    let fx = Fixture::new();

    let doc = fx.upload("r.jpg", "image/jpeg", b"bytes");
    let summary = fx.processor(MockBackend::failing()).process(&doc.id).await.unwrap();
    assert_eq!(summary.status, DocumentStatus::Error);
    assert!(summary.error.unwrap().contains("Mock backend failure"));

    let gone = fx.upload("gone.jpg", "image/jpeg", b"bytes");
    std::fs::remove_file(&gone.file_path).unwrap();
    let summary = fx.processor(MockBackend::new()).process(&gone.id).await.unwrap();
    assert_eq!(summary.status, DocumentStatus::Error);
    assert!(summary.error.unwrap().contains("Cannot read document file"));

    let empty = fx.upload("empty.jpg", "image/jpeg", b"");
    let summary = fx.processor(MockBackend::new()).process(&empty.id).await.unwrap();
    assert!(summary.error.unwrap().contains("empty"));
}

#[tokio::test]
async fn test_process_unknown_or_busy_document() {
    let fx = Fixture::new();
    let processor = fx.processor(MockBackend::new());

    assert!(matches!(
        processor.process("missing").await,
        Err(tally_core::Error::NotFound(_))
    ));

    let doc = fx.upload("busy.jpg", "image/jpeg", b"bytes");
    fx.db.begin_parsing(&doc.id).unwrap();
    assert!(matches!(
        processor.process(&doc.id).await,
        Err(tally_core::Error::Conflict(_))
    ));
}

// =============================================================================
// Real Gemini client against the mock server
// =============================================================================

#[cfg(feature = "test-utils")]
mod gemini {
    use super::*;
    use tally_core::test_utils::{MockGeminiServer, MOCK_RECEIPT_MERCHANT};
    use tally_core::GeminiBackend;

    #[tokio::test]
    async fn test_pipeline_with_gemini_backend() {
        let server = MockGeminiServer::start().await;
        let fx = Fixture::new();
        let doc = fx.upload("lunch.jpg", "image/jpeg", b"jpeg");

        let ai = AIClient::Gemini(
            GeminiBackend::new("test-key", "gemini-2.0-flash").with_base_url(&server.url()),
        );
        let summary = DocumentProcessor::new(fx.db.clone(), ai)
            .process(&doc.id)
            .await
            .unwrap();
        assert_eq!(summary.status, DocumentStatus::Processed);

        let proposal = fx
            .db
            .get_proposal(&fx.user.id, &summary.proposal_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(proposal.proposed_data["merchant"], MOCK_RECEIPT_MERCHANT);
        assert_eq!(proposal.proposed_data["amount"], 23.4);
        assert_eq!(proposal.confidence_score, Some(0.8));
    }
}
