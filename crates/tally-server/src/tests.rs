//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tally_core::ai::{ExtractedTransaction, MockBackend};
use tempfile::TempDir;
use tower::ServiceExt;

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";
const BOUNDARY: &str = "tally-test-boundary";

struct TestApp {
    app: Router,
    db: Database,
    uploads: TempDir,
}

fn setup_with_ai(ai: Option<AIClient>) -> TestApp {
    let db = Database::in_memory().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..Default::default()
    };
    let app = create_router_with_ai(db.clone(), config, ai);
    TestApp { app, db, uploads }
}

fn setup_test_app() -> TestApp {
    setup_with_ai(Some(AIClient::Mock(MockBackend::new())))
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str, email: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(DEFAULT_AUTH_HEADER, email)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    email: &str,
    body: Value,
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(DEFAULT_AUTH_HEADER, email)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn delete(app: &Router, uri: &str, email: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header(DEFAULT_AUTH_HEADER, email)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Hand-built multipart body with a `file` part and an optional `user_note`
fn multipart_body(filename: &str, mime: &str, data: &[u8], note: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(note) = note {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"user_note\"\r\n\r\n{}\r\n",
                BOUNDARY, note
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            BOUNDARY, filename, mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn upload(
    app: &Router,
    email: &str,
    filename: &str,
    mime: &str,
    data: &[u8],
    note: Option<&str>,
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/documents/upload")
                .header(DEFAULT_AUTH_HEADER, email)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(multipart_body(filename, mime, data, note)))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Poll a document until background processing settles
async fn wait_for_document(app: &Router, id: &str, email: &str) -> Value {
    for _ in 0..200 {
        let doc = get_body_json(get(app, &format!("/api/documents/{}", id), email).await).await;
        if doc["status"] == "PROCESSED" || doc["status"] == "ERROR" {
            return doc;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("document {} never finished processing", id);
}

async fn create_account(app: &Router, email: &str, name: &str, balance: f64) -> Value {
    let response = send_json(
        app,
        "POST",
        "/api/accounts",
        email,
        json!({"name": name, "type": "ASSET", "current_balance": balance}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    get_body_json(response).await
}

fn receipt_item(amount: f64, merchant: &str) -> ExtractedTransaction {
    ExtractedTransaction {
        amount: Some(amount),
        merchant: Some(merchant.to_string()),
        transaction_date: Some("2026-03-14".to_string()),
        transaction_type: Some("EXPENSE".to_string()),
        note: Some("Lunch".to_string()),
        ..Default::default()
    }
}

// ========== Identity ==========

#[tokio::test]
async fn test_welcome_needs_no_identity() {
    let t = setup_test_app();

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("Tally"));
}

#[tokio::test]
async fn test_auth_required() {
    let t = setup_test_app();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Missing X-Forwarded-Email header");
}

#[tokio::test]
async fn test_empty_identity_header_rejected() {
    let t = setup_test_app();
    let response = get(&t.app, "/api/me", "   ").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_custom_auth_header() {
    let db = Database::in_memory().unwrap();
    let config = ServerConfig {
        auth_header: "X-Auth-Request-Email".to_string(),
        ..Default::default()
    };
    let app = create_router_with_ai(db, config, None);

    let response = get(&app, "/api/me", ALICE).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Missing X-Auth-Request-Email header");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header("x-auth-request-email", ALICE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_no_auth_uses_dev_user() {
    let db = Database::in_memory().unwrap();
    let config = ServerConfig {
        require_auth: false,
        ..Default::default()
    };
    let app = create_router_with_ai(db, config, None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["email"], DEFAULT_DEV_USER);
}

#[tokio::test]
async fn test_me_registers_user_with_default_categories() {
    let t = setup_test_app();

    let response = get(&t.app, "/api/me", ALICE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me = get_body_json(response).await;
    assert_eq!(me["email"], ALICE);
    assert_eq!(me["full_name"], "alice");

    let categories = get_body_json(get(&t.app, "/api/categories", ALICE).await).await;
    let names: Vec<&str> = categories
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Food"));
    assert!(names.contains(&"Salary"));
    assert_eq!(t.db.count_users().unwrap(), 1);
}

#[tokio::test]
async fn test_security_headers() {
    let t = setup_test_app();
    let response = get(&t.app, "/api/me", ALICE).await;

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
    assert!(headers.get("access-control-allow-origin").is_none());
}

// ========== Accounts ==========

#[tokio::test]
async fn test_account_crud() {
    let t = setup_test_app();

    let account = create_account(&t.app, ALICE, "Checking", 100.0).await;
    let id = account["id"].as_str().unwrap().to_string();
    assert_eq!(account["currency"], "USD");
    assert_eq!(account["current_balance"], 100.0);

    let response = get(&t.app, &format!("/api/accounts/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_json(
        &t.app,
        "PATCH",
        &format!("/api/accounts/{}", id),
        ALICE,
        json!({"name": "Main Checking", "current_balance": 250}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = get_body_json(response).await;
    assert_eq!(updated["name"], "Main Checking");
    assert_eq!(updated["current_balance"], 250.0);

    let listed = get_body_json(get(&t.app, "/api/accounts", ALICE).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = delete(&t.app, &format!("/api/accounts/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&t.app, &format!("/api/accounts/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_account_validation() {
    let t = setup_test_app();

    let response = send_json(
        &t.app,
        "POST",
        "/api/accounts",
        ALICE,
        json!({"name": "Card", "type": "CREDIT"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send_json(
        &t.app,
        "POST",
        "/api/accounts",
        ALICE,
        json!({"name": "  ", "type": "ASSET"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accounts_are_private() {
    let t = setup_test_app();
    let account = create_account(&t.app, ALICE, "Checking", 100.0).await;
    let id = account["id"].as_str().unwrap();

    let response = get(&t.app, &format!("/api/accounts/{}", id), BOB).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = delete(&t.app, &format!("/api/accounts/{}", id), BOB).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listed = get_body_json(get(&t.app, "/api/accounts", BOB).await).await;
    assert!(listed.as_array().unwrap().is_empty());
}

// ========== Transactions ==========

#[tokio::test]
async fn test_transactions_keep_balance() {
    let t = setup_test_app();
    let account = create_account(&t.app, ALICE, "Checking", 100.0).await;
    let account_id = account["id"].as_str().unwrap();

    let response = send_json(
        &t.app,
        "POST",
        "/api/transactions",
        ALICE,
        json!({
            "account_id": account_id,
            "amount": "$40.00",
            "type": "EXPENSE",
            "transaction_date": "2026-03-01",
            "merchant": "Grocer"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tx = get_body_json(response).await;
    let tx_id = tx["id"].as_str().unwrap().to_string();
    assert_eq!(tx["amount"], 40.0);

    let account = get_body_json(get(&t.app, &format!("/api/accounts/{}", account_id), ALICE).await).await;
    assert_eq!(account["current_balance"], 60.0);

    let response = send_json(
        &t.app,
        "PATCH",
        &format!("/api/transactions/{}", tx_id),
        ALICE,
        json!({"amount": 50}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let account = get_body_json(get(&t.app, &format!("/api/accounts/{}", account_id), ALICE).await).await;
    assert_eq!(account["current_balance"], 50.0);

    let listed = get_body_json(
        get(
            &t.app,
            &format!("/api/transactions?account_id={}&limit=5", account_id),
            ALICE,
        )
        .await,
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = delete(&t.app, &format!("/api/transactions/{}", tx_id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let account = get_body_json(get(&t.app, &format!("/api/accounts/{}", account_id), ALICE).await).await;
    assert_eq!(account["current_balance"], 100.0);
}

#[tokio::test]
async fn test_transaction_validation() {
    let t = setup_test_app();
    let account = create_account(&t.app, ALICE, "Checking", 0.0).await;
    let account_id = account["id"].as_str().unwrap();

    let response = send_json(
        &t.app,
        "POST",
        "/api/transactions",
        ALICE,
        json!({"account_id": account_id, "amount": "lots", "transaction_date": "2026-03-01"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send_json(
        &t.app,
        "POST",
        "/api/transactions",
        ALICE,
        json!({
            "account_id": account_id,
            "amount": 10,
            "type": "TRANSFER",
            "transaction_date": "2026-03-01"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send_json(
        &t.app,
        "PATCH",
        "/api/transactions/does-not-exist",
        ALICE,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&t.app, "/api/transactions/does-not-exist", ALICE).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Categories & merchants ==========

#[tokio::test]
async fn test_category_create_and_delete() {
    let t = setup_test_app();
    get(&t.app, "/api/me", ALICE).await;

    let response = send_json(
        &t.app,
        "POST",
        "/api/categories",
        ALICE,
        json!({"name": "Coffee", "type": "EXPENSE"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let coffee = get_body_json(response).await;
    let id = coffee["id"].as_str().unwrap();

    let response = delete(&t.app, &format!("/api/categories/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = delete(&t.app, &format!("/api/categories/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_merchant_crud_and_search() {
    let t = setup_test_app();

    for name in ["Corner Bistro", "Fuel Stop"] {
        let response = send_json(
            &t.app,
            "POST",
            "/api/merchants",
            ALICE,
            json!({"name": name}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let found = get_body_json(get(&t.app, "/api/merchants?q=bistro", ALICE).await).await;
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    let id = found[0]["id"].as_str().unwrap().to_string();

    let response = send_json(
        &t.app,
        "PATCH",
        &format!("/api/merchants/{}", id),
        ALICE,
        json!({"name": "The Corner Bistro"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["name"], "The Corner Bistro");

    let response = delete(&t.app, &format!("/api/merchants/{}", id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let all = get_body_json(get(&t.app, "/api/merchants", ALICE).await).await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

// ========== Documents & proposals ==========

#[tokio::test]
async fn test_upload_process_and_approve() {
    let mock = MockBackend::new().with_extraction(vec![receipt_item(23.4, "Corner Bistro")]);
    let t = setup_with_ai(Some(AIClient::Mock(mock)));

    let response = upload(
        &t.app,
        ALICE,
        "receipt.jpg",
        "image/jpeg",
        b"\xFF\xD8\xFFfake-jpeg",
        Some("team lunch"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = get_body_json(response).await;
    assert_eq!(doc["status"], "UPLOADED");
    assert_eq!(doc["user_note"], "team lunch");
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let stored = std::path::Path::new(doc["file_path"].as_str().unwrap());
    assert!(stored.starts_with(t.uploads.path()));
    assert_eq!(
        stored.file_name().unwrap().to_str().unwrap(),
        format!("{}.jpg", doc_id)
    );

    let doc = wait_for_document(&t.app, &doc_id, ALICE).await;
    assert_eq!(doc["status"], "PROCESSED");

    let proposals = get_body_json(
        get(&t.app, &format!("/api/documents/{}/proposals", doc_id), ALICE).await,
    )
    .await;
    assert_eq!(proposals.as_array().unwrap().len(), 1);

    let pending = get_body_json(get(&t.app, "/api/proposals", ALICE).await).await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    let proposal = &pending[0];
    assert_eq!(proposal["change_type"], "CREATE_NEW");
    assert_eq!(proposal["proposed_data"]["amount"], 23.4);
    let proposal_id = proposal["id"].as_str().unwrap().to_string();

    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/proposals/{}/confirm", proposal_id),
        ALICE,
        json!({"status": "APPROVED", "edited_data": {"note": "Team lunch"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = get_body_json(response).await;
    assert_eq!(outcome["status"], "approved");
    let tx_id = outcome["transaction_ids"][0].as_str().unwrap().to_string();

    let tx = get_body_json(get(&t.app, &format!("/api/transactions/{}", tx_id), ALICE).await).await;
    assert_eq!(tx["note"], "Team lunch");

    let docs = get_body_json(
        get(&t.app, &format!("/api/transactions/{}/documents", tx_id), ALICE).await,
    )
    .await;
    assert_eq!(docs[0]["id"], doc_id.as_str());

    // A second confirmation must not apply twice
    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/proposals/{}/confirm", proposal_id),
        ALICE,
        json!({"status": "APPROVED"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let pending = get_body_json(get(&t.app, "/api/proposals", ALICE).await).await;
    assert!(pending.as_array().unwrap().is_empty());

    let audit = get_body_json(get(&t.app, "/api/audit", ALICE).await).await;
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"upload"));
    assert!(actions.contains(&"approve"));
}

#[tokio::test]
async fn test_reject_leaves_ledger_untouched() {
    let mock = MockBackend::new().with_extraction(vec![receipt_item(9.99, "Kiosk")]);
    let t = setup_with_ai(Some(AIClient::Mock(mock)));

    let doc = get_body_json(upload(&t.app, ALICE, "r.png", "image/png", b"png-bytes", None).await).await;
    let doc_id = doc["id"].as_str().unwrap().to_string();
    wait_for_document(&t.app, &doc_id, ALICE).await;

    let pending = get_body_json(get(&t.app, "/api/proposals", ALICE).await).await;
    let proposal_id = pending[0]["id"].as_str().unwrap().to_string();

    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/proposals/{}/confirm", proposal_id),
        ALICE,
        json!({"status": "REJECTED"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["status"], "rejected");

    let transactions = get_body_json(get(&t.app, "/api/transactions", ALICE).await).await;
    assert!(transactions.as_array().unwrap().is_empty());

    let proposal = get_body_json(get(&t.app, &format!("/api/proposals/{}", proposal_id), ALICE).await).await;
    assert_eq!(proposal["status"], "REJECTED");
}

#[tokio::test]
async fn test_confirm_requires_terminal_status() {
    let mock = MockBackend::new().with_extraction(vec![receipt_item(5.0, "Kiosk")]);
    let t = setup_with_ai(Some(AIClient::Mock(mock)));

    let doc = get_body_json(upload(&t.app, ALICE, "r.png", "image/png", b"abc", None).await).await;
    wait_for_document(&t.app, doc["id"].as_str().unwrap(), ALICE).await;
    let pending = get_body_json(get(&t.app, "/api/proposals", ALICE).await).await;
    let proposal_id = pending[0]["id"].as_str().unwrap().to_string();

    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/proposals/{}/confirm", proposal_id),
        ALICE,
        json!({"status": "PENDING"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/proposals/{}/confirm", proposal_id),
        BOB,
        json!({"status": "APPROVED"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_upload_conflict() {
    let t = setup_test_app();

    let response = upload(&t.app, ALICE, "a.pdf", "application/pdf", b"%PDF-1.4 same", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = upload(&t.app, ALICE, "b.pdf", "application/pdf", b"%PDF-1.4 same", None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The hash check is per user
    let response = upload(&t.app, BOB, "a.pdf", "application/pdf", b"%PDF-1.4 same", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_requires_file() {
    let t = setup_test_app();

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"user_note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/documents/upload")
                .header(DEFAULT_AUTH_HEADER, ALICE)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = upload(&t.app, ALICE, "empty.pdf", "application/pdf", b"", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_without_ai_backend() {
    let t = setup_with_ai(None);

    let response = upload(&t.app, ALICE, "r.jpg", "image/jpeg", b"jpeg", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = get_body_json(response).await;

    let doc = wait_for_document(&t.app, doc["id"].as_str().unwrap(), ALICE).await;
    assert_eq!(doc["status"], "ERROR");
    assert_eq!(doc["error_message"], AI_NOT_CONFIGURED);
}

#[tokio::test]
async fn test_unsupported_upload_ends_in_error() {
    let t = setup_test_app();

    let doc = get_body_json(upload(&t.app, ALICE, "notes.txt", "text/plain", b"hi", None).await).await;
    let doc = wait_for_document(&t.app, doc["id"].as_str().unwrap(), ALICE).await;

    assert_eq!(doc["status"], "ERROR");
    assert!(doc["error_message"]
        .as_str()
        .unwrap()
        .contains("Unsupported file type"));
}

#[tokio::test]
async fn test_process_conflict_while_parsing() {
    let t = setup_test_app();

    let doc = get_body_json(upload(&t.app, ALICE, "r.png", "image/png", b"x", None).await).await;
    let doc_id = doc["id"].as_str().unwrap().to_string();
    wait_for_document(&t.app, &doc_id, ALICE).await;

    t.db
        .set_document_status(&doc_id, DocumentStatus::Parsing, None)
        .unwrap();
    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/documents/{}/process", doc_id),
        ALICE,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    t.db
        .set_document_status(&doc_id, DocumentStatus::Processed, None)
        .unwrap();
    let response = send_json(
        &t.app,
        "POST",
        &format!("/api/documents/{}/process", doc_id),
        ALICE,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let doc = wait_for_document(&t.app, &doc_id, ALICE).await;
    assert_eq!(doc["status"], "PROCESSED");
}

#[tokio::test]
async fn test_delete_document_removes_file() {
    let t = setup_test_app();

    let doc = get_body_json(upload(&t.app, ALICE, "r.png", "image/png", b"bytes", None).await).await;
    let doc_id = doc["id"].as_str().unwrap().to_string();
    let path = std::path::PathBuf::from(doc["file_path"].as_str().unwrap());
    wait_for_document(&t.app, &doc_id, ALICE).await;
    assert!(path.exists());

    let response = delete(&t.app, &format!("/api/documents/{}", doc_id), BOB).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(path.exists());

    let response = delete(&t.app, &format!("/api/documents/{}", doc_id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!path.exists());

    let response = get(&t.app, &format!("/api/documents/{}", doc_id), ALICE).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_documents_pagination() {
    let t = setup_test_app();
    for i in 0..3 {
        let data = format!("doc-{}", i);
        let response = upload(&t.app, ALICE, "r.png", "image/png", data.as_bytes(), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let docs = get_body_json(get(&t.app, "/api/documents?limit=2", ALICE).await).await;
    assert_eq!(docs.as_array().unwrap().len(), 2);

    let docs = get_body_json(get(&t.app, "/api/documents?skip=2&limit=5000", ALICE).await).await;
    assert_eq!(docs.as_array().unwrap().len(), 1);
}

// ========== Reports ==========

#[tokio::test]
async fn test_wealth_chart() {
    let t = setup_test_app();
    create_account(&t.app, ALICE, "Savings", 1000.0).await;

    let response = get(&t.app, "/api/wealth/chart", ALICE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = get_body_json(response).await;
    let points = report["data_points"].as_array().unwrap();
    assert_eq!(points.len(), 12);
    assert_eq!(points.last().unwrap()["net_worth"], 1000.0);

    let report = get_body_json(get(&t.app, "/api/wealth/chart?interval=day&periods=3", ALICE).await).await;
    assert_eq!(report["data_points"].as_array().unwrap().len(), 3);

    let response = get(&t.app, "/api/wealth/chart?interval=fortnight", ALICE).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_log_scoped_to_caller() {
    let t = setup_test_app();
    create_account(&t.app, ALICE, "Checking", 0.0).await;
    create_account(&t.app, BOB, "Checking", 0.0).await;

    let audit = get_body_json(get(&t.app, "/api/audit?limit=10", ALICE).await).await;
    let entries = audit.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["user_email"], ALICE);
    assert_eq!(entries[0]["action"], "create");
}

// ========== Errors ==========

#[test]
fn test_core_error_mapping() {
    let err = AppError::from(tally_core::Error::NotFound("Proposal x".into()));
    assert_eq!(err.status(), StatusCode::NOT_FOUND);

    let err = AppError::from(tally_core::Error::Conflict("already decided".into()));
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let err = AppError::from(tally_core::Error::InvalidData("bad amount".into()));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let err = AppError::from(tally_core::Error::Ai("boom".into()));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_cors_only_when_configured() {
    assert!(cors_layer(&ServerConfig::default()).is_none());
    assert!(cors_layer(&ServerConfig {
        dev_mode: true,
        ..Default::default()
    })
    .is_some());
    assert!(cors_layer(&ServerConfig {
        allowed_origins: vec!["https://tally.example.com".into()],
        ..Default::default()
    })
    .is_some());
}
