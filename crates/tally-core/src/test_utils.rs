//! Test utilities for tally-core
//!
//! This module provides testing infrastructure including a mock Gemini server
//! that speaks enough of `generateContent` to drive the real `GeminiBackend`.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    extract::{Json, Path, Query},
    http::StatusCode,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// API key that makes the mock server answer 429
pub const RATE_LIMITED_KEY: &str = "rate-limited";

/// Merchant on the mock server's canned receipt
pub const MOCK_RECEIPT_MERCHANT: &str = "Corner Bistro";

/// Mock Gemini server for testing and development
pub struct MockGeminiServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockGeminiServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new().route(
            "/v1beta/models/:model",
            get(handle_model_info).post(handle_generate),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// API root to hand to `GeminiBackend::with_base_url`
    pub fn url(&self) -> String {
        format!("http://{}/v1beta", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockGeminiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Model metadata endpoint (health check)
async fn handle_model_info(Path(model): Path<String>) -> Json<Value> {
    Json(json!({
        "name": format!("models/{}", model),
        "supportedGenerationMethods": ["generateContent"]
    }))
}

/// `generateContent` endpoint
///
/// A request carrying inline document data gets the canned receipt. A
/// text-only request is an agent step: the first one searches, and once the
/// transcript holds a search result the agent decides to create a new
/// transaction.
async fn handle_generate(
    Path(model_action): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if params.get("key").map(String::as_str) == Some(RATE_LIMITED_KEY) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}})),
        );
    }
    if !model_action.ends_with(":generateContent") {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": 404, "message": "Unknown method"}})),
        );
    }

    let parts = request["contents"][0]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let has_document = parts.iter().any(|p| p.get("inlineData").is_some());
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let answer = if has_document {
        json!([{
            "amount": "$23.40",
            "merchant": MOCK_RECEIPT_MERCHANT,
            "transaction_date": "2026-03-14",
            "type": "EXPENSE",
            "note": "Lunch"
        }])
    } else if text.contains("RESULT:") {
        json!({"action": "DECIDE", "decision": "CREATE_NEW", "confidence": 0.8})
    } else {
        json!({"action": "SEARCH", "merchant": MOCK_RECEIPT_MERCHANT})
    };

    (
        StatusCode::OK,
        Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": answer.to_string()}]},
                "finishReason": "STOP"
            }]
        })),
    )
}
