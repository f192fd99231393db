//! Tally Web Server
//!
//! Axum-based REST API for the Tally personal finance tracker.
//!
//! Security features:
//! - Identity header authentication (set by the fronting proxy; `--no-auth` for local dev)
//! - CORS only when explicitly configured
//! - Input validation (pagination limits, file size limits)
//! - Audit logging for every mutation
//! - Sanitized error responses

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::ai::{AIBackend, AIClient};
use tally_core::db::Database;
use tally_core::models::{DocumentStatus, User};
use tally_core::DocumentProcessor;

mod handlers;

/// Maximum file upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = tally_core::db::MAX_PAGE_LIMIT;

/// Default identity header, set by the authenticating proxy
pub const DEFAULT_AUTH_HEADER: &str = "X-Forwarded-Email";

/// Identity used when auth is off and the request carries none
pub const DEFAULT_DEV_USER: &str = "dev@localhost";

/// Largest JSON request body
const MAX_JSON_BODY: usize = 256 * 1024;

/// Error recorded on uploads when there is nothing to process them with
pub const AI_NOT_CONFIGURED: &str = "AI backend not configured";

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Reject requests without the identity header
    pub require_auth: bool,
    /// Header carrying the caller's email
    pub auth_header: String,
    /// Email used when auth is off and the header is missing
    pub dev_user: String,
    /// Permissive CORS for a local frontend dev server
    pub dev_mode: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Where uploaded documents are stored
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            dev_user: DEFAULT_DEV_USER.to_string(),
            dev_mode: false,
            allowed_origins: vec![],
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl ServerConfig {
    /// Build a config from `TALLY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(header) = std::env::var("TALLY_AUTH_HEADER") {
            if !header.trim().is_empty() {
                config.auth_header = header.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("TALLY_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                config.upload_dir = PathBuf::from(dir.trim());
            }
        }
        config.dev_mode = std::env::var("TALLY_DEV_MODE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config.allowed_origins = std::env::var("TALLY_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        config
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// None when no AI backend is configured
    pub processor: Option<DocumentProcessor>,
}

impl AppState {
    /// Start processing a document in the background
    ///
    /// Without an AI backend the document goes straight to `ERROR`.
    pub fn spawn_processing(&self, document_id: String) {
        let Some(processor) = self.processor.clone() else {
            if let Err(e) = self.db.set_document_status(
                &document_id,
                DocumentStatus::Error,
                Some(AI_NOT_CONFIGURED),
            ) {
                error!(document_id = %document_id, error = %e, "Failed to mark document");
            }
            return;
        };

        tokio::spawn(async move {
            match processor.process(&document_id).await {
                Ok(summary) => info!(
                    document_id = %document_id,
                    status = %summary.status,
                    proposals = summary.proposal_ids.len(),
                    "Document processed"
                ),
                Err(e) => warn!(document_id = %document_id, error = %e, "Document processing did not run"),
            }
        });
    }
}

/// The authenticated caller, stored as a request extension
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn email(&self) -> &str {
        &self.0.email
    }
}

/// Identity middleware
///
/// Reads the configured identity header and registers the caller on first
/// sight. With auth off, a missing header falls back to `dev_user`.
async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_name = &state.config.auth_header;
    let email = request
        .headers()
        .get(header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let email = match email {
        Some(email) => email,
        None if !state.config.require_auth => state.config.dev_user.clone(),
        None => {
            warn!(path = %request.uri().path(), "Missing identity header");
            return AppError::unauthorized(&format!("Missing {} header", header_name))
                .into_response();
        }
    };

    match state.db.get_or_create_user(&email) {
        Ok(user) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

/// The caller set by `identity_middleware`
pub fn current_user(request: &Request) -> Result<CurrentUser, AppError> {
    request
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Not authenticated"))
}

/// Read a JSON request body, mapping every failure to 400
pub async fn read_json<T: DeserializeOwned>(request: Request) -> Result<T, AppError> {
    let bytes: Bytes = axum::body::to_bytes(request.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::bad_request(&format!("Invalid JSON: {}", e)))
}

/// GET / - Welcome message
async fn welcome() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Welcome to the Tally API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Create the application router
///
/// The AI backend comes from the environment (`AI_BACKEND` and friends).
pub fn create_router(db: Database, config: ServerConfig) -> Router {
    let ai = AIClient::from_env();
    if let Some(ref client) = ai {
        info!(
            "AI backend configured: {} (model: {})",
            client.host(),
            client.model()
        );
    } else {
        info!("ℹ️  AI backend not configured (set GOOGLE_GENAI_KEY to enable document processing)");
    }
    create_router_with_ai(db, config, ai)
}

/// Create the application router with an explicit AI backend
pub fn create_router_with_ai(db: Database, config: ServerConfig, ai: Option<AIClient>) -> Router {
    let processor = ai.map(|ai| DocumentProcessor::new(db.clone(), ai));

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        processor,
    });

    let api_routes = Router::new()
        // Identity
        .route("/me", get(handlers::get_me))
        // Accounts
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route(
            "/accounts/:id",
            get(handlers::get_account)
                .patch(handlers::update_account)
                .delete(handlers::delete_account),
        )
        // Categories
        .route(
            "/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route(
            "/categories/:id",
            axum::routing::delete(handlers::delete_category),
        )
        // Merchants
        .route(
            "/merchants",
            get(handlers::list_merchants).post(handlers::create_merchant),
        )
        .route(
            "/merchants/:id",
            axum::routing::patch(handlers::update_merchant).delete(handlers::delete_merchant),
        )
        // Transactions
        .route(
            "/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route(
            "/transactions/:id",
            get(handlers::get_transaction)
                .patch(handlers::update_transaction)
                .delete(handlers::delete_transaction),
        )
        .route(
            "/transactions/:id/documents",
            get(handlers::get_transaction_documents),
        )
        // Documents
        .route(
            "/documents/upload",
            post(handlers::upload_document)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE + 64 * 1024)),
        )
        .route("/documents", get(handlers::list_documents))
        .route(
            "/documents/:id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        .route("/documents/:id/process", post(handlers::process_document))
        .route(
            "/documents/:id/proposals",
            get(handlers::list_document_proposals),
        )
        // Proposals
        .route("/proposals", get(handlers::list_pending_proposals))
        .route("/proposals/:id", get(handlers::get_proposal))
        .route("/proposals/:id/confirm", post(handlers::confirm_proposal))
        // Reports
        .route("/wealth/chart", get(handlers::wealth_chart))
        // Audit log
        .route("/audit", get(handlers::list_audit_log))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    // Security headers
    // CSP: this is a JSON API, nothing should be rendered or framed
    let csp_value = HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'");

    let mut app = Router::new()
        .route("/", get(welcome))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            csp_value,
        ));

    if let Some(cors) = cors_layer(&config) {
        app = app.layer(cors);
    }

    app
}

/// CORS policy, if any
///
/// Same-origin only unless dev mode or explicit origins are configured.
fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    if config.dev_mode {
        return Some(CorsLayer::permissive());
    }
    if config.allowed_origins.is_empty() {
        return None;
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let mut headers = vec![header::CONTENT_TYPE];
    if let Ok(name) = HeaderName::from_bytes(config.auth_header.as_bytes()) {
        headers.push(name);
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers(headers),
    )
}

/// Start the server with configuration from the environment
pub async fn serve(db: Database, host: &str, port: u16) -> anyhow::Result<()> {
    serve_with_config(db, host, port, ServerConfig::from_env()).await
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!(
            "⚠️  Authentication disabled, requests without {} act as {}",
            config.auth_header, config.dev_user
        );
    }

    // Documents left mid-flight by a previous run will never finish
    match db.reset_stale_documents() {
        Ok(count) if count > 0 => {
            warn!("⚠️  Marked {} interrupted document(s) as ERROR", count);
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to reset stale documents: {}", e);
        }
    }

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    check_ai_connection().await;

    let app = create_router(db, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log AI backend connection status
async fn check_ai_connection() {
    match AIClient::from_env() {
        Some(client) => {
            if client.health_check().await {
                info!(
                    "✅ AI backend connected: {} (model: {})",
                    client.host(),
                    client.model()
                );
            } else {
                warn!(
                    "⚠️  AI backend configured but not responding: {} (model: {})",
                    client.host(),
                    client.model()
                );
            }
        }
        None => {
            info!("ℹ️  AI backend not configured, uploads will be marked ERROR");
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: &str) -> Self {
        Self::with_status(StatusCode::CONFLICT, msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn with_status(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            internal: None,
        }
    }

    fn opaque(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<tally_core::Error> for AppError {
    fn from(err: tally_core::Error) -> Self {
        use tally_core::Error;
        match err {
            Error::NotFound(msg) => Self::not_found(&format!("{} not found", msg)),
            Error::Conflict(msg) => Self::conflict(&msg),
            Error::InvalidData(msg) => Self::bad_request(&msg),
            other => Self::opaque(other.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::opaque(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::opaque(err.into())
    }
}

#[cfg(test)]
mod tests;
