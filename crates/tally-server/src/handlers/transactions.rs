//! Transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    Json,
};

use crate::{current_user, read_json, AppError, AppState};
use tally_core::models::{Document, NewTransaction, Transaction, TransactionFilter, TransactionUpdate};

/// GET /api/transactions - List transactions, newest first
///
/// `account_id` matches either side of a transfer.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TransactionFilter>,
    request: Request,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let user = current_user(&request)?;
    Ok(Json(state.db.list_transactions(user.id(), &filter)?))
}

/// POST /api/transactions - Record a transaction by hand
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Transaction>, AppError> {
    let user = current_user(&request)?;
    let req: NewTransaction = read_json(request).await?;

    let tx = state.db.create_transaction(user.id(), &req)?;

    state.db.log_audit(
        user.email(),
        "create",
        Some("transaction"),
        Some(&tx.id),
        Some(&format!(
            "account={}, amount={}, type={}",
            tx.account_id, tx.amount, tx.transaction_type
        )),
    )?;

    Ok(Json(tx))
}

/// GET /api/transactions/:id - Get a single transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Transaction>, AppError> {
    let user = current_user(&request)?;

    let tx = state
        .db
        .get_transaction(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Transaction {} not found", id)))?;

    Ok(Json(tx))
}

/// PATCH /api/transactions/:id - Update a transaction
pub async fn update_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Transaction>, AppError> {
    let user = current_user(&request)?;
    let update: TransactionUpdate = read_json(request).await?;

    if update.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }

    let tx = state.db.update_transaction(user.id(), &id, &update)?;

    state.db.log_audit(
        user.email(),
        "update",
        Some("transaction"),
        Some(&id),
        Some(&format!("amount={}, type={}", tx.amount, tx.transaction_type)),
    )?;

    Ok(Json(tx))
}

/// DELETE /api/transactions/:id - Delete a transaction
pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let user = current_user(&request)?;

    state.db.delete_transaction(user.id(), &id)?;

    state
        .db
        .log_audit(user.email(), "delete", Some("transaction"), Some(&id), None)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/transactions/:id/documents - Documents behind a transaction
pub async fn get_transaction_documents(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Vec<Document>>, AppError> {
    let user = current_user(&request)?;
    Ok(Json(state.db.list_transaction_documents(user.id(), &id)?))
}
