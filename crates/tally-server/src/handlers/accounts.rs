//! Account management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    Json,
};

use super::PageQuery;
use crate::{current_user, read_json, AppError, AppState};
use tally_core::models::{Account, AccountUpdate, NewAccount};

/// GET /api/accounts - List the caller's accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
    request: Request,
) -> Result<Json<Vec<Account>>, AppError> {
    let user = current_user(&request)?;
    let accounts = state.db.list_accounts(user.id(), page.skip, page.limit)?;
    Ok(Json(accounts))
}

/// POST /api/accounts - Create a new account
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Account>, AppError> {
    let user = current_user(&request)?;
    let req: NewAccount = read_json(request).await?;

    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("Account name is required"));
    }

    let account = state.db.create_account(user.id(), &req)?;

    state.db.log_audit(
        user.email(),
        "create",
        Some("account"),
        Some(&account.id),
        Some(&format!(
            "name={}, type={}, balance={}",
            account.name, account.account_type, account.current_balance
        )),
    )?;

    Ok(Json(account))
}

/// GET /api/accounts/:id - Get a single account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Account>, AppError> {
    let user = current_user(&request)?;

    let account = state
        .db
        .get_account(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;

    Ok(Json(account))
}

/// PATCH /api/accounts/:id - Update an account
///
/// Setting `current_balance` re-bases the opening balance.
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Account>, AppError> {
    let user = current_user(&request)?;
    let update: AccountUpdate = read_json(request).await?;

    let account = state.db.update_account(user.id(), &id, &update)?;

    state.db.log_audit(
        user.email(),
        "update",
        Some("account"),
        Some(&id),
        Some(&format!("balance={}", account.current_balance)),
    )?;

    Ok(Json(account))
}

/// DELETE /api/accounts/:id - Delete an account and its transactions
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let user = current_user(&request)?;

    state.db.delete_account(user.id(), &id)?;

    state
        .db
        .log_audit(user.email(), "delete", Some("account"), Some(&id), None)?;

    Ok(StatusCode::NO_CONTENT)
}
