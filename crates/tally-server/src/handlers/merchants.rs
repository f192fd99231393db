//! Merchant handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{current_user, read_json, AppError, AppState};
use tally_core::models::{Merchant, MerchantUpdate, NewMerchant};

/// Query parameters for listing merchants
#[derive(Debug, Default, Deserialize)]
pub struct MerchantQuery {
    /// Case-insensitive name substring
    pub q: Option<String>,
    #[serde(default)]
    pub skip: i64,
    pub limit: Option<i64>,
}

/// GET /api/merchants - List merchants, optionally filtered by name
pub async fn list_merchants(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MerchantQuery>,
    request: Request,
) -> Result<Json<Vec<Merchant>>, AppError> {
    let user = current_user(&request)?;
    let merchants = state.db.list_merchants(
        user.id(),
        params.q.as_deref(),
        params.skip,
        params.limit,
    )?;
    Ok(Json(merchants))
}

/// POST /api/merchants - Create a merchant
pub async fn create_merchant(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Merchant>, AppError> {
    let user = current_user(&request)?;
    let req: NewMerchant = read_json(request).await?;

    let merchant = state.db.create_merchant(user.id(), &req)?;

    state.db.log_audit(
        user.email(),
        "create",
        Some("merchant"),
        Some(&merchant.id),
        Some(&format!("name={}", merchant.name)),
    )?;

    Ok(Json(merchant))
}

/// PATCH /api/merchants/:id - Rename a merchant or change its default category
pub async fn update_merchant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Merchant>, AppError> {
    let user = current_user(&request)?;
    let update: MerchantUpdate = read_json(request).await?;

    let merchant = state.db.update_merchant(user.id(), &id, &update)?;

    state
        .db
        .log_audit(user.email(), "update", Some("merchant"), Some(&id), None)?;

    Ok(Json(merchant))
}

/// DELETE /api/merchants/:id - Delete a merchant
pub async fn delete_merchant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let user = current_user(&request)?;

    state.db.delete_merchant(user.id(), &id)?;

    state
        .db
        .log_audit(user.email(), "delete", Some("merchant"), Some(&id), None)?;

    Ok(StatusCode::NO_CONTENT)
}
