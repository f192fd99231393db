//! Category handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    Json,
};

use crate::{current_user, read_json, AppError, AppState};
use tally_core::models::{Category, NewCategory};

/// GET /api/categories - List the caller's categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<Category>>, AppError> {
    let user = current_user(&request)?;
    Ok(Json(state.db.list_categories(user.id())?))
}

/// POST /api/categories - Create a category
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Category>, AppError> {
    let user = current_user(&request)?;
    let req: NewCategory = read_json(request).await?;

    let category = state.db.create_category(user.id(), &req)?;

    state.db.log_audit(
        user.email(),
        "create",
        Some("category"),
        Some(&category.id),
        Some(&format!("name={}, type={}", category.name, category.category_type)),
    )?;

    Ok(Json(category))
}

/// DELETE /api/categories/:id - Delete a category
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let user = current_user(&request)?;

    state.db.delete_category(user.id(), &id)?;

    state
        .db
        .log_audit(user.email(), "delete", Some("category"), Some(&id), None)?;

    Ok(StatusCode::NO_CONTENT)
}
