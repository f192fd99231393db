//! Identity handlers

use axum::{extract::Request, Json};

use crate::{current_user, AppError};
use tally_core::models::User;

/// GET /api/me - The caller, as registered from the identity header
pub async fn get_me(request: Request) -> Result<Json<User>, AppError> {
    let user = current_user(&request)?;
    Ok(Json(user.0))
}
