//! Report handlers

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    Json,
};
use serde::Deserialize;

use crate::{current_user, AppError, AppState};
use tally_core::models::{WealthInterval, WealthReport};

/// Query parameters for the wealth chart
#[derive(Debug, Default, Deserialize)]
pub struct WealthQuery {
    /// day, month (default) or year
    pub interval: Option<String>,
    pub periods: Option<u32>,
}

/// GET /api/wealth/chart - Assets, liabilities and net worth over time
pub async fn wealth_chart(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WealthQuery>,
    request: Request,
) -> Result<Json<WealthReport>, AppError> {
    let user = current_user(&request)?;

    let interval: WealthInterval = match params.interval.as_deref() {
        Some(raw) => raw.parse().map_err(|e: String| AppError::bad_request(&e))?,
        None => WealthInterval::default(),
    };
    let today = chrono::Utc::now().date_naive();

    let report = state
        .db
        .wealth_chart(user.id(), interval, params.periods, today)?;

    Ok(Json(report))
}
