//! Proposal review handlers
//!
//! Confirming is the only way AI output reaches the ledger.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    Json,
};
use tracing::info;

use crate::{current_user, read_json, AppError, AppState};
use tally_core::models::{ConfirmOutcome, Proposal, ProposalDecision, ProposalStatus};

/// GET /api/proposals - The caller's pending proposals
pub async fn list_pending_proposals(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<Proposal>>, AppError> {
    let user = current_user(&request)?;
    let proposals = state
        .db
        .list_proposals(user.id(), Some(ProposalStatus::Pending))?;
    Ok(Json(proposals))
}

/// GET /api/proposals/:id - Get a single proposal
pub async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Proposal>, AppError> {
    let user = current_user(&request)?;

    let proposal = state
        .db
        .get_proposal(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Proposal {} not found", id)))?;

    Ok(Json(proposal))
}

/// POST /api/proposals/:id/confirm - Approve or reject a proposal
///
/// Body: `{"status": "APPROVED" | "REJECTED", "edited_data": {...}}`. A
/// proposal that was already decided answers 409.
pub async fn confirm_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<ConfirmOutcome>, AppError> {
    let user = current_user(&request)?;
    let decision: ProposalDecision = read_json(request).await?;

    let outcome = state.db.confirm_proposal(user.id(), &id, &decision)?;

    let action = match decision.status {
        ProposalStatus::Approved => "approve",
        _ => "reject",
    };
    let mut details = format!(
        "edited={}, transactions={}",
        decision.edited_data.is_some(),
        outcome.transaction_ids.join(",")
    );
    if let Some(ref account_id) = outcome.account_id {
        details.push_str(&format!(", account={}", account_id));
    }
    state
        .db
        .log_audit(user.email(), action, Some("proposal"), Some(&id), Some(&details))?;

    info!(proposal_id = %id, status = %outcome.status, "Proposal confirmed");

    Ok(Json(outcome))
}
