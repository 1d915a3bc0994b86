//! HTTP request handlers.

use super::types::{
    AttemptDetail, AttemptSummary, AttemptsResponse, CredentialResponse, ExportResponse,
    HealthResponse, ListAttemptsQuery,
};
use super::AppState;
use crate::error::ApiError;
use account_ledger::{LedgerStats, Outcome};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;
use uuid::Uuid;

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid attempt id: {}", raw)))
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        ledger_entries: state.ledger.count().await,
    })
}

/// List attempts, optionally filtered by outcome.
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<ListAttemptsQuery>,
) -> Result<Json<AttemptsResponse>, ApiError> {
    let entries = match query.outcome.as_deref() {
        Some(raw) => {
            let outcome: Outcome = raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("unknown outcome: {}", raw)))?;
            state.ledger.list_by_outcome(outcome).await
        }
        None => state.ledger.list_all().await,
    };

    let attempts: Vec<AttemptSummary> = entries.iter().map(AttemptSummary::from).collect();
    let count = attempts.len();
    Ok(Json(AttemptsResponse { attempts, count }))
}

/// Fetch one attempt.
pub async fn get_attempt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AttemptDetail>, ApiError> {
    let id = parse_id(&id)?;
    let entry = state
        .ledger
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
    Ok(Json(AttemptDetail::from(&entry)))
}

/// Credential summary for a successful attempt.
pub async fn get_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let id = parse_id(&id)?;
    if state.ledger.get(&id).await.is_none() {
        return Err(ApiError::NotFound(id.to_string()));
    }
    let credential = state
        .ledger
        .find_credential(&id)
        .await
        .ok_or_else(|| ApiError::NoCredential(id.to_string()))?;

    Ok(Json(CredentialResponse {
        attempt_id: id,
        key_id: credential.key_id.clone(),
        dc_id: credential.triplet.as_ref().map(|t| t.dc_id),
        user_id: credential.triplet.as_ref().map(|t| t.user_id),
        has_desktop_container: credential.desktop_container.is_some(),
        has_programmatic_container: credential.programmatic_container.is_some(),
        created_at: credential.created_at.to_rfc3339(),
    }))
}

/// Write a credential's containers into the export directory.
pub async fn export_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExportResponse>, ApiError> {
    let id = parse_id(&id)?;
    match state.ledger.get(&id).await {
        None => return Err(ApiError::NotFound(id.to_string())),
        Some(entry) if entry.credential.is_none() => {
            return Err(ApiError::NoCredential(id.to_string()))
        }
        Some(_) => {}
    }

    let files = state
        .ledger
        .export_credential(&id, &state.export_dir)
        .await?;
    info!(attempt_id = %id, files = files.len(), "Credential exported via API");

    Ok(Json(ExportResponse {
        attempt_id: id,
        files: files.iter().map(|p| p.display().to_string()).collect(),
    }))
}

/// Aggregate ledger counters.
pub async fn stats(State(state): State<AppState>) -> Json<LedgerStats> {
    Json(state.ledger.stats().await)
}
