//! API request and response types.

use account_ledger::{
    EntryNote, FailureKind, FailureReason, LedgerEntry, NumberDisposition, Outcome,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ledger_entries: usize,
}

/// Query parameters for listing attempts.
#[derive(Debug, Default, Deserialize)]
pub struct ListAttemptsQuery {
    /// Filter by outcome: success, aborted or failed
    pub outcome: Option<String>,
}

/// Short view of one ledger entry.
#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub country: String,
    pub outcome: Outcome,
    pub reason: Option<FailureReason>,
    pub failure_kind: Option<FailureKind>,
    pub phone_number: Option<String>,
    pub number_disposition: NumberDisposition,
    pub cost: f64,
    pub has_credential: bool,
    pub notes: Vec<EntryNote>,
    pub finalized_at: String,
}

impl From<&LedgerEntry> for AttemptSummary {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            attempt_id: entry.attempt_id,
            country: entry.country.clone(),
            outcome: entry.outcome,
            reason: entry.reason,
            failure_kind: entry.failure_kind,
            phone_number: entry.phone_number.clone(),
            number_disposition: entry.number_disposition,
            cost: entry.cost,
            has_credential: entry.credential.is_some(),
            notes: entry.notes.clone(),
            finalized_at: entry.finalized_at.to_rfc3339(),
        }
    }
}

/// Attempt list response.
#[derive(Debug, Serialize)]
pub struct AttemptsResponse {
    pub attempts: Vec<AttemptSummary>,
    pub count: usize,
}

/// Full view of one attempt. Credential key material is never included.
#[derive(Debug, Serialize)]
pub struct AttemptDetail {
    #[serde(flatten)]
    pub summary: AttemptSummary,
    pub price_ceiling: f64,
    pub detail: Option<String>,
    pub used_two_factor: bool,
    pub mailbox: Option<String>,
    pub code_sources: Vec<String>,
    pub transitions: Vec<TransitionView>,
}

#[derive(Debug, Serialize)]
pub struct TransitionView {
    pub state: String,
    pub at: String,
}

impl From<&LedgerEntry> for AttemptDetail {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            summary: AttemptSummary::from(entry),
            price_ceiling: entry.price_ceiling,
            detail: entry.detail.clone(),
            used_two_factor: entry.used_two_factor,
            mailbox: entry.mailbox.clone(),
            code_sources: entry
                .codes
                .iter()
                .map(|c| format!("{:?}", c.source).to_lowercase())
                .collect(),
            transitions: entry
                .transitions
                .iter()
                .map(|t| TransitionView {
                    state: format!("{:?}", t.state),
                    at: t.at.to_rfc3339(),
                })
                .collect(),
        }
    }
}

/// Credential summary: identifiers and container availability only.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub attempt_id: Uuid,
    pub key_id: Option<String>,
    pub dc_id: Option<u16>,
    pub user_id: Option<u64>,
    pub has_desktop_container: bool,
    pub has_programmatic_container: bool,
    pub created_at: String,
}

/// Files written by a credential export.
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub attempt_id: Uuid,
    pub files: Vec<String>,
}
