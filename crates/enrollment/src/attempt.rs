//! Account attempt state owned by the orchestrator while it runs.

use crate::adapters::RentedNumber;
use crate::config::AttemptConfig;
use crate::error::EnrollmentError;
use account_ledger::{
    AcquiredCode, AttemptState, CodeSource, Credential, EntryNote, FailureKind, FailureReason,
    LedgerEntry, NumberDisposition, Outcome, Transition,
};
use chrono::Utc;
use uuid::Uuid;

/// Parameters for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRequest {
    pub country: String,
    pub price_ceiling: f64,
    pub display_name: Option<String>,
}

impl AttemptRequest {
    pub fn new(country: impl Into<String>, price_ceiling: f64) -> Self {
        Self {
            country: country.into(),
            price_ceiling,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn from_config(config: &AttemptConfig) -> Self {
        Self {
            country: config.country.clone(),
            price_ceiling: config.price_ceiling,
            display_name: config.display_name.clone(),
        }
    }
}

/// Terminal details handed to [`AccountAttempt::finalize`].
#[derive(Debug)]
pub struct Finalization {
    pub outcome: Outcome,
    pub reason: Option<FailureReason>,
    pub kind: Option<FailureKind>,
    pub detail: Option<String>,
    pub disposition: NumberDisposition,
    pub credential: Option<Credential>,
}

/// One run of the pipeline for one phone number.
#[derive(Debug)]
pub struct AccountAttempt {
    id: Uuid,
    country: String,
    price_ceiling: f64,
    state: AttemptState,
    phone_number: Option<String>,
    cost: f64,
    codes: Vec<AcquiredCode>,
    used_two_factor: bool,
    mailbox: Option<String>,
    transitions: Vec<Transition>,
    notes: Vec<EntryNote>,
}

impl AccountAttempt {
    pub fn new(request: &AttemptRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            country: request.country.clone(),
            price_ceiling: request.price_ceiling,
            state: AttemptState::Initializing,
            phone_number: None,
            cost: 0.0,
            codes: Vec::new(),
            used_two_factor: false,
            mailbox: None,
            transitions: vec![Transition {
                state: AttemptState::Initializing,
                at: Utc::now(),
            }],
            notes: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn codes(&self) -> &[AcquiredCode] {
        &self.codes
    }

    /// Move forward to `next`. Transitions never go backwards and never
    /// repeat a state; finalization goes through [`Self::finalize`].
    pub fn advance(&mut self, next: AttemptState) -> Result<(), EnrollmentError> {
        if next <= self.state || next == AttemptState::Finalized {
            return Err(EnrollmentError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.transitions.push(Transition {
            state: next,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Record the rented number. Allowed exactly once per attempt.
    pub fn set_number(&mut self, rented: RentedNumber) -> Result<(), EnrollmentError> {
        if self.phone_number.is_some() {
            return Err(EnrollmentError::NumberAlreadySet);
        }
        self.phone_number = Some(rented.number);
        self.cost += rented.cost;
        Ok(())
    }

    pub fn push_code(&mut self, source: CodeSource, code: impl Into<String>) {
        self.codes.push(AcquiredCode {
            source,
            code: code.into(),
            received_at: Utc::now(),
        });
    }

    pub fn set_mailbox(&mut self, address: impl Into<String>) {
        self.mailbox = Some(address.into());
    }

    pub fn mark_two_factor_used(&mut self) {
        self.used_two_factor = true;
    }

    pub fn add_note(&mut self, note: EntryNote) {
        if !self.notes.contains(&note) {
            self.notes.push(note);
        }
    }

    /// Close the attempt and produce its ledger entry. Consumes the attempt,
    /// so each attempt yields exactly one entry.
    pub fn finalize(mut self, fin: Finalization) -> LedgerEntry {
        let now = Utc::now();
        self.transitions.push(Transition {
            state: AttemptState::Finalized,
            at: now,
        });

        LedgerEntry {
            attempt_id: self.id,
            country: self.country,
            price_ceiling: self.price_ceiling,
            outcome: fin.outcome,
            reason: fin.reason,
            failure_kind: fin.kind,
            detail: fin.detail,
            phone_number: self.phone_number,
            number_disposition: fin.disposition,
            cost: self.cost,
            codes: self.codes,
            used_two_factor: self.used_two_factor,
            mailbox: self.mailbox,
            transitions: self.transitions,
            notes: self.notes,
            credential: fin.credential,
            finalized_at: now,
        }
    }
}
