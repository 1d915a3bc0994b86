//! Classification of adapter failures into ledger reasons and failure kinds.
//!
//! Every adapter error passes through one of these functions before the
//! orchestrator leaves the state it occurred in.

use crate::error::{BrokerError, DesktopError, DeviceError, EnrollmentError, MailError};
use account_ledger::{FailureKind, FailureReason};

/// A classified pipeline failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailureReason,
    pub kind: FailureKind,
    pub detail: Option<String>,
    /// Hand the number back as ineligible instead of releasing or retaining.
    pub ban_number: bool,
}

impl Failure {
    pub fn new(reason: FailureReason, kind: FailureKind, detail: Option<String>) -> Self {
        Self {
            reason,
            kind,
            detail,
            ban_number: false,
        }
    }

    pub fn fatal(reason: FailureReason, detail: Option<String>) -> Self {
        Self::new(reason, FailureKind::FatalToAttempt, detail)
    }

    pub fn cancelled() -> Self {
        Self::fatal(FailureReason::Cancelled, None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason == FailureReason::Cancelled
    }

    fn banning(mut self) -> Self {
        self.ban_number = true;
        self
    }
}

impl From<EnrollmentError> for Failure {
    fn from(e: EnrollmentError) -> Self {
        Failure::fatal(FailureReason::AdapterFault, Some(format!("internal: {}", e)))
    }
}

/// `Initializing -> DeviceReady`: any failure means the device is unusable.
pub fn device_readiness(e: DeviceError) -> Failure {
    Failure::new(
        FailureReason::DeviceUnavailable,
        FailureKind::FatalToDevice,
        Some(e.to_string()),
    )
}

pub fn rent(e: BrokerError) -> Failure {
    match e {
        BrokerError::NoNumberAvailable => Failure::fatal(FailureReason::NoNumberAvailable, None),
        other => Failure::fatal(FailureReason::AdapterFault, Some(other.to_string())),
    }
}

pub fn number_submission(e: DeviceError) -> Failure {
    match e {
        DeviceError::NumberRejected(msg) => {
            Failure::fatal(FailureReason::NumberRejected, Some(msg)).banning()
        }
        other => device_fault(other),
    }
}

pub fn mailbox_registration(e: MailError) -> Failure {
    match e {
        MailError::Timeout => Failure::fatal(FailureReason::EmailTimeout, None),
        other => Failure::fatal(FailureReason::MailboxUnavailable, Some(other.to_string())),
    }
}

pub fn email_code(e: MailError) -> Failure {
    match e {
        MailError::Timeout => Failure::fatal(FailureReason::EmailTimeout, None),
        other => Failure::fatal(FailureReason::AdapterFault, Some(other.to_string())),
    }
}

pub fn code_entry(e: DeviceError) -> Failure {
    match e {
        DeviceError::CodeRejected => Failure::fatal(FailureReason::CodeRejected, None),
        other => device_fault(other),
    }
}

pub fn two_factor(e: DeviceError) -> Failure {
    Failure::fatal(FailureReason::TwoFactorBlocked, Some(e.to_string()))
}

/// One failed desktop login try; the orchestrator retries these.
pub fn desktop_login(e: DesktopError) -> Failure {
    Failure::new(
        FailureReason::DesktopLoginFailed,
        FailureKind::RetryableSubstep,
        Some(e.to_string()),
    )
}

/// Device failure outside readiness checks.
pub fn device_fault(e: DeviceError) -> Failure {
    Failure::fatal(FailureReason::AdapterFault, Some(e.to_string()))
}

/// Deadline expiry for a step without a dedicated timeout reason.
pub fn step_timeout(step: &str) -> Failure {
    Failure::fatal(FailureReason::AdapterFault, Some(format!("{} timed out", step)))
}
