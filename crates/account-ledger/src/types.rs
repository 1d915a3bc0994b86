//! Persisted attempt vocabulary: states, outcomes, reasons, credentials and
//! ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_codec::Triplet;
use uuid::Uuid;

/// Pipeline state of an account attempt.
///
/// Variants are declared in pipeline order; `Ord` follows that order and
/// backs the monotonic-transition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Initializing,
    DeviceReady,
    NumberAcquired,
    NumberSubmitted,
    AwaitingEmail,
    AwaitingMessagingCode,
    MessagingCodeEntered,
    AwaitingTwoFactor,
    DesktopLoginInProgress,
    CredentialMaterialized,
    Finalized,
}

/// Terminal outcome of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Aborted,
    Failed,
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "aborted" => Ok(Outcome::Aborted),
            "failed" => Ok(Outcome::Failed),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// Machine-readable reason recorded for every non-clean finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    DeviceUnavailable,
    NoNumberAvailable,
    NumberRejected,
    MailboxUnavailable,
    EmailTimeout,
    CodeTimeout,
    CodeRejected,
    TwoFactorBlocked,
    DesktopLoginFailed,
    Cancelled,
    AdapterFault,
}

/// How a failure affects the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The device slot is unusable; stop issuing attempts against it.
    FatalToDevice,
    /// This attempt is over; resources released, failure recorded.
    FatalToAttempt,
    /// Bounded automatic retry inside one sub-step.
    RetryableSubstep,
    /// Primary artifact produced, secondary derivation failed.
    PartialSuccess,
}

/// What happened to the rented number at finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberDisposition {
    /// No number was rented.
    None,
    Released,
    /// Released and marked ineligible.
    Banned,
    /// Kept for reuse within its rental window.
    Retained,
}

/// Where a verification code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSource {
    Sms,
    InApp,
    Mail,
}

/// A verification code acquired during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredCode {
    pub source: CodeSource,
    pub code: String,
    pub received_at: DateTime<Utc>,
}

/// One state transition with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: AttemptState,
    pub at: DateTime<Utc>,
}

/// Non-fatal remarks attached to a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryNote {
    /// The sibling container format could not be derived.
    SiblingFormatUnavailable,
    /// The optional display-name step failed.
    ProfileSetupFailed,
    /// Releasing or banning the number at the broker failed.
    NumberReleaseFailed,
}

/// The durable artifact of a successful attempt.
///
/// The triplet is authoritative; the containers are derived views. A
/// credential may lack a triplet only when its desktop container could not be
/// decoded, in which case the container itself is the usable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub triplet: Option<Triplet>,

    /// Fingerprint of the auth key, for audits without reading the key.
    #[serde(default)]
    pub key_id: Option<String>,

    #[serde(default, with = "blob")]
    pub desktop_container: Option<Vec<u8>>,

    #[serde(default, with = "blob")]
    pub programmatic_container: Option<Vec<u8>>,

    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Credential derived from a decoded triplet.
    pub fn from_triplet(triplet: Triplet) -> Self {
        Self {
            key_id: Some(triplet.auth_key.key_id()),
            triplet: Some(triplet),
            desktop_container: None,
            programmatic_container: None,
            created_at: Utc::now(),
        }
    }

    /// Credential carrying only an undecodable desktop container.
    pub fn from_desktop_only(desktop: Vec<u8>) -> Self {
        Self {
            triplet: None,
            key_id: None,
            desktop_container: Some(desktop),
            programmatic_container: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the desktop container. An existing container is never replaced.
    pub fn with_desktop_container(mut self, bytes: Vec<u8>) -> Self {
        if self.desktop_container.is_none() {
            self.desktop_container = Some(bytes);
        }
        self
    }

    /// Attach the programmatic container. An existing container is never
    /// replaced.
    pub fn with_programmatic_container(mut self, bytes: Vec<u8>) -> Self {
        if self.programmatic_container.is_none() {
            self.programmatic_container = Some(bytes);
        }
        self
    }

    /// A credential is usable once at least one container form exists.
    pub fn is_ready(&self) -> bool {
        self.desktop_container.is_some() || self.programmatic_container.is_some()
    }
}

/// One finalized attempt. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub attempt_id: Uuid,
    pub country: String,
    pub price_ceiling: f64,
    pub outcome: Outcome,
    pub reason: Option<FailureReason>,
    pub failure_kind: Option<FailureKind>,
    /// Free-form detail from the adapter that caused the failure.
    #[serde(default)]
    pub detail: Option<String>,
    pub phone_number: Option<String>,
    pub number_disposition: NumberDisposition,
    pub cost: f64,
    #[serde(default)]
    pub codes: Vec<AcquiredCode>,
    #[serde(default)]
    pub used_two_factor: bool,
    #[serde(default)]
    pub mailbox: Option<String>,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub notes: Vec<EntryNote>,
    pub credential: Option<Credential>,
    pub finalized_at: DateTime<Utc>,
}

/// Aggregate counters over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub success: usize,
    pub aborted: usize,
    pub failed: usize,
    pub total_cost: f64,
}

/// Base64 encoding for optional container blobs.
mod blob {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_codec::{AuthKey, AUTH_KEY_LEN};

    fn triplet() -> Triplet {
        Triplet::new(AuthKey::new([9u8; AUTH_KEY_LEN]), 2, 9001).unwrap()
    }

    #[test]
    fn test_state_order_follows_pipeline() {
        assert!(AttemptState::Initializing < AttemptState::DeviceReady);
        assert!(AttemptState::NumberSubmitted < AttemptState::AwaitingEmail);
        assert!(AttemptState::AwaitingEmail < AttemptState::AwaitingMessagingCode);
        assert!(AttemptState::DesktopLoginInProgress < AttemptState::CredentialMaterialized);
        assert!(AttemptState::CredentialMaterialized < AttemptState::Finalized);
    }

    #[test]
    fn test_reason_serializes_as_name() {
        let json = serde_json::to_string(&FailureReason::CodeTimeout).unwrap();
        assert_eq!(json, "\"CodeTimeout\"");

        let json = serde_json::to_string(&Outcome::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }

    #[test]
    fn test_outcome_from_str() {
        assert_eq!("Success".parse::<Outcome>().unwrap(), Outcome::Success);
        assert_eq!("aborted".parse::<Outcome>().unwrap(), Outcome::Aborted);
        assert!("pending".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_credential_readiness() {
        let bare = Credential::from_triplet(triplet());
        assert!(!bare.is_ready());

        let with_desktop = bare.with_desktop_container(vec![1, 2, 3]);
        assert!(with_desktop.is_ready());
    }

    #[test]
    fn test_credential_containers_not_overwritten() {
        let cred = Credential::from_triplet(triplet())
            .with_programmatic_container(vec![1])
            .with_programmatic_container(vec![2]);
        assert_eq!(cred.programmatic_container, Some(vec![1]));
    }

    #[test]
    fn test_credential_json_is_inspectable() {
        let cred = Credential::from_triplet(triplet()).with_desktop_container(vec![0xde, 0xad]);
        let json = serde_json::to_value(&cred).unwrap();

        assert_eq!(json["triplet"]["dc_id"], 2);
        assert_eq!(json["triplet"]["user_id"], 9001);
        assert_eq!(json["desktop_container"], "3q0=");
        assert!(json["programmatic_container"].is_null());
        assert_eq!(json["key_id"], triplet().auth_key.key_id());

        let back: Credential = serde_json::from_value(json).unwrap();
        assert_eq!(back, cred);
    }
}
