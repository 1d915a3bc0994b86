//! Triplet and client metadata types.

use crate::error::DecodeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of an authorization key in bytes.
pub const AUTH_KEY_LEN: usize = 256;

/// Highest production data center id.
pub const MAX_DC_ID: u16 = 5;

/// Fixed-length authorization key.
///
/// Serializes as lowercase hex so ledger records stay human-inspectable.
/// `Debug` only shows the key fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey([u8; AUTH_KEY_LEN]);

impl AuthKey {
    pub fn new(bytes: [u8; AUTH_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not exactly
    /// [`AUTH_KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let arr: [u8; AUTH_KEY_LEN] = bytes.try_into().map_err(|_| {
            DecodeError::InvalidTriplet(format!(
                "auth key must be {} bytes, got {}",
                AUTH_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; AUTH_KEY_LEN] {
        &self.0
    }

    /// Short fingerprint used in logs and audit records: first 8 bytes of
    /// SHA-256 over the key, hex encoded.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey({})", self.key_id())
    }
}

impl Serialize for AuthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for AuthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        AuthKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// The normalized credential: everything needed to resume a session,
/// independent of container format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
    pub auth_key: AuthKey,
    pub dc_id: u16,
    pub user_id: u64,
}

impl Triplet {
    /// Create a validated triplet.
    pub fn new(auth_key: AuthKey, dc_id: u16, user_id: u64) -> Result<Self, DecodeError> {
        let triplet = Self {
            auth_key,
            dc_id,
            user_id,
        };
        triplet.validate()?;
        Ok(triplet)
    }

    /// Check field ranges. Decoders call this on every triplet they produce.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.dc_id == 0 || self.dc_id > MAX_DC_ID {
            return Err(DecodeError::InvalidTriplet(format!(
                "dc_id {} outside 1..={}",
                self.dc_id, MAX_DC_ID
            )));
        }
        if self.user_id == 0 {
            return Err(DecodeError::InvalidTriplet("user_id must be non-zero".into()));
        }
        Ok(())
    }
}

/// Client metadata stored alongside the triplet in a programmatic session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    #[serde(default = "default_lang")]
    pub lang_code: String,
    #[serde(default = "default_lang")]
    pub system_lang_code: String,
    /// Messaging protocol layer the session was created with.
    #[serde(default)]
    pub layer: u32,
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self {
            device_model: "Desktop".into(),
            system_version: "Linux".into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            lang_code: default_lang(),
            system_lang_code: default_lang(),
            layer: 0,
        }
    }
}

fn default_lang() -> String {
    "en".into()
}
