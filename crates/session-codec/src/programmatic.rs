//! Programmatic session container: a JSON document holding the triplet and
//! the client metadata a scripted client connects with.

use crate::error::DecodeError;
use crate::types::{AuthKey, ClientMetadata, Triplet};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Format tag written into every container.
pub const PROGRAMMATIC_FORMAT: &str = "programmatic-session";

/// Current container version.
pub const PROGRAMMATIC_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    format: String,
    version: u32,
    dc_id: u16,
    user_id: u64,
    /// Base64 (standard alphabet) auth key.
    auth_key: String,
    client: ClientMetadata,
}

/// A decoded programmatic session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammaticSession {
    pub triplet: Triplet,
    pub client: ClientMetadata,
}

/// Encode a triplet and client metadata into a programmatic container.
pub fn encode_programmatic_container(triplet: &Triplet, client: &ClientMetadata) -> Vec<u8> {
    let doc = SessionDocument {
        format: PROGRAMMATIC_FORMAT.to_string(),
        version: PROGRAMMATIC_VERSION,
        dc_id: triplet.dc_id,
        user_id: triplet.user_id,
        auth_key: STANDARD.encode(triplet.auth_key.as_bytes()),
        client: client.clone(),
    };
    // Plain strings and integers only; serialization cannot fail.
    serde_json::to_vec_pretty(&doc).unwrap_or_default()
}

/// Decode a programmatic container into its triplet.
pub fn decode_programmatic_container(bytes: &[u8]) -> Result<Triplet, DecodeError> {
    decode_programmatic_session(bytes).map(|s| s.triplet)
}

/// Decode a programmatic container, keeping the client metadata.
pub fn decode_programmatic_session(bytes: &[u8]) -> Result<ProgrammaticSession, DecodeError> {
    let doc: SessionDocument = serde_json::from_slice(bytes)?;

    if doc.format != PROGRAMMATIC_FORMAT {
        return Err(DecodeError::Malformed(format!(
            "unexpected format tag '{}'",
            doc.format
        )));
    }
    if doc.version != PROGRAMMATIC_VERSION {
        return Err(DecodeError::UnsupportedVersion(doc.version));
    }

    let key = STANDARD.decode(doc.auth_key.as_bytes())?;
    let triplet = Triplet::new(AuthKey::from_slice(&key)?, doc.dc_id, doc.user_id)?;

    Ok(ProgrammaticSession {
        triplet,
        client: doc.client,
    })
}
