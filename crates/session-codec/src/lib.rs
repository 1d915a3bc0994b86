//! Session codec - stateless conversion between session containers.
//!
//! Two container formats wrap the same normalized [`Triplet`]:
//! - the encrypted desktop container, sealed with a local secret
//! - the programmatic session, a JSON document with client metadata
//!
//! Nothing here touches the filesystem or network; callers pass bytes in
//! and get bytes back.

mod desktop;
mod error;
mod programmatic;
mod types;

pub use desktop::{
    decode_desktop_container, encode_desktop_container, encode_desktop_container_with_rng,
    DESKTOP_MAGIC, DESKTOP_MIN_LEN, DESKTOP_VERSION,
};
pub use error::DecodeError;
pub use programmatic::{
    decode_programmatic_container, decode_programmatic_session, encode_programmatic_container,
    ProgrammaticSession, PROGRAMMATIC_FORMAT, PROGRAMMATIC_VERSION,
};
pub use types::{AuthKey, ClientMetadata, Triplet, AUTH_KEY_LEN, MAX_DC_ID};

/// Re-encode a desktop container as a programmatic session.
pub fn desktop_to_programmatic(
    desktop: &[u8],
    local_secret: &[u8],
    client: &ClientMetadata,
) -> Result<Vec<u8>, DecodeError> {
    let triplet = decode_desktop_container(desktop, local_secret)?;
    Ok(encode_programmatic_container(&triplet, client))
}

/// Re-encode a programmatic session as a desktop container.
pub fn programmatic_to_desktop(
    programmatic: &[u8],
    local_secret: &[u8],
) -> Result<Vec<u8>, DecodeError> {
    let triplet = decode_programmatic_container(programmatic)?;
    Ok(encode_desktop_container(&triplet, local_secret))
}
