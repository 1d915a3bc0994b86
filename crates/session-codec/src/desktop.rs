//! Encrypted desktop session container.
//!
//! Layout (version 1):
//!
//! ```text
//! [4  magic "DSKC"][4 version BE][32 salt][12 nonce][ciphertext + 16 tag]
//! ```
//!
//! The plaintext is `dc_id (u16 BE) || user_id (u64 BE) || auth_key (256)`.
//! The 40-byte header (magic, version, salt) is bound as associated data.

use crate::error::DecodeError;
use crate::types::{AuthKey, Triplet, AUTH_KEY_LEN};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

/// Container magic bytes.
pub const DESKTOP_MAGIC: &[u8; 4] = b"DSKC";

/// Current container version.
pub const DESKTOP_VERSION: u32 = 1;

const SALT_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

const HEADER_SIZE: usize = 4 + 4 + SALT_SIZE;

const PLAINTEXT_SIZE: usize = 2 + 8 + AUTH_KEY_LEN;

/// Smallest well-formed container.
pub const DESKTOP_MIN_LEN: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Derive the container key: SHA256(salt || local_secret || salt).
fn derive_key(salt: &[u8], local_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(local_secret);
    hasher.update(salt);
    let hash = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash);
    key
}

/// Encode a triplet into a desktop container using the thread RNG for salt
/// and nonce.
pub fn encode_desktop_container(triplet: &Triplet, local_secret: &[u8]) -> Vec<u8> {
    encode_desktop_container_with_rng(triplet, local_secret, &mut rand::thread_rng())
}

/// Encode a triplet with a caller-supplied RNG. A seeded RNG makes the
/// output reproducible.
pub fn encode_desktop_container_with_rng<R: RngCore + CryptoRng>(
    triplet: &Triplet,
    local_secret: &[u8],
    rng: &mut R,
) -> Vec<u8> {
    let mut salt = [0u8; SALT_SIZE];
    rng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce_bytes);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(DESKTOP_MAGIC);
    header.extend_from_slice(&DESKTOP_VERSION.to_be_bytes());
    header.extend_from_slice(&salt);

    let mut plaintext = Vec::with_capacity(PLAINTEXT_SIZE);
    plaintext.extend_from_slice(&triplet.dc_id.to_be_bytes());
    plaintext.extend_from_slice(&triplet.user_id.to_be_bytes());
    plaintext.extend_from_slice(triplet.auth_key.as_bytes());

    let key = derive_key(&salt, local_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    // Encryption only fails for plaintexts beyond the AES-GCM length limit.
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad: &header,
            },
        )
        .unwrap_or_default();

    let mut data = header;
    data.extend_from_slice(&nonce_bytes);
    data.extend(ciphertext);
    data
}

/// Decode a desktop container with the local secret it was sealed with.
pub fn decode_desktop_container(bytes: &[u8], local_secret: &[u8]) -> Result<Triplet, DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::Truncated {
            expected: DESKTOP_MIN_LEN,
            actual: bytes.len(),
        });
    }
    if &bytes[..4] != DESKTOP_MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_be_bytes(version);
    if version != DESKTOP_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    if bytes.len() < DESKTOP_MIN_LEN {
        return Err(DecodeError::Truncated {
            expected: DESKTOP_MIN_LEN,
            actual: bytes.len(),
        });
    }

    let header = &bytes[..HEADER_SIZE];
    let salt = &bytes[8..HEADER_SIZE];
    let nonce = Nonce::from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + NONCE_SIZE]);
    let ciphertext = &bytes[HEADER_SIZE + NONCE_SIZE..];

    let key = derive_key(salt, local_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| DecodeError::IntegrityCheck)?;

    if plaintext.len() != PLAINTEXT_SIZE {
        return Err(DecodeError::Corrupt(format!(
            "payload is {} bytes, expected {}",
            plaintext.len(),
            PLAINTEXT_SIZE
        )));
    }

    let dc_id = u16::from_be_bytes([plaintext[0], plaintext[1]]);
    let mut user_id = [0u8; 8];
    user_id.copy_from_slice(&plaintext[2..10]);
    let user_id = u64::from_be_bytes(user_id);
    let auth_key = AuthKey::from_slice(&plaintext[10..])?;

    Triplet::new(auth_key, dc_id, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn triplet() -> Triplet {
        let mut key = [0u8; AUTH_KEY_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        Triplet::new(AuthKey::new(key), 2, 9001).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let t = triplet();
        let sealed = encode_desktop_container(&t, b"local-secret");
        assert_eq!(&sealed[..4], DESKTOP_MAGIC);
        assert_eq!(sealed.len(), DESKTOP_MIN_LEN + PLAINTEXT_SIZE);

        let opened = decode_desktop_container(&sealed, b"local-secret").unwrap();
        assert_eq!(opened, t);
    }

    #[test]
    fn test_empty_secret_round_trip() {
        let t = triplet();
        let sealed = encode_desktop_container(&t, b"");
        assert_eq!(decode_desktop_container(&sealed, b"").unwrap(), t);
    }

    #[test]
    fn test_wrong_secret_fails_integrity() {
        let sealed = encode_desktop_container(&triplet(), b"secret-one");
        let err = decode_desktop_container(&sealed, b"secret-two").unwrap_err();
        assert_eq!(err, DecodeError::IntegrityCheck);
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let t = triplet();
        let a = encode_desktop_container_with_rng(&t, b"s", &mut StdRng::seed_from_u64(7));
        let b = encode_desktop_container_with_rng(&t, b"s", &mut StdRng::seed_from_u64(7));
        let c = encode_desktop_container_with_rng(&t, b"s", &mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut sealed = encode_desktop_container(&triplet(), b"s");
        sealed[4..8].copy_from_slice(&2u32.to_be_bytes());
        let err = decode_desktop_container(&sealed, b"s").unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedVersion(2));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut sealed = encode_desktop_container(&triplet(), b"s");
        sealed[0] = b'X';
        assert_eq!(
            decode_desktop_container(&sealed, b"s").unwrap_err(),
            DecodeError::BadMagic
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let sealed = encode_desktop_container(&triplet(), b"s");

        let err = decode_desktop_container(&sealed[..3], b"s").unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { actual: 3, .. }));

        let err = decode_desktop_container(&sealed[..DESKTOP_MIN_LEN - 1], b"s").unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));

        // Cut inside the ciphertext: the tag no longer verifies.
        let err = decode_desktop_container(&sealed[..sealed.len() - 5], b"s").unwrap_err();
        assert_eq!(err, DecodeError::IntegrityCheck);
    }

    #[test]
    fn test_header_tamper_detected() {
        let mut sealed = encode_desktop_container(&triplet(), b"s");
        // Flip a salt byte: the derived key and the associated data both change.
        sealed[10] ^= 0xFF;
        assert_eq!(
            decode_desktop_container(&sealed, b"s").unwrap_err(),
            DecodeError::IntegrityCheck
        );
    }
}
