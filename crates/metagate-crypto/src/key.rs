//! Object-key derivation and the sealed-key envelope
//!
//! A per-object data key is derived from a 32-byte external key plus
//! fresh randomness, sealed under the master key with AES-256-GCM and
//! persisted next to the object row. Part keys are derived from the
//! object key with HMAC-SHA-256 over the little-endian part index.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use metagate_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of every key handled here.
pub const KEY_LEN: usize = 32;

/// Length of the persisted seal IV; GCM consumes the first 12 bytes.
pub const SEAL_IV_LEN: usize = 32;

/// Length of the sealed ciphertext: 48 padded key bytes plus the
/// 16-byte GCM tag.
pub const SEALED_LEN: usize = 64;

/// The only seal algorithm written by this codebase. Rows carrying
/// anything else are rejected rather than guessed at.
pub const INTERNAL_SEAL_ALGORITHM: &str = "AES-256-GCM";

const PAD_LEN: usize = 48;

/// A sealed object key, safe to store at an untrusted location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    /// Encrypted and authenticated object key, 64 bytes
    pub ciphertext: Vec<u8>,
    /// Random IV used for sealing, 32 bytes
    pub iv: Vec<u8>,
    /// Seal algorithm identifier
    pub algorithm: String,
}

/// Derives a unique object key from a 256-bit external key and a
/// source of randomness: `SHA-256(ext_key || nonce32)`.
pub fn generate_object_key(ext_key: &[u8; KEY_LEN], rng: &mut impl RngCore) -> Result<[u8; KEY_LEN]> {
    let mut nonce = [0u8; KEY_LEN];
    rng.try_fill_bytes(&mut nonce)
        .map_err(|_| Error::OutOfEntropy)?;

    let mut sha = Sha256::new();
    sha.update(ext_key);
    sha.update(nonce);
    Ok(sha.finalize().into())
}

/// Derives a unique 256-bit part key from an object key and the part
/// index.
#[must_use]
pub fn derive_part_key(object_key: &[u8; KEY_LEN], part_index: u32) -> [u8; KEY_LEN] {
    // Both `Mac` and the AES `KeyInit` are in scope and provide
    // `new_from_slice`, so the trait must be named.
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(object_key).expect("hmac accepts any key length");
    mac.update(&part_index.to_le_bytes());
    mac.finalize().into_bytes().into()
}

/// Seals a plaintext object key under the master key. The context
/// bytes are bound as additional authenticated data, so unsealing
/// with a different context fails.
pub fn seal_key(
    plaintext: &[u8; KEY_LEN],
    master: &[u8; KEY_LEN],
    iv: &[u8; SEAL_IV_LEN],
    aad: &[u8],
) -> Result<SealedKey> {
    let cipher = Aes256Gcm::new(master.into());
    let mut padded = [0u8; PAD_LEN];
    padded[..KEY_LEN].copy_from_slice(plaintext);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv[..12]),
            Payload {
                msg: &padded,
                aad,
            },
        )
        .map_err(|_| Error::SealedKeyInvalid("seal failed".to_string()))?;
    debug_assert_eq!(ciphertext.len(), SEALED_LEN);

    Ok(SealedKey {
        ciphertext,
        iv: iv.to_vec(),
        algorithm: INTERNAL_SEAL_ALGORITHM.to_string(),
    })
}

/// Inverts [`seal_key`]. Fails with `SealedKeyInvalid` on tag
/// mismatch and `InvalidInternalSealAlgorithm` on an unknown
/// algorithm field.
pub fn unseal_key(sealed: &SealedKey, master: &[u8; KEY_LEN], aad: &[u8]) -> Result<[u8; KEY_LEN]> {
    if sealed.algorithm != INTERNAL_SEAL_ALGORITHM {
        return Err(Error::InvalidInternalSealAlgorithm(sealed.algorithm.clone()));
    }
    if sealed.iv.len() < 12 {
        return Err(Error::MissingInternalIv);
    }
    if sealed.ciphertext.len() != SEALED_LEN {
        return Err(Error::SealedKeyInvalid(format!(
            "ciphertext length {}",
            sealed.ciphertext.len()
        )));
    }

    let cipher = Aes256Gcm::new(master.into());
    let padded = cipher
        .decrypt(
            Nonce::from_slice(&sealed.iv[..12]),
            Payload {
                msg: sealed.ciphertext.as_slice(),
                aad,
            },
        )
        .map_err(|_| Error::SealedKeyInvalid("tag mismatch".to_string()))?;

    if padded.len() != PAD_LEN || padded[KEY_LEN..].iter().any(|&b| b != 0) {
        return Err(Error::SealedKeyInvalid("bad padding".to_string()));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&padded[..KEY_LEN]);
    Ok(key)
}
