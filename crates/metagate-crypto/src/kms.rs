//! KMS contract and the local driver
//!
//! A KMS generates per-object data keys and unseals them later. The
//! context is cryptographically bound to the sealed key: the same
//! context must be presented again to unseal.

use rand::RngCore;
use rand::rngs::OsRng;

use metagate_common::{Error, Result};

use crate::context::{Context, context_bytes};
use crate::key::{KEY_LEN, SEAL_IV_LEN, SealedKey, seal_key, unseal_key};

/// An active connection to a key-management service.
pub trait Kms: Send + Sync {
    /// Generates a new random data key under the master key named by
    /// `key_id`. Returns the plaintext key and its sealed form.
    fn generate_key(&self, key_id: &str, ctx: &Context) -> Result<([u8; KEY_LEN], Vec<u8>)>;

    /// Unseals a previously generated key. The context must match
    /// the one used at generation time.
    fn unseal_key(&self, key_id: &str, sealed: &[u8], ctx: &Context) -> Result<[u8; KEY_LEN]>;

    /// The master key id new keys are generated under.
    fn key_id(&self) -> &str;
}

/// KMS driver holding the master key in process memory. Suitable for
/// single-node deployments and tests; production installs point
/// `kms.type` at an external service instead.
pub struct LocalKms {
    master: [u8; KEY_LEN],
    key_id: String,
}

impl LocalKms {
    #[must_use]
    pub fn new(master: [u8; KEY_LEN], key_id: impl Into<String>) -> Self {
        Self {
            master,
            key_id: key_id.into(),
        }
    }

    /// Builds a driver from the hex-encoded master key in the
    /// configuration, or a random ephemeral key when unset.
    pub fn from_hex(master_hex: &str, key_id: impl Into<String>) -> Result<Self> {
        let mut master = [0u8; KEY_LEN];
        if master_hex.is_empty() {
            OsRng
                .try_fill_bytes(&mut master)
                .map_err(|_| Error::OutOfEntropy)?;
        } else {
            let raw = hex::decode(master_hex)
                .map_err(|e| Error::Configuration(format!("master key: {e}")))?;
            if raw.len() != KEY_LEN {
                return Err(Error::Configuration(format!(
                    "master key must be {KEY_LEN} bytes, got {}",
                    raw.len()
                )));
            }
            master.copy_from_slice(&raw);
        }
        Ok(Self::new(master, key_id))
    }
}

impl Kms for LocalKms {
    fn generate_key(&self, key_id: &str, ctx: &Context) -> Result<([u8; KEY_LEN], Vec<u8>)> {
        if key_id != self.key_id {
            return Err(Error::Kms(format!("unknown key id: {key_id}")));
        }
        let mut plaintext = [0u8; KEY_LEN];
        let mut iv = [0u8; SEAL_IV_LEN];
        OsRng
            .try_fill_bytes(&mut plaintext)
            .and_then(|()| OsRng.try_fill_bytes(&mut iv))
            .map_err(|_| Error::OutOfEntropy)?;

        let aad = context_bytes(ctx)?;
        let sealed = seal_key(&plaintext, &self.master, &iv, &aad)?;
        let bytes =
            rmp_serde::to_vec(&sealed).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok((plaintext, bytes))
    }

    fn unseal_key(&self, key_id: &str, sealed: &[u8], ctx: &Context) -> Result<[u8; KEY_LEN]> {
        if key_id != self.key_id {
            return Err(Error::Kms(format!("unknown key id: {key_id}")));
        }
        let envelope: SealedKey = rmp_serde::from_slice(sealed)
            .map_err(|e| Error::SealedKeyInvalid(e.to_string()))?;
        let aad = context_bytes(ctx)?;
        unseal_key(&envelope, &self.master, &aad)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
