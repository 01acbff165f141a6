//! Versioned envelope encryption.
//!
//! Envelopes are self-describing: the key id, algorithm id and format version
//! travel with every ciphertext, so decryption resolves the key that was
//! active at encryption time, not whichever key is active now. Envelopes are
//! constructed and parsed only here.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::core::errors::VaultError;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Symmetric algorithm id carried inside each envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeAlgorithm {
    Aes256Gcm,
}

/// Self-describing encrypted blob. The GCM authentication tag sits at the
/// tail of `ciphertext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub version: u8,
    pub key_id: String,
    pub algorithm: EnvelopeAlgorithm,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Serialize for BLOB persistence.
    pub fn to_blob(&self) -> Result<Vec<u8>, VaultError> {
        bincode::serialize(self)
            .map_err(|e| VaultError::Encryption(format!("Envelope serialization failed: {}", e)))
    }

    /// Parse a persisted BLOB back into an envelope.
    pub fn from_blob(blob: &[u8]) -> Result<Self, VaultError> {
        bincode::deserialize(blob)
            .map_err(|e| VaultError::Decryption(format!("Envelope parse failed: {}", e)))
    }
}

/// Resolves master key material by key id, active or retired.
pub trait KeyResolver: Send + Sync {
    fn resolve_key(&self, key_id: &str) -> Result<Zeroizing<Vec<u8>>, VaultError>;
}

/// Encrypt `plaintext` under the given master key. A fresh random nonce is
/// generated per call; deterministic nonces are forbidden.
pub fn encrypt(plaintext: &[u8], key_id: &str, key: &[u8]) -> Result<EncryptedEnvelope, VaultError> {
    if key.len() != KEY_LEN {
        return Err(VaultError::Encryption("Invalid key length".to_string()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| VaultError::Encryption("Invalid key length".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = aes_gcm::Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| VaultError::Encryption("Encryption failed".to_string()))?;

    Ok(EncryptedEnvelope {
        version: ENVELOPE_VERSION,
        key_id: key_id.to_string(),
        algorithm: EnvelopeAlgorithm::Aes256Gcm,
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt an envelope, resolving its embedded key id through `resolver`.
/// The currently active key is irrelevant here; retired keys must resolve.
pub fn decrypt(
    envelope: &EncryptedEnvelope,
    resolver: &dyn KeyResolver,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(VaultError::Decryption(format!(
            "Unsupported envelope version {}",
            envelope.version
        )));
    }
    let EnvelopeAlgorithm::Aes256Gcm = envelope.algorithm;

    let key = resolver.resolve_key(&envelope.key_id)?;
    if key.len() != KEY_LEN {
        return Err(VaultError::Decryption("Invalid key length".to_string()));
    }
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| VaultError::Decryption("Invalid key length".to_string()))?;

    let nonce = aes_gcm::Nonce::from_slice(&envelope.nonce);
    let plaintext = cipher
        .decrypt(nonce, envelope.ciphertext.as_slice())
        .map_err(|_| VaultError::Decryption("Decryption failed".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
