//! Encryption at rest for store-wrapped namespaces.
//!
//! # Algorithms
//!
//! - **Encryption**: AES-256-GCM, random 12-byte nonce per write, 128-bit
//!   auth tag, no associated data.
//! - **App-key derivation**: HKDF-SHA256 with a fixed protocol salt, so
//!   one master key fans out into independent per-application keys.
//!
//! The stored form replaces the scroll's data with a single
//! `{"_encrypted": base64(nonce || ciphertext || tag)}` entry; metadata
//! stays plaintext. A legacy split-field form `{"ciphertext": …,
//! "nonce": …}` is accepted on read.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key};
use base64::prelude::*;
use hkdf::Hkdf;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::canonical::canonical_json;
use crate::error::{NineError, NineResult};

/// Field carrying the nonce-prefixed ciphertext blob.
pub const ENCRYPTED_FIELD: &str = "_encrypted";

/// HKDF salt binding derived keys to this protocol.
pub const KEY_DERIVATION_SALT: &[u8] = b"nine_s_v1";

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Derive an independent 32-byte application key from a master key.
///
/// Same master + different application name yields cryptographically
/// independent keys.
pub fn derive_app_key(master: &[u8], app_name: &str) -> NineResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(KEY_DERIVATION_SALT), master);
    let mut okm = [0u8; 32];
    hk.expand(app_name.as_bytes(), &mut okm)
        .map_err(|_| NineError::Internal("key derivation failed".into()))?;
    Ok(okm)
}

/// Data-map transformer for a single store key.
pub(crate) struct ScrollCipher {
    cipher: Aes256Gcm,
}

impl ScrollCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) }
    }

    /// Replace plaintext data with the encrypted envelope.
    pub fn encrypt_map(&self, data: &Map<String, Value>) -> NineResult<Map<String, Value>> {
        let plaintext = canonical_json(&Value::Object(data.clone()));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| NineError::Internal("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        let mut out = Map::new();
        out.insert(ENCRYPTED_FIELD.to_string(), Value::String(BASE64_STANDARD.encode(blob)));
        Ok(out)
    }

    /// Reverse the transformation. Returns `None` when the map carries no
    /// recognized encrypted form (already-plaintext data passes through).
    pub fn decrypt_map(&self, data: &Map<String, Value>) -> NineResult<Option<Map<String, Value>>> {
        let (nonce, ciphertext) = match extract_encrypted(data)? {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| NineError::Internal("decryption failed".into()))?;
        let value: Value = serde_json::from_slice(&plaintext)
            .map_err(|_| NineError::Internal("decrypted payload is not JSON".into()))?;
        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(NineError::Internal("decrypted payload is not a mapping".into())),
        }
    }
}

/// Pull `(nonce, ciphertext)` out of either on-disk form.
fn extract_encrypted(data: &Map<String, Value>) -> NineResult<Option<([u8; NONCE_LEN], Vec<u8>)>> {
    if let Some(Value::String(blob)) = data.get(ENCRYPTED_FIELD) {
        let bytes = BASE64_STANDARD
            .decode(blob)
            .map_err(|_| NineError::Internal("malformed encrypted blob".into()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(NineError::Internal("encrypted blob too short".into()));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        return Ok(Some((nonce, bytes[NONCE_LEN..].to_vec())));
    }

    // Compatibility: ciphertext and nonce in separate fields.
    if let (Some(Value::String(ct)), Some(Value::String(n))) =
        (data.get("ciphertext"), data.get("nonce"))
    {
        let ciphertext = BASE64_STANDARD
            .decode(ct)
            .map_err(|_| NineError::Internal("malformed ciphertext".into()))?;
        let nonce_bytes = BASE64_STANDARD
            .decode(n)
            .map_err(|_| NineError::Internal("malformed nonce".into()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(NineError::Internal("bad nonce length".into()));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&nonce_bytes);
        return Ok(Some((nonce, ciphertext)));
    }

    Ok(None)
}
