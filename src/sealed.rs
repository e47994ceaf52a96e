//! Shareable encrypted scroll envelopes.
//!
//! Sealing produces a self-contained, URI-encodable blob a third party
//! can carry around: AES-256-GCM over the canonical scroll JSON, with the
//! key either derived from a password (PBKDF2-HMAC-SHA256, 100k rounds)
//! or a fixed obfuscation key when no password is given. The unkeyed mode
//! hides content from casual inspection only; it is not security.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key};
use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::canonical_json;
use crate::scroll::Scroll;

/// Plaintext cap: scroll JSON larger than this will not seal.
pub const MAX_SEALED_PLAINTEXT: usize = 65_536;

/// URI scheme prefix for sealed envelopes.
pub const URI_PREFIX: &str = "beescroll://v1/";
/// Older producers emitted this prefix; decoders keep accepting it.
const LEGACY_URI_PREFIX: &str = "beenote://v1/";

const ENVELOPE_VERSION: u32 = 1;
const PBKDF2_ITERATIONS: u32 = 100_000;
const NO_PASSWORD_KEY_INPUT: &[u8] = b"beescroll:no-password";
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Sealing and unsealing failures.
#[derive(Error, Debug)]
pub enum SealError {
    #[error("scroll JSON is {0} bytes; the sealed envelope limit is 65536")]
    ContentTooLarge(usize),

    #[error("invalid sealed format: {0}")]
    InvalidFormat(String),

    #[error("decryption failed")]
    Decryption,
}

/// The envelope wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedScroll {
    pub version: u32,
    /// base64 of `ciphertext || tag`.
    pub ciphertext: String,
    /// base64 of the 12-byte nonce.
    pub nonce: String,
    /// base64 of the 16-byte PBKDF2 salt; present iff password-sealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub has_password: bool,
    /// Seconds since the Unix epoch.
    pub sealed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_type: Option<String>,
}

fn password_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn obfuscation_key() -> [u8; 32] {
    let digest = Sha256::digest(NO_PASSWORD_KEY_INPUT);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Seal a scroll. An empty password counts as no password.
pub fn seal(scroll: &Scroll, password: Option<&str>) -> Result<SealedScroll, SealError> {
    let scroll_json = serde_json::to_value(scroll)
        .map_err(|e| SealError::InvalidFormat(e.to_string()))?;
    let plaintext = canonical_json(&scroll_json);
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(SealError::ContentTooLarge(plaintext.len()));
    }

    let password = password.filter(|p| !p.is_empty());
    let (key, salt) = match password {
        Some(password) => {
            let mut salt = [0u8; SALT_LEN];
            rand::rngs::OsRng.fill_bytes(&mut salt);
            (password_key(password, &salt), Some(salt))
        }
        None => (obfuscation_key(), None),
    };

    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| SealError::Decryption)?;

    Ok(SealedScroll {
        version: ENVELOPE_VERSION,
        ciphertext: BASE64_STANDARD.encode(ciphertext),
        nonce: BASE64_STANDARD.encode(nonce),
        salt: salt.map(|s| BASE64_STANDARD.encode(s)),
        has_password: password.is_some(),
        sealed_at: chrono::Utc::now().timestamp(),
        scroll_type: scroll.scroll_type.clone(),
    })
}

/// Open a sealed envelope. A password is required iff `has_password`.
pub fn unseal(sealed: &SealedScroll, password: Option<&str>) -> Result<Scroll, SealError> {
    if sealed.version != ENVELOPE_VERSION {
        return Err(SealError::InvalidFormat(format!(
            "unsupported envelope version {}",
            sealed.version
        )));
    }

    let key = if sealed.has_password {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(SealError::Decryption)?;
        let salt = sealed
            .salt
            .as_ref()
            .ok_or_else(|| SealError::InvalidFormat("password envelope without salt".into()))?;
        let salt = BASE64_STANDARD
            .decode(salt)
            .map_err(|_| SealError::InvalidFormat("malformed salt".into()))?;
        password_key(password, &salt)
    } else {
        obfuscation_key()
    };

    let nonce = BASE64_STANDARD
        .decode(&sealed.nonce)
        .map_err(|_| SealError::InvalidFormat("malformed nonce".into()))?;
    if nonce.len() != NONCE_LEN {
        return Err(SealError::InvalidFormat("bad nonce length".into()));
    }
    let ciphertext = BASE64_STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|_| SealError::InvalidFormat("malformed ciphertext".into()))?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| SealError::Decryption)?;

    serde_json::from_slice(&plaintext)
        .map_err(|_| SealError::InvalidFormat("sealed payload is not a scroll".into()))
}

impl SealedScroll {
    /// `beescroll://v1/<base64url(json)>`.
    pub fn to_uri(&self) -> String {
        let json = serde_json::to_vec(self).expect("envelope serialization is infallible");
        format!("{URI_PREFIX}{}", BASE64_URL_SAFE.encode(json))
    }

    /// Accepts the current scheme, the legacy `beenote://v1/` scheme, and
    /// raw envelope JSON.
    pub fn from_uri(input: &str) -> Result<Self, SealError> {
        let trimmed = input.trim();
        if let Some(encoded) = trimmed
            .strip_prefix(URI_PREFIX)
            .or_else(|| trimmed.strip_prefix(LEGACY_URI_PREFIX))
        {
            let bytes = BASE64_URL_SAFE
                .decode(encoded)
                .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(encoded))
                .map_err(|_| SealError::InvalidFormat("malformed URI payload".into()))?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| SealError::InvalidFormat(e.to_string()));
        }
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| SealError::InvalidFormat(e.to_string()));
        }
        Err(SealError::InvalidFormat("unrecognized envelope encoding".into()))
    }
}
