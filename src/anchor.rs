//! Immutable checkpoints.
//!
//! An anchor captures a scroll by value together with its content hash,
//! so a later restore can prove the snapshot was not tampered with. Only
//! the label and description can change, and only by producing a new
//! anchor instance.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::scroll::Scroll;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// `hash[0..8]-<timestamp_ms>-<16 hex chars>`.
    pub id: String,
    pub scroll: Scroll,
    pub hash: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Anchor {
    /// Anchor a scroll as it stands.
    pub fn create(scroll: Scroll, label: Option<&str>, now_ms: i64) -> Self {
        let hash = scroll
            .metadata
            .hash
            .clone()
            .unwrap_or_else(|| scroll.compute_hash());

        let mut rand_bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut rand_bytes);
        let id = format!("{}-{}-{}", &hash[..8], now_ms, hex::encode(rand_bytes));

        Self { id, scroll, hash, timestamp: now_ms, label: label.map(str::to_string), description: None }
    }

    /// Recompute the embedded scroll's content hash and compare.
    pub fn verify(&self) -> bool {
        self.scroll.compute_hash() == self.hash
    }

    /// Two anchors are equivalent when they captured identical content.
    pub fn equivalent(&self, other: &Anchor) -> bool {
        self.hash == other.hash
    }

    pub fn with_label(&self, label: impl Into<String>) -> Anchor {
        Anchor { label: Some(label.into()), ..self.clone() }
    }

    pub fn with_description(&self, description: impl Into<String>) -> Anchor {
        Anchor { description: Some(description.into()), ..self.clone() }
    }
}
