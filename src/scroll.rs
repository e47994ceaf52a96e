//! The scroll envelope.
//!
//! A `Scroll` is the universal datum: a path-addressed, self-describing
//! record carrying free-form JSON data plus metadata. Scrolls are value
//! types; a write never mutates an existing scroll, it produces a new one
//! with stamped metadata and a recomputed content hash.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json;

/// Grammatical tense hint for the linguistic metadata triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tense {
    Past,
    Present,
    Future,
}

/// Scroll metadata.
///
/// Known keys serialize camelCase and are emitted only when present, with
/// the exception of `version` which is always present. Any unrecognized
/// key on the wire lands in `extensions`, and extension entries are spread
/// back at the top level on serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Monotone per path, starting at 1 on the first write.
    #[serde(default)]
    pub version: u64,
    /// Lowercase hex SHA-256 of the canonical scroll content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Tombstone flag. A deleted scroll stays addressable and listable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tense: Option<Tense>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kingdom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phylum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Consumer-recognized extension entries, flattened on the wire.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// The universal data envelope: key + type + data + metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scroll {
    /// Path this scroll is addressed by.
    pub key: String,
    /// Optional schema hint (`"domain/entity@vN"`), opaque to the store.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub scroll_type: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Scroll {
    /// A bare scroll with no metadata stamped. Used as diff/replay input;
    /// persisted scrolls always go through the write pipeline.
    pub fn new(key: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            scroll_type: None,
            metadata: Metadata::default(),
            data,
        }
    }

    pub fn with_type(mut self, scroll_type: impl Into<String>) -> Self {
        self.scroll_type = Some(scroll_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Content hash: `SHA-256(key || type || canonical-json(data))`,
    /// lowercase hex. An absent type contributes the empty string.
    pub fn compute_hash(&self) -> String {
        content_hash(&self.key, self.scroll_type.as_deref(), &self.data)
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.deleted == Some(true)
    }
}

/// Hash of the canonical scroll content.
pub fn content_hash(key: &str, scroll_type: Option<&str>, data: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(scroll_type.unwrap_or("").as_bytes());
    hasher.update(canonical_json(&Value::Object(data.clone())).as_bytes());
    hex::encode(hasher.finalize())
}

/// Stamp the next version of a scroll at `key`.
///
/// This is the single write pipeline shared by every backend:
/// - `version` is the prior version plus one, or 1;
/// - `created_at` is first-write-wins: the prior value if any, otherwise a
///   caller hint (only meaningful when there is no prior), otherwise now;
/// - `updated_at` is always now;
/// - `hash` is always recomputed, never trusted from input.
///
/// `hints` carries caller-supplied metadata from `write_scroll`; a plain
/// `write` passes `None` and inherits the prior scroll's type.
pub(crate) fn stamp_next(
    prior: Option<&Scroll>,
    key: &str,
    scroll_type: Option<String>,
    data: Map<String, Value>,
    hints: Option<&Metadata>,
    now_ms: i64,
) -> Scroll {
    let version = prior.map(|p| p.metadata.version + 1).unwrap_or(1);
    let created_at = match prior {
        Some(p) => p.metadata.created_at.or(Some(now_ms)),
        None => hints.and_then(|h| h.created_at).or(Some(now_ms)),
    };
    let scroll_type = scroll_type.or_else(|| prior.and_then(|p| p.scroll_type.clone()));

    let mut metadata = hints.cloned().unwrap_or_default();
    metadata.created_at = created_at;
    metadata.updated_at = Some(now_ms);
    metadata.version = version;

    let hash = content_hash(key, scroll_type.as_deref(), &data);
    metadata.hash = Some(hash);

    Scroll {
        key: key.to_string(),
        scroll_type,
        metadata,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("confirmed".into(), json!(100_000));
        data
    }

    #[test]
    fn hash_is_64_hex() {
        let scroll = Scroll::new("/wallet/balance", sample_data());
        let hash = scroll.compute_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_depends_on_key_type_and_data() {
        let base = Scroll::new("/a", sample_data());
        let other_key = Scroll::new("/b", sample_data());
        let other_type = Scroll::new("/a", sample_data()).with_type("wallet/balance@v1");
        let other_data = Scroll::new("/a", Map::new());

        assert_ne!(base.compute_hash(), other_key.compute_hash());
        assert_ne!(base.compute_hash(), other_type.compute_hash());
        assert_ne!(base.compute_hash(), other_data.compute_hash());
    }

    #[test]
    fn stamp_first_write() {
        let scroll = stamp_next(None, "/a", None, sample_data(), None, 1_000);
        assert_eq!(scroll.metadata.version, 1);
        assert_eq!(scroll.metadata.created_at, Some(1_000));
        assert_eq!(scroll.metadata.updated_at, Some(1_000));
        assert_eq!(scroll.metadata.hash.as_deref(), Some(scroll.compute_hash().as_str()));
    }

    #[test]
    fn stamp_preserves_created_at_and_bumps_version() {
        let first = stamp_next(None, "/a", None, sample_data(), None, 1_000);
        let second = stamp_next(Some(&first), "/a", None, Map::new(), None, 2_000);
        assert_eq!(second.metadata.version, 2);
        assert_eq!(second.metadata.created_at, Some(1_000));
        assert_eq!(second.metadata.updated_at, Some(2_000));
    }

    #[test]
    fn caller_created_at_honored_only_without_prior() {
        let hints = Metadata { created_at: Some(42), ..Default::default() };

        let fresh = stamp_next(None, "/a", None, Map::new(), Some(&hints), 1_000);
        assert_eq!(fresh.metadata.created_at, Some(42));

        let prior = stamp_next(None, "/a", None, Map::new(), None, 1_000);
        let updated = stamp_next(Some(&prior), "/a", None, Map::new(), Some(&hints), 2_000);
        assert_eq!(updated.metadata.created_at, Some(1_000));
    }

    #[test]
    fn plain_write_inherits_prior_type() {
        let first = stamp_next(None, "/a", Some("app/doc@v1".into()), Map::new(), None, 1_000);
        let second = stamp_next(Some(&first), "/a", None, Map::new(), None, 2_000);
        assert_eq!(second.scroll_type.as_deref(), Some("app/doc@v1"));
    }

    #[test]
    fn unknown_metadata_keys_become_extensions() {
        let raw = json!({
            "key": "/a",
            "metadata": {
                "version": 3,
                "createdAt": 1000,
                "tense": "past",
                "appBadge": "gold"
            },
            "data": {}
        });
        let scroll: Scroll = serde_json::from_value(raw).unwrap();
        assert_eq!(scroll.metadata.version, 3);
        assert_eq!(scroll.metadata.created_at, Some(1000));
        assert_eq!(scroll.metadata.tense, Some(Tense::Past));
        assert_eq!(scroll.metadata.extensions.get("appBadge"), Some(&json!("gold")));
        // Known keys never land in extensions.
        assert!(!scroll.metadata.extensions.contains_key("createdAt"));

        let round = serde_json::to_value(&scroll).unwrap();
        assert_eq!(round["metadata"]["appBadge"], json!("gold"));
        assert_eq!(round["metadata"]["tense"], json!("past"));
    }

    #[test]
    fn absent_known_keys_are_omitted() {
        let scroll = Scroll::new("/a", Map::new());
        let value = serde_json::to_value(&scroll).unwrap();
        let metadata = value["metadata"].as_object().unwrap();
        assert_eq!(metadata.get("version"), Some(&json!(0)));
        assert!(!metadata.contains_key("createdAt"));
        assert!(!metadata.contains_key("deleted"));
        assert!(!metadata.contains_key("subject"));
    }
}
