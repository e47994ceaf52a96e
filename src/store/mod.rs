//! Versioned, optionally encrypted store.
//!
//! A `Store` wraps any backend namespace and layers three concerns on the
//! write path: encryption at rest, patch history with ring-buffered
//! retention, and on-demand anchors with integrity-checked restore. From
//! the outside it is just another `Namespace`; history and anchors are
//! inherent operations on the wrapper.
//!
//! History lives in memory, like the reference implementation: sequence
//! numbers are derived from the retained patch log and reset on restart.

pub mod crypto;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::anchor::Anchor;
use crate::clock::{system_clock, Clock};
use crate::error::{NineError, NineResult};
use crate::namespace::{Namespace, WatchStream};
use crate::patch::{self, Patch};
use crate::path;
use crate::scroll::Scroll;

use self::crypto::ScrollCipher;

pub use self::crypto::derive_app_key;

/// Default patch ring size per key.
pub const DEFAULT_MAX_PATCHES: usize = 100;
/// Default anchor ring size per key.
pub const DEFAULT_MAX_ANCHORS: usize = 10;

/// Store construction options.
#[derive(Clone)]
pub struct StoreConfig {
    /// Encrypt data at rest. Requires `key`.
    pub encrypted: bool,
    /// 32-byte AES-256-GCM key; see [`derive_app_key`] for deriving one
    /// from a master secret.
    pub key: Option<[u8; 32]>,
    /// Record a patch per write.
    pub history: bool,
    pub max_patches: usize,
    pub max_anchors: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            encrypted: false,
            key: None,
            history: false,
            max_patches: DEFAULT_MAX_PATCHES,
            max_anchors: DEFAULT_MAX_ANCHORS,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("StoreConfig")
            .field("encrypted", &self.encrypted)
            .field("history", &self.history)
            .field("max_patches", &self.max_patches)
            .field("max_anchors", &self.max_anchors)
            .finish()
    }
}

#[derive(Default)]
struct HistoryState {
    patches: HashMap<String, Vec<Patch>>,
    anchors: HashMap<String, Vec<Anchor>>,
}

/// Namespace wrapper adding versioned history and encryption at rest.
pub struct Store {
    backend: Arc<dyn Namespace>,
    config: StoreConfig,
    cipher: Option<Arc<ScrollCipher>>,
    history: Mutex<HistoryState>,
    // Serializes the read-prior / persist / record-patch pipeline so the
    // patch chain always reflects the order writes actually landed in.
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl Store {
    pub fn new(backend: Arc<dyn Namespace>, config: StoreConfig) -> NineResult<Self> {
        let cipher = if config.encrypted {
            let key = config
                .key
                .as_ref()
                .ok_or_else(|| NineError::InvalidData("encrypted store requires a key".into()))?;
            Some(Arc::new(ScrollCipher::new(key)))
        } else {
            None
        };
        Ok(Self {
            backend,
            config,
            cipher,
            history: Mutex::new(HistoryState::default()),
            write_lock: Mutex::new(()),
            clock: system_clock(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_clock(
        backend: Arc<dyn Namespace>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> NineResult<Self> {
        let mut store = Self::new(backend, config)?;
        store.clock = clock;
        Ok(store)
    }

    fn ensure_open(&self) -> NineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NineError::Closed);
        }
        Ok(())
    }

    /// Decrypt a scroll coming back from the backend and restamp its hash
    /// over the plaintext, so callers of this store observe a consistent
    /// content hash for the data they actually see.
    fn open_scroll(&self, mut scroll: Scroll) -> NineResult<Scroll> {
        if let Some(cipher) = &self.cipher {
            if let Some(plain) = cipher.decrypt_map(&scroll.data)? {
                scroll.data = plain;
                scroll.metadata.hash = Some(scroll.compute_hash());
            }
        }
        Ok(scroll)
    }

    async fn record_patch(&self, prior: Option<&Scroll>, current: &Scroll) {
        let now = self.clock.now_ms();
        let mut history = self.history.lock().await;
        let ring = history.patches.entry(current.key.clone()).or_default();
        let seq = ring.last().map(|p| p.seq + 1).unwrap_or(1);
        ring.push(patch::diff(prior, current, seq, now));
        trim_front(ring, self.config.max_patches);
        debug!(key = %current.key, seq, retained = ring.len(), "patch recorded");
    }

    async fn write_pipeline(
        &self,
        key: &str,
        payload: WritePayload,
    ) -> NineResult<Scroll> {
        let _write_guard = self.write_lock.lock().await;

        // Prior state read through decryption, both for history diffing
        // and so the returned scroll reflects what callers see.
        let prior = if self.config.history {
            match self.backend.read(key).await? {
                Some(scroll) => Some(self.open_scroll(scroll)?),
                None => None,
            }
        } else {
            None
        };

        let persisted = match payload {
            WritePayload::Data(data) => {
                let stored = match &self.cipher {
                    Some(cipher) => cipher.encrypt_map(&data)?,
                    None => data.clone(),
                };
                let mut scroll = self.backend.write(key, stored).await?;
                if self.cipher.is_some() {
                    scroll.data = data;
                    scroll.metadata.hash = Some(scroll.compute_hash());
                }
                scroll
            }
            WritePayload::Scroll(scroll) => {
                let plain_data = scroll.data.clone();
                let mut to_store = scroll;
                if let Some(cipher) = &self.cipher {
                    to_store.data = cipher.encrypt_map(&to_store.data)?;
                }
                let mut written = self.backend.write_scroll(to_store).await?;
                if self.cipher.is_some() {
                    written.data = plain_data;
                    written.metadata.hash = Some(written.compute_hash());
                }
                written
            }
        };

        if self.config.history {
            self.record_patch(prior.as_ref(), &persisted).await;
        }
        Ok(persisted)
    }

    /// Capture the current scroll at `path` as an immutable anchor.
    pub async fn anchor(&self, path_str: &str, label: Option<&str>) -> NineResult<Anchor> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let scroll = self
            .read(path_str)
            .await?
            .ok_or_else(|| NineError::NotFound(format!("nothing to anchor at {path_str}")))?;

        let anchor = Anchor::create(scroll, label, self.clock.now_ms());
        let mut history = self.history.lock().await;
        let ring = history.anchors.entry(path_str.to_string()).or_default();
        ring.push(anchor.clone());
        trim_front(ring, self.config.max_anchors);
        debug!(path = %path_str, id = %anchor.id, "anchor created");
        Ok(anchor)
    }

    /// Write an anchored snapshot back through the normal pipeline,
    /// producing a fresh version bump.
    pub async fn restore(&self, path_str: &str, anchor_id: &str) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let anchor = {
            let history = self.history.lock().await;
            history
                .anchors
                .get(path_str)
                .and_then(|ring| ring.iter().find(|a| a.id == anchor_id))
                .cloned()
                .ok_or_else(|| NineError::NotFound(format!("unknown anchor {anchor_id}")))?
        };
        if !anchor.verify() {
            return Err(NineError::Internal(format!(
                "anchor {anchor_id} failed integrity verification"
            )));
        }
        self.write_scroll(anchor.scroll).await
    }

    /// Replay history to the state after patch `seq`.
    pub async fn state_at(&self, path_str: &str, seq: u64) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let history = self.history.lock().await;
        let ring = history
            .patches
            .get(path_str)
            .filter(|ring| !ring.is_empty())
            .ok_or_else(|| NineError::NotFound(format!("no history for {path_str}")))?;

        let last_seq = ring.last().map(|p| p.seq).unwrap_or(0);
        if seq == 0 || seq > last_seq {
            return Err(NineError::Internal(format!(
                "sequence {seq} out of range (history ends at {last_seq})"
            )));
        }

        let mut state = Scroll::new(path_str, Map::new());
        for patch in ring.iter().filter(|p| p.seq <= seq) {
            state = patch::apply(&state, patch)?;
        }
        Ok(state)
    }

    /// Retained patches for a key, oldest first.
    pub async fn history(&self, path_str: &str) -> NineResult<Vec<Patch>> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let history = self.history.lock().await;
        Ok(history.patches.get(path_str).cloned().unwrap_or_default())
    }

    /// Retained anchors for a key, oldest first.
    pub async fn anchors(&self, path_str: &str) -> NineResult<Vec<Anchor>> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let history = self.history.lock().await;
        Ok(history.anchors.get(path_str).cloned().unwrap_or_default())
    }

    /// Trim one key's rings down to the given sizes.
    pub async fn prune_history(
        &self,
        path_str: &str,
        keep_patches: Option<usize>,
        keep_anchors: Option<usize>,
    ) -> NineResult<()> {
        self.ensure_open()?;
        path::validate_path(path_str)?;
        let mut history = self.history.lock().await;
        if let (Some(keep), Some(ring)) = (keep_patches, history.patches.get_mut(path_str)) {
            trim_front(ring, keep);
        }
        if let (Some(keep), Some(ring)) = (keep_anchors, history.anchors.get_mut(path_str)) {
            trim_front(ring, keep);
        }
        Ok(())
    }

    /// Trim every key's rings.
    pub async fn prune_all_history(
        &self,
        keep_patches: Option<usize>,
        keep_anchors: Option<usize>,
    ) -> NineResult<()> {
        self.ensure_open()?;
        let mut history = self.history.lock().await;
        if let Some(keep) = keep_patches {
            for ring in history.patches.values_mut() {
                trim_front(ring, keep);
            }
        }
        if let Some(keep) = keep_anchors {
            for ring in history.anchors.values_mut() {
                trim_front(ring, keep);
            }
        }
        Ok(())
    }
}

enum WritePayload {
    Data(Map<String, Value>),
    Scroll(Scroll),
}

fn trim_front<T>(ring: &mut Vec<T>, keep: usize) {
    if ring.len() > keep {
        ring.drain(..ring.len() - keep);
    }
}

#[async_trait]
impl Namespace for Store {
    async fn read(&self, p: &str) -> NineResult<Option<Scroll>> {
        self.ensure_open()?;
        match self.backend.read(p).await? {
            Some(scroll) => Ok(Some(self.open_scroll(scroll)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, p: &str, data: Map<String, Value>) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(p)?;
        self.write_pipeline(p, WritePayload::Data(data)).await
    }

    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(&scroll.key)?;
        let key = scroll.key.clone();
        self.write_pipeline(&key, WritePayload::Scroll(scroll)).await
    }

    async fn list(&self, prefix: &str) -> NineResult<Vec<String>> {
        self.ensure_open()?;
        self.backend.list(prefix).await
    }

    async fn watch(&self, pattern: &str) -> NineResult<WatchStream> {
        self.ensure_open()?;
        let mut upstream = self.backend.watch(pattern).await?;
        let cipher = match &self.cipher {
            None => return Ok(upstream),
            Some(cipher) => Arc::clone(cipher),
        };

        // Watchers are clients of the store, so events are decrypted the
        // same way reads are.
        let (tx, stream) = WatchStream::channel();
        tokio::spawn(async move {
            while let Some(mut scroll) = upstream.recv().await {
                match cipher.decrypt_map(&scroll.data) {
                    Ok(Some(plain)) => {
                        scroll.data = plain;
                        scroll.metadata.hash = Some(scroll.compute_hash());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(key = %scroll.key, error = %e, "dropping undecryptable watch event");
                        continue;
                    }
                }
                if tx.send(scroll).is_err() {
                    break;
                }
            }
        });
        Ok(stream)
    }

    async fn close(&self) -> NineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNamespace;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("v".into(), value);
        map
    }

    fn plain_store(config: StoreConfig) -> Store {
        Store::new(Arc::new(MemoryNamespace::new()), config).unwrap()
    }

    #[tokio::test]
    async fn history_rings_retain_most_recent() {
        let store = plain_store(StoreConfig { history: true, max_patches: 3, ..Default::default() });
        for i in 1..=5 {
            store.write("/k", data(json!(i))).await.unwrap();
        }
        let history = store.history("/k").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.first().unwrap().seq, 3);
        assert_eq!(history.last().unwrap().seq, 5);
    }

    #[tokio::test]
    async fn state_at_replays_to_sequence() {
        let store = plain_store(StoreConfig { history: true, max_patches: 3, ..Default::default() });
        for i in 1..=5 {
            store.write("/k", data(json!(i))).await.unwrap();
        }
        let third = store.state_at("/k", 3).await.unwrap();
        assert_eq!(third.data, data(json!(3)));
        assert_eq!(third.metadata.version, 3);

        assert!(matches!(store.state_at("/k", 0).await, Err(NineError::Internal(_))));
        assert!(matches!(store.state_at("/k", 6).await, Err(NineError::Internal(_))));
        assert!(matches!(store.state_at("/other", 1).await, Err(NineError::NotFound(_))));
    }

    #[tokio::test]
    async fn patch_chain_verifies() {
        let store = plain_store(StoreConfig { history: true, ..Default::default() });
        store.write("/k", data(json!(1))).await.unwrap();
        let v1 = store.read("/k").await.unwrap();
        store.write("/k", data(json!(2))).await.unwrap();

        let history = store.history("/k").await.unwrap();
        assert!(patch::verify(None, &history[0]));
        assert!(patch::verify(v1.as_ref(), &history[1]));
    }

    #[tokio::test]
    async fn anchor_restore_round_trip() {
        let store = plain_store(StoreConfig { history: true, ..Default::default() });
        let mut orig = Map::new();
        orig.insert("state".into(), json!("orig"));
        store.write("/p", orig.clone()).await.unwrap();

        let anchor = store.anchor("/p", Some("v0")).await.unwrap();
        assert!(anchor.verify());

        let mut modified = Map::new();
        modified.insert("state".into(), json!("mod"));
        store.write("/p", modified).await.unwrap();

        let restored = store.restore("/p", &anchor.id).await.unwrap();
        assert_eq!(restored.data, orig);
        assert_eq!(restored.metadata.version, 3);

        assert!(matches!(
            store.restore("/p", "missing-id").await,
            Err(NineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn anchor_ring_retention() {
        let store = plain_store(StoreConfig { history: true, max_anchors: 2, ..Default::default() });
        store.write("/p", data(json!(0))).await.unwrap();
        let mut ids = Vec::new();
        for i in 1..=3 {
            store.write("/p", data(json!(i))).await.unwrap();
            ids.push(store.anchor("/p", None).await.unwrap().id);
        }
        let anchors = store.anchors("/p").await.unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].id, ids[1]);
        assert_eq!(anchors[1].id, ids[2]);
    }

    #[tokio::test]
    async fn prune_trims_rings() {
        let store = plain_store(StoreConfig { history: true, ..Default::default() });
        for i in 0..10 {
            store.write("/p", data(json!(i))).await.unwrap();
        }
        store.anchor("/p", None).await.unwrap();
        store.prune_history("/p", Some(2), Some(0)).await.unwrap();
        assert_eq!(store.history("/p").await.unwrap().len(), 2);
        assert!(store.anchors("/p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn encrypted_round_trip_and_opacity() {
        let backend = Arc::new(MemoryNamespace::new());
        let key = derive_app_key(b"master", "test-app").unwrap();
        let store = Store::new(
            backend.clone(),
            StoreConfig { encrypted: true, key: Some(key), ..Default::default() },
        )
        .unwrap();

        let mut payload = Map::new();
        payload.insert("secret".into(), json!("very confidential"));
        let written = store.write("/s", payload.clone()).await.unwrap();
        assert_eq!(written.data, payload);

        // Raw backend form carries no plaintext.
        let raw = backend.read("/s").await.unwrap().unwrap();
        let raw_json = serde_json::to_string(&raw.data).unwrap();
        assert!(!raw_json.contains("confidential"));
        assert!(!raw_json.contains("secret"));
        assert!(raw.data.contains_key(crypto::ENCRYPTED_FIELD));

        let read = store.read("/s").await.unwrap().unwrap();
        assert_eq!(read.data, payload);
        assert_eq!(read.metadata.hash, Some(read.compute_hash()));
    }

    #[tokio::test]
    async fn wrong_key_reads_internal() {
        let backend = Arc::new(MemoryNamespace::new());
        let store = Store::new(
            backend.clone(),
            StoreConfig { encrypted: true, key: Some([1u8; 32]), ..Default::default() },
        )
        .unwrap();
        store.write("/s", data(json!("x"))).await.unwrap();

        let wrong = Store::new(
            backend,
            StoreConfig { encrypted: true, key: Some([2u8; 32]), ..Default::default() },
        )
        .unwrap();
        assert!(matches!(wrong.read("/s").await, Err(NineError::Internal(_))));
    }

    #[tokio::test]
    async fn encrypted_watch_delivers_plaintext() {
        let store = plain_store(StoreConfig {
            encrypted: true,
            key: Some([3u8; 32]),
            ..Default::default()
        });
        let mut sub = store.watch("/s/**").await.unwrap();
        let mut payload = Map::new();
        payload.insert("msg".into(), json!("hello"));
        store.write("/s/doc", payload.clone()).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.data, payload);
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let err = Store::new(
            Arc::new(MemoryNamespace::new()),
            StoreConfig { encrypted: true, ..Default::default() },
        )
        .err()
        .unwrap();
        assert!(matches!(err, NineError::InvalidData(_)));
    }

    #[tokio::test]
    async fn close_propagates_to_backend() {
        let backend = Arc::new(MemoryNamespace::new());
        let store = Store::new(backend.clone(), StoreConfig::default()).unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert_eq!(store.read("/x").await, Err(NineError::Closed));
        assert_eq!(backend.read("/x").await, Err(NineError::Closed));
    }
}
