//! File-backed namespace: one JSON document per scroll.
//!
//! `/a/b/c` maps to `<root>/_scrolls/a/b/c.json`. Directories are created
//! lazily on first write; replacement is atomic (temp file + rename). A
//! missing file reads as absent; a file that exists but fails to parse is
//! an `Internal` error, never absence.
//!
//! Watch notifications are driven by this instance's own writes; there is
//! no filesystem-notify integration.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::{system_clock, Clock};
use crate::error::{NineError, NineResult};
use crate::namespace::{Namespace, WatchStream};
use crate::path;
use crate::scroll::{stamp_next, Scroll};
use crate::watch::{WatcherSet, DEFAULT_MAX_WATCHERS};

const SCROLLS_DIR: &str = "_scrolls";
const SCROLL_EXT: &str = ".json";

/// Namespace persisting scrolls as JSON files under a root directory.
pub struct FileNamespace {
    scrolls_dir: PathBuf,
    // Also serializes writes: the lock is held across load-stamp-persist
    // so two writers can never interleave on the same key.
    watchers: Mutex<WatcherSet>,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl FileNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_watchers(root, DEFAULT_MAX_WATCHERS)
    }

    pub fn with_max_watchers(root: impl Into<PathBuf>, max_watchers: usize) -> Self {
        let root = root.into();
        info!(root = %root.display(), "file namespace opened");
        Self {
            scrolls_dir: root.join(SCROLLS_DIR),
            watchers: Mutex::new(WatcherSet::new(max_watchers)),
            closed: AtomicBool::new(false),
            clock: system_clock(),
        }
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..Self::new(root) }
    }

    fn ensure_open(&self) -> NineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NineError::Closed);
        }
        Ok(())
    }

    /// `/a/b` -> `<root>/_scrolls/a/b.json`; the root path `/` maps to the
    /// bare `.json` stem.
    fn file_for(&self, key: &str) -> PathBuf {
        let relative = key.trim_start_matches('/');
        // Writing at "/" maps to the bare extension under the scrolls dir.
        if relative.is_empty() {
            return self.scrolls_dir.join(SCROLL_EXT);
        }
        let mut file = self.scrolls_dir.clone();
        for seg in relative.split('/') {
            file.push(seg);
        }
        let name = format!(
            "{}{SCROLL_EXT}",
            file.file_name().unwrap_or_default().to_string_lossy()
        );
        file.set_file_name(name);
        file
    }

    fn key_for(&self, file: &Path) -> Option<String> {
        let rel = file.strip_prefix(&self.scrolls_dir).ok()?;
        let rel = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        let stem = rel.strip_suffix(SCROLL_EXT)?;
        let key = format!("/{stem}");
        path::validate_path(&key).ok()?;
        Some(key)
    }

    async fn load(&self, key: &str) -> NineResult<Option<Scroll>> {
        let file = self.file_for(key);
        let bytes = match fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NineError::Internal(format!("read failed: {e}"))),
        };
        let scroll: Scroll = serde_json::from_slice(&bytes)
            .map_err(|e| NineError::Internal(format!("corrupt scroll at {key}: {e}")))?;
        Ok(Some(scroll))
    }

    async fn persist(&self, scroll: &Scroll) -> NineResult<()> {
        let file = self.file_for(&scroll.key);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| NineError::Internal(format!("mkdir failed: {e}")))?;
        }
        let bytes = serde_json::to_vec(scroll)
            .map_err(|e| NineError::Internal(format!("encode failed: {e}")))?;

        // Full-file replacement through a sibling temp file keeps readers
        // from ever observing a partial scroll.
        let tmp = file.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| NineError::Internal(format!("write failed: {e}")))?;
        fs::rename(&tmp, &file)
            .await
            .map_err(|e| NineError::Internal(format!("rename failed: {e}")))?;
        debug!(key = %scroll.key, version = scroll.metadata.version, "scroll persisted");
        Ok(())
    }

    async fn walk_keys(&self) -> NineResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.scrolls_dir.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(NineError::Internal(format!("list failed: {e}"))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| NineError::Internal(format!("list failed: {e}")))?
            {
                let entry_path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| NineError::Internal(format!("list failed: {e}")))?;
                if file_type.is_dir() {
                    stack.push(entry_path);
                } else if let Some(key) = self.key_for(&entry_path) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn persist_next(
        &self,
        key: &str,
        scroll_type: Option<String>,
        data: Map<String, Value>,
        hints: Option<crate::scroll::Metadata>,
    ) -> NineResult<Scroll> {
        let now = self.clock.now_ms();
        let mut watchers = self.watchers.lock().await;
        let prior = self.load(key).await?;
        let scroll = stamp_next(prior.as_ref(), key, scroll_type, data, hints.as_ref(), now);
        self.persist(&scroll).await?;
        watchers.notify(&scroll);
        Ok(scroll)
    }
}

#[async_trait]
impl Namespace for FileNamespace {
    async fn read(&self, path: &str) -> NineResult<Option<Scroll>> {
        self.ensure_open()?;
        path::validate_path(path)?;
        self.load(path).await
    }

    async fn write(&self, path: &str, data: Map<String, Value>) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(path)?;
        self.persist_next(path, None, data, None).await
    }

    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(&scroll.key)?;
        let Scroll { key, scroll_type, metadata, data } = scroll;
        self.persist_next(&key, scroll_type, data, Some(metadata)).await
    }

    async fn list(&self, prefix: &str) -> NineResult<Vec<String>> {
        self.ensure_open()?;
        path::validate_path(prefix)?;
        let keys = self.walk_keys().await?;
        Ok(keys.into_iter().filter(|k| path::is_under(prefix, k)).collect())
    }

    async fn watch(&self, pattern: &str) -> NineResult<WatchStream> {
        self.ensure_open()?;
        path::validate_pattern(pattern)?;
        let mut watchers = self.watchers.lock().await;
        watchers.subscribe(pattern)
    }

    async fn close(&self) -> NineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut watchers = self.watchers.lock().await;
        watchers.close_all();
        debug!("file namespace closed");
        Ok(())
    }
}
