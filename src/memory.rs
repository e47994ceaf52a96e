//! In-memory namespace backend.
//!
//! The baseline implementation of the contract: a sorted map of scrolls
//! plus a watcher registry behind a single async mutex. No I/O failure
//! modes; the only errors are `InvalidPath`, `Unavailable` (watcher cap),
//! and `Closed`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::{system_clock, Clock};
use crate::error::{NineError, NineResult};
use crate::namespace::{Namespace, WatchStream};
use crate::path;
use crate::scroll::{stamp_next, Scroll};
use crate::watch::{WatcherSet, DEFAULT_MAX_WATCHERS};

struct Inner {
    scrolls: BTreeMap<String, Scroll>,
    watchers: WatcherSet,
}

/// RAM-backed namespace.
pub struct MemoryNamespace {
    inner: Mutex<Inner>,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::with_max_watchers(DEFAULT_MAX_WATCHERS)
    }

    pub fn with_max_watchers(max_watchers: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scrolls: BTreeMap::new(),
                watchers: WatcherSet::new(max_watchers),
            }),
            closed: AtomicBool::new(false),
            clock: system_clock(),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..Self::new() }
    }

    fn ensure_open(&self) -> NineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NineError::Closed);
        }
        Ok(())
    }

    async fn persist(
        &self,
        key: &str,
        scroll_type: Option<String>,
        data: Map<String, Value>,
        hints: Option<crate::scroll::Metadata>,
    ) -> NineResult<Scroll> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let prior = inner.scrolls.get(key);
        let scroll = stamp_next(prior, key, scroll_type, data, hints.as_ref(), now);
        inner.scrolls.insert(key.to_string(), scroll.clone());
        // Fan-out happens under the same lock so every watcher observes
        // writes in persistence order, before the write is acknowledged.
        inner.watchers.notify(&scroll);
        Ok(scroll)
    }
}

impl Default for MemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Namespace for MemoryNamespace {
    async fn read(&self, path: &str) -> NineResult<Option<Scroll>> {
        self.ensure_open()?;
        path::validate_path(path)?;
        let inner = self.inner.lock().await;
        Ok(inner.scrolls.get(path).cloned())
    }

    async fn write(&self, path: &str, data: Map<String, Value>) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(path)?;
        self.persist(path, None, data, None).await
    }

    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(&scroll.key)?;
        let Scroll { key, scroll_type, metadata, data } = scroll;
        self.persist(&key, scroll_type, data, Some(metadata)).await
    }

    async fn list(&self, prefix: &str) -> NineResult<Vec<String>> {
        self.ensure_open()?;
        path::validate_path(prefix)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .scrolls
            .keys()
            .filter(|k| path::is_under(prefix, k))
            .cloned()
            .collect())
    }

    async fn watch(&self, pattern: &str) -> NineResult<WatchStream> {
        self.ensure_open()?;
        path::validate_pattern(pattern)?;
        let mut inner = self.inner.lock().await;
        inner.watchers.subscribe(pattern)
    }

    async fn close(&self) -> NineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.watchers.close_all();
        debug!(scrolls = inner.scrolls.len(), "memory namespace closed");
        Ok(())
    }
}
