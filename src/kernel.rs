//! Mount-table composite namespace.
//!
//! The kernel routes each operation to the mounted namespace with the
//! longest matching prefix, translating the path inbound and rewriting
//! keys on the way back out so callers only ever see the paths they asked
//! about. `/foo` never captures `/foobar`: containment is checked at
//! segment boundaries everywhere.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NineError, NineResult};
use crate::namespace::{Namespace, WatchStream};
use crate::path::{self, ROOT};
use crate::scroll::Scroll;

struct KernelInner {
    mounts: BTreeMap<String, Arc<dyn Namespace>>,
    /// Key-rewriting forwarders spawned for active watches.
    forwards: Vec<JoinHandle<()>>,
}

/// A namespace composed of other namespaces.
pub struct Kernel {
    inner: Mutex<KernelInner>,
    closed: AtomicBool,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(KernelInner { mounts: BTreeMap::new(), forwards: Vec::new() }),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> NineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NineError::Closed);
        }
        Ok(())
    }

    /// Mount `ns` at `mount_path`, replacing any namespace already there.
    pub async fn mount(&self, mount_path: &str, ns: Arc<dyn Namespace>) -> NineResult<()> {
        self.ensure_open()?;
        let mount_path = path::normalize_mount(mount_path)?;
        let mut inner = self.inner.lock().await;
        if inner.mounts.insert(mount_path.clone(), ns).is_some() {
            warn!(mount = %mount_path, "replaced existing mount");
        } else {
            info!(mount = %mount_path, "mounted");
        }
        Ok(())
    }

    /// Remove the mount at `mount_path`, returning the namespace so the
    /// caller decides whether to close it.
    pub async fn unmount(&self, mount_path: &str) -> NineResult<Arc<dyn Namespace>> {
        self.ensure_open()?;
        let mount_path = path::normalize_mount(mount_path)?;
        let mut inner = self.inner.lock().await;
        let ns = inner
            .mounts
            .remove(&mount_path)
            .ok_or_else(|| NineError::NotFound(format!("no mount at {mount_path}")))?;
        info!(mount = %mount_path, "unmounted");
        Ok(ns)
    }

    /// Currently mounted paths.
    pub async fn mounts(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.mounts.keys().cloned().collect()
    }

    /// Longest-prefix resolution: the mounted namespace, the mount path,
    /// and the mount-local translation of `p`.
    async fn resolve(&self, p: &str) -> NineResult<(Arc<dyn Namespace>, String, String)> {
        let inner = self.inner.lock().await;
        let best = inner
            .mounts
            .iter()
            .filter(|(m, _)| path::is_under(m, p))
            .max_by_key(|(m, _)| m.len());
        let (mount, ns) = match best {
            Some((mount, ns)) => (mount.clone(), Arc::clone(ns)),
            None => return Err(NineError::NotFound(format!("no mount serves {p}"))),
        };
        let local = if mount == ROOT {
            p.to_string()
        } else if p == mount {
            ROOT.to_string()
        } else {
            p[mount.len()..].to_string()
        };
        Ok((ns, mount, local))
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Namespace for Kernel {
    async fn read(&self, p: &str) -> NineResult<Option<Scroll>> {
        self.ensure_open()?;
        path::validate_path(p)?;
        let (ns, _, local) = self.resolve(p).await?;
        let scroll = ns.read(&local).await?;
        Ok(scroll.map(|mut s| {
            s.key = p.to_string();
            s
        }))
    }

    async fn write(&self, p: &str, data: Map<String, Value>) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(p)?;
        let (ns, _, local) = self.resolve(p).await?;
        let mut scroll = ns.write(&local, data).await?;
        scroll.key = p.to_string();
        Ok(scroll)
    }

    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll> {
        self.ensure_open()?;
        path::validate_path(&scroll.key)?;
        let original = scroll.key.clone();
        let (ns, _, local) = self.resolve(&original).await?;
        let mut translated = scroll;
        translated.key = local;
        let mut written = ns.write_scroll(translated).await?;
        written.key = original;
        Ok(written)
    }

    async fn list(&self, prefix: &str) -> NineResult<Vec<String>> {
        self.ensure_open()?;
        path::validate_path(prefix)?;
        let (ns, mount, local) = self.resolve(prefix).await?;
        let locals = ns.list(&local).await?;
        Ok(locals.into_iter().map(|l| path::rejoin(&mount, &l)).collect())
    }

    async fn watch(&self, pattern: &str) -> NineResult<WatchStream> {
        self.ensure_open()?;
        path::validate_pattern(pattern)?;
        // Patterns resolve like paths: the wildcard tail rides along into
        // the mount-local pattern.
        let (ns, mount, local) = self.resolve(pattern).await?;
        let mut upstream = ns.watch(&local).await?;
        let (tx, stream) = WatchStream::channel();

        let handle = tokio::spawn(async move {
            while let Some(mut scroll) = upstream.recv().await {
                scroll.key = path::rejoin(&mount, &scroll.key);
                if tx.send(scroll).is_err() {
                    break;
                }
            }
        });
        let mut inner = self.inner.lock().await;
        inner.forwards.retain(|h| !h.is_finished());
        inner.forwards.push(handle);
        Ok(stream)
    }

    async fn close(&self) -> NineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for handle in inner.forwards.drain(..) {
            handle.abort();
        }
        let mounts = std::mem::take(&mut inner.mounts);
        drop(inner);
        for (mount, ns) in mounts {
            if let Err(e) = ns.close().await {
                warn!(mount = %mount, error = %e, "mounted namespace failed to close");
            }
        }
        debug!("kernel closed");
        Ok(())
    }
}
