//! Watcher registry shared by the local backends.
//!
//! Subscriptions are unbounded channel senders paired with their pattern.
//! Fan-out is non-blocking; before dispatch the registry sweeps senders
//! whose receiving stream was dropped, so forgotten subscriptions are
//! reclaimed without explicit cancellation.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{NineError, NineResult};
use crate::namespace::WatchStream;
use crate::path;
use crate::scroll::Scroll;

/// Default per-namespace watcher cap.
pub const DEFAULT_MAX_WATCHERS: usize = 1024;

struct Watcher {
    pattern: String,
    tx: mpsc::UnboundedSender<Scroll>,
}

pub(crate) struct WatcherSet {
    max: usize,
    watchers: Vec<Watcher>,
}

impl WatcherSet {
    pub fn new(max: usize) -> Self {
        Self { max, watchers: Vec::new() }
    }

    /// Register a subscription for `pattern`, enforcing the cap.
    pub fn subscribe(&mut self, pattern: &str) -> NineResult<WatchStream> {
        self.sweep();
        if self.watchers.len() >= self.max {
            return Err(NineError::Unavailable(format!(
                "watcher limit of {} reached",
                self.max
            )));
        }
        let (tx, stream) = WatchStream::channel();
        self.watchers.push(Watcher { pattern: pattern.to_string(), tx });
        Ok(stream)
    }

    /// Deliver a persisted scroll to every matching live watcher.
    pub fn notify(&mut self, scroll: &Scroll) {
        self.sweep();
        for watcher in &self.watchers {
            if path::matches(&watcher.pattern, &scroll.key) {
                // Send only fails when the stream was dropped between the
                // sweep and now; the next sweep reclaims it.
                let _ = watcher.tx.send(scroll.clone());
            }
        }
    }

    /// Drop every subscription, ending their streams.
    pub fn close_all(&mut self) {
        self.watchers.clear();
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    fn sweep(&mut self) {
        let before = self.watchers.len();
        self.watchers.retain(|w| !w.tx.is_closed());
        let removed = before - self.watchers.len();
        if removed > 0 {
            debug!(removed, "reclaimed dropped watchers");
        }
    }
}
