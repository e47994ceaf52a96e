//! The five-operation namespace contract.
//!
//! Everything in the system — RAM maps, file trees, mount composites,
//! encrypted stores, remote proxies — implements this one interface. The
//! operation set is frozen: read, write, list, watch, close (plus the
//! `write_scroll` refinement of write that carries caller metadata hints).

use async_trait::async_trait;
use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::NineResult;
use crate::scroll::Scroll;

/// Anything addressable through the five operations.
///
/// # Contract
///
/// - Absence on `read` is `Ok(None)`, never an error; a tombstoned scroll
///   reads back with `metadata.deleted = Some(true)`.
/// - `write` stamps metadata (version bump, first-write-wins `createdAt`,
///   fresh `updatedAt`) and recomputes the hash before persisting, then
///   notifies matching watchers before returning.
/// - `list` returns every current key under the prefix, lexicographically
///   sorted; empty is not an error.
/// - `watch` delivers each subsequently persisted matching scroll exactly
///   once, in persistence order. Streams carry no history and cannot be
///   restarted; a dropped stream is reclaimed on a later fan-out.
/// - `close` is idempotent and terminal: it ends every subscription and
///   all further operations fail with `Closed`.
#[async_trait]
pub trait Namespace: Send + Sync {
    /// Current scroll at `path`, or `None` if nothing was ever written.
    async fn read(&self, path: &str) -> NineResult<Option<Scroll>>;

    /// Persist `data` at `path` and return the stamped scroll.
    async fn write(&self, path: &str, data: Map<String, Value>) -> NineResult<Scroll>;

    /// Like `write`, but preserves the caller's `type` and metadata hints.
    ///
    /// Authoritative fields (`version`, `hash`, `updatedAt`) are always
    /// recomputed; a caller-supplied `createdAt` is honored only when the
    /// key has no prior value.
    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll>;

    /// Keys under `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> NineResult<Vec<String>>;

    /// Subscribe to scrolls whose key matches `pattern`.
    async fn watch(&self, pattern: &str) -> NineResult<WatchStream>;

    /// Close the namespace. Idempotent.
    async fn close(&self) -> NineResult<()>;
}

pin_project! {
    /// A live watch subscription.
    ///
    /// Ends when the namespace closes, the connection drops (for remote
    /// namespaces), or the subscription is cancelled server-side.
    pub struct WatchStream {
        #[pin]
        receiver: mpsc::UnboundedReceiver<Scroll>,
    }
}

impl WatchStream {
    /// Build a sender/stream pair. The sender side lives in the watcher
    /// registry (or a forwarding task); dropping either half ends the
    /// subscription.
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Scroll>, WatchStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, WatchStream { receiver: rx })
    }

    /// Receive the next matching scroll, or `None` once the subscription
    /// has ended.
    pub async fn recv(&mut self) -> Option<Scroll> {
        self.receiver.recv().await
    }
}

impl Stream for WatchStream {
    type Item = Scroll;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::Map;

    #[tokio::test]
    async fn watch_stream_delivers_in_order() {
        let (tx, mut stream) = WatchStream::channel();
        tx.send(Scroll::new("/a", Map::new())).unwrap();
        tx.send(Scroll::new("/b", Map::new())).unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().key, "/a");
        assert_eq!(stream.next().await.unwrap().key, "/b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn recv_matches_stream_behavior() {
        let (tx, mut stream) = WatchStream::channel();
        tx.send(Scroll::new("/x", Map::new())).unwrap();
        assert_eq!(stream.recv().await.unwrap().key, "/x");
        drop(tx);
        assert!(stream.recv().await.is_none());
    }
}
