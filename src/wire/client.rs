//! Connection-backed namespace proxy.
//!
//! A `NetworkNamespace` re-exposes the five operations over any
//! bidirectional byte stream. One receiver task owns the read half and
//! routes every incoming message: watch events to their subscription
//! channel, everything else to the pending completion registered under
//! its tag. When the transport drops, pending requests fail with
//! `Connection` and watch streams end.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{NineError, NineResult};
use crate::namespace::{Namespace, WatchStream};
use crate::scroll::Scroll;

use super::framer::Framer;
use super::{Op, Request, Response};

/// Client knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a request may wait for its tagged response.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(30) }
    }
}

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;
type Watches = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Scroll>>>>;

/// A namespace living on the other side of a connection.
pub struct NetworkNamespace {
    config: ClientConfig,
    writer: Writer,
    next_tag: AtomicU64,
    pending: Pending,
    watches: Watches,
    recv_task: JoinHandle<()>,
    closed: AtomicBool,
}

impl NetworkNamespace {
    /// Dial a TCP server.
    pub async fn connect(addr: &str) -> NineResult<Self> {
        Self::connect_with(addr, ClientConfig::default()).await
    }

    pub async fn connect_with(addr: &str, config: ClientConfig) -> NineResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NineError::Connection(format!("dial {addr} failed: {e}")))?;
        stream.set_nodelay(true).ok();
        info!(addr = %addr, "connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Attach to any established byte stream. The transport only needs to
    /// move bytes both ways and signal close by ending the read side.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: Writer = Arc::new(Mutex::new(Box::new(write_half)));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let watches: Watches = Arc::new(Mutex::new(HashMap::new()));

        let recv_task = tokio::spawn(receiver_loop(
            read_half,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&watches),
        ));

        Self {
            config,
            writer,
            next_tag: AtomicU64::new(1),
            pending,
            watches,
            recv_task,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> NineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NineError::Closed);
        }
        Ok(())
    }

    fn take_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, request: &Request) -> NineResult<()> {
        send_request(&self.writer, request).await
    }

    /// Issue a request and await its tagged response.
    async fn request(&self, request: Request) -> NineResult<Response> {
        let tag = request.tag;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(tag, tx);

        if let Err(e) = self.send(&request).await {
            self.pending.lock().await.remove(&tag);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Completion dropped: the receiver task cleaned up after
                // the transport went away, or the namespace was closed.
                return Err(if self.closed.load(Ordering::SeqCst) {
                    NineError::Closed
                } else {
                    NineError::Connection("connection lost".into())
                });
            }
            Err(_) => {
                self.pending.lock().await.remove(&tag);
                return Err(NineError::Timeout);
            }
        };

        if response.ok {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }
}

#[async_trait]
impl Namespace for NetworkNamespace {
    async fn read(&self, path: &str) -> NineResult<Option<Scroll>> {
        self.ensure_open()?;
        let response = self
            .request(Request {
                tag: self.take_tag(),
                op: Op::Read,
                path: Some(path.to_string()),
                data: None,
            })
            .await?;
        Ok(response.scroll)
    }

    async fn write(&self, path: &str, data: Map<String, Value>) -> NineResult<Scroll> {
        self.ensure_open()?;
        let response = self
            .request(Request {
                tag: self.take_tag(),
                op: Op::Write,
                path: Some(path.to_string()),
                data: Some(data),
            })
            .await?;
        response
            .scroll
            .ok_or_else(|| NineError::Internal("write response carried no scroll".into()))
    }

    async fn write_scroll(&self, scroll: Scroll) -> NineResult<Scroll> {
        // The wire carries path + data only; metadata hints do not cross.
        let Scroll { key, data, .. } = scroll;
        self.write(&key, data).await
    }

    async fn list(&self, prefix: &str) -> NineResult<Vec<String>> {
        self.ensure_open()?;
        let response = self
            .request(Request {
                tag: self.take_tag(),
                op: Op::List,
                path: Some(prefix.to_string()),
                data: None,
            })
            .await?;
        Ok(response.paths.unwrap_or_default())
    }

    async fn watch(&self, pattern: &str) -> NineResult<WatchStream> {
        self.ensure_open()?;
        let tag = self.take_tag();
        let (tx, stream) = WatchStream::channel();

        // Register the event route before the request goes out so events
        // arriving right behind the acknowledgment are never dropped.
        self.watches.lock().await.insert(tag, tx);

        let ack = self
            .request(Request { tag, op: Op::Watch, path: Some(pattern.to_string()), data: None })
            .await;
        if let Err(e) = ack {
            self.watches.lock().await.remove(&tag);
            return Err(e);
        }
        debug!(tag, pattern = %pattern, "watch established");
        Ok(stream)
    }

    async fn close(&self) -> NineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // No protocol message: cancel the bookkeeping and drop the
        // transport. Pending completions unblock with Closed.
        self.recv_task.abort();
        self.watches.lock().await.clear();
        self.pending.lock().await.clear();
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.ok();
        info!("network namespace closed");
        Ok(())
    }
}

impl Drop for NetworkNamespace {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn send_request(writer: &Writer, request: &Request) -> NineResult<()> {
    let mut line = serde_json::to_vec(request)
        .map_err(|e| NineError::Internal(format!("encode failed: {e}")))?;
    line.push(b'\n');
    let mut writer = writer.lock().await;
    writer
        .write_all(&line)
        .await
        .map_err(|e| NineError::Connection(format!("send failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| NineError::Connection(format!("send failed: {e}")))?;
    Ok(())
}

async fn receiver_loop<R>(mut reader: R, writer: Writer, pending: Pending, watches: Watches)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut framer = Framer::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "transport read failed");
                break;
            }
        };
        for frame in framer.push(&chunk[..n]) {
            let response: Response = match serde_json::from_slice(&frame) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "undecodable message from server");
                    continue;
                }
            };
            route(&response, &writer, &pending, &watches).await;
        }
    }

    debug!("receiver loop ended");
    // Transport is gone: unblock every pending request (dropped senders
    // surface as Connection) and end every watch stream.
    pending.lock().await.clear();
    watches.lock().await.clear();
}

async fn route(response: &Response, writer: &Writer, pending: &Pending, watches: &Watches) {
    if response.event {
        let scroll = match &response.scroll {
            Some(scroll) => scroll.clone(),
            None => {
                warn!(tag = response.tag, "event without scroll");
                return;
            }
        };
        let dead = {
            let watches = watches.lock().await;
            match watches.get(&response.tag) {
                Some(tx) => tx.send(scroll).is_err(),
                // Already unwatched; late events are expected and dropped.
                None => false,
            }
        };
        if dead {
            // The consumer dropped its stream without unwatching: reclaim
            // the slot and tell the server to stop pushing.
            watches.lock().await.remove(&response.tag);
            let unwatch = Request { tag: response.tag, op: Op::Unwatch, path: None, data: None };
            if let Err(e) = send_request(writer, &unwatch).await {
                debug!(error = %e, "auto-unwatch failed");
            }
        }
        return;
    }

    let completion = pending.lock().await.remove(&response.tag);
    match completion {
        Some(tx) => {
            let _ = tx.send(response.clone());
        }
        None => debug!(tag = response.tag, "response for unknown tag"),
    }
}
