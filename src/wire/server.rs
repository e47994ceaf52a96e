//! Wire protocol server.
//!
//! One task per accepted connection. A session reads framed requests,
//! dispatches them against the local namespace, and replies through a
//! per-session writer channel — the same channel watch forwarders push
//! their events into, so responses and events interleave without two
//! writers fighting over the socket.

use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NineError;
use crate::namespace::{Namespace, WatchStream};

use super::framer::Framer;
use super::{Op, Request, Response};

/// Accept connections forever, serving `ns` to each.
pub async fn serve(listener: TcpListener, ns: Arc<dyn Namespace>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "serving namespace");
    }
    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();
        debug!(peer = %peer, "session opened");
        let ns = Arc::clone(&ns);
        tokio::spawn(async move {
            session(stream, ns).await;
            debug!(peer = %peer, "session ended");
        });
    }
}

/// Bind `addr` and serve.
pub async fn serve_addr(addr: &str, ns: Arc<dyn Namespace>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, ns).await
}

/// Drive a single connection to completion.
pub async fn session<S>(stream: S, ns: Arc<dyn Namespace>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut write_half) = tokio::io::split(stream);

    // Single writer task: responses and pushed events share one ordered
    // outbound queue.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Response>();
    let writer_task = tokio::spawn(async move {
        while let Some(response) = out_rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "unencodable response");
                    continue;
                }
            };
            line.push(b'\n');
            if write_half.write_all(&line).await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut watches: HashMap<u64, JoinHandle<()>> = HashMap::new();
    let mut framer = Framer::new();
    let mut chunk = [0u8; 8192];

    'conn: loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "session read failed");
                break;
            }
        };
        for frame in framer.push(&chunk[..n]) {
            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "undecodable request");
                    let err = NineError::InvalidData("malformed request".into());
                    if out_tx.send(Response::failure(0, &err)).is_err() {
                        break 'conn;
                    }
                    continue;
                }
            };
            if let Some(response) = dispatch(&ns, request, &out_tx, &mut watches).await {
                if out_tx.send(response).is_err() {
                    break 'conn;
                }
            }
        }
    }

    // Connection drop cancels every subscription this session held.
    for (tag, handle) in watches.drain() {
        debug!(tag, "cancelling watch with session");
        handle.abort();
    }
    drop(out_tx);
    let _ = writer_task.await;
}

/// Handle one request. Returns the response to enqueue, or `None` when
/// the arm already queued its own replies (watch must enqueue its
/// acknowledgment before the forwarder can race it with events).
async fn dispatch(
    ns: &Arc<dyn Namespace>,
    request: Request,
    out_tx: &mpsc::UnboundedSender<Response>,
    watches: &mut HashMap<u64, JoinHandle<()>>,
) -> Option<Response> {
    let tag = request.tag;
    let response = match request.op {
        Op::Read => match ns.read(&required_path(&request)).await {
            Ok(scroll) => Response::with_scroll(tag, scroll),
            Err(e) => Response::failure(tag, &e),
        },
        Op::Write => {
            let data = request.data.clone().unwrap_or_else(Map::new);
            match ns.write(&required_path(&request), data).await {
                Ok(scroll) => Response::with_scroll(tag, Some(scroll)),
                Err(e) => Response::failure(tag, &e),
            }
        }
        Op::List => match ns.list(&required_path(&request)).await {
            Ok(paths) => Response::with_paths(tag, paths),
            Err(e) => Response::failure(tag, &e),
        },
        Op::Watch => match ns.watch(&required_path(&request)).await {
            Ok(stream) => {
                // Acknowledge first so the ack always precedes events.
                let _ = out_tx.send(Response::ok(tag));
                let handle = tokio::spawn(forward_events(tag, stream, out_tx.clone()));
                if let Some(stale) = watches.insert(tag, handle) {
                    // A tag can only carry one subscription at a time.
                    stale.abort();
                }
                return None;
            }
            Err(e) => Response::failure(tag, &e),
        },
        Op::Unwatch => match watches.remove(&tag) {
            Some(handle) => {
                handle.abort();
                Response::ok(tag)
            }
            None => Response::failure(
                tag,
                &NineError::NotFound(format!("no watch on tag {tag}")),
            ),
        },
        Op::Close => match ns.close().await {
            Ok(()) => Response::ok(tag),
            Err(e) => Response::failure(tag, &e),
        },
    };
    Some(response)
}

fn required_path(request: &Request) -> String {
    // Validation happens inside the namespace; an absent path field is
    // simply an invalid (empty) path.
    request.path.clone().unwrap_or_default()
}

async fn forward_events(tag: u64, mut stream: WatchStream, out: mpsc::UnboundedSender<Response>) {
    while let Some(scroll) = stream.recv().await {
        if out.send(Response::pushed_event(tag, scroll)).is_err() {
            break;
        }
    }
    debug!(tag, "watch stream ended");
}
