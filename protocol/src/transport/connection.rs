//! # Connection
//!
//! Per-peer outbound socket state: a background task owns the TCP stream
//! (or its TLS wrapper), reconnects on a fixed interval after a failure,
//! and buffers frames in a [`Queue`] while disconnected so a reconnect
//! flushes them in send order. `cast`/`call`/`abcast` never touch a socket
//! directly — they hand frames to a `Connection` and move on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, trace, warn};

use crate::config::MAX_FRAME_LENGTH;
use crate::identity::Node;
use crate::queue::Queue;
use crate::transport::tls::{self, BoxedStream, TlsConfig};

/// One fully reassembled inbound frame, tagged with the peer it arrived
/// from so the kernel's dispatch loop can attribute `sources` correctly.
#[derive(Debug)]
pub struct InboundFrame {
    pub peer: Node,
    pub bytes: Vec<u8>,
}

enum ConnCommand {
    Send(Bytes),
    Close,
}

/// Handle to a peer's outbound connection. Cheap to clone; all state lives
/// in the background task `spawn` starts.
#[derive(Clone)]
pub struct Connection {
    node: Node,
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    connected: Arc<AtomicBool>,
}

/// Retry policy for a `Connection`'s background reconnect loop.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub retry_ms: u64,
    pub max_retries: Option<u32>,
    pub tls: Option<TlsConfig>,
}

impl Connection {
    /// Spawns the background task and returns a handle. Connects
    /// eagerly; the first connect attempt runs before this call returns
    /// control to the caller only in the sense that the task is already
    /// scheduled — `spawn` itself never blocks.
    pub fn spawn(
        node: Node,
        options: ConnectionOptions,
        inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        tokio::spawn(run(node.clone(), options, cmd_rx, inbound_tx, connected.clone()));
        Self {
            node,
            cmd_tx,
            connected,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues one frame for sending. Never blocks; the background task
    /// buffers it if the socket is currently down.
    pub fn send(&self, frame: Bytes) {
        let _ = self.cmd_tx.send(ConnCommand::Send(frame));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Close);
    }
}

async fn run(
    node: Node,
    options: ConnectionOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    connected: Arc<AtomicBool>,
) {
    let mut pending: Queue<Bytes> = Queue::new();
    let mut retries: u32 = 0;
    let mut framed: Option<Framed<BoxedStream, LengthDelimitedCodec>> = None;

    loop {
        if framed.is_none() {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ConnCommand::Send(bytes)) => pending.enqueue(bytes),
                    Some(ConnCommand::Close) | None => return,
                },
                _ = tokio::time::sleep(Duration::from_millis(options.retry_ms)) => {
                    match dial(&node, options.tls.as_ref()).await {
                        Ok(stream) => {
                            debug!(peer = %node, "connection established");
                            retries = 0;
                            connected.store(true, Ordering::SeqCst);
                            framed = Some(codec(stream));
                        }
                        Err(err) => {
                            retries += 1;
                            if let Some(max) = options.max_retries {
                                if retries > max {
                                    warn!(peer = %node, %err, retries, "giving up after max_retries");
                                    return;
                                }
                            }
                            trace!(peer = %node, %err, retries, "connect attempt failed, will retry");
                        }
                    }
                }
            }
            continue;
        }

        let stream = framed.as_mut().unwrap();
        while let Some(frame) = pending.dequeue() {
            if stream.send(frame).await.is_err() {
                connected.store(false, Ordering::SeqCst);
                framed = None;
                break;
            }
        }
        if framed.is_none() {
            continue;
        }
        let stream = framed.as_mut().unwrap();

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCommand::Send(bytes)) => {
                    if stream.send(bytes).await.is_err() {
                        connected.store(false, Ordering::SeqCst);
                        framed = None;
                    }
                }
                Some(ConnCommand::Close) | None => {
                    let _ = stream.close().await;
                    connected.store(false, Ordering::SeqCst);
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(bytes)) => {
                    if inbound_tx
                        .send(InboundFrame { peer: node.clone(), bytes: bytes.to_vec() })
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(peer = %node, %err, "connection read error, will reconnect");
                    connected.store(false, Ordering::SeqCst);
                    framed = None;
                }
                None => {
                    debug!(peer = %node, "peer closed connection, will reconnect");
                    connected.store(false, Ordering::SeqCst);
                    framed = None;
                }
            }
        }
    }
}

async fn dial(node: &Node, tls: Option<&TlsConfig>) -> std::io::Result<BoxedStream> {
    let stream = TcpStream::connect(node.addr()).await?;
    tls::connect(stream, &node.host, tls).await
}

pub(crate) fn codec(stream: BoxedStream) -> Framed<BoxedStream, LengthDelimitedCodec> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .length_field_length(4)
        .big_endian()
        .new_codec();
    Framed::new(stream, codec)
}
