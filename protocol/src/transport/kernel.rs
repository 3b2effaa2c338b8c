//! # NetKernel
//!
//! The message router every other component in this crate sits on top of.
//! One `NetKernel` per node: it owns a TCP listener, a set of outbound
//! [`Connection`]s ("sinks"), the peers that have spoken to it first
//! ("sources"), a handler registry, and the tag -> return-stream map that
//! makes `call`/`multicall` possible.
//!
//! All mutable state lives in one background task (`run_state`), reached
//! only through `NetKernel`'s async methods over an internal command
//! channel — the realization of "single owning task per node" from the
//! concurrency model. A second background task (`dispatch_loop`) calls
//! into registered [`Handler`]s sequentially, so a handler can itself call
//! back into the kernel (e.g. `reply`) without deadlocking the task that
//! would otherwise have to service that call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_KERNEL_PORT, DEFAULT_RETRY_MS};
use crate::crypto::{sign_envelope, verify_envelope, HmacError};
use crate::envelope::{EncodedError, Envelope, Payload, StreamDesc};
use crate::identity::Node;
use crate::transport::connection::{self, Connection, ConnectionOptions, InboundFrame};
use crate::transport::handler::{Handler, ReplyTarget};
use crate::transport::signals::KernelSignal;
use crate::transport::tls::TlsConfig;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("netkernel is not running")]
    NotRunning,
    #[error("handler \"{0}\" is already registered")]
    HandlerAlreadyRegistered(String),
    #[error("reply() called without a tag: the original send was a cast, not a call")]
    ReplyWithoutTag,
    #[error("call to {peer} timed out after {elapsed:?}")]
    Timeout { peer: Node, elapsed: Duration },
    #[error("{peer} returned an error: {source}")]
    Remote { peer: Node, source: EncodedError },
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("envelope (de)serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Hmac(#[from] HmacError),
}

/// Tunables for a `NetKernel`. Mirrors the `*Options`/`*Config` + `Default`
/// convention used throughout this crate.
#[derive(Clone)]
pub struct NetKernelOptions {
    pub host: String,
    pub port: u16,
    pub retry_ms: u64,
    pub max_retries: Option<u32>,
    pub tls: Option<TlsConfig>,
    /// When `true` (default), transport-level failures (bad HMAC,
    /// unparseable envelope, dead peer) are only observable via
    /// `subscribe()`'s `Skip`/`PeerDisconnected` signals, never returned
    /// to an unrelated caller.
    pub silent: bool,
}

impl Default for NetKernelOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_KERNEL_PORT,
            retry_ms: DEFAULT_RETRY_MS,
            max_retries: None,
            tls: None,
            silent: true,
        }
    }
}

/// Point-in-time introspection snapshot, backing the node binary's
/// `/status` endpoint.
#[derive(Debug, Clone)]
pub struct KernelStatus {
    pub self_node: Node,
    pub sinks: Vec<String>,
    pub sources: Vec<String>,
    pub handlers: Vec<String>,
}

#[derive(Debug)]
enum ReturnEvent {
    Chunk(Vec<u8>),
    Done,
    Error(EncodedError),
}

struct DispatchJob {
    handler: Arc<dyn Handler>,
    envelope: Envelope,
}

enum Command {
    Connect {
        node: Node,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        node: Node,
    },
    IsConnected {
        node: Node,
        reply: oneshot::Sender<bool>,
    },
    Connection {
        node: Node,
        reply: oneshot::Sender<Option<Connection>>,
    },
    RegisterHandler {
        name: String,
        handler: Arc<dyn Handler>,
        reply: oneshot::Sender<Result<(), KernelError>>,
    },
    UnregisterHandler {
        name: String,
    },
    SendFrame {
        node: Node,
        frame: Vec<u8>,
    },
    LocalFrame(Envelope),
    RegisterReturn {
        tag: String,
        tx: mpsc::UnboundedSender<ReturnEvent>,
    },
    UnregisterReturn {
        tag: String,
    },
    Status {
        reply: oneshot::Sender<KernelStatus>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running kernel. Cheap to clone; every clone talks to the
/// same background state task.
#[derive(Clone)]
pub struct NetKernel {
    self_node: Node,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cookie: Arc<RwLock<Option<String>>>,
    signals: broadcast::Sender<KernelSignal>,
}

impl NetKernel {
    /// Binds `options.host:options.port` and starts the background state
    /// and dispatch tasks. Binding happens before this future resolves, so
    /// a port conflict surfaces here rather than silently later.
    pub async fn start(self_node: Node, options: NetKernelOptions) -> Result<Self, KernelError> {
        let listener = TcpListener::bind((options.host.as_str(), options.port)).await?;
        let cookie = Arc::new(RwLock::new(None));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundFrame>();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<DispatchJob>();
        let (signal_tx, _) = broadcast::channel(1024);

        let kernel = Self {
            self_node: self_node.clone(),
            cmd_tx,
            cookie: cookie.clone(),
            signals: signal_tx.clone(),
        };

        tokio::spawn(dispatch_loop(dispatch_rx, kernel.clone()));
        tokio::spawn(accept_loop(
            listener,
            options.tls.clone(),
            inbound_tx.clone(),
        ));
        tokio::spawn(run_state(
            self_node,
            options,
            cmd_rx,
            inbound_rx,
            inbound_tx,
            dispatch_tx,
            cookie,
            signal_tx.clone(),
        ));

        let _ = signal_tx.send(KernelSignal::Ready);
        Ok(kernel)
    }

    pub fn self_node(&self) -> &Node {
        &self.self_node
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KernelSignal> {
        self.signals.subscribe()
    }

    /// Sets or clears the shared cookie used to HMAC-sign and verify every
    /// envelope. Takes effect immediately for subsequent sends/receives;
    /// reads the same shared cell the background task verifies against,
    /// so no round trip through the command channel is needed.
    pub fn cookie(&self, cookie: Option<String>) {
        *self.cookie.write() = cookie;
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.read().is_some()
    }

    pub async fn connect(&self, node: Node) -> Result<(), KernelError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { node, reply })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)
    }

    pub fn disconnect(&self, node: Node) -> Result<(), KernelError> {
        self.cmd_tx
            .send(Command::Disconnect { node })
            .map_err(|_| KernelError::NotRunning)
    }

    /// `true` for `self` (short-circuited: there is no `Connection` for the
    /// local node, but messages to self never touch a socket, so self is
    /// always considered reachable) or any peer with a live `Connection`.
    pub async fn is_connected(&self, node: Node) -> Result<bool, KernelError> {
        if node == self.self_node {
            return Ok(true);
        }
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::IsConnected { node, reply })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)
    }

    /// Returns the `Connection` handle for `node`, or `None` for `self` or
    /// a node this kernel has never `connect`ed to.
    pub async fn connection(&self, node: Node) -> Result<Option<Connection>, KernelError> {
        if node == self.self_node {
            return Ok(None);
        }
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connection { node, reply })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)
    }

    pub async fn status(&self) -> Result<KernelStatus, KernelError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { reply })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)
    }

    pub async fn register_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), KernelError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RegisterHandler {
                name: name.into(),
                handler,
                reply,
            })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)?
    }

    pub fn unregister_handler(&self, name: impl Into<String>) -> Result<(), KernelError> {
        self.cmd_tx
            .send(Command::UnregisterHandler { name: name.into() })
            .map_err(|_| KernelError::NotRunning)
    }

    /// Fire-and-forget send: no reply is expected.
    pub async fn cast(
        &self,
        node: &Node,
        id: &str,
        payload: impl Into<Payload>,
    ) -> Result<(), KernelError> {
        self.send_stream(node, id, None, payload.into()).await
    }

    /// `cast` to every node in `nodes`.
    pub async fn abcast(
        &self,
        nodes: &[Node],
        id: &str,
        payload: impl Into<Payload>,
    ) -> Result<(), KernelError> {
        let payload = payload.into();
        for node in nodes {
            self.send_stream(node, id, None, payload.clone()).await?;
        }
        Ok(())
    }

    /// Sends `payload` to `id` on `node` and waits for its reply stream to
    /// finish, aggregating every chunk. `None` timeout waits forever.
    pub async fn call(
        &self,
        node: &Node,
        id: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, KernelError> {
        let tag = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<ReturnEvent>();
        self.cmd_tx
            .send(Command::RegisterReturn {
                tag: tag.clone(),
                tx,
            })
            .map_err(|_| KernelError::NotRunning)?;

        let send_result = self
            .send_stream(node, id, Some(tag.clone()), payload.into())
            .await;
        if let Err(err) = send_result {
            let _ = self
                .cmd_tx
                .send(Command::UnregisterReturn { tag: tag.clone() });
            return Err(err);
        }

        let collect = async {
            let mut buf = Vec::new();
            loop {
                match rx.recv().await {
                    Some(ReturnEvent::Chunk(bytes)) => buf.extend_from_slice(&bytes),
                    Some(ReturnEvent::Done) => return Ok(buf),
                    Some(ReturnEvent::Error(source)) => {
                        return Err(KernelError::Remote {
                            peer: node.clone(),
                            source,
                        })
                    }
                    None => return Err(KernelError::NotRunning),
                }
            }
        };

        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, collect).await {
                Ok(r) => r,
                Err(_) => Err(KernelError::Timeout {
                    peer: node.clone(),
                    elapsed: d,
                }),
            },
            None => collect.await,
        };
        let _ = self.cmd_tx.send(Command::UnregisterReturn { tag });
        result
    }

    /// `call` to every node in `nodes`, run concurrently. Each node's
    /// outcome is reported independently; one failing node does not cancel
    /// the others.
    pub async fn multicall(
        &self,
        nodes: &[Node],
        id: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Vec<Result<Vec<u8>, KernelError>> {
        let payload = payload.into();
        let futs = nodes
            .iter()
            .map(|node| self.call(node, id, payload.clone(), timeout));
        futures::future::join_all(futs).await
    }

    /// Replies to a `call`, addressing the response by the tag the caller
    /// registered. Errors if `target.tag` is `None` — the original send
    /// was a `cast`, which has no return route.
    pub async fn reply(
        &self,
        target: &ReplyTarget,
        payload: impl Into<Payload>,
    ) -> Result<(), KernelError> {
        let tag = target.tag.clone().ok_or(KernelError::ReplyWithoutTag)?;
        self.send_stream(&target.node, &tag, None, payload.into())
            .await
    }

    /// Terminates `target`'s stream with an error descriptor instead of
    /// data — used by a `GenServer` reassembly timeout and by any upstream
    /// producer that needs to fail a stream already in flight.
    pub async fn reply_error(
        &self,
        target: &ReplyTarget,
        error: EncodedError,
    ) -> Result<(), KernelError> {
        let tag = target.tag.clone().ok_or(KernelError::ReplyWithoutTag)?;
        self.send_error_stream(&target.node, &tag, error).await
    }

    async fn send_error_stream(
        &self,
        node: &Node,
        id: &str,
        error: EncodedError,
    ) -> Result<(), KernelError> {
        let cookie = self.cookie.read().clone();
        let stream_id = Uuid::new_v4().to_string();
        let mut env = Envelope::new(
            id.to_string(),
            self.self_node.clone(),
            StreamDesc::fail(stream_id, error),
        );
        if let Some(cookie) = &cookie {
            sign_envelope_in_place(&mut env, cookie)?;
        }
        if node == &self.self_node {
            self.cmd_tx
                .send(Command::LocalFrame(env))
                .map_err(|_| KernelError::NotRunning)?;
        } else {
            let frame = serde_json::to_vec(&env)?;
            self.cmd_tx
                .send(Command::SendFrame {
                    node: node.clone(),
                    frame,
                })
                .map_err(|_| KernelError::NotRunning)?;
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), KernelError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { reply })
            .map_err(|_| KernelError::NotRunning)?;
        rx.await.map_err(|_| KernelError::NotRunning)
    }

    async fn send_stream(
        &self,
        node: &Node,
        id: &str,
        tag: Option<String>,
        payload: Payload,
    ) -> Result<(), KernelError> {
        let cookie = self.cookie.read().clone();
        let envelopes = build_envelopes(id, &self.self_node, tag.as_deref(), payload);
        let local = node == &self.self_node;
        for mut env in envelopes {
            if let Some(cookie) = &cookie {
                sign_envelope_in_place(&mut env, cookie)?;
            }
            if local {
                self.cmd_tx
                    .send(Command::LocalFrame(env))
                    .map_err(|_| KernelError::NotRunning)?;
            } else {
                let frame = serde_json::to_vec(&env)?;
                self.cmd_tx
                    .send(Command::SendFrame {
                        node: node.clone(),
                        frame,
                    })
                    .map_err(|_| KernelError::NotRunning)?;
            }
        }
        Ok(())
    }
}

fn sign_envelope_in_place(env: &mut Envelope, cookie: &str) -> Result<(), KernelError> {
    env.check_sum = None;
    let body = serde_json::to_vec(&*env)?;
    env.check_sum = Some(sign_envelope(cookie, &body)?);
    Ok(())
}

/// Splits `payload` into the chunk/done pairs a stream sender emits: a
/// single `Bytes`/`Text` payload is one `done: true` frame carrying the
/// data; a `Chunks` payload is each chunk as `done: false` followed by an
/// empty `done: true` terminator.
fn split_payload(payload: Payload) -> Vec<(Vec<u8>, bool)> {
    match payload {
        Payload::Bytes(b) => vec![(b, true)],
        Payload::Text(s) => vec![(s.into_bytes(), true)],
        Payload::Chunks(chunks) => {
            if chunks.is_empty() {
                vec![(Vec::new(), true)]
            } else {
                let mut out: Vec<(Vec<u8>, bool)> =
                    chunks.into_iter().map(|c| (c, false)).collect();
                out.push((Vec::new(), true));
                out
            }
        }
    }
}

fn build_envelopes(id: &str, from: &Node, tag: Option<&str>, payload: Payload) -> Vec<Envelope> {
    let stream_id = Uuid::new_v4().to_string();
    split_payload(payload)
        .into_iter()
        .map(|(data, done)| {
            let desc = if done {
                StreamDesc::finish(stream_id.clone())
            } else {
                StreamDesc::chunk(stream_id.clone())
            };
            let mut env = Envelope::new(id.to_string(), from.clone(), desc).with_data(data);
            if let Some(tag) = tag {
                env = env.with_tag(tag.to_string());
            }
            env
        })
        .collect()
}

struct KernelState {
    self_node: Node,
    options: NetKernelOptions,
    cookie: Arc<RwLock<Option<String>>>,
    sinks: HashMap<String, Connection>,
    sources: HashMap<String, Node>,
    handlers: HashMap<String, Arc<dyn Handler>>,
    pending_calls: HashMap<String, mpsc::UnboundedSender<ReturnEvent>>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    dispatch_tx: mpsc::UnboundedSender<DispatchJob>,
    signals: broadcast::Sender<KernelSignal>,
}

impl KernelState {
    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            retry_ms: self.options.retry_ms,
            max_retries: self.options.max_retries,
            tls: self.options.tls.clone(),
        }
    }

    fn sink_for(&mut self, node: &Node) -> &Connection {
        if !self.sinks.contains_key(&node.id) {
            let opts = self.connection_options();
            let conn = Connection::spawn(node.clone(), opts, self.inbound_tx.clone());
            self.sinks.insert(node.id.clone(), conn);
            let _ = self.signals.send(KernelSignal::PeerConnected {
                node: node.clone(),
            });
        }
        self.sinks.get(&node.id).expect("just inserted")
    }

    fn verify(&self, env: &Envelope) -> Result<(), HmacError> {
        let Some(cookie) = self.cookie.read().clone() else {
            return Ok(());
        };
        let sent = env.check_sum.as_deref().ok_or(HmacError::Missing)?;
        let mut stripped = env.clone();
        stripped.check_sum = None;
        let body = serde_json::to_vec(&stripped).unwrap_or_default();
        verify_envelope(&cookie, &body, sent)
    }

    fn route_envelope(&mut self, env: Envelope) {
        if env.from != self.self_node {
            self.sources
                .entry(env.from.id.clone())
                .or_insert_with(|| env.from.clone());
        }

        if let Some(tx) = self.pending_calls.get(&env.id) {
            if let Some(err) = env.stream.error.clone() {
                let _ = tx.send(ReturnEvent::Error(err));
            } else {
                if let Some(data) = &env.data {
                    let _ = tx.send(ReturnEvent::Chunk(data.0.clone()));
                }
                if env.stream.done {
                    let _ = tx.send(ReturnEvent::Done);
                }
            }
            return;
        }

        if let Some(handler) = self.handlers.get(&env.id).cloned() {
            let _ = self.dispatch_tx.send(DispatchJob {
                handler,
                envelope: env,
            });
            return;
        }

        trace!(id = %env.id, "dropping envelope with no handler or pending call");
        let bytes = serde_json::to_vec(&env).unwrap_or_default();
        let _ = self.signals.send(KernelSignal::Skip {
            bytes,
            reason: format!("no handler or pending call registered for id {:?}", env.id),
        });
    }

    fn handle_inbound_raw(&mut self, frame: InboundFrame) {
        let env: Envelope = match serde_json::from_slice(&frame.bytes) {
            Ok(env) => env,
            Err(err) => {
                let _ = self.signals.send(KernelSignal::Skip {
                    bytes: frame.bytes,
                    reason: format!("invalid envelope json: {err}"),
                });
                return;
            }
        };
        if let Err(err) = self.verify(&env) {
            let _ = self.signals.send(KernelSignal::Skip {
                bytes: frame.bytes,
                reason: format!("hmac verification failed: {err}"),
            });
            return;
        }
        self.route_envelope(env);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { node, reply } => {
                if node != self.self_node {
                    let _ = self.sink_for(&node);
                }
                let _ = reply.send(());
            }
            Command::Disconnect { node } => {
                if let Some(conn) = self.sinks.remove(&node.id) {
                    conn.close();
                    let _ = self.signals.send(KernelSignal::PeerDisconnected { node });
                }
            }
            Command::IsConnected { node, reply } => {
                let connected = self
                    .sinks
                    .get(&node.id)
                    .is_some_and(Connection::is_connected);
                let _ = reply.send(connected);
            }
            Command::Connection { node, reply } => {
                let _ = reply.send(self.sinks.get(&node.id).cloned());
            }
            Command::RegisterHandler {
                name,
                handler,
                reply,
            } => {
                let result = if self.handlers.contains_key(&name) {
                    Err(KernelError::HandlerAlreadyRegistered(name))
                } else {
                    self.handlers.insert(name, handler);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::UnregisterHandler { name } => {
                self.handlers.remove(&name);
            }
            Command::SendFrame { node, frame } => {
                self.sink_for(&node).send(Bytes::from(frame));
            }
            Command::LocalFrame(env) => self.route_envelope(env),
            Command::RegisterReturn { tag, tx } => {
                self.pending_calls.insert(tag, tx);
            }
            Command::UnregisterReturn { tag } => {
                self.pending_calls.remove(&tag);
            }
            Command::Status { reply } => {
                let status = KernelStatus {
                    self_node: self.self_node.clone(),
                    sinks: self.sinks.keys().cloned().collect(),
                    sources: self.sources.keys().cloned().collect(),
                    handlers: self.handlers.keys().cloned().collect(),
                };
                let _ = reply.send(status);
            }
            Command::Stop { reply } => {
                for (_, conn) in self.sinks.drain() {
                    conn.close();
                }
                self.handlers.clear();
                self.pending_calls.clear();
                let _ = self.signals.send(KernelSignal::Stop);
                let _ = reply.send(());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_state(
    self_node: Node,
    options: NetKernelOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundFrame>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    dispatch_tx: mpsc::UnboundedSender<DispatchJob>,
    cookie: Arc<RwLock<Option<String>>>,
    signals: broadcast::Sender<KernelSignal>,
) {
    let mut state = KernelState {
        self_node,
        options,
        cookie,
        sinks: HashMap::new(),
        sources: HashMap::new(),
        handlers: HashMap::new(),
        pending_calls: HashMap::new(),
        inbound_tx,
        dispatch_tx,
        signals: signals.clone(),
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => state.handle_command(cmd).await,
                None => break,
            },
            frame = inbound_rx.recv() => match frame {
                Some(frame) => state.handle_inbound_raw(frame),
                None => {}
            }
        }
    }

    let _ = signals.send(KernelSignal::Stopped);
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<DispatchJob>, kernel: NetKernel) {
    while let Some(job) = rx.recv().await {
        job.handler.deliver(job.envelope, kernel.clone()).await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsConfig>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept() failed");
                continue;
            }
        };
        let tls = tls.clone();
        let inbound_tx = inbound_tx.clone();
        tokio::spawn(async move {
            let socket = match crate::transport::tls::accept(stream, tls.as_ref()).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(%err, %peer_addr, "TLS accept failed");
                    return;
                }
            };
            let mut framed = connection::codec(socket);
            // The remote's listening `Node` identity isn't known until its
            // first envelope is parsed (its `from` carries the real id and
            // advertised port, not this inbound socket's ephemeral one);
            // this placeholder only labels frames for routing bookkeeping.
            let placeholder = Node::new(peer_addr.to_string(), peer_addr.ip().to_string(), peer_addr.port());
            loop {
                match framed.next().await {
                    Some(Ok(bytes)) => {
                        let frame = InboundFrame {
                            peer: placeholder.clone(),
                            bytes: bytes.to_vec(),
                        };
                        if inbound_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        debug!(%err, %peer_addr, "inbound read error");
                        break;
                    }
                    None => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_payload_single_buffer_is_one_done_frame() {
        let frames = split_payload(Payload::Bytes(vec![1, 2, 3]));
        assert_eq!(frames, vec![(vec![1, 2, 3], true)]);
    }

    #[test]
    fn split_payload_chunks_appends_empty_terminator() {
        let frames = split_payload(Payload::Chunks(vec![vec![1], vec![2]]));
        assert_eq!(
            frames,
            vec![(vec![1], false), (vec![2], false), (vec![], true)]
        );
    }

    #[test]
    fn split_payload_empty_chunks_is_one_done_frame() {
        let frames = split_payload(Payload::Chunks(vec![]));
        assert_eq!(frames, vec![(vec![], true)]);
    }

    #[test]
    fn build_envelopes_carries_tag_onto_every_frame() {
        let from = Node::new("a", "127.0.0.1", 9000);
        let envs = build_envelopes("h", &from, Some("tag-1"), Payload::Chunks(vec![vec![1]]));
        assert_eq!(envs.len(), 2);
        assert!(envs.iter().all(|e| e.tag.as_deref() == Some("tag-1")));
        assert!(!envs[0].stream.done);
        assert!(envs[1].stream.done);
    }

    async fn local_kernel() -> NetKernel {
        let node = Node::new(Uuid::new_v4().to_string(), "127.0.0.1", 0);
        let mut opts = NetKernelOptions::default();
        opts.port = 0;
        NetKernel::start(node, opts).await.unwrap()
    }

    #[tokio::test]
    async fn self_is_always_considered_connected() {
        let kernel = local_kernel().await;
        let me = kernel.self_node().clone();
        assert!(kernel.is_connected(me).await.unwrap());
    }

    #[tokio::test]
    async fn connect_to_self_leaves_sinks_unchanged() {
        let kernel = local_kernel().await;
        let me = kernel.self_node().clone();
        kernel.connect(me.clone()).await.unwrap();
        let status = kernel.status().await.unwrap();
        assert!(status.sinks.is_empty());
        assert!(kernel.connection(me).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_disconnect_clears_sink() {
        let kernel = local_kernel().await;
        let peer = Node::new(Uuid::new_v4().to_string(), "127.0.0.1", 65500);
        kernel.connect(peer.clone()).await.unwrap();
        kernel.connect(peer.clone()).await.unwrap();
        let status = kernel.status().await.unwrap();
        assert_eq!(status.sinks, vec![peer.id.clone()]);
        assert!(kernel.connection(peer.clone()).await.unwrap().is_some());

        kernel.disconnect(peer.clone()).unwrap();
        tokio::task::yield_now().await;
        let status = kernel.status().await.unwrap();
        assert!(status.sinks.is_empty());
    }

    #[tokio::test]
    async fn call_to_unknown_handler_times_out_and_clears_pending_call() {
        let kernel = local_kernel().await;
        let me = kernel.self_node().clone();
        let result = kernel
            .call(&me, "no-such-handler", Payload::Text("hi".into()), Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(KernelError::Timeout { .. })));
    }
}
