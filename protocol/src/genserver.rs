//! # GenServer
//!
//! A named, long-lived handler that sits on a [`NetKernel`] and turns its
//! raw envelope stream into `(event, data, from)` triples for user code.
//! Multi-chunk sends are reassembled into one buffer per stream-uuid,
//! parsed as a JSON `{event, data}` object once the stream reaches
//! `done`, and emitted on [`GenServer::subscribe`]. [`crate::gossip::ring::GossipRing`]
//! and [`crate::dlm::Dlm`] are both built on top of this.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

use crate::envelope::{EncodedError, Envelope, Payload};
use crate::identity::Node;
use crate::transport::handler::{Handler, ReplyTarget};
use crate::transport::kernel::{KernelError, NetKernel};

#[derive(Debug, Error)]
pub enum GenServerError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("event payload (de)serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Signals a [`GenServer`] emits over its lifetime. Mirrors
/// `transport::signals::KernelSignal`'s broadcast-channel design.
#[derive(Debug, Clone)]
pub enum GenServerSignal {
    Ready { name: String },
    Stop,
    Pause,
    Resume,
    /// No streams are currently being reassembled.
    Idle,
    /// One stream finished reassembling into a user event.
    Event {
        event: String,
        data: serde_json::Value,
        from: ReplyTarget,
    },
}

#[derive(Serialize, Deserialize)]
struct EventPayload {
    event: String,
    data: serde_json::Value,
}

/// Recursively replaces `{"type":"Buffer","data":[...]}` objects anywhere
/// inside `value` with the bare byte array, so a handler's `data` need not
/// know about the wire's tagged-buffer convention for nested binary values.
fn decode_embedded_buffers(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let is_buffer = matches!(map.get("type"), Some(serde_json::Value::String(t)) if t == "Buffer")
                && matches!(map.get("data"), Some(serde_json::Value::Array(_)));
            if is_buffer {
                if let Some(serde_json::Value::Array(data)) = map.remove("data") {
                    *value = serde_json::Value::Array(data);
                }
                return;
            }
            for v in map.values_mut() {
                decode_embedded_buffers(v);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items.iter_mut() {
                decode_embedded_buffers(v);
            }
        }
        _ => {}
    }
}

struct PendingStream {
    buf: Vec<u8>,
    from: ReplyTarget,
    timeout: JoinHandle<()>,
}

struct GenServerState {
    name: Option<String>,
    paused: bool,
    streams: HashMap<String, PendingStream>,
}

/// A named handler on a `NetKernel`. Cheap to clone — every clone shares
/// the same reassembly state and signal channel.
#[derive(Clone)]
pub struct GenServer {
    kernel: NetKernel,
    stream_timeout: Duration,
    signals: broadcast::Sender<GenServerSignal>,
    state: Arc<Mutex<GenServerState>>,
    generated_id: Arc<Mutex<String>>,
}

impl GenServer {
    pub fn new(kernel: NetKernel, stream_timeout: Duration) -> Self {
        let (signals, _) = broadcast::channel(256);
        Self {
            kernel,
            stream_timeout,
            signals,
            state: Arc::new(Mutex::new(GenServerState {
                name: None,
                paused: false,
                streams: HashMap::new(),
            })),
            generated_id: Arc::new(Mutex::new(Uuid::new_v4().to_string())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenServerSignal> {
        self.signals.subscribe()
    }

    pub fn name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    pub fn idle(&self) -> bool {
        self.state.lock().streams.is_empty()
    }

    /// Registers this instance on the kernel at `name`, or at a generated
    /// id if `name` is `None`. Fails if the kernel already has a listener
    /// at that name.
    pub async fn start(&self, name: Option<String>) -> Result<String, GenServerError> {
        let name = name.unwrap_or_else(|| self.generated_id.lock().clone());
        let handler: Arc<dyn Handler> = Arc::new(self.clone());
        self.kernel.register_handler(name.clone(), handler).await?;
        self.state.lock().name = Some(name.clone());
        let _ = self.signals.send(GenServerSignal::Ready { name: name.clone() });
        Ok(name)
    }

    /// Pauses, emits `stop`, cancels every in-flight stream's timeout and
    /// discards its buffer, then regenerates this instance's default id
    /// so a subsequent `start(None)` doesn't collide with the old name.
    pub fn stop(&self, _force: bool) -> Result<(), GenServerError> {
        self.pause()?;
        let _ = self.signals.send(GenServerSignal::Stop);
        let mut state = self.state.lock();
        for (_, pending) in state.streams.drain() {
            pending.timeout.abort();
        }
        state.name = None;
        drop(state);
        *self.generated_id.lock() = Uuid::new_v4().to_string();
        Ok(())
    }

    /// Unregisters the handler from the kernel; inbound chunks are
    /// dropped (observable only as the kernel's own `Skip` signal, since
    /// there's no handler left to deliver to) until `resume()`.
    pub fn pause(&self) -> Result<(), GenServerError> {
        let name = self.state.lock().name.clone();
        if let Some(name) = name {
            self.kernel.unregister_handler(name)?;
        }
        self.state.lock().paused = true;
        let _ = self.signals.send(GenServerSignal::Pause);
        Ok(())
    }

    /// Re-registers at the same name this instance was last started with.
    pub async fn resume(&self) -> Result<(), GenServerError> {
        let name = self.state.lock().name.clone();
        if let Some(name) = name {
            let handler: Arc<dyn Handler> = Arc::new(self.clone());
            self.kernel.register_handler(name, handler).await?;
        }
        self.state.lock().paused = false;
        let _ = self.signals.send(GenServerSignal::Resume);
        Ok(())
    }

    fn spawn_timeout(&self, stream_id: String, from: ReplyTarget) -> JoinHandle<()> {
        let state = self.state.clone();
        let kernel = self.kernel.clone();
        let signals = self.signals.clone();
        let dur = self.stream_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(dur).await;
            let was_pending = state.lock().streams.remove(&stream_id).is_some();
            if !was_pending {
                return;
            }
            if from.tag.is_some() {
                let _ = kernel
                    .reply_error(&from, EncodedError::new("stream reassembly timed out"))
                    .await;
            }
            if state.lock().streams.is_empty() {
                let _ = signals.send(GenServerSignal::Idle);
            }
        })
    }

    fn finish_stream(&self, buf: Vec<u8>, from: ReplyTarget) {
        match serde_json::from_slice::<EventPayload>(&buf) {
            Ok(mut payload) => {
                decode_embedded_buffers(&mut payload.data);
                let _ = self.signals.send(GenServerSignal::Event {
                    event: payload.event,
                    data: payload.data,
                    from,
                });
            }
            Err(err) => {
                trace!(%err, "dropping genserver stream: payload is not a valid {{event,data}} object");
            }
        }
    }

    fn maybe_emit_idle(&self) {
        if self.state.lock().streams.is_empty() {
            let _ = self.signals.send(GenServerSignal::Idle);
        }
    }

    // -- thin wrappers over NetKernel, JSON-encoding {event, data} --

    pub async fn cast(
        &self,
        node: &Node,
        target: &str,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), GenServerError> {
        let body = serde_json::to_vec(&EventPayload {
            event: event.into(),
            data,
        })?;
        self.kernel.cast(node, target, Payload::Bytes(body)).await?;
        Ok(())
    }

    pub async fn abcast(
        &self,
        nodes: &[Node],
        target: &str,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), GenServerError> {
        let body = serde_json::to_vec(&EventPayload {
            event: event.into(),
            data,
        })?;
        self.kernel.abcast(nodes, target, Payload::Bytes(body)).await?;
        Ok(())
    }

    pub async fn call(
        &self,
        node: &Node,
        target: &str,
        event: impl Into<String>,
        data: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<(String, serde_json::Value), GenServerError> {
        let body = serde_json::to_vec(&EventPayload {
            event: event.into(),
            data,
        })?;
        let reply = self
            .kernel
            .call(node, target, Payload::Bytes(body), timeout)
            .await?;
        let mut payload: EventPayload = serde_json::from_slice(&reply)?;
        decode_embedded_buffers(&mut payload.data);
        Ok((payload.event, payload.data))
    }

    pub async fn multicall(
        &self,
        nodes: &[Node],
        target: &str,
        event: impl Into<String>,
        data: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Vec<Result<(String, serde_json::Value), GenServerError>> {
        let event = event.into();
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(self.call(node, target, event.clone(), data.clone(), timeout).await);
        }
        out
    }

    pub async fn reply(
        &self,
        target: &ReplyTarget,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), GenServerError> {
        let body = serde_json::to_vec(&EventPayload {
            event: event.into(),
            data,
        })?;
        self.kernel.reply(target, Payload::Bytes(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for GenServer {
    async fn deliver(&self, envelope: Envelope, _kernel: NetKernel) {
        if self.state.lock().paused {
            return;
        }

        let stream_id = envelope.stream.stream.clone();
        let is_new_stream = !self.state.lock().streams.contains_key(&stream_id);

        // Singleton fast path: the entire message arrived in one frame.
        if is_new_stream && envelope.stream.done && envelope.stream.error.is_none() {
            self.finish_stream(
                envelope.data_bytes().to_vec(),
                ReplyTarget::from_envelope(&envelope),
            );
            return;
        }

        if envelope.stream.error.is_some() {
            let removed = self.state.lock().streams.remove(&stream_id);
            if let Some(pending) = removed {
                pending.timeout.abort();
            }
            self.maybe_emit_idle();
            return;
        }

        if is_new_stream {
            let from = ReplyTarget::from_envelope(&envelope);
            let timeout = self.spawn_timeout(stream_id.clone(), from.clone());
            self.state.lock().streams.insert(
                stream_id.clone(),
                PendingStream {
                    buf: Vec::new(),
                    from,
                    timeout,
                },
            );
        }

        {
            let mut state = self.state.lock();
            if let Some(pending) = state.streams.get_mut(&stream_id) {
                pending.buf.extend_from_slice(envelope.data_bytes());
            }
        }

        if envelope.stream.done {
            let finished = self.state.lock().streams.remove(&stream_id);
            if let Some(pending) = finished {
                pending.timeout.abort();
                self.finish_stream(pending.buf, pending.from);
            }
            self.maybe_emit_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Node;
    use crate::transport::kernel::NetKernelOptions;
    use std::time::Duration as StdDuration;

    async fn local_kernel() -> NetKernel {
        let node = Node::new(Uuid::new_v4().to_string(), "127.0.0.1", 0);
        let mut opts = NetKernelOptions::default();
        opts.port = 0;
        NetKernel::start(node, opts).await.unwrap()
    }

    #[tokio::test]
    async fn singleton_cast_is_reassembled_without_buffering() {
        let kernel = local_kernel().await;
        let gs = GenServer::new(kernel.clone(), StdDuration::from_secs(5));
        gs.start(Some("s".to_string())).await.unwrap();
        let mut rx = gs.subscribe();

        let me = kernel.self_node().clone();
        gs.cast(&me, "s", "ping", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let signal = rx.recv().await.unwrap();
        match signal {
            GenServerSignal::Event { event, data, .. } => {
                assert_eq!(event, "ping");
                assert_eq!(data, serde_json::json!({"n": 1}));
            }
            other => panic!("expected Event, got {other:?}"),
        }
        assert!(gs.idle());
    }

    #[tokio::test]
    async fn multi_chunk_stream_reassembles_in_order() {
        let kernel = local_kernel().await;
        let gs = GenServer::new(kernel.clone(), StdDuration::from_secs(5));
        gs.start(Some("s".to_string())).await.unwrap();
        let mut rx = gs.subscribe();

        let body = serde_json::to_vec(&EventPayload {
            event: "big".to_string(),
            data: serde_json::json!("hello world"),
        })
        .unwrap();
        let mid = body.len() / 2;
        let chunks = vec![body[..mid].to_vec(), body[mid..].to_vec()];

        let me = kernel.self_node().clone();
        kernel
            .cast(&me, "s", Payload::Chunks(chunks))
            .await
            .unwrap();

        let signal = rx.recv().await.unwrap();
        match signal {
            GenServerSignal::Event { event, data, .. } => {
                assert_eq!(event, "big");
                assert_eq!(data, serde_json::json!("hello world"));
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_twice_at_same_name_fails() {
        let kernel = local_kernel().await;
        let a = GenServer::new(kernel.clone(), StdDuration::from_secs(5));
        let b = GenServer::new(kernel.clone(), StdDuration::from_secs(5));
        a.start(Some("dup".to_string())).await.unwrap();
        assert!(b.start(Some("dup".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn stop_clears_streams_and_unregisters() {
        let kernel = local_kernel().await;
        let gs = GenServer::new(kernel.clone(), StdDuration::from_secs(5));
        gs.start(Some("s".to_string())).await.unwrap();
        gs.stop(false).unwrap();
        assert!(gs.idle());
        assert!(gs.name().is_none());

        let status = kernel.status().await.unwrap();
        assert!(!status.handlers.contains(&"s".to_string()));
    }

    #[tokio::test]
    async fn decode_embedded_buffers_strips_tag() {
        let mut value = serde_json::json!({"blob": {"type": "Buffer", "data": [1,2,3]}});
        decode_embedded_buffers(&mut value);
        assert_eq!(value, serde_json::json!({"blob": [1,2,3]}));
    }
}
