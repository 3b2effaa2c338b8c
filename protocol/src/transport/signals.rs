//! # Kernel Signals
//!
//! The source this crate is adapted from used an in-process event emitter
//! on every component. Re-architected per design notes as a typed
//! broadcast channel: each component exposes `subscribe()` returning a
//! `tokio::sync::broadcast::Receiver<Signal>`, and callers `match` on the
//! variant they care about instead of registering named listeners.

use crate::envelope::EncodedError;
use crate::identity::Node;

/// Signals a [`crate::transport::kernel::NetKernel`] emits over its lifetime.
#[derive(Debug, Clone)]
pub enum KernelSignal {
    /// The listener is bound and accepting connections.
    Ready,
    /// `stop()` was called; the listener and all connections are closing.
    Stop,
    /// The listener and all connections are closed, handler registry cleared.
    Stopped,
    /// An inbound envelope was dropped: bad HMAC, unparseable JSON, or an
    /// unknown handler id. Carries the raw bytes for observability.
    Skip { bytes: Vec<u8>, reason: String },
    /// A peer connection was established (outbound `connect`, or the first
    /// inbound message recorded it as a source).
    PeerConnected { node: Node },
    /// A peer connection was torn down.
    PeerDisconnected { node: Node },
}

/// Errors encountered while tearing down a `call`/`multicall` in flight,
/// surfaced to the caller as the return stream's terminal error. Carries
/// the same shape as an `EncodedError` so it can cross the wire if a
/// handler chooses to forward it.
#[derive(Debug, Clone)]
pub struct CallError(pub EncodedError);

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.message)
    }
}

impl std::error::Error for CallError {}
