//! # Handler Registration
//!
//! A `NetKernel` dispatches every inbound envelope that isn't a pending
//! call's return to a handler registered under the envelope's `id`. A
//! [`GenServer`](crate::genserver::GenServer) is the only implementation of
//! [`Handler`] in this crate, but the trait is the seam: anything that can
//! reassemble a stream and react to it can register.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::identity::Node;
use crate::transport::kernel::NetKernel;

/// Where a `reply()` addresses its response: the envelope's `from` node and
/// its `tag`, if the original send was a `call` rather than a `cast`.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    pub node: Node,
    pub tag: Option<String>,
}

impl ReplyTarget {
    pub fn new(node: Node, tag: Option<String>) -> Self {
        Self { node, tag }
    }

    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            node: envelope.from.clone(),
            tag: envelope.tag.clone(),
        }
    }
}

/// A named subscriber in a `NetKernel`'s handler registry.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Delivers one raw inbound envelope belonging to this handler's name.
    /// Implementations are responsible for their own stream reassembly;
    /// the kernel guarantees only that envelopes from the same `Connection`
    /// arrive in send order.
    async fn deliver(&self, envelope: Envelope, kernel: NetKernel);
}
