//! # ClusterNode
//!
//! Thin façade binding a [`NetKernel`] and a [`GossipRing`]. Owns both;
//! the ring holds only a non-owning clone of the kernel, so there is no
//! cyclic reference between the two.

use thiserror::Error;

use crate::gossip::ring::{GossipConfig, GossipError, GossipRing};
use crate::identity::Node;
use crate::transport::kernel::{KernelError, NetKernel, NetKernelOptions};

#[derive(Debug, Error)]
pub enum ClusterNodeError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Gossip(#[from] GossipError),
    #[error("loaded ring id {loaded:?} does not match requested ring id {requested:?}")]
    RingIdMismatch {
        loaded: Option<String>,
        requested: String,
    },
}

/// A running node: its kernel and its ring.
#[derive(Clone)]
pub struct ClusterNode {
    kernel: NetKernel,
    ring: GossipRing,
}

impl ClusterNode {
    /// Binds the kernel's listener. The ring is idle until [`Self::start`].
    pub async fn bind(self_node: Node, kernel_opts: NetKernelOptions, gossip_opts: GossipConfig) -> Result<Self, ClusterNodeError> {
        let kernel = NetKernel::start(self_node, kernel_opts).await?;
        let ring = GossipRing::new(kernel.clone(), gossip_opts);
        Ok(Self { kernel, ring })
    }

    pub fn kernel(&self) -> &NetKernel {
        &self.kernel
    }

    pub fn ring(&self) -> &GossipRing {
        &self.ring
    }

    /// Loads the ring's persisted snapshot (if any), then connects to
    /// every peer it names. A missing snapshot is not an error.
    pub async fn load(&self) -> Result<(), ClusterNodeError> {
        self.ring.load().await?;
        let self_node = self.kernel.self_node().clone();
        for node in self.ring.status().members {
            if node != self_node {
                self.kernel.connect(node).await?;
            }
        }
        Ok(())
    }

    /// Sets the kernel cookie and joins `ring_id`. Fails synchronously if
    /// a loaded ring's id disagrees with `ring_id` — loading a snapshot
    /// from a different ring is a deployment mistake, not something to
    /// silently paper over.
    pub async fn start(
        &self,
        cookie: Option<String>,
        ring_id: impl Into<String>,
    ) -> Result<(), ClusterNodeError> {
        let ring_id = ring_id.into();
        if let Some(loaded) = self.ring.status().ring_id {
            if loaded != ring_id {
                return Err(ClusterNodeError::RingIdMismatch {
                    loaded: Some(loaded),
                    requested: ring_id,
                });
            }
        }
        self.kernel.cookie(cookie);
        self.ring.start(ring_id).await?;
        Ok(())
    }

    pub async fn meet(&self, seed: Node) -> Result<(), ClusterNodeError> {
        self.ring.meet(seed).await?;
        Ok(())
    }

    pub async fn stop(&self, force: bool) -> Result<(), ClusterNodeError> {
        self.ring.stop(force).await?;
        self.kernel.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node() -> Node {
        Node::new(Uuid::new_v4().to_string(), "127.0.0.1", 0)
    }

    async fn bound() -> ClusterNode {
        let mut opts = NetKernelOptions::default();
        opts.port = 0;
        ClusterNode::bind(node(), opts, GossipConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn load_on_fresh_node_is_a_noop() {
        let node = bound().await;
        node.load().await.unwrap();
        assert_eq!(node.ring().status().size, 0);
    }

    #[tokio::test]
    async fn start_joins_requested_ring() {
        let node = bound().await;
        node.start(Some("cookie".to_string()), "ring-a").await.unwrap();
        assert_eq!(node.ring().status().ring_id.as_deref(), Some("ring-a"));
        assert!(node.kernel().has_cookie());
        // self is always a member of its own ring once started
        assert_eq!(node.ring().status().size, 1);
        assert!(node.ring().status().members.contains(node.kernel().self_node()));
    }
}
