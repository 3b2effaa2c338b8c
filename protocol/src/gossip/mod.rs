//! # Gossip
//!
//! Membership and routing, built on [`crate::genserver::GenServer`].

pub mod ring;

pub use ring::{GossipConfig, GossipError, GossipRing, RingSignal, RingStatus};
