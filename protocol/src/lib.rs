// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RingKernel Core
//!
//! The process-to-process clustering substrate: a message router, a
//! named-handler pattern on top of it, and a gossip-driven membership
//! ring, plus a worked example consumer.
//!
//! ## Architecture
//!
//! - **transport** — [`transport::kernel::NetKernel`], the message
//!   router. Owns one socket per known peer, authenticates envelopes
//!   with HMAC-SHA256, and dispatches inbound frames to registered
//!   handlers.
//! - **genserver** — [`genserver::GenServer`], a named handler that
//!   turns the kernel's raw chunked byte streams into `(event, data)`
//!   pairs.
//! - **gossip** — [`gossip::ring::GossipRing`], a consistent-hash ring
//!   kept eventually consistent by anti-entropy gossip, addressed
//!   through a `GenServer`.
//! - **cluster** — [`cluster::ClusterNode`], the façade that composes a
//!   kernel and a ring into one lifecycle.
//! - **dlm** — [`dlm::Dlm`], a distributed lock manager built on the
//!   above as a worked example consumer.
//! - **envelope**, **identity**, **chash**, **vclock**, **queue** — the
//!   data model these components share.
//! - **crypto** — hashing (BLAKE3, SHA-256) and envelope HMAC.
//! - **config** — wire protocol constants and defaults.

pub mod chash;
pub mod cluster;
pub mod config;
pub mod crypto;
pub mod dlm;
pub mod envelope;
pub mod genserver;
pub mod gossip;
pub mod identity;
pub mod queue;
pub mod transport;
pub mod vclock;
