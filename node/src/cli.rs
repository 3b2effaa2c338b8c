//! # CLI Interface
//!
//! Defines the command-line argument structure for `ringkernel-node`
//! using `clap` derive. Supports two subcommands: `run` and `version`.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// RingKernel cluster node.
#[derive(Parser, Debug)]
#[command(
    name = "ringkernel-node",
    about = "RingKernel cluster node",
    version,
    propagate_version = true
)]
pub struct RingNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the cluster node.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Host the kernel listener binds to.
    #[arg(long, env = "RING_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the kernel listener binds to.
    #[arg(long, env = "RING_PORT", default_value_t = ringkernel_core::config::DEFAULT_KERNEL_PORT)]
    pub port: u16,

    /// Ring identifier this node joins. Every node in a cluster must
    /// agree on this value.
    #[arg(long, env = "RING_ID")]
    pub ring_id: String,

    /// Shared cookie used to HMAC-sign and verify envelopes. Nodes
    /// without a matching cookie are silently ignored by a strict peer.
    #[arg(long, env = "RING_COOKIE")]
    pub cookie: Option<String>,

    /// A `host:port` of an existing cluster member to join through.
    /// Omit to bootstrap a brand-new single-node ring.
    #[arg(long, value_name = "HOST:PORT")]
    pub meet: Option<SocketAddr>,

    /// Path to persist (and restore) the ring snapshot. Omit to run
    /// without persistence.
    #[arg(long, env = "RING_FLUSH_PATH")]
    pub flush_path: Option<std::path::PathBuf>,

    /// Port the Prometheus `/metrics` and introspection HTTP API bind to.
    #[arg(long, env = "RING_METRICS_PORT", default_value_t = ringkernel_core::config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Default log level when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        RingNodeCli::command().debug_assert();
    }
}
