// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RingKernel Node
//!
//! Entry point for the `ringkernel-node` binary. Parses CLI arguments,
//! initializes logging, binds a `ClusterNode`, optionally meets a seed
//! peer, and serves the introspection HTTP API and Prometheus metrics
//! endpoint until a shutdown signal arrives.
//!
//! The binary supports two subcommands:
//!
//! - `run`     — start the cluster node
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use ringkernel_core::cluster::ClusterNode;
use ringkernel_core::gossip::ring::GossipConfig;
use ringkernel_core::identity::Node;
use ringkernel_core::transport::kernel::NetKernelOptions;

use cli::{Commands, RingNodeCli, RunArgs};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RingNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_node(args: RunArgs) -> Result<()> {
    let log_filter = format!(
        "ringkernel_node={level},ringkernel_core={level},tower_http=debug",
        level = args.log_level
    );
    logging::init_logging(&log_filter, LogFormat::Pretty);

    tracing::info!(
        host = %args.host,
        port = args.port,
        ring_id = %args.ring_id,
        meet = ?args.meet,
        metrics_port = args.metrics_port,
        "starting ringkernel-node"
    );

    let self_node = Node::new(uuid::Uuid::new_v4().to_string(), args.host.clone(), args.port);

    let kernel_opts = NetKernelOptions {
        host: args.host.clone(),
        port: args.port,
        ..NetKernelOptions::default()
    };
    let gossip_opts = GossipConfig {
        flush_path: args.flush_path.clone(),
        ..GossipConfig::default()
    };

    let cluster = ClusterNode::bind(self_node.clone(), kernel_opts, gossip_opts)
        .await
        .context("failed to bind kernel listener")?;

    cluster
        .load()
        .await
        .context("failed to load persisted ring snapshot")?;

    cluster
        .start(args.cookie.clone(), args.ring_id.clone())
        .await
        .context("failed to start ring")?;

    if let Some(meet_addr) = args.meet {
        let seed = Node::new(meet_addr.to_string(), meet_addr.ip().to_string(), meet_addr.port());
        cluster
            .meet(seed)
            .await
            .context("failed to meet seed peer")?;
    }

    let node_metrics = Arc::new(NodeMetrics::new());

    let app_state = api::AppState {
        version: format!(
            "{} (wire {})",
            env!("CARGO_PKG_VERSION"),
            ringkernel_core::config::WIRE_PROTOCOL_VERSION,
        ),
        cluster: cluster.clone(),
        metrics: Arc::clone(&node_metrics),
    };

    let router = api::create_router(app_state);
    let metrics_ip: std::net::IpAddr = args
        .host
        .parse()
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
    let metrics_addr = SocketAddr::new(metrics_ip, args.metrics_port);
    let listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind introspection listener on {metrics_addr}"))?;
    tracing::info!(%metrics_addr, "introspection/metrics server listening");

    print_startup_banner(&self_node, &args.ring_id, args.meet, metrics_addr);

    tokio::select! {
        res = axum::serve(listener, router) => {
            if let Err(err) = res {
                tracing::error!(%err, "introspection server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, leaving ring");
        }
    }

    if let Err(err) = cluster.stop(true).await {
        tracing::warn!(%err, "error while stopping cluster node");
    }

    tracing::info!("ringkernel-node stopped");
    Ok(())
}

fn print_version() {
    println!("ringkernel-node {}", env!("CARGO_PKG_VERSION"));
    println!("wire       {}", ringkernel_core::config::WIRE_PROTOCOL_VERSION);
    println!("rustc      {}", rustc_version());
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit     {}", commit);
    }
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

fn print_startup_banner(node: &Node, ring_id: &str, meet: Option<SocketAddr>, metrics_addr: SocketAddr) {
    let lines = [
        format!("  Node:       {}", node),
        format!("  Ring:       {}", ring_id),
        format!(
            "  Meet:       {}",
            meet.map(|a| a.to_string()).unwrap_or_else(|| "(bootstrap)".to_string())
        ),
        format!("  Metrics:    http://{}/metrics", metrics_addr),
    ];

    let title = format!("  RingKernel Node v{}", env!("CARGO_PKG_VERSION"));

    let max_width = lines
        .iter()
        .map(|l| l.len())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(50)
        + 4;

    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{}\u{2557}", border);
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{}\u{2563}", border);
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{}\u{255D}", border);
    println!();
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_banner_does_not_panic() {
        let node = Node::new("n1", "127.0.0.1", 7946);
        print_startup_banner(&node, "ring-a", None, "127.0.0.1:7948".parse().unwrap());
    }
}
