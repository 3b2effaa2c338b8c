//! # Prometheus Metrics
//!
//! Exposes operational metrics for a cluster node. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Current size of the local ring (distinct members).
    pub ring_size: IntGauge,
    /// Number of peers the kernel currently holds a live connection to.
    pub connected_peers: IntGauge,
    /// Total gossip rounds sent by this node.
    pub gossip_rounds_sent_total: IntCounter,
    /// Total ring conflicts resolved by last-write-wins.
    pub gossip_conflicts_total: IntCounter,
    /// Total inbound envelopes dropped (bad HMAC, unparseable, unknown handler).
    pub envelopes_skipped_total: IntCounter,
    /// Number of `call`/`multicall` requests currently awaiting a reply.
    pub calls_in_flight: IntGauge,
    /// Number of DLM leases currently held by this node's replica.
    pub dlm_leases_held: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("ringkernel".into()), None)
            .expect("failed to create prometheus registry");

        let ring_size = IntGauge::new("ring_size", "Number of distinct members on the local ring")
            .expect("metric creation");
        registry.register(Box::new(ring_size.clone())).expect("metric registration");

        let connected_peers = IntGauge::new("connected_peers", "Number of currently connected peers")
            .expect("metric creation");
        registry
            .register(Box::new(connected_peers.clone()))
            .expect("metric registration");

        let gossip_rounds_sent_total = IntCounter::new(
            "gossip_rounds_sent_total",
            "Total gossip rounds sent by this node",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_rounds_sent_total.clone()))
            .expect("metric registration");

        let gossip_conflicts_total = IntCounter::new(
            "gossip_conflicts_total",
            "Total ring conflicts resolved by last-write-wins",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_conflicts_total.clone()))
            .expect("metric registration");

        let envelopes_skipped_total = IntCounter::new(
            "envelopes_skipped_total",
            "Total inbound envelopes dropped (bad HMAC, unparseable, unknown handler)",
        )
        .expect("metric creation");
        registry
            .register(Box::new(envelopes_skipped_total.clone()))
            .expect("metric registration");

        let calls_in_flight = IntGauge::new(
            "calls_in_flight",
            "Number of call/multicall requests currently awaiting a reply",
        )
        .expect("metric creation");
        registry
            .register(Box::new(calls_in_flight.clone()))
            .expect("metric registration");

        let dlm_leases_held = IntGauge::new(
            "dlm_leases_held",
            "Number of DLM leases currently held by this node's replica",
        )
        .expect("metric creation");
        registry
            .register(Box::new(dlm_leases_held.clone()))
            .expect("metric registration");

        Self {
            registry,
            ring_size,
            connected_peers,
            gossip_rounds_sent_total,
            gossip_conflicts_total,
            envelopes_skipped_total,
            calls_in_flight,
            dlm_leases_held,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_registered_metric_names() {
        let metrics = NodeMetrics::new();
        metrics.ring_size.set(3);
        metrics.gossip_rounds_sent_total.inc();
        let body = metrics.encode().unwrap();
        assert!(body.contains("ringkernel_ring_size"));
        assert!(body.contains("ringkernel_gossip_rounds_sent_total"));
    }
}
