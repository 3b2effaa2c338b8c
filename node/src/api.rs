//! # Introspection HTTP API
//!
//! A small axum router serving `/health`, `/status`, `/members`, and
//! `/metrics` for a running [`ClusterNode`]. Not part of the clustering
//! protocol itself — operators and monitoring poll it over plain HTTP.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use ringkernel_core::cluster::ClusterNode;
use serde::Serialize;

use crate::metrics::{metrics_handler, SharedMetrics};

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub cluster: ClusterNode,
    pub metrics: SharedMetrics,
}

pub fn create_router(state: AppState) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state.metrics.clone());

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/members", get(members))
        .with_state(state)
        .merge(metrics_router)
}

async fn health() -> impl IntoResponse {
    "ok"
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    node_id: String,
    ring_id: Option<String>,
    ring_size: usize,
    ring_idle: bool,
    connected_peers: usize,
    handlers: Vec<String>,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let kernel_status = match state.cluster.kernel().status().await {
        Ok(status) => status,
        Err(err) => {
            tracing::error!(%err, "failed to read kernel status");
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "kernel not running",
            )
                .into_response();
        }
    };
    let ring_status = state.cluster.ring().status();

    state.metrics.ring_size.set(ring_status.size as i64);
    state
        .metrics
        .connected_peers
        .set(kernel_status.sinks.len() as i64);

    Json(StatusResponse {
        version: state.version.clone(),
        node_id: kernel_status.self_node.id.clone(),
        ring_id: ring_status.ring_id,
        ring_size: ring_status.size,
        ring_idle: ring_status.idle,
        connected_peers: kernel_status.sinks.len(),
        handlers: kernel_status.handlers,
    })
    .into_response()
}

#[derive(Serialize)]
struct MembersResponse {
    members: Vec<ringkernel_core::identity::Node>,
}

async fn members(State(state): State<AppState>) -> impl IntoResponse {
    let ring_status = state.cluster.ring().status();
    Json(MembersResponse {
        members: ring_status.members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkernel_core::gossip::ring::GossipConfig;
    use ringkernel_core::identity::Node;
    use ringkernel_core::transport::kernel::NetKernelOptions;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> AppState {
        let node = Node::new(Uuid::new_v4().to_string(), "127.0.0.1", 0);
        let mut opts = NetKernelOptions::default();
        opts.port = 0;
        let cluster = ClusterNode::bind(node, opts, GossipConfig::default())
            .await
            .unwrap();
        AppState {
            version: "test".to_string(),
            cluster,
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let router = create_router(test_state().await);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_node_id() {
        let state = test_state().await;
        let expected_id = state.cluster.kernel().self_node().id.clone();
        let router = create_router(state);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["node_id"], expected_id);
    }
}
