//! Integration tests exercising two or more real, independently bound
//! `ClusterNode`/`NetKernel` instances over loopback TCP. Each test gets its
//! own ports (chosen by briefly binding to port 0 and releasing it) so tests
//! can run concurrently without colliding.
//!
//! These cover the numbered scenarios from the cluster substrate's test
//! plan: two-node meet/converge, call/reply round-trip, and multicall
//! aggregation. Conflict resolution and the call timeout scenario are
//! covered as unit tests next to the code they exercise (`gossip::ring`,
//! `transport::kernel`) since they need access to private state.

use std::time::Duration;

use ringkernel_core::cluster::ClusterNode;
use ringkernel_core::envelope::Payload;
use ringkernel_core::genserver::{GenServer, GenServerSignal};
use ringkernel_core::gossip::ring::GossipConfig;
use ringkernel_core::identity::Node;
use ringkernel_core::transport::handler::ReplyTarget;
use ringkernel_core::transport::kernel::NetKernelOptions;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn bind_node(id: &str, gossip: GossipConfig) -> (ClusterNode, Node) {
    let port = free_port();
    let self_node = Node::new(id, "127.0.0.1", port);
    let mut opts = NetKernelOptions::default();
    opts.port = port;
    let cluster = ClusterNode::bind(self_node.clone(), opts, gossip)
        .await
        .expect("bind cluster node");
    (cluster, self_node)
}

/// Scenario 1: two nodes meet and converge on the same membership within a
/// handful of gossip ticks.
#[tokio::test]
async fn two_node_meet_and_converge() {
    let gossip = GossipConfig {
        rfactor: 3,
        pfactor: 2,
        interval_ms: 50,
        flush_interval_ms: 10_000,
        ..GossipConfig::default()
    };
    let (a, _a_node) = bind_node("foo", gossip.clone()).await;
    let (b, b_node) = bind_node("bar", gossip).await;

    a.start(None, "test-ring").await.unwrap();
    b.start(None, "test-ring").await.unwrap();

    a.meet(b_node.clone()).await.unwrap();

    let mut converged = false;
    for _ in 0..100 {
        let a_members = a.ring().status().members;
        let b_members = b.ring().status().members;
        if a_members.len() == 2 && b_members.len() == 2 {
            let mut a_ids: Vec<&str> = a_members.iter().map(|n| n.id.as_str()).collect();
            let mut b_ids: Vec<&str> = b_members.iter().map(|n| n.id.as_str()).collect();
            a_ids.sort();
            b_ids.sort();
            if a_ids == b_ids {
                converged = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(converged, "expected both rings to converge on {{foo, bar}}");

    assert!(a.ring().status().actor.is_some());
    assert!(b.ring().status().actor.is_some());
}

/// Scenario 2: a `call` against a peer's `GenServer` completes with the
/// bytes that peer's handler replied with.
#[tokio::test]
async fn call_reply_round_trip() {
    let (a, _a_node) = bind_node("call-a", GossipConfig::default()).await;
    let (b, b_node) = bind_node("call-b", GossipConfig::default()).await;

    let echo = GenServer::new(b.kernel().clone(), Duration::from_secs(5));
    echo.start(Some("s".to_string())).await.unwrap();
    spawn_echo(echo);

    let caller = GenServer::new(a.kernel().clone(), Duration::from_secs(5));
    caller.start(Some("s".to_string())).await.unwrap();

    let (event, data) = caller
        .call(
            &b_node,
            "s",
            "msg",
            serde_json::json!("hello"),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(event, "msg");
    assert_eq!(data, serde_json::json!("hello"));
}

/// Scenario 3: `multicall` against the same peer twice aggregates both
/// replies independently.
#[tokio::test]
async fn multicall_aggregates_per_node_replies() {
    let (a, _a_node) = bind_node("multi-a", GossipConfig::default()).await;
    let (b, b_node) = bind_node("multi-b", GossipConfig::default()).await;

    let echo = GenServer::new(b.kernel().clone(), Duration::from_secs(5));
    echo.start(Some("s".to_string())).await.unwrap();
    spawn_echo(echo);

    let results = a
        .kernel()
        .multicall(
            &[b_node.clone(), b_node],
            "s",
            Payload::Text(
                serde_json::to_string(&serde_json::json!({"event": "msg", "data": "hello"}))
                    .unwrap(),
            ),
            Some(Duration::from_secs(2)),
        )
        .await;

    assert_eq!(results.len(), 2);
    for result in results {
        let bytes = result.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["data"], serde_json::json!("hello"));
    }
}

/// Subscribes to `gs`'s events and replies to every `msg` event with the
/// data it received, verbatim — the "echo" GenServer the call/multicall
/// scenarios call against.
fn spawn_echo(gs: GenServer) {
    let mut rx = gs.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(GenServerSignal::Event { event, data, from }) => {
                    if event == "msg" {
                        let _ = reply(&gs, &from, data).await;
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn reply(gs: &GenServer, from: &ReplyTarget, data: serde_json::Value) -> Result<(), ()> {
    gs.reply(from, "msg", data).await.map_err(|_| ())
}
