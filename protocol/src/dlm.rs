//! # DLM
//!
//! A distributed lock manager: an example consumer of [`GenServer`] and
//! [`GossipRing`], not part of the clustering substrate itself. It makes
//! no lock-specific policy decisions beyond quorum counting over the
//! replica set `gossip.find(lock_id)` names — routing and delivery are
//! the core's job, not this module's.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::genserver::{GenServer, GenServerError, GenServerSignal};
use crate::gossip::ring::GossipRing;
use crate::identity::Node;
use crate::transport::handler::ReplyTarget;
use crate::vclock::now_us;

/// Fixed handler name every participating node registers a `Dlm` at.
pub const DLM_NAME: &str = "dlm";

#[derive(Debug, Error)]
pub enum DlmError {
    #[error(transparent)]
    GenServer(#[from] GenServerError),
    #[error("lock payload (de)serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("quorum not reached: {granted}/{needed} replicas granted the lock")]
    QuorumNotReached { granted: usize, needed: usize },
    #[error("read quorum not reached: {consistent}/{needed} replicas agreed")]
    ReadQuorumNotReached { consistent: usize, needed: usize },
    #[error("no replicas found for this key")]
    NoReplicas,
}

#[derive(Clone)]
pub struct DlmConfig {
    pub rquorum: f64,
    pub wquorum: f64,
}

impl Default for DlmConfig {
    fn default() -> Self {
        Self {
            rquorum: 0.51,
            wquorum: 0.51,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockHandle {
    pub lock_id: String,
    pub holder: String,
    pub granted_by: Vec<Node>,
    pub expires_at_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockState {
    pub holder: Option<String>,
    pub expires_at_us: Option<i64>,
}

#[derive(Clone)]
struct LeaseEntry {
    holder: String,
    expires_at_us: i64,
}

#[derive(Serialize, Deserialize)]
struct LockRequest {
    lock_id: String,
    holder: String,
    lease_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct LockResponse {
    granted: bool,
    state: LockState,
}

#[derive(Serialize, Deserialize)]
struct ReleaseMessage {
    lock_id: String,
    holder: String,
}

#[derive(Serialize, Deserialize)]
struct ReadRequest {
    lock_id: String,
}

struct DlmState {
    leases: HashMap<String, LeaseEntry>,
}

/// In-memory lease table plus the `GenServer` handler that serves the
/// `lock`/`release`/`read` events from other replicas. Cheap to clone.
#[derive(Clone)]
pub struct Dlm {
    genserver: GenServer,
    ring: GossipRing,
    config: DlmConfig,
    state: Arc<Mutex<DlmState>>,
    event_loop: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Dlm {
    pub fn new(genserver: GenServer, ring: GossipRing, config: DlmConfig) -> Self {
        Self {
            genserver,
            ring,
            config,
            state: Arc::new(Mutex::new(DlmState {
                leases: HashMap::new(),
            })),
            event_loop: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) -> Result<(), DlmError> {
        self.genserver.start(Some(DLM_NAME.to_string())).await?;
        *self.event_loop.lock() = Some(self.spawn_event_loop());
        Ok(())
    }

    pub fn stop(&self, force: bool) -> Result<(), DlmError> {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        self.genserver.stop(force)?;
        Ok(())
    }

    fn spawn_event_loop(&self) -> JoinHandle<()> {
        let me = self.clone();
        let mut rx = self.genserver.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GenServerSignal::Event { event, data, from }) => {
                        me.handle_event(event, data, from).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn purge_if_expired(&self, lock_id: &str) {
        let mut state = self.state.lock();
        let expired = state
            .leases
            .get(lock_id)
            .is_some_and(|entry| entry.expires_at_us <= now_us());
        if expired {
            state.leases.remove(lock_id);
        }
    }

    fn local_state(&self, lock_id: &str) -> LockState {
        self.purge_if_expired(lock_id);
        let state = self.state.lock();
        match state.leases.get(lock_id) {
            Some(entry) => LockState {
                holder: Some(entry.holder.clone()),
                expires_at_us: Some(entry.expires_at_us),
            },
            None => LockState {
                holder: None,
                expires_at_us: None,
            },
        }
    }

    async fn handle_event(&self, event: String, data: serde_json::Value, from: ReplyTarget) {
        match event.as_str() {
            "lock" => {
                let Ok(req) = serde_json::from_value::<LockRequest>(data) else {
                    return;
                };
                self.purge_if_expired(&req.lock_id);
                let response_state = {
                    let mut state = self.state.lock();
                    let holds_for_someone_else = state
                        .leases
                        .get(&req.lock_id)
                        .is_some_and(|entry| entry.holder != req.holder);
                    if !holds_for_someone_else {
                        let expires_at_us = now_us() + (req.lease_ms as i64) * 1_000;
                        state.leases.insert(
                            req.lock_id.clone(),
                            LeaseEntry {
                                holder: req.holder.clone(),
                                expires_at_us,
                            },
                        );
                    }
                    match state.leases.get(&req.lock_id) {
                        Some(entry) => LockState {
                            holder: Some(entry.holder.clone()),
                            expires_at_us: Some(entry.expires_at_us),
                        },
                        None => LockState {
                            holder: None,
                            expires_at_us: None,
                        },
                    }
                };
                let granted = response_state.holder.as_deref() == Some(req.holder.as_str());
                let body = serde_json::to_value(&LockResponse {
                    granted,
                    state: response_state,
                })
                .unwrap_or(serde_json::Value::Null);
                let _ = self.genserver.reply(&from, "lock-reply", body).await;
            }
            "release" => {
                if let Ok(msg) = serde_json::from_value::<ReleaseMessage>(data) {
                    let mut state = self.state.lock();
                    let same_holder = state
                        .leases
                        .get(&msg.lock_id)
                        .is_some_and(|entry| entry.holder == msg.holder);
                    if same_holder {
                        state.leases.remove(&msg.lock_id);
                    }
                }
            }
            "read" => {
                let Ok(req) = serde_json::from_value::<ReadRequest>(data) else {
                    return;
                };
                let state = self.local_state(&req.lock_id);
                let body = serde_json::to_value(&state).unwrap_or(serde_json::Value::Null);
                let _ = self.genserver.reply(&from, "read-reply", body).await;
            }
            _ => {}
        }
    }

    fn quorum(fraction: f64, total: usize) -> usize {
        ((fraction * total as f64).ceil() as usize).max(1)
    }

    /// Resolves the replica set for `lock_id`, requests a lock from
    /// each, and succeeds once at least `ceil(wquorum * replicas.len())`
    /// grant it.
    pub async fn acquire(
        &self,
        lock_id: &str,
        holder: &str,
        lease_ms: u64,
    ) -> Result<LockHandle, DlmError> {
        let replicas = self.ring.find(lock_id);
        if replicas.is_empty() {
            return Err(DlmError::NoReplicas);
        }
        let needed = Self::quorum(self.config.wquorum, replicas.len());

        let req = LockRequest {
            lock_id: lock_id.to_string(),
            holder: holder.to_string(),
            lease_ms,
        };
        let results = self
            .genserver
            .multicall(
                &replicas,
                DLM_NAME,
                "lock",
                serde_json::to_value(&req)?,
                Some(Duration::from_secs(5)),
            )
            .await;

        let mut granted_by = Vec::new();
        let mut latest_expiry = 0i64;
        for (node, result) in replicas.iter().zip(results.into_iter()) {
            let Ok((_event, data)) = result else { continue };
            let Ok(resp) = serde_json::from_value::<LockResponse>(data) else {
                continue;
            };
            if resp.granted {
                granted_by.push(node.clone());
                if let Some(exp) = resp.state.expires_at_us {
                    latest_expiry = latest_expiry.max(exp);
                }
            }
        }

        if granted_by.len() < needed {
            return Err(DlmError::QuorumNotReached {
                granted: granted_by.len(),
                needed,
            });
        }

        Ok(LockHandle {
            lock_id: lock_id.to_string(),
            holder: holder.to_string(),
            granted_by,
            expires_at_us: latest_expiry,
        })
    }

    /// Best-effort: no quorum is required to release.
    pub async fn release(&self, lock_id: &str, holder: &str) -> Result<(), DlmError> {
        let replicas = self.ring.find(lock_id);
        let msg = ReleaseMessage {
            lock_id: lock_id.to_string(),
            holder: holder.to_string(),
        };
        self.genserver
            .abcast(&replicas, DLM_NAME, "release", serde_json::to_value(&msg)?)
            .await?;
        Ok(())
    }

    /// Requires `ceil(rquorum * replicas.len())` replicas to agree on
    /// the same `LockState` before returning it.
    pub async fn read(&self, lock_id: &str) -> Result<LockState, DlmError> {
        let replicas = self.ring.find(lock_id);
        if replicas.is_empty() {
            return Err(DlmError::NoReplicas);
        }
        let needed = Self::quorum(self.config.rquorum, replicas.len());

        let req = ReadRequest {
            lock_id: lock_id.to_string(),
        };
        let results = self
            .genserver
            .multicall(
                &replicas,
                DLM_NAME,
                "read",
                serde_json::to_value(&req)?,
                Some(Duration::from_secs(5)),
            )
            .await;

        let mut counts: HashMap<LockState, usize> = HashMap::new();
        for result in results {
            let Ok((_event, data)) = result else { continue };
            if let Ok(state) = serde_json::from_value::<LockState>(data) {
                *counts.entry(state).or_insert(0) += 1;
            }
        }

        let (best_state, best_count) = counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .unwrap_or((
                LockState {
                    holder: None,
                    expires_at_us: None,
                },
                0,
            ));

        if best_count < needed {
            return Err(DlmError::ReadQuorumNotReached {
                consistent: best_count,
                needed,
            });
        }
        Ok(best_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_rounds_up_and_never_drops_to_zero() {
        assert_eq!(Dlm::quorum(0.51, 3), 2);
        assert_eq!(Dlm::quorum(0.51, 1), 1);
        assert_eq!(Dlm::quorum(0.0, 5), 1);
        assert_eq!(Dlm::quorum(1.0, 4), 4);
    }
}
