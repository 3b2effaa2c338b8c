//! # Node Identity
//!
//! A [`Node`] is the immutable `(id, host, port)` triple every other
//! subsystem addresses a peer by. Two `Node`s are equal iff all three
//! fields match; nothing here carries state, so it's cheap to clone and
//! safe to use as a map key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable identity of a cluster participant.
///
/// Construction never fails — `id` is an opaque, caller-chosen string
/// (conventionally a UUID or a stable name) and must be unique within a
/// cluster. Nothing in this crate enforces that uniqueness; it is a
/// deployment invariant, not a runtime check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// Socket address string in `host:port` form, suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Round-trips through the wire JSON form. Exists mainly so callers
    /// deserializing a `from` field out of an envelope have a named entry
    /// point instead of reaching for `serde_json` directly.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Node serializes infallibly")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_equality() {
        let n = Node::new("foo", "127.0.0.1", 8000);
        let round_tripped = Node::from_json(&n.to_json()).unwrap();
        assert_eq!(n, round_tripped);
    }

    #[test]
    fn equality_is_component_wise() {
        let a = Node::new("foo", "127.0.0.1", 8000);
        let b = Node::new("foo", "127.0.0.1", 8001);
        assert_ne!(a, b);
    }

    #[test]
    fn addr_formats_host_port() {
        let n = Node::new("foo", "10.0.0.1", 9000);
        assert_eq!(n.addr(), "10.0.0.1:9000");
    }
}
