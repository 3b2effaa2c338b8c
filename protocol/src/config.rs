//! # Wire & Protocol Constants
//!
//! The handful of magic numbers that aren't tunable per-node configuration:
//! frame size limits, protocol versioning, and default ports. Per-node
//! tunables (retry intervals, ring factors, timeouts) live in their owning
//! module as a `*Config`/`*Options` struct with a `Default` impl — see
//! `transport::kernel::NetKernelOptions`, `gossip::ring::GossipConfig`, and
//! `vclock::VClockOptions`.

// ---------------------------------------------------------------------------
// Wire protocol
// ---------------------------------------------------------------------------

/// Wire protocol version carried implicitly by this crate version. Bump
/// when the envelope shape changes in a way old peers can't parse.
pub const WIRE_PROTOCOL_VERSION: u16 = 1;

/// Maximum size of a single framed message, in bytes. Bounds both the
/// length-delimited frame the transport will accept and the per-stream
/// reassembly buffer a `GenServer` will hold for one in-flight stream.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Default network parameters
// ---------------------------------------------------------------------------

/// Default port a `NetKernel` binds to when none is configured explicitly.
pub const DEFAULT_KERNEL_PORT: u16 = 7946;

/// Default port the node binary exposes its introspection HTTP API on.
pub const DEFAULT_API_PORT: u16 = 7947;

/// Default port the node binary exposes Prometheus metrics on.
pub const DEFAULT_METRICS_PORT: u16 = 7948;

/// Default outbound connection retry interval.
pub const DEFAULT_RETRY_MS: u64 = 5_000;

/// Default gossip tick interval.
pub const DEFAULT_GOSSIP_INTERVAL_MS: u64 = 1_000;

/// Default ring-state flush interval.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Default consistent-hash replication factor.
pub const DEFAULT_RFACTOR: usize = 3;

/// Default consistent-hash persistence (weight) factor.
pub const DEFAULT_PFACTOR: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_is_positive_and_bounds_sane() {
        assert!(MAX_FRAME_LENGTH > 0);
        assert!(DEFAULT_RFACTOR >= 1);
        assert!(DEFAULT_PFACTOR >= 1);
    }
}
