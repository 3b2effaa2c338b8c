//! # Hashing & Envelope Authentication
//!
//! Two concerns live here: the hash function `chash` uses to place ring
//! points (`hash`), and the HMAC-SHA256 cookie scheme `NetKernel` uses to
//! authenticate envelopes between peers (`hmac`). There is no signing,
//! encryption, or key management in this crate — the cluster's only shared
//! secret is the optional cookie, and it authenticates messages, it doesn't
//! encrypt them (that's what the `tls` option on `NetKernelOptions` is for).

pub mod hash;
pub mod hmac;

pub use hash::{blake3_hash, blake3_hash_multi, sha256};
pub use hmac::{sign_envelope, verify_envelope, HmacError};
