//! # Hashing Utilities
//!
//! The ring needs exactly one hash function: BLAKE3, used to place virtual
//! nodes on the consistent-hash ring (`chash::CHash`) and nowhere else in
//! this crate. SHA-256 lives next to it because `hmac` (the envelope
//! authentication in `transport::hmac`) is built on top of it — expose it
//! here too so callers don't need a second crate import for one hash.

use sha2::{Digest, Sha256};

/// SHA-256 of `data`, returned as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// BLAKE3 of `data`, returned as a fixed-size array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 over several byte slices fed in sequence, without concatenating
/// them into a temporary buffer first. Used by `CHash` to hash
/// `node_id || virtual_point_index` when placing ring points.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn blake3_deterministic() {
        let a = blake3_hash(b"ring");
        let b = blake3_hash(b"ring");
        assert_eq!(a, b);
    }

    #[test]
    fn blake3_hash_multi_matches_concatenation() {
        let multi = blake3_hash_multi(&[b"node-1", b"3"]);
        let single = blake3_hash(b"node-13");
        assert_eq!(multi, single);
    }

    #[test]
    fn blake3_different_inputs_differ() {
        let a = blake3_hash(b"node-1");
        let b = blake3_hash(b"node-2");
        assert_ne!(a, b);
    }
}
