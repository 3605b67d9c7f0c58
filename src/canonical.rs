//! Canonical serialization for deterministic hashing.
//!
//! Manifests and policy parameters are hashed from their JSON form, so the
//! hashed types must serialize identically for identical values:
//!
//! - Struct fields serialize in declaration order
//! - Vectors serialize in index order
//! - Maps in hashed data are `BTreeMap`, never `HashMap`

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Seed for all content hashes.
const HASH_SEED: u64 = 0;

/// Serialize a value to canonical JSON bytes.
///
/// Fails only for values serde_json cannot represent (non-string map keys
/// that are not integers, or a failing custom `Serialize`).
pub fn try_to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Serialize a value to canonical JSON bytes.
///
/// For the crate's own value types serialization cannot fail.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    try_to_canonical_bytes(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), HASH_SEED)
}

/// Compute canonical hash and return as a 16-digit hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Sample {
        name: String,
        layers: BTreeMap<i32, usize>,
    }

    fn sample(order: &[(i32, usize)]) -> Sample {
        Sample {
            name: "slab".to_string(),
            layers: order.iter().copied().collect(),
        }
    }

    #[test]
    fn test_determinism() {
        let a = sample(&[(0, 4), (1, 3)]);
        assert_eq!(canonical_hash(&a), canonical_hash(&a));
    }

    #[test]
    fn test_map_insertion_order_does_not_matter() {
        let a = sample(&[(0, 4), (1, 3)]);
        let b = sample(&[(1, 3), (0, 4)]);
        assert_eq!(canonical_hash_hex(&a), canonical_hash_hex(&b));
        assert_eq!(canonical_hash_hex(&a).len(), 16);
    }
}
