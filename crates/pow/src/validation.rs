//! Proof-of-work acceptance predicate.

use primitive_types::U256;

use ssix_primitives::types::Hash;

/// Accepts iff `hash · difficulty` fits 256 bits, i.e. the little-endian
/// hash value is at most `⌊(2²⁵⁶ − 1) / difficulty⌋`.
pub fn check_hash(hash: &Hash, difficulty: u64) -> bool {
    if difficulty == 0 {
        return false;
    }
    let value = U256::from_little_endian(hash.as_bytes());
    value.checked_mul(U256::from(difficulty)).is_some()
}
