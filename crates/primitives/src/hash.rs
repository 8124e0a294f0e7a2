//! Keccak hashing front-end and the transaction tree hash.

use sha3::digest::Digest;
use sha3::Keccak256;

use crate::types::Hash;

pub fn cn_fast_hash(data: &[u8]) -> Hash {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    cn_fast_hash(&buf)
}

/// Merkle root over transaction hashes.
///
/// The leaf count is first reduced to a power of two by pairing the trailing
/// leaves, so the tree depth stays `log2` without padding leaves.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    match hashes.len() {
        0 => Hash::zero(),
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        count => {
            let mut cnt = 1usize;
            while cnt * 2 < count {
                cnt *= 2;
            }

            let mut level = Vec::with_capacity(cnt);
            let untouched = 2 * cnt - count;
            level.extend_from_slice(&hashes[..untouched]);
            let mut i = untouched;
            while i < count {
                level.push(hash_pair(&hashes[i], &hashes[i + 1]));
                i += 2;
            }
            debug_assert_eq!(level.len(), cnt);

            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len() / 2);
                for pair in level.chunks(2) {
                    next.push(hash_pair(&pair[0], &pair[1]));
                }
                level = next;
            }
            level[0]
        }
    }
}
