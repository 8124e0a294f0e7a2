//! Consensus object model and canonical binary codec.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader, RawBlock};
pub use hash::cn_fast_hash;
pub use transaction::{Transaction, TransactionInput, TransactionOutput, TransactionPrefix};
pub use types::{Hash, KeyImage, PublicKey, SecretKey, Signature};
