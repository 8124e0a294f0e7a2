//! Node-level services above the chain state: the transaction pool, event
//! fan-out, proof objects, and the core façade.

pub mod core;
pub mod events;
pub mod pool;
pub mod proofs;

pub use crate::core::{BlockTemplate, Core, CoreError};
pub use events::{Broadcaster, Notification};
pub use pool::{PoolEntry, PoolError, TransactionPool};
pub use proofs::AccountAddress;
