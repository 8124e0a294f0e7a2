//! Consensus-wide constants shared across validation.

/// Smallest indivisible unit per coin (twelve decimal places).
pub const COIN: u64 = 1_000_000_000_000;
/// Total atomic units ever emitted (network rule).
pub const MONEY_SUPPLY: u64 = 10_000_000_000_000_000_000;
/// Right-shift applied to the remaining supply per block reward.
pub const EMISSION_SPEED_FACTOR: u32 = 18;
/// Reward floor once the emission curve flattens out.
pub const TAIL_REWARD: u64 = COIN;

/// Target seconds between blocks (network rule).
pub const DIFFICULTY_TARGET: u64 = 240;
/// Blocks contributing timestamps and work to a difficulty retarget.
pub const DIFFICULTY_WINDOW: usize = 720;
/// Outliers trimmed from each end of the sorted retarget window.
pub const DIFFICULTY_CUT: usize = 60;
/// Difficulty assigned to the genesis block.
pub const GENESIS_DIFFICULTY: u64 = 1;

/// Coinbase outputs unlock this many blocks after they are mined.
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 10;
/// Unlock times below this threshold are block heights, above it unix time.
pub const UNLOCK_TIME_IS_TIMESTAMP_THRESHOLD: u64 = 500_000_000;
/// Tolerated clock skew when an unlock time is a unix timestamp, seconds.
pub const UNLOCK_TIMESTAMP_LEEWAY: u64 = DIFFICULTY_TARGET * 7;

/// Serialized block size cap at height zero; grows with the chain.
pub const MAX_BLOCK_SIZE_INITIAL: u64 = 1_000_000;
/// Yearly block size growth, bytes.
pub const MAX_BLOCK_SIZE_GROWTH_PER_YEAR: u64 = 100 * 1024;
/// The maximum allowed size for a serialized transaction, in bytes.
pub const MAX_TX_SIZE: u64 = 1_000_000;
/// Coinbase may carry this much slack over the base reward plus fees.
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

/// Flat minimum fee for pool admission and in-block acceptance.
pub const MINIMUM_FEE: u64 = 100_000_000_000;
/// Reduced minimum fee once the fee fork activates.
pub const MINIMUM_FEE_V2: u64 = 10_000_000_000;

/// Headers may run ahead of local time by at most this many seconds.
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;
/// Window of trailing blocks whose median gates a new header timestamp.
pub const TIMESTAMP_CHECK_WINDOW: usize = 60;

/// Transactions idle in the pool longer than this are swept, seconds.
pub const POOL_TX_LIVE_TIME: u64 = 60 * 60 * 24;

/// On-disk schema tag; a mismatch forces a wipe-and-rebuild.
pub const DB_SCHEMA_VERSION: u32 = 3;
