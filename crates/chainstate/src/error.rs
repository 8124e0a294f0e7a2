//! Rejection reasons for blocks and transactions.
//!
//! Every variant carries a stable string tag surfaced to protocol and RPC
//! callers; the human message is advisory only.

use ssix_primitives::encoding::DecodeError;
use ssix_storage::StoreError;

#[derive(Debug)]
pub enum TxError {
    Malformed(DecodeError),
    TooBig { size: u64, limit: u64 },
    EmptyInputs,
    InputInvalid(&'static str),
    InvalidSignature,
    DoubleSpend,
    AmountOverflow,
    NonCanonicalAmount(u64),
    FeeTooLow { fee: u64, minimum: u64 },
    InvalidOutput(&'static str),
}

impl TxError {
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::Malformed(_) => "MalformedBytes",
            TxError::TooBig { .. } => "TxTooBig",
            TxError::EmptyInputs | TxError::InputInvalid(_) => "InputInvalid",
            TxError::InvalidSignature => "InvalidSignature",
            TxError::DoubleSpend => "DoubleSpend",
            TxError::AmountOverflow => "AmountOverflow",
            TxError::NonCanonicalAmount(_) => "NonCanonicalAmount",
            TxError::FeeTooLow { .. } => "FeeTooLow",
            TxError::InvalidOutput(_) => "InputInvalid",
        }
    }
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxError::Malformed(err) => write!(f, "{err}"),
            TxError::TooBig { size, limit } => {
                write!(f, "transaction of {size} bytes exceeds limit {limit}")
            }
            TxError::EmptyInputs => write!(f, "transaction has no inputs"),
            TxError::InputInvalid(message) => write!(f, "{message}"),
            TxError::InvalidSignature => write!(f, "ring signature check failed"),
            TxError::DoubleSpend => write!(f, "key image already spent"),
            TxError::AmountOverflow => write!(f, "amount arithmetic overflows"),
            TxError::NonCanonicalAmount(amount) => {
                write!(f, "output amount {amount} is not decomposed")
            }
            TxError::FeeTooLow { fee, minimum } => {
                write!(f, "fee {fee} below required minimum {minimum}")
            }
            TxError::InvalidOutput(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TxError {}

impl From<DecodeError> for TxError {
    fn from(err: DecodeError) -> Self {
        TxError::Malformed(err)
    }
}

#[derive(Debug)]
pub enum BlockError {
    AlreadyHave,
    Orphan,
    Malformed(DecodeError),
    BadVersion { expected: u8, found: u8 },
    BadProofOfWork,
    BadDifficulty,
    BadTimestamp(&'static str),
    TooBig { size: u64, limit: u64 },
    BadCoinbase(&'static str),
    TxHashMismatch,
    AltBlockBehindCheckpoint,
    CheckpointMismatch { height: u32 },
    Transaction(TxError),
    Store(StoreError),
    Shutdown,
}

impl BlockError {
    pub fn kind(&self) -> &'static str {
        match self {
            BlockError::AlreadyHave => "AlreadyHave",
            BlockError::Orphan => "OrphanBlock",
            BlockError::Malformed(_) | BlockError::TxHashMismatch => "MalformedBytes",
            BlockError::BadVersion { .. } => "BadVersion",
            BlockError::BadProofOfWork => "BadPoW",
            BlockError::BadDifficulty | BlockError::BadTimestamp(_) => "BadDifficulty",
            BlockError::TooBig { .. } => "BlockTooBig",
            BlockError::BadCoinbase(_) => "InputInvalid",
            BlockError::AltBlockBehindCheckpoint => "AltBlockBehindCheckpoint",
            BlockError::CheckpointMismatch { .. } => "CheckpointMismatch",
            BlockError::Transaction(err) => err.kind(),
            BlockError::Store(_) => "Shutdown",
            BlockError::Shutdown => "Shutdown",
        }
    }
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::AlreadyHave => write!(f, "block already known"),
            BlockError::Orphan => write!(f, "parent block unknown"),
            BlockError::Malformed(err) => write!(f, "{err}"),
            BlockError::BadVersion { expected, found } => {
                write!(f, "block version {found} where {expected} required")
            }
            BlockError::BadProofOfWork => write!(f, "proof of work below difficulty"),
            BlockError::BadDifficulty => write!(f, "difficulty projection failed"),
            BlockError::BadTimestamp(message) => write!(f, "{message}"),
            BlockError::TooBig { size, limit } => {
                write!(f, "block of {size} bytes exceeds limit {limit}")
            }
            BlockError::BadCoinbase(message) => write!(f, "{message}"),
            BlockError::TxHashMismatch => {
                write!(f, "transaction blobs disagree with referenced hashes")
            }
            BlockError::AltBlockBehindCheckpoint => {
                write!(f, "alternative block attaches below the checkpoint horizon")
            }
            BlockError::CheckpointMismatch { height } => {
                write!(f, "block at height {height} contradicts a checkpoint")
            }
            BlockError::Transaction(err) => write!(f, "{err}"),
            BlockError::Store(err) => write!(f, "{err}"),
            BlockError::Shutdown => write!(f, "shutting down"),
        }
    }
}

impl std::error::Error for BlockError {}

impl From<DecodeError> for BlockError {
    fn from(err: DecodeError) -> Self {
        BlockError::Malformed(err)
    }
}

impl From<TxError> for BlockError {
    fn from(err: TxError) -> Self {
        BlockError::Transaction(err)
    }
}

impl From<StoreError> for BlockError {
    fn from(err: StoreError) -> Self {
        BlockError::Store(err)
    }
}
