//! Static and contextual consensus checks.
//!
//! Static checks need only the transaction or block itself plus currency
//! parameters. Contextual checks resolve decoys, unlock windows, and key
//! images against a chain view, and batch the ring signature work across a
//! worker pool.

use std::collections::HashSet;

use rayon::prelude::*;

use ssix_consensus::constants::{
    BLOCK_FUTURE_TIME_LIMIT, TIMESTAMP_CHECK_WINDOW, UNLOCK_TIMESTAMP_LEEWAY,
    UNLOCK_TIME_IS_TIMESTAMP_THRESHOLD,
};
use ssix_consensus::{Currency, UpgradeSchedule};
use ssix_crypto::CryptoOracle;
use ssix_primitives::block::Block;
use ssix_primitives::transaction::{
    relative_offsets_to_absolute, OutputTarget, Transaction, TransactionInput,
};
use ssix_primitives::types::{Hash, KeyImage, PublicKey, Signature};

use crate::error::{BlockError, TxError};
use crate::segment::{OutputRecord, RecordedTarget};

/// Read access to one branch of the chain, as of a fixed height.
pub trait ChainView {
    /// Number of blocks below the validation point.
    fn chain_size(&self) -> u32;
    fn key_image_spent(&self, image: &KeyImage) -> bool;
    fn output(&self, amount: u64, global_index: u64) -> Option<OutputRecord>;
    /// Timestamps of the most recent blocks, oldest first.
    fn last_timestamps(&self, count: usize) -> Vec<u64>;
}

/// A ring signature delayed for batched verification.
pub struct RingCheck {
    pub prefix_hash: Hash,
    pub key_image: KeyImage,
    pub ring: Vec<PublicKey>,
    pub signatures: Vec<Signature>,
}

/// A multisignature threshold delayed for batched verification: every
/// signature must be produced by a distinct key of the referenced output,
/// in key order.
pub struct MultisigCheck {
    pub prefix_hash: Hash,
    pub keys: Vec<PublicKey>,
    pub signatures: Vec<Signature>,
}

/// One deferred cryptographic check from input resolution.
pub enum SignatureCheck {
    Ring(RingCheck),
    Multisig(MultisigCheck),
}

/// Structure-only transaction checks; no chain state involved.
pub fn check_transaction_semantic(
    tx: &Transaction,
    currency: &Currency,
    height: u32,
    oracle: &dyn CryptoOracle,
) -> Result<(), TxError> {
    let size = tx.size() as u64;
    if size > currency.max_tx_size() {
        return Err(TxError::TooBig {
            size,
            limit: currency.max_tx_size(),
        });
    }
    if tx.prefix.version != 1 {
        return Err(TxError::InputInvalid("unsupported transaction version"));
    }
    if tx.prefix.inputs.is_empty() {
        return Err(TxError::EmptyInputs);
    }

    if tx.signatures.len() != tx.prefix.inputs.len() {
        return Err(TxError::InvalidSignature);
    }
    for (input, group) in tx.prefix.inputs.iter().zip(tx.signatures.iter()) {
        if group.len() != input.signature_count() {
            return Err(TxError::InvalidSignature);
        }
    }

    let mut seen_images: HashSet<&KeyImage> = HashSet::new();
    let mut seen_multisig: HashSet<(u64, u64)> = HashSet::new();
    for input in &tx.prefix.inputs {
        match input {
            TransactionInput::Coinbase { .. } => {
                return Err(TxError::InputInvalid(
                    "coinbase input outside a block coinbase",
                ));
            }
            TransactionInput::Key(key_input) => {
                if key_input.amount == 0 {
                    return Err(TxError::InputInvalid("key input with zero amount"));
                }
                if key_input.output_offsets.is_empty() {
                    return Err(TxError::InputInvalid("key input with an empty ring"));
                }
                if !seen_images.insert(&key_input.key_image) {
                    return Err(TxError::DoubleSpend);
                }
            }
            TransactionInput::Multisignature(input) => {
                if input.amount == 0 {
                    return Err(TxError::InputInvalid("multisignature input with zero amount"));
                }
                if !seen_multisig.insert((input.amount, input.output_index)) {
                    return Err(TxError::InputInvalid(
                        "duplicate multisignature input in transaction",
                    ));
                }
            }
        }
    }

    check_outputs(tx, currency, height, oracle, false)?;

    let input_total = tx.input_amount().ok_or(TxError::AmountOverflow)?;
    let output_total = tx.output_amount().ok_or(TxError::AmountOverflow)?;
    if output_total > input_total {
        return Err(TxError::AmountOverflow);
    }

    Ok(())
}

/// Output checks shared between regular and coinbase transactions.
pub fn check_outputs(
    tx: &Transaction,
    currency: &Currency,
    height: u32,
    oracle: &dyn CryptoOracle,
    is_coinbase: bool,
) -> Result<(), TxError> {
    for output in &tx.prefix.outputs {
        if output.amount == 0 {
            return Err(TxError::InvalidOutput("zero amount output"));
        }
        if !is_coinbase
            && currency.enforce_pretty_amounts(height)
            && !currency.is_pretty_amount(output.amount)
        {
            return Err(TxError::NonCanonicalAmount(output.amount));
        }
        match &output.target {
            OutputTarget::Key(key) => {
                if !oracle.check_key(key) {
                    return Err(TxError::InvalidOutput("output with invalid key"));
                }
            }
            OutputTarget::Multisignature(target) => {
                if target.required_signatures as usize > target.keys.len() {
                    return Err(TxError::InvalidOutput(
                        "multisignature output requires more keys than it has",
                    ));
                }
                for key in &target.keys {
                    if !oracle.check_key(key) {
                        return Err(TxError::InvalidOutput(
                            "multisignature output with invalid key",
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn check_transaction_fee(
    tx: &Transaction,
    currency: &Currency,
    height: u32,
) -> Result<u64, TxError> {
    let fee = tx.fee().ok_or(TxError::AmountOverflow)?;
    let minimum = currency.min_fee(height);
    if fee < minimum {
        return Err(TxError::FeeTooLow { fee, minimum });
    }
    Ok(fee)
}

fn is_unlocked(record: &OutputRecord, unlock_window: u64, height: u32, now: u64) -> bool {
    if record.is_coinbase && (record.block_index as u64 + unlock_window) > height as u64 {
        return false;
    }
    if record.unlock_time < UNLOCK_TIME_IS_TIMESTAMP_THRESHOLD {
        record.unlock_time <= height as u64
    } else {
        record.unlock_time <= now + UNLOCK_TIMESTAMP_LEEWAY
    }
}

/// Resolve every input of `tx` against `view` and collect its deferred
/// signature checks.
///
/// `spent_in_batch` carries key images consumed earlier in the same block
/// or pool operation; it is extended with this transaction's images.
pub fn check_transaction_inputs<V: ChainView>(
    tx: &Transaction,
    view: &V,
    currency: &Currency,
    height: u32,
    now: u64,
    spent_in_batch: &mut HashSet<KeyImage>,
) -> Result<Vec<SignatureCheck>, TxError> {
    let prefix_hash = tx.prefix_hash();
    let mut checks = Vec::new();

    for (input, signatures) in tx.prefix.inputs.iter().zip(tx.signatures.iter()) {
        match input {
            TransactionInput::Coinbase { .. } => {
                return Err(TxError::InputInvalid(
                    "coinbase input outside a block coinbase",
                ));
            }
            TransactionInput::Key(key_input) => {
                if spent_in_batch.contains(&key_input.key_image)
                    || view.key_image_spent(&key_input.key_image)
                {
                    return Err(TxError::DoubleSpend);
                }
                let absolute = relative_offsets_to_absolute(&key_input.output_offsets)
                    .ok_or(TxError::InputInvalid("ring offsets overflow"))?;
                let mut ring = Vec::with_capacity(absolute.len());
                for global_index in &absolute {
                    let record = view
                        .output(key_input.amount, *global_index)
                        .ok_or(TxError::InputInvalid("ring member does not exist"))?;
                    if !is_unlocked(&record, currency.coinbase_unlock_window(), height, now) {
                        return Err(TxError::InputInvalid("ring member is still locked"));
                    }
                    match record.target {
                        RecordedTarget::Key(key) => ring.push(key),
                        RecordedTarget::Multisignature { .. } => {
                            return Err(TxError::InputInvalid(
                                "ring member is not a key output",
                            ));
                        }
                    }
                }
                spent_in_batch.insert(key_input.key_image);
                checks.push(SignatureCheck::Ring(RingCheck {
                    prefix_hash,
                    key_image: key_input.key_image,
                    ring,
                    signatures: signatures.clone(),
                }));
            }
            TransactionInput::Multisignature(ms_input) => {
                let record = view
                    .output(ms_input.amount, ms_input.output_index)
                    .ok_or(TxError::InputInvalid("multisignature output does not exist"))?;
                if !is_unlocked(&record, currency.coinbase_unlock_window(), height, now) {
                    return Err(TxError::InputInvalid("multisignature output is still locked"));
                }
                let RecordedTarget::Multisignature {
                    keys,
                    required_signatures,
                } = record.target
                else {
                    return Err(TxError::InputInvalid(
                        "multisignature input references a key output",
                    ));
                };
                // The threshold is the referenced output's, not whatever the
                // input claims.
                if ms_input.signature_count != required_signatures {
                    return Err(TxError::InputInvalid(
                        "signature count disagrees with the referenced output",
                    ));
                }
                if signatures.len() != required_signatures as usize {
                    return Err(TxError::InvalidSignature);
                }
                checks.push(SignatureCheck::Multisig(MultisigCheck {
                    prefix_hash,
                    keys,
                    signatures: signatures.clone(),
                }));
            }
        }
    }
    Ok(checks)
}

/// Each signature must verify under a distinct output key; signers appear
/// in the same order as the output's key list.
fn check_multisig(oracle: &dyn CryptoOracle, check: &MultisigCheck) -> bool {
    let mut keys = check.keys.iter();
    'signatures: for signature in &check.signatures {
        for key in keys.by_ref() {
            if oracle.check_signature(&check.prefix_hash, key, signature) {
                continue 'signatures;
            }
        }
        return false;
    }
    true
}

/// Verify a batch of deferred signature checks across the worker pool.
pub fn verify_signature_checks(
    oracle: &dyn CryptoOracle,
    checks: &[SignatureCheck],
) -> Result<(), TxError> {
    let all_valid = checks.par_iter().all(|check| match check {
        SignatureCheck::Ring(ring) => oracle.check_ring_signature(
            &ring.prefix_hash,
            &ring.key_image,
            &ring.ring,
            &ring.signatures,
        ),
        SignatureCheck::Multisig(multisig) => check_multisig(oracle, multisig),
    });
    if all_valid {
        Ok(())
    } else {
        Err(TxError::InvalidSignature)
    }
}

pub fn check_block_version(
    block: &Block,
    schedule: &UpgradeSchedule,
    height: u32,
) -> Result<(), BlockError> {
    let expected = schedule.expected_major_version(height);
    if block.header.major_version != expected {
        return Err(BlockError::BadVersion {
            expected,
            found: block.header.major_version,
        });
    }
    Ok(())
}

/// Timestamp must beat the median of the trailing window and not run too
/// far ahead of local time.
pub fn check_block_timestamp<V: ChainView>(
    block: &Block,
    view: &V,
    now: u64,
) -> Result<(), BlockError> {
    if block.header.timestamp > now + BLOCK_FUTURE_TIME_LIMIT {
        return Err(BlockError::BadTimestamp("timestamp too far in the future"));
    }
    let mut timestamps = view.last_timestamps(TIMESTAMP_CHECK_WINDOW);
    if timestamps.is_empty() {
        return Ok(());
    }
    timestamps.sort_unstable();
    let median = timestamps[timestamps.len() / 2];
    if block.header.timestamp <= median {
        return Err(BlockError::BadTimestamp(
            "timestamp below the median of recent blocks",
        ));
    }
    Ok(())
}

/// Coinbase structure and exact emission check.
pub fn check_coinbase(
    block: &Block,
    currency: &Currency,
    height: u32,
    base_reward: u64,
    total_fees: u64,
) -> Result<(), BlockError> {
    let coinbase = &block.coinbase;
    match coinbase.prefix.inputs.as_slice() {
        [TransactionInput::Coinbase { height: input_height }] => {
            if *input_height != height as u64 {
                return Err(BlockError::BadCoinbase(
                    "coinbase input height disagrees with block height",
                ));
            }
        }
        _ => {
            return Err(BlockError::BadCoinbase(
                "block must carry exactly one coinbase input",
            ));
        }
    }
    if !coinbase.signatures.is_empty() {
        return Err(BlockError::BadCoinbase("coinbase carries signatures"));
    }
    if coinbase.prefix.unlock_time != height as u64 + currency.coinbase_unlock_window() {
        return Err(BlockError::BadCoinbase("coinbase unlock window is wrong"));
    }

    let minted = coinbase
        .output_amount()
        .ok_or(BlockError::Transaction(TxError::AmountOverflow))?;
    let expected = base_reward
        .checked_add(total_fees)
        .ok_or(BlockError::Transaction(TxError::AmountOverflow))?;
    if minted != expected {
        return Err(BlockError::BadCoinbase(
            "coinbase amount disagrees with emission plus fees",
        ));
    }
    Ok(())
}
