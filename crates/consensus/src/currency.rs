//! Currency parameters and the emission curve.
//!
//! A `Currency` value is immutable after `build()` and passed by reference
//! everywhere; there is no process-wide parameter state.

use std::sync::OnceLock;

use ssix_primitives::block::{Block, BlockHeader};
use ssix_primitives::transaction::{
    OutputTarget, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
};
use ssix_primitives::types::{Hash, PublicKey};

use crate::constants::*;
use crate::upgrades::UpgradeSchedule;

/// Compressed Ed25519 basepoint; the genesis output pays to it.
const GENESIS_OUTPUT_KEY_HEX: &str =
    "5866666666666666666666666666666666666666666666666666666666666666";

const MAINNET_GENESIS_TIMESTAMP: u64 = 1_464_595_534;
const TESTNET_GENESIS_TIMESTAMP: u64 = 1_512_800_692;
const GENESIS_NONCE: u32 = 70;

const MAINNET_ADDRESS_PREFIX: u64 = 0x2bbf4a;
const TESTNET_ADDRESS_PREFIX: u64 = 0x3d1e7c;
const TX_PROOF_PREFIX: u64 = 0x36f0c2;
const RESERVE_PROOF_PREFIX: u64 = 0xa98e34;
const KEYS_SIGNATURE_PREFIX: u64 = 0x50ef1e;

#[derive(Debug, PartialEq, Eq)]
pub enum CurrencyError {
    UpgradeHeightsNotAscending,
    UpgradeVersionsNotAscending,
    BadGenesisOutputKey,
    ZeroDifficultyTarget,
}

impl std::fmt::Display for CurrencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrencyError::UpgradeHeightsNotAscending => {
                write!(f, "upgrade heights must be strictly ascending")
            }
            CurrencyError::UpgradeVersionsNotAscending => {
                write!(f, "upgrade versions must be strictly ascending")
            }
            CurrencyError::BadGenesisOutputKey => write!(f, "genesis output key is not valid hex"),
            CurrencyError::ZeroDifficultyTarget => write!(f, "difficulty target cannot be zero"),
        }
    }
}

impl std::error::Error for CurrencyError {}

#[derive(Debug)]
pub struct Currency {
    testnet: bool,
    money_supply: u64,
    emission_speed_factor: u32,
    tail_reward: u64,
    difficulty_target: u64,
    coinbase_unlock_window: u64,
    max_block_size_initial: u64,
    max_block_size_growth_per_year: u64,
    max_tx_size: u64,
    minimum_fee: u64,
    minimum_fee_v2: u64,
    fee_fork_height: u32,
    pretty_amounts_fork_height: u32,
    upgrade_heights: Vec<(u8, u32)>,
    genesis_timestamp: u64,
    genesis_nonce: u32,
    genesis_output_key: PublicKey,
    address_prefix: u64,
    tx_proof_prefix: u64,
    reserve_proof_prefix: u64,
    keys_signature_prefix: u64,
    pretty_amounts: Vec<u64>,
    genesis: OnceLock<Block>,
}

impl Currency {
    pub fn builder() -> CurrencyBuilder {
        CurrencyBuilder::default()
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }

    pub fn money_supply(&self) -> u64 {
        self.money_supply
    }

    pub fn difficulty_target(&self) -> u64 {
        self.difficulty_target
    }

    pub fn coinbase_unlock_window(&self) -> u64 {
        self.coinbase_unlock_window
    }

    pub fn max_tx_size(&self) -> u64 {
        self.max_tx_size
    }

    /// Serialized block size cap; grows linearly with height.
    pub fn max_block_size(&self, height: u32) -> u64 {
        let blocks_per_year = 365 * 24 * 3600 / self.difficulty_target.max(1);
        let growth = (self.max_block_size_growth_per_year as u128 * height as u128
            / blocks_per_year as u128) as u64;
        self.max_block_size_initial.saturating_add(growth)
    }

    pub fn min_fee(&self, height: u32) -> u64 {
        if height >= self.fee_fork_height {
            self.minimum_fee_v2
        } else {
            self.minimum_fee
        }
    }

    /// Base block reward given the coins already in circulation.
    ///
    /// `(supply − generated) >> factor`, floored at the tail reward once the
    /// curve flattens.
    pub fn base_reward(&self, already_generated: u64) -> u64 {
        let remaining = self.money_supply.saturating_sub(already_generated);
        let reward = remaining >> self.emission_speed_factor;
        reward.max(self.tail_reward)
    }

    /// Whether decomposed-output enforcement is active at `height`.
    pub fn enforce_pretty_amounts(&self, height: u32) -> bool {
        height >= self.pretty_amounts_fork_height
    }

    pub fn is_pretty_amount(&self, amount: u64) -> bool {
        self.pretty_amounts.binary_search(&amount).is_ok()
    }

    pub fn pretty_amounts(&self) -> &[u64] {
        &self.pretty_amounts
    }

    pub fn upgrade_schedule(&self) -> UpgradeSchedule {
        UpgradeSchedule::new(self.upgrade_heights.clone())
    }

    pub fn address_prefix(&self) -> u64 {
        self.address_prefix
    }

    pub fn tx_proof_prefix(&self) -> u64 {
        self.tx_proof_prefix
    }

    pub fn reserve_proof_prefix(&self) -> u64 {
        self.reserve_proof_prefix
    }

    pub fn keys_signature_prefix(&self) -> u64 {
        self.keys_signature_prefix
    }

    pub fn genesis_block(&self) -> &Block {
        self.genesis.get_or_init(|| {
            let reward = self.base_reward(0);
            let coinbase = Transaction {
                prefix: TransactionPrefix {
                    version: 1,
                    unlock_time: self.coinbase_unlock_window,
                    inputs: vec![TransactionInput::Coinbase { height: 0 }],
                    outputs: vec![TransactionOutput {
                        amount: reward,
                        target: OutputTarget::Key(self.genesis_output_key),
                    }],
                    extra: Vec::new(),
                },
                signatures: Vec::new(),
            };
            Block {
                header: BlockHeader {
                    major_version: 1,
                    minor_version: 0,
                    prev_hash: Hash::zero(),
                    timestamp: self.genesis_timestamp,
                    nonce: self.genesis_nonce,
                },
                coinbase,
                tx_hashes: Vec::new(),
            }
        })
    }

    pub fn genesis_block_hash(&self) -> Hash {
        self.genesis_block().hash()
    }
}

pub struct CurrencyBuilder {
    testnet: bool,
    money_supply: u64,
    emission_speed_factor: u32,
    tail_reward: u64,
    difficulty_target: u64,
    coinbase_unlock_window: u64,
    max_block_size_initial: u64,
    max_block_size_growth_per_year: u64,
    max_tx_size: u64,
    minimum_fee: u64,
    minimum_fee_v2: u64,
    fee_fork_height: u32,
    pretty_amounts_fork_height: u32,
    upgrade_heights: Option<Vec<(u8, u32)>>,
}

impl Default for CurrencyBuilder {
    fn default() -> Self {
        Self {
            testnet: false,
            money_supply: MONEY_SUPPLY,
            emission_speed_factor: EMISSION_SPEED_FACTOR,
            tail_reward: TAIL_REWARD,
            difficulty_target: DIFFICULTY_TARGET,
            coinbase_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
            max_block_size_initial: MAX_BLOCK_SIZE_INITIAL,
            max_block_size_growth_per_year: MAX_BLOCK_SIZE_GROWTH_PER_YEAR,
            max_tx_size: MAX_TX_SIZE,
            minimum_fee: MINIMUM_FEE,
            minimum_fee_v2: MINIMUM_FEE_V2,
            fee_fork_height: 232_700,
            pretty_amounts_fork_height: 60_000,
            upgrade_heights: None,
        }
    }
}

impl CurrencyBuilder {
    pub fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn money_supply(mut self, supply: u64) -> Self {
        self.money_supply = supply;
        self
    }

    pub fn emission_speed_factor(mut self, factor: u32) -> Self {
        self.emission_speed_factor = factor;
        self
    }

    pub fn tail_reward(mut self, reward: u64) -> Self {
        self.tail_reward = reward;
        self
    }

    pub fn difficulty_target(mut self, seconds: u64) -> Self {
        self.difficulty_target = seconds;
        self
    }

    pub fn coinbase_unlock_window(mut self, blocks: u64) -> Self {
        self.coinbase_unlock_window = blocks;
        self
    }

    pub fn max_block_size_initial(mut self, bytes: u64) -> Self {
        self.max_block_size_initial = bytes;
        self
    }

    pub fn max_tx_size(mut self, bytes: u64) -> Self {
        self.max_tx_size = bytes;
        self
    }

    pub fn minimum_fee(mut self, fee: u64) -> Self {
        self.minimum_fee = fee;
        self.minimum_fee_v2 = fee;
        self
    }

    pub fn fee_fork_height(mut self, height: u32) -> Self {
        self.fee_fork_height = height;
        self
    }

    pub fn pretty_amounts_fork_height(mut self, height: u32) -> Self {
        self.pretty_amounts_fork_height = height;
        self
    }

    pub fn upgrade_heights(mut self, heights: Vec<(u8, u32)>) -> Self {
        self.upgrade_heights = Some(heights);
        self
    }

    pub fn build(self) -> Result<Currency, CurrencyError> {
        if self.difficulty_target == 0 {
            return Err(CurrencyError::ZeroDifficultyTarget);
        }

        let upgrade_heights = self.upgrade_heights.unwrap_or_else(|| {
            if self.testnet {
                vec![(2, 100), (3, 200), (4, 300)]
            } else {
                vec![(2, 60_000), (3, 216_000), (4, 266_000)]
            }
        });
        for pair in upgrade_heights.windows(2) {
            if pair[1].1 <= pair[0].1 {
                return Err(CurrencyError::UpgradeHeightsNotAscending);
            }
            if pair[1].0 <= pair[0].0 {
                return Err(CurrencyError::UpgradeVersionsNotAscending);
            }
        }

        let genesis_output_key = PublicKey::from_hex(GENESIS_OUTPUT_KEY_HEX)
            .ok_or(CurrencyError::BadGenesisOutputKey)?;

        let (genesis_timestamp, address_prefix) = if self.testnet {
            (TESTNET_GENESIS_TIMESTAMP, TESTNET_ADDRESS_PREFIX)
        } else {
            (MAINNET_GENESIS_TIMESTAMP, MAINNET_ADDRESS_PREFIX)
        };

        Ok(Currency {
            testnet: self.testnet,
            money_supply: self.money_supply,
            emission_speed_factor: self.emission_speed_factor,
            tail_reward: self.tail_reward,
            difficulty_target: self.difficulty_target,
            coinbase_unlock_window: self.coinbase_unlock_window,
            max_block_size_initial: self.max_block_size_initial,
            max_block_size_growth_per_year: self.max_block_size_growth_per_year,
            max_tx_size: self.max_tx_size,
            minimum_fee: self.minimum_fee,
            minimum_fee_v2: self.minimum_fee_v2,
            fee_fork_height: self.fee_fork_height,
            pretty_amounts_fork_height: self.pretty_amounts_fork_height,
            upgrade_heights,
            genesis_timestamp,
            genesis_nonce: GENESIS_NONCE,
            genesis_output_key,
            address_prefix,
            tx_proof_prefix: TX_PROOF_PREFIX,
            reserve_proof_prefix: RESERVE_PROOF_PREFIX,
            keys_signature_prefix: KEYS_SIGNATURE_PREFIX,
            pretty_amounts: build_pretty_amounts(),
            genesis: OnceLock::new(),
        })
    }
}

/// Every `d · 10^e` that fits a u64, ascending: 1, 2, … 9, 10, 20, …
fn build_pretty_amounts() -> Vec<u64> {
    let mut amounts = Vec::with_capacity(9 * 20);
    let mut power: u64 = 1;
    loop {
        for digit in 1..=9u64 {
            match digit.checked_mul(power) {
                Some(amount) => amounts.push(amount),
                None => return amounts,
            }
        }
        match power.checked_mul(10) {
            Some(next) => power = next,
            None => return amounts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainnet() -> Currency {
        Currency::builder().build().expect("currency")
    }

    #[test]
    fn emission_is_monotone_decreasing_until_tail() {
        let currency = mainnet();
        let first = currency.base_reward(0);
        let later = currency.base_reward(currency.money_supply() / 2);
        assert!(first > later);
        assert_eq!(
            currency.base_reward(currency.money_supply()),
            TAIL_REWARD
        );
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = mainnet();
        let b = mainnet();
        assert_eq!(a.genesis_block_hash(), b.genesis_block_hash());
        assert_eq!(a.genesis_block().coinbase.prefix.outputs[0].amount, a.base_reward(0));
    }

    #[test]
    fn testnet_genesis_differs() {
        let mainnet = mainnet();
        let testnet = Currency::builder().testnet(true).build().expect("currency");
        assert_ne!(mainnet.genesis_block_hash(), testnet.genesis_block_hash());
        assert_ne!(mainnet.address_prefix(), testnet.address_prefix());
    }

    #[test]
    fn pretty_amounts_sorted_and_complete() {
        let currency = mainnet();
        let amounts = currency.pretty_amounts();
        assert!(amounts.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(currency.is_pretty_amount(1));
        assert!(currency.is_pretty_amount(9_000_000_000_000));
        assert!(!currency.is_pretty_amount(0));
        assert!(!currency.is_pretty_amount(1_100));
    }

    #[test]
    fn block_size_grows_with_height() {
        let currency = mainnet();
        let base = currency.max_block_size(0);
        assert_eq!(base, MAX_BLOCK_SIZE_INITIAL);
        assert!(currency.max_block_size(1_000_000) > base);
    }

    #[test]
    fn fee_drops_after_fork() {
        let currency = mainnet();
        assert_eq!(currency.min_fee(0), MINIMUM_FEE);
        assert_eq!(currency.min_fee(1_000_000), MINIMUM_FEE_V2);
    }

    #[test]
    fn builder_rejects_descending_upgrades() {
        let result = Currency::builder()
            .upgrade_heights(vec![(2, 500), (3, 400)])
            .build();
        assert_eq!(
            result.err(),
            Some(CurrencyError::UpgradeHeightsNotAscending)
        );
    }
}
