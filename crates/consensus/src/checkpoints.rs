//! Hard-coded block hash pins and the alternative-block gate.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ssix_log::{log_info, log_warn};
use ssix_primitives::types::Hash;

use crate::dns::TxtFetcher;

/// Compiled-in pins for the main network.
pub const MAINNET_CHECKPOINTS: &[(u32, &str)] = &[
    (
        1_000,
        "e274d9a8a919ede42bbb9ab1dfc670ad80d3a53d4fdab0cf55cdd3e45b4f8679",
    ),
    (
        2_000,
        "e69f1cfaf2aaa6427218b32150eec1a09e80d557495253e8de827adff790a235",
    ),
];

#[derive(Debug, PartialEq, Eq)]
pub enum CheckpointError {
    BadHash(u32),
    Conflict(u32),
    BadRecord(String),
    Io(String),
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::BadHash(height) => {
                write!(f, "checkpoint at height {height} has a malformed hash")
            }
            CheckpointError::Conflict(height) => {
                write!(f, "conflicting checkpoint at height {height}")
            }
            CheckpointError::BadRecord(record) => write!(f, "malformed record: {record}"),
            CheckpointError::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

#[derive(Debug, Default)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiled(entries: &[(u32, &str)]) -> Result<Self, CheckpointError> {
        let mut checkpoints = Self::new();
        for (height, hex) in entries {
            checkpoints.add_checkpoint(*height, hex)?;
        }
        Ok(checkpoints)
    }

    pub fn add_checkpoint(&mut self, height: u32, hash_hex: &str) -> Result<(), CheckpointError> {
        let hash = Hash::from_hex(hash_hex).ok_or(CheckpointError::BadHash(height))?;
        match self.points.get(&height) {
            Some(existing) if *existing != hash => Err(CheckpointError::Conflict(height)),
            Some(_) => Ok(()),
            None => {
                self.points.insert(height, hash);
                Ok(())
            }
        }
    }

    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.points
            .last_key_value()
            .map(|(highest, _)| height <= *highest)
            .unwrap_or(false)
    }

    /// `(ok, is_checkpoint)`: when `height` is pinned, `ok` says whether the
    /// hash matches; otherwise the block is unconstrained.
    pub fn check_block(&self, height: u32, hash: &Hash) -> (bool, bool) {
        match self.points.get(&height) {
            Some(expected) => (expected == hash, true),
            None => (true, false),
        }
    }

    /// History at or below the highest checkpoint not above `chain_size` is
    /// frozen; an alternative block may only attach above it.
    pub fn is_alternative_block_allowed(&self, chain_size: u32, block_height: u32) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=chain_size).next_back() {
            Some((checkpoint_height, _)) => *checkpoint_height < block_height,
            None => true,
        }
    }

    pub fn checkpoint_heights(&self) -> Vec<u32> {
        self.points.keys().copied().collect()
    }

    pub fn highest_checkpoint(&self) -> Option<u32> {
        self.points.last_key_value().map(|(height, _)| *height)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// CSV loader: one `height,hash` per line, `#` comments and blank lines
    /// ignored.
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, CheckpointError> {
        let contents =
            fs::read_to_string(path).map_err(|err| CheckpointError::Io(err.to_string()))?;
        let mut loaded = 0usize;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (height, hash) = line
                .split_once(',')
                .ok_or_else(|| CheckpointError::BadRecord(line.to_string()))?;
            let height: u32 = height
                .trim()
                .parse()
                .map_err(|_| CheckpointError::BadRecord(line.to_string()))?;
            self.add_checkpoint(height, hash.trim())?;
            loaded += 1;
        }
        log_info!("loaded {loaded} checkpoints from {}", path.display());
        Ok(loaded)
    }

    /// DNS loader: every TXT record is `height:hash`. A record is merged
    /// only when a strict majority of the configured hosts serves it.
    pub fn load_from_dns(
        &mut self,
        hosts: &[&str],
        fetcher: &dyn TxtFetcher,
    ) -> Result<usize, CheckpointError> {
        let mut votes: BTreeMap<(u32, String), usize> = BTreeMap::new();
        let mut responders = 0usize;
        for host in hosts {
            let records = match fetcher.fetch_txt(host) {
                Ok(records) => records,
                Err(err) => {
                    log_warn!("checkpoint DNS query to {host} failed: {err}");
                    continue;
                }
            };
            responders += 1;
            for record in records {
                let Some((height, hash)) = parse_dns_record(&record) else {
                    log_warn!("ignoring malformed checkpoint record from {host}: {record}");
                    continue;
                };
                *votes.entry((height, hash)).or_insert(0) += 1;
            }
        }

        if responders == 0 {
            return Err(CheckpointError::Io("no checkpoint DNS host answered".into()));
        }

        let quorum = hosts.len() / 2 + 1;
        let mut loaded = 0usize;
        for ((height, hash), count) in votes {
            if count >= quorum {
                self.add_checkpoint(height, &hash)?;
                loaded += 1;
            }
        }
        log_info!("merged {loaded} DNS checkpoints from {responders} hosts");
        Ok(loaded)
    }
}

fn parse_dns_record(record: &str) -> Option<(u32, String)> {
    let (height, hash) = record.trim().split_once(':')?;
    let height: u32 = height.trim().parse().ok()?;
    let hash = hash.trim();
    if hash.len() != 64 {
        return None;
    }
    Some((height, hash.to_ascii_lowercase()))
}
