//! Consensus version schedule.
//!
//! Each entry says "from this height on, block headers must carry this
//! major version". The base version 1 applies below the first entry.

pub const BASE_MAJOR_VERSION: u8 = 1;

#[derive(Clone, Debug)]
pub struct UpgradeSchedule {
    /// `(major_version, activation_height)`, strictly ascending in both.
    entries: Vec<(u8, u32)>,
}

impl UpgradeSchedule {
    pub fn new(entries: Vec<(u8, u32)>) -> Self {
        debug_assert!(entries
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0 && pair[0].1 < pair[1].1));
        Self { entries }
    }

    /// The major version a block at `height` must carry: the target of the
    /// highest entry whose activation height is at or below `height`.
    pub fn expected_major_version(&self, height: u32) -> u8 {
        for (version, activation) in self.entries.iter().rev() {
            if *activation <= height {
                return *version;
            }
        }
        BASE_MAJOR_VERSION
    }

    pub fn activation_height(&self, version: u8) -> Option<u32> {
        if version == BASE_MAJOR_VERSION {
            return Some(0);
        }
        self.entries
            .iter()
            .find(|(entry_version, _)| *entry_version == version)
            .map(|(_, height)| *height)
    }

    /// Next scheduled activation strictly above `height`, if any.
    pub fn next_upgrade(&self, height: u32) -> Option<(u8, u32)> {
        self.entries
            .iter()
            .find(|(_, activation)| *activation > height)
            .copied()
    }

    pub fn max_version(&self) -> u8 {
        self.entries
            .last()
            .map(|(version, _)| *version)
            .unwrap_or(BASE_MAJOR_VERSION)
    }
}
