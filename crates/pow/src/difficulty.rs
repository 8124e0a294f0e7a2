//! Next-block difficulty from a trailing window of block data.

#[derive(Clone, Copy, Debug)]
pub struct DifficultyConfig {
    /// Target seconds between blocks.
    pub target: u64,
    /// Blocks considered per retarget.
    pub window: usize,
    /// Outliers dropped from each end of the sorted timestamp window.
    pub cut: usize,
}

impl DifficultyConfig {
    pub fn new(target: u64, window: usize, cut: usize) -> Self {
        debug_assert!(window > 2 * cut);
        Self {
            target,
            window,
            cut,
        }
    }
}

/// Difficulty the next block must meet.
///
/// `timestamps` and `cumulative_difficulties` are parallel slices for the
/// most recent blocks, oldest first; callers pass at most `window` entries.
/// Timestamps are sorted before the outlier cut so a single skewed clock
/// cannot steer the retarget.
pub fn next_difficulty(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    config: &DifficultyConfig,
) -> u64 {
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());
    let length = timestamps.len().min(config.window);
    if length <= 1 {
        return 1;
    }
    let timestamps = &timestamps[timestamps.len() - length..];
    let cumulative = &cumulative_difficulties[cumulative_difficulties.len() - length..];

    let mut sorted: Vec<u64> = timestamps.to_vec();
    sorted.sort_unstable();

    let keep = config.window - 2 * config.cut;
    let (cut_begin, cut_end) = if length <= keep {
        (0, length)
    } else {
        let begin = (length - keep + 1) / 2;
        (begin, begin + keep)
    };
    debug_assert!(cut_begin + 2 <= cut_end);

    let time_span = (sorted[cut_end - 1] - sorted[cut_begin]).max(1);
    let total_work = cumulative[cut_end - 1] - cumulative[cut_begin];
    debug_assert!(total_work > 0);

    let product = total_work as u128 * config.target as u128;
    let adjusted = (product + time_span as u128 - 1) / time_span as u128;
    u64::try_from(adjusted).unwrap_or(u64::MAX)
}
