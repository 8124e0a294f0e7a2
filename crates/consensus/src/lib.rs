//! Currency rules, checkpoints, and the consensus upgrade schedule.

pub mod checkpoints;
pub mod constants;
pub mod currency;
pub mod dns;
pub mod upgrades;

pub use checkpoints::Checkpoints;
pub use currency::{Currency, CurrencyBuilder, CurrencyError};
pub use upgrades::UpgradeSchedule;
