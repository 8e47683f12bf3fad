pub mod builtin;
pub mod config;
pub mod indicators;
pub mod registry;

pub use builtin::{MacdCrossStrategy, RsiReversalStrategy};
pub use config::{StrategyParams, WatchConfig, WatchlistConfig};
pub use registry::{StrategyBuilder, StrategyRegistry};

use common::{Announcement, Bar, Direction, PatternInfo, Signal, Trade};

/// Immutable evaluation of one candle window.
///
/// A new value is built from the window after every candle batch; nothing
/// in it changes afterwards, so it can be shared freely between the
/// watcher and the aggregator.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Registered name of the strategy kind, e.g. `"rsi"`.
    fn name(&self) -> &str;

    /// The window this value was built from (oldest first).
    fn candles(&self) -> &[Bar];

    /// The signal of the pattern identified on the latest bar, if any.
    fn pattern(&self) -> Option<Signal>;

    /// The bar a trade would be entered on. Only present with a pattern.
    fn entry_bar(&self) -> Option<&Bar> {
        self.pattern().and(self.candles().last())
    }

    /// Units to trade for the identified pattern given account equity, a
    /// flat fee, and the next scheduled announcement. `0.0` means no entry.
    fn units(&self, equity: f64, fee: f64, next_announcement: Option<&Announcement>) -> f64;

    /// Protective stop for an entry at `entry_price`, or `None` when the
    /// window is too short to place one.
    fn adjust_stop_loss(&self, entry_price: f64, direction: Direction) -> Option<f64>;

    /// Optional profit target for the bracket's third leg.
    fn take_profit(&self, _entry_price: f64, _direction: Direction) -> Option<f64> {
        None
    }

    /// Whether the strategy itself wants out of `trade` on the latest bar.
    fn should_exit(&self, trade: &Trade) -> bool;

    fn pattern_information(&self) -> PatternInfo;
}
