pub mod aggregator;
pub mod binance;
pub mod cancel;
pub mod candle_window;
pub mod executor;
pub mod manager;
pub mod stats;
pub mod store;
pub mod watcher;
pub mod watcher_state;

pub use aggregator::{
    AggregatorId, AggregatorSettings, Collaborators, Request, RequestKey, SettingsPatch,
    TradeAggregator,
};
pub use binance::{BinanceBroker, BinanceMarketData};
pub use cancel::CancelSignal;
pub use candle_window::{max_candles_count, CandleWindow};
pub use executor::OrderExecutor;
pub use manager::{TradeManager, WatcherGroup};
pub use stats::{SimulationResult, SimulationStats, SimulationSummary};
pub use store::SqliteTradeStore;
pub use watcher::{watcher_id, Watcher, WatcherSpec};
pub use watcher_state::{WatcherSnapshot, WatcherState};
