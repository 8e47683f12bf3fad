use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{AccountSnapshot, Bar, Contract, Interval, Order, OrderReceipt, QuoteTick, Result, TradingHour};

/// Abstraction over the broker connection.
///
/// `BinanceClient` implements this for live trading.
/// `PaperBroker` implements this for simulated fills on live data.
///
/// Only `OrderExecutor` in `crates/engine` calls `place_order` /
/// `cancel_order`. The aggregator reads the account snapshot for sizing
/// and exit checks.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the session. Failures are logged by the caller; reconnecting
    /// is an operator action.
    async fn connect(&self) -> Result<()>;

    /// Submit one order leg and return the broker's acknowledgement.
    async fn place_order(&self, order: &Order) -> Result<OrderReceipt>;

    /// Cancel a previously placed order by its client order id.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Buying power, open positions and open orders.
    async fn account(&self) -> Result<AccountSnapshot>;
}

/// Candle batches for one (contract, interval) subscription.
///
/// File-backed sources set `ack`: the consumer must send one `()` after each
/// processed batch before the next sample is released.
pub struct CandleFeed {
    pub batches: mpsc::Receiver<Vec<Bar>>,
    pub ack: Option<mpsc::Sender<()>>,
}

impl CandleFeed {
    /// A push-based feed with no acknowledgement channel.
    pub fn streaming(batches: mpsc::Receiver<Vec<Bar>>) -> Self {
        Self { batches, ack: None }
    }

    pub fn is_pull_based(&self) -> bool {
        self.ack.is_some()
    }
}

/// Market data subscriptions consumed by each watcher.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Subscribe to candle batches. The first batch may carry up to
    /// `buffer_size` bars of history.
    async fn candles(
        &self,
        contract: &Contract,
        interval: Interval,
        buffer_size: usize,
    ) -> Result<CandleFeed>;

    /// Subscribe to single-field quote ticks.
    async fn quotes(&self, contract: &Contract) -> Result<mpsc::Receiver<QuoteTick>>;

    /// Venue session windows for `contract`.
    async fn trading_hours(&self, contract: &Contract) -> Result<Vec<TradingHour>>;
}
