use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use common::{Quote, QuoteTick, Signal, Trade, TradingHour};
use strategy::Strategy;

#[derive(Debug, Default)]
struct Inner {
    quote: Option<Quote>,
    strategy: Option<Arc<dyn Strategy>>,
    active_trade: Option<Trade>,
    trading_hours: Vec<TradingHour>,
}

/// Mutable facts of one watcher, shared by its quote, candle and
/// trading-hours tasks and by the aggregator.
///
/// Every operation takes the same lock, so no caller can observe a
/// partially written quote or trade, and read-modify-write sequences
/// (`apply_quote_tick`, `open_trade`) are atomic.
#[derive(Debug, Default)]
pub struct WatcherState {
    inner: Mutex<Inner>,
}

/// Point-in-time copy of a watcher's state for display.
#[derive(Debug, Clone, Serialize)]
pub struct WatcherSnapshot {
    pub quote: Option<Quote>,
    pub signal: Option<Signal>,
    pub candles: usize,
    pub active_trade: Option<Trade>,
    pub trading_hours: Vec<TradingHour>,
}

impl WatcherState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn quote(&self) -> Option<Quote> {
        self.inner.lock().await.quote.clone()
    }

    /// Overwrite only the field `tick` carries, creating the quote on first
    /// use. Returns the merged quote.
    pub async fn apply_quote_tick(&self, tick: QuoteTick, now: DateTime<Utc>) -> Quote {
        let mut inner = self.inner.lock().await;
        let quote = inner.quote.get_or_insert_with(|| Quote::empty(now));
        quote.apply(tick, now);
        quote.clone()
    }

    pub async fn strategy(&self) -> Option<Arc<dyn Strategy>> {
        self.inner.lock().await.strategy.clone()
    }

    /// Store a new strategy value and return the one it replaced.
    pub async fn update_strategy(&self, strategy: Arc<dyn Strategy>) -> Option<Arc<dyn Strategy>> {
        self.inner.lock().await.strategy.replace(strategy)
    }

    /// Signal of the current strategy value, if it identified a pattern.
    pub async fn signal(&self) -> Option<Signal> {
        self.inner
            .lock()
            .await
            .strategy
            .as_ref()
            .and_then(|s| s.pattern())
    }

    pub async fn active_trade(&self) -> Option<Trade> {
        self.inner.lock().await.active_trade.clone()
    }

    pub async fn update_active_trade(&self, trade: Option<Trade>) {
        self.inner.lock().await.active_trade = trade;
    }

    /// Store `trade` only if no trade is active. Returns whether it was stored.
    pub async fn open_trade(&self, trade: Trade) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active_trade.is_some() {
            return false;
        }
        inner.active_trade = Some(trade);
        true
    }

    pub async fn trading_hours(&self) -> Vec<TradingHour> {
        self.inner.lock().await.trading_hours.clone()
    }

    pub async fn update_trading_hours(&self, hours: Vec<TradingHour>) {
        self.inner.lock().await.trading_hours = hours;
    }

    pub async fn snapshot(&self) -> WatcherSnapshot {
        let inner = self.inner.lock().await;
        WatcherSnapshot {
            quote: inner.quote.clone(),
            signal: inner.strategy.as_ref().and_then(|s| s.pattern()),
            candles: inner.strategy.as_ref().map_or(0, |s| s.candles().len()),
            active_trade: inner.active_trade.clone(),
            trading_hours: inner.trading_hours.clone(),
        }
    }
}
