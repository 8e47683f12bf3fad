//! In-memory collaborators shared by the engine integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use common::{
    AccountSnapshot, Announcement, Bar, Broker, CandleFeed, Contract, Direction, Error, Interval,
    MarketData, NoopTradeStore, Notifier, Order, OrderReceipt, PatternInfo, QuoteTick, Result,
    SessionStatus, Signal, StaticCalendar, Trade, TradingHour, TradingMode,
};
use engine::{Collaborators, OrderExecutor, SimulationStats};
use strategy::Strategy;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn bar(open_secs: i64, interval: Interval, close: f64) -> Bar {
    Bar {
        open_time: at(open_secs),
        interval,
        open: close,
        high: close,
        low: close,
        close,
        volume: Some(1.0),
    }
}

pub fn btc() -> Contract {
    Contract::crypto("BTCUSDT", "BINANCE")
}

/// Votes a fixed signal on any non-empty window; stop five below/above the
/// entry, ten units. Asks to exit only when built with `exiting`.
#[derive(Debug)]
pub struct FixedStrategy {
    candles: Vec<Bar>,
    signal: Signal,
    exit: bool,
}

impl FixedStrategy {
    pub fn new(candles: Vec<Bar>, direction: Direction, confidence: f64) -> Self {
        Self {
            candles,
            signal: Signal::new(direction, confidence),
            exit: false,
        }
    }

    pub fn exiting(mut self) -> Self {
        self.exit = true;
        self
    }
}

impl Strategy for FixedStrategy {
    fn name(&self) -> &str {
        "fixed"
    }

    fn candles(&self) -> &[Bar] {
        &self.candles
    }

    fn pattern(&self) -> Option<Signal> {
        (!self.candles.is_empty()).then_some(self.signal)
    }

    fn units(&self, _equity: f64, _fee: f64, _next: Option<&Announcement>) -> f64 {
        10.0
    }

    fn adjust_stop_loss(&self, entry_price: f64, direction: Direction) -> Option<f64> {
        Some(match direction {
            Direction::Long => entry_price - 5.0,
            Direction::Short => entry_price + 5.0,
        })
    }

    fn should_exit(&self, _trade: &Trade) -> bool {
        self.exit
    }

    fn pattern_information(&self) -> PatternInfo {
        PatternInfo::from([("confidence".to_string(), self.signal.confidence)])
    }
}

/// Never identifies a pattern.
#[derive(Debug)]
pub struct QuietStrategy {
    candles: Vec<Bar>,
}

impl QuietStrategy {
    pub fn new(candles: Vec<Bar>) -> Self {
        Self { candles }
    }
}

impl Strategy for QuietStrategy {
    fn name(&self) -> &str {
        "quiet"
    }

    fn candles(&self) -> &[Bar] {
        &self.candles
    }

    fn pattern(&self) -> Option<Signal> {
        None
    }

    fn units(&self, _: f64, _: f64, _: Option<&Announcement>) -> f64 {
        0.0
    }

    fn adjust_stop_loss(&self, _: f64, _: Direction) -> Option<f64> {
        None
    }

    fn should_exit(&self, _: &Trade) -> bool {
        false
    }

    fn pattern_information(&self) -> PatternInfo {
        PatternInfo::new()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub entries: Mutex<Vec<(Contract, Trade)>>,
    pub exits: Mutex<Vec<(Contract, Trade, Bar)>>,
    pub pattern_changes: Mutex<Vec<Option<Signal>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn on_entry(&self, contract: &Contract, trade: &Trade, _recent_bar: &Bar) {
        self.entries.lock().await.push((contract.clone(), trade.clone()));
    }

    async fn on_exit(&self, contract: &Contract, trade: &Trade, recent_bar: &Bar) {
        self.exits
            .lock()
            .await
            .push((contract.clone(), trade.clone(), recent_bar.clone()));
    }

    async fn on_pattern_info_changed(
        &self,
        _contract: &Contract,
        _interval: Interval,
        signal: Option<Signal>,
        _info: &PatternInfo,
    ) {
        self.pattern_changes.lock().await.push(signal);
    }
}

/// Broker that records every order and serves a configurable account.
/// While `reject_orders` is set every order fails and nothing is recorded.
#[derive(Default)]
pub struct RecordingBroker {
    pub placed: Mutex<Vec<Order>>,
    pub cancelled: Mutex<Vec<String>>,
    pub account: Mutex<AccountSnapshot>,
    pub reject_orders: Mutex<bool>,
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<OrderReceipt> {
        if *self.reject_orders.lock().await {
            return Err(Error::Exchange("rejected".into()));
        }
        self.placed.lock().await.push(order.clone());
        Ok(OrderReceipt {
            order_id: order.id.clone(),
            broker_id: order.id.clone(),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled.lock().await.push(order_id.to_string());
        Ok(())
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        Ok(self.account.lock().await.clone())
    }
}

/// Test handle on one scripted candle subscription.
pub struct Script {
    tx: mpsc::Sender<Vec<Bar>>,
    ack: mpsc::Receiver<()>,
}

impl Script {
    /// Deliver a batch and wait until the watcher has processed it.
    pub async fn push(&mut self, bars: Vec<Bar>) {
        self.tx.send(bars).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.ack.recv())
            .await
            .expect("watcher did not acknowledge the batch")
            .expect("ack channel closed");
    }
}

/// Market data whose candle feeds are driven by the test, pull-based.
#[derive(Default)]
pub struct ScriptedMarket {
    feeds: Mutex<HashMap<Interval, CandleFeed>>,
    quote_senders: Mutex<Vec<mpsc::Sender<QuoteTick>>>,
}

impl ScriptedMarket {
    pub async fn script(&self, interval: Interval) -> Script {
        let (tx, rx) = mpsc::channel(16);
        let (ack_tx, ack_rx) = mpsc::channel(16);
        self.feeds.lock().await.insert(
            interval,
            CandleFeed {
                batches: rx,
                ack: Some(ack_tx),
            },
        );
        Script { tx, ack: ack_rx }
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn candles(&self, _: &Contract, interval: Interval, _: usize) -> Result<CandleFeed> {
        self.feeds
            .lock()
            .await
            .remove(&interval)
            .ok_or_else(|| Error::Replay(format!("no script for {interval}")))
    }

    async fn quotes(&self, _: &Contract) -> Result<mpsc::Receiver<QuoteTick>> {
        let (tx, rx) = mpsc::channel(16);
        self.quote_senders.lock().await.push(tx);
        Ok(rx)
    }

    async fn trading_hours(&self, _: &Contract) -> Result<Vec<TradingHour>> {
        Ok(open_session())
    }
}

/// A session open from an hour ago until ten hours from now.
pub fn open_session() -> Vec<TradingHour> {
    let now = Utc::now();
    vec![TradingHour {
        open_time: now - chrono::Duration::hours(1),
        close_time: now + chrono::Duration::hours(10),
        status: SessionStatus::Open,
    }]
}

pub fn collaborators(
    mode: TradingMode,
    broker: Arc<RecordingBroker>,
    notifier: Arc<RecordingNotifier>,
) -> Collaborators {
    Collaborators {
        mode,
        executor: Arc::new(OrderExecutor::new(broker, Duration::ZERO)),
        announcements: Arc::new(StaticCalendar::default()),
        notifier,
        store: Arc::new(NoopTradeStore),
        stats: Arc::new(SimulationStats::new()),
    }
}
