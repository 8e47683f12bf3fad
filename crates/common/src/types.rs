use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Asset class of a tradable instrument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Crypto,
    Forex,
    Future,
    Stock,
}

impl std::fmt::Display for SecurityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityType::Crypto => write!(f, "CRYPTO"),
            SecurityType::Forex => write!(f, "CASH"),
            SecurityType::Future => write!(f, "FUT"),
            SecurityType::Stock => write!(f, "STK"),
        }
    }
}

/// Immutable identity of a tradable instrument.
///
/// Equality and hashing are structural over all four fields. `label()` is the
/// canonical key used for de-duplication and grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "type")]
    pub security_type: SecurityType,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

impl Contract {
    pub fn new(
        security_type: SecurityType,
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            security_type,
            symbol: symbol.into(),
            exchange: exchange.into(),
            currency: currency.into(),
        }
    }

    pub fn crypto(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self::new(SecurityType::Crypto, symbol, exchange, "USDT")
    }

    pub fn label(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.security_type, self.exchange, self.symbol, self.currency
        )
    }
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Bar interval, in seconds. Deserializing rejects anything not positive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Interval(i64);

impl TryFrom<i64> for Interval {
    type Error = crate::Error;

    fn try_from(secs: i64) -> crate::Result<Self> {
        if secs <= 0 {
            return Err(crate::Error::Config(format!(
                "interval must be a positive number of seconds, got {secs}"
            )));
        }
        Ok(Self(secs))
    }
}

impl From<Interval> for i64 {
    fn from(interval: Interval) -> Self {
        interval.0
    }
}

impl Interval {
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.0)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One OHLCV sample. `open_time` is the identity and ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub interval: Interval,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn close_time(&self) -> DateTime<Utc> {
        self.open_time + self.interval.duration()
    }
}

/// A single-field market data update. Each tick carries exactly one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum QuoteTick {
    Bid(f64),
    Ask(f64),
    Last(f64),
    Volume(f64),
}

/// Latest known quote for one instrument. Fields are updated independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub last_price: Option<f64>,
    pub volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            bid_price: None,
            ask_price: None,
            last_price: None,
            volume: None,
            timestamp,
        }
    }

    /// Overwrite only the field the tick carries and restamp.
    pub fn apply(&mut self, tick: QuoteTick, now: DateTime<Utc>) {
        match tick {
            QuoteTick::Bid(v) => self.bid_price = Some(v),
            QuoteTick::Ask(v) => self.ask_price = Some(v),
            QuoteTick::Last(v) => self.last_price = Some(v),
            QuoteTick::Volume(v) => self.volume = Some(v),
        }
        self.timestamp = now;
    }
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn is_long(&self) -> bool {
        matches!(self, Direction::Long)
    }

    /// Side of the order that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that closes a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Trade signal voted by a strategy. Compared by value when tallying votes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn long(confidence: f64) -> Self {
        Self::new(Direction::Long, confidence)
    }

    pub fn short(confidence: f64) -> Self {
        Self::new(Direction::Short, confidence)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:.2}", self.direction, self.confidence)
    }
}

/// Named values describing the pattern a strategy identified.
pub type PatternInfo = BTreeMap<String, f64>;

/// A managed position for one watcher.
///
/// Never mutated in place: the watcher's state only ever swaps whole values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_bar: Bar,
    pub signal: Signal,
    pub price: f64,
    pub stop_price: f64,
    pub units: f64,
    pub pattern_info: PatternInfo,
}

impl Trade {
    pub fn is_long(&self) -> bool {
        self.signal.direction.is_long()
    }

    /// True when `close` has crossed the protective stop.
    pub fn stop_hit(&self, close: f64) -> bool {
        match self.signal.direction {
            Direction::Long => close <= self.stop_price,
            Direction::Short => close >= self.stop_price,
        }
    }

    /// Realized profit of closing at `exit_price`, signed by direction.
    pub fn profit_at(&self, exit_price: f64) -> f64 {
        match self.signal.direction {
            Direction::Long => (exit_price - self.price) * self.units,
            Direction::Short => (self.price - exit_price) * self.units,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// One venue session window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingHour {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub status: SessionStatus,
}

/// A scheduled market-moving event, used as a sizing risk input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub title: String,
    pub time: DateTime<Utc>,
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
    Stop { price: f64 },
}

/// An order to be submitted to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub contract: Contract,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Parent leg of a bracket; children activate once the parent fills.
    pub parent_id: Option<String>,
    /// One-cancels-all group shared by the protective legs of a bracket.
    pub oca_group: Option<String>,
    /// False on every bracket leg except the last, so the broker holds them
    /// until the whole bracket has arrived.
    pub transmit: bool,
}

impl Order {
    fn build(contract: &Contract, side: OrderSide, quantity: f64, kind: OrderKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contract: contract.clone(),
            side,
            quantity,
            kind,
            parent_id: None,
            oca_group: None,
            transmit: true,
        }
    }

    pub fn market(contract: &Contract, side: OrderSide, quantity: f64) -> Self {
        Self::build(contract, side, quantity, OrderKind::Market)
    }

    pub fn limit(contract: &Contract, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self::build(contract, side, quantity, OrderKind::Limit { price })
    }

    pub fn stop(contract: &Contract, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self::build(contract, side, quantity, OrderKind::Stop { price })
    }

    pub fn price(&self) -> Option<f64> {
        match self.kind {
            OrderKind::Market => None,
            OrderKind::Limit { price } | OrderKind::Stop { price } => Some(price),
        }
    }
}

/// Broker acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub broker_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A position held at the broker. `quantity` is signed: negative is short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub contract: Contract,
    pub quantity: f64,
    pub average_price: f64,
}

/// Point-in-time view of the trading account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub buying_power: f64,
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
}

impl AccountSnapshot {
    /// The open position for `contract`, if any quantity is held.
    pub fn position_for(&self, contract: &Contract) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.contract.label() == contract.label() && p.quantity != 0.0)
    }
}

/// Completed trade handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub contract_label: String,
    pub interval: Interval,
    pub is_long: bool,
    pub entry_price: f64,
    pub exit_price: f64,
    pub units: f64,
    pub profit: f64,
    pub stop_hit: bool,
    pub confidence: f64,
    pub mode: TradingMode,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Whether the process trades against a real broker, a simulated broker on
/// live data, or replays historical data with hypothetical fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
    Simulation,
}

impl TradingMode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, TradingMode::Simulation)
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Simulation => write!(f, "simulation"),
        }
    }
}

/// Reason an entry was not armed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    MarketClosed,
    SessionEndingSoon,
    TradeAlreadyActive,
    NoQuote,
    InvalidSize,
    NoStopLoss,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::MarketClosed => write!(f, "market closed"),
            RejectionReason::SessionEndingSoon => write!(f, "session closes too soon"),
            RejectionReason::TradeAlreadyActive => write!(f, "trade already active"),
            RejectionReason::NoQuote => write!(f, "no live quote"),
            RejectionReason::InvalidSize => write!(f, "unit size not positive"),
            RejectionReason::NoStopLoss => write!(f, "stop-loss unavailable"),
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}
