use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Announcement, Bar, Contract, Interval, PatternInfo, Result, Signal, Trade, TradeRecord};

/// Supplies the next scheduled market-moving event.
#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    async fn next_after(&self, after: DateTime<Utc>) -> Result<Option<Announcement>>;
}

/// Fixed, pre-loaded calendar of announcements.
#[derive(Debug, Clone, Default)]
pub struct StaticCalendar {
    events: Vec<Announcement>,
}

impl StaticCalendar {
    pub fn new(mut events: Vec<Announcement>) -> Self {
        events.sort_by_key(|a| a.time);
        Self { events }
    }
}

#[async_trait]
impl AnnouncementSource for StaticCalendar {
    async fn next_after(&self, after: DateTime<Utc>) -> Result<Option<Announcement>> {
        Ok(self.events.iter().find(|a| a.time > after).cloned())
    }
}

/// Receives trade lifecycle alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_entry(&self, contract: &Contract, trade: &Trade, recent_bar: &Bar);

    async fn on_exit(&self, contract: &Contract, trade: &Trade, recent_bar: &Bar);

    async fn on_pattern_info_changed(
        &self,
        contract: &Contract,
        interval: Interval,
        signal: Option<Signal>,
        info: &PatternInfo,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn on_entry(&self, _: &Contract, _: &Trade, _: &Bar) {}

    async fn on_exit(&self, _: &Contract, _: &Trade, _: &Bar) {}

    async fn on_pattern_info_changed(
        &self,
        _: &Contract,
        _: Interval,
        _: Option<Signal>,
        _: &PatternInfo,
    ) {
    }
}

/// Persistence of completed trades.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn save(&self, record: &TradeRecord) -> Result<()>;

    /// Most recent records first, optionally filtered by contract label.
    async fn query(&self, contract_label: Option<&str>, limit: i64) -> Result<Vec<TradeRecord>>;
}

/// Store that accepts everything and remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTradeStore;

#[async_trait]
impl TradeStore for NoopTradeStore {
    async fn save(&self, _record: &TradeRecord) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _contract_label: Option<&str>, _limit: i64) -> Result<Vec<TradeRecord>> {
        Ok(Vec::new())
    }
}
