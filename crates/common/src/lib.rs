pub mod collaborators;
pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use collaborators::{
    AnnouncementSource, NoopNotifier, NoopTradeStore, Notifier, StaticCalendar, TradeStore,
};
pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{Broker, CandleFeed, MarketData};
pub use types::*;
