pub mod atr;
pub mod macd;
pub mod rsi;

pub use atr::AtrIndicator;
pub use macd::{MacdCross, MacdIndicator, MacdReading};
pub use rsi::{RsiIndicator, RsiZone};
