//! Strategies shipped with the engine.
//!
//! Both size positions with the risk-per-trade rule from `risk::sizing` and
//! place their protective stop one ATR multiple away from the entry.

use common::{Announcement, Bar, Direction, PatternInfo, Result, Signal, Trade};
use risk::{position_units, SizingInput};

use crate::config::{param_f64, param_usize, StrategyParams};
use crate::indicators::{AtrIndicator, MacdCross, MacdIndicator, MacdReading, RsiIndicator, RsiZone};
use crate::Strategy;

/// Stop, target and sizing parameters shared by the built-ins.
#[derive(Debug, Clone)]
struct RiskParams {
    atr_multiplier: f64,
    take_profit_multiplier: f64,
    risk_fraction: f64,
    lot_size: f64,
}

impl RiskParams {
    fn from_params(params: &StrategyParams) -> Self {
        Self {
            atr_multiplier: param_f64(params, "atr_multiplier", 2.0),
            take_profit_multiplier: param_f64(params, "take_profit_multiplier", 0.0),
            risk_fraction: param_f64(params, "risk_fraction", 0.01),
            lot_size: param_f64(params, "lot_size", 1.0),
        }
    }

    fn stop(&self, atr: Option<f64>, entry: f64, direction: Direction) -> Option<f64> {
        let distance = atr? * self.atr_multiplier;
        if !(distance > 0.0) || !entry.is_finite() {
            return None;
        }
        let stop = match direction {
            Direction::Long => entry - distance,
            Direction::Short => entry + distance,
        };
        (stop > 0.0).then_some(stop)
    }

    fn target(&self, atr: Option<f64>, entry: f64, direction: Direction) -> Option<f64> {
        if self.take_profit_multiplier <= 0.0 {
            return None;
        }
        let distance = atr? * self.take_profit_multiplier;
        match direction {
            Direction::Long => Some(entry + distance),
            Direction::Short => Some(entry - distance).filter(|p| *p > 0.0),
        }
    }

    fn units(
        &self,
        entry_bar: &Bar,
        stop: f64,
        equity: f64,
        fee: f64,
        next_announcement: Option<&Announcement>,
    ) -> f64 {
        position_units(&SizingInput {
            equity,
            fee,
            entry_price: entry_bar.close,
            stop_price: stop,
            risk_fraction: self.risk_fraction,
            lot_size: self.lot_size,
            entry_time: entry_bar.close_time(),
            next_announcement: next_announcement.cloned(),
        })
    }
}

fn closes(candles: &[Bar]) -> Vec<f64> {
    candles.iter().map(|b| b.close).collect()
}

// ─── RSI reversal ─────────────────────────────────────────────────────────────

/// Fades RSI extremes: long when oversold, short when overbought. Exits once
/// RSI crosses back through the midline.
#[derive(Debug, Clone)]
pub struct RsiReversalStrategy {
    candles: Vec<Bar>,
    rsi: Option<f64>,
    atr: Option<f64>,
    zone: RsiZone,
    risk: RiskParams,
}

impl RsiReversalStrategy {
    /// Fails with `Error::Config` when the parameters describe no valid
    /// indicator, so a bad watch list is caught before any candle arrives.
    pub fn new(candles: Vec<Bar>, params: &StrategyParams) -> Result<Self> {
        let indicator = RsiIndicator::new(
            param_usize(params, "period", 14),
            param_f64(params, "overbought", 70.0),
            param_f64(params, "oversold", 30.0),
        )?;
        let rsi = indicator.compute(&closes(&candles));
        let atr = AtrIndicator::new(param_usize(params, "atr_period", 14))?.compute(&candles);
        let zone = rsi.map(|v| indicator.zone(v)).unwrap_or(RsiZone::Neutral);

        Ok(Self {
            candles,
            rsi,
            atr,
            zone,
            risk: RiskParams::from_params(params),
        })
    }
}

impl Strategy for RsiReversalStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn candles(&self) -> &[Bar] {
        &self.candles
    }

    fn pattern(&self) -> Option<Signal> {
        match self.zone {
            RsiZone::Oversold(depth) => Some(Signal::long(depth)),
            RsiZone::Overbought(depth) => Some(Signal::short(depth)),
            RsiZone::Neutral => None,
        }
    }

    fn units(&self, equity: f64, fee: f64, next_announcement: Option<&Announcement>) -> f64 {
        let (Some(signal), Some(bar)) = (self.pattern(), self.entry_bar()) else {
            return 0.0;
        };
        match self.adjust_stop_loss(bar.close, signal.direction) {
            Some(stop) => self.risk.units(bar, stop, equity, fee, next_announcement),
            None => 0.0,
        }
    }

    fn adjust_stop_loss(&self, entry_price: f64, direction: Direction) -> Option<f64> {
        self.risk.stop(self.atr, entry_price, direction)
    }

    fn take_profit(&self, entry_price: f64, direction: Direction) -> Option<f64> {
        self.risk.target(self.atr, entry_price, direction)
    }

    fn should_exit(&self, trade: &Trade) -> bool {
        match (self.rsi, trade.signal.direction) {
            (Some(rsi), Direction::Long) => rsi >= 50.0,
            (Some(rsi), Direction::Short) => rsi <= 50.0,
            (None, _) => false,
        }
    }

    fn pattern_information(&self) -> PatternInfo {
        let mut info = PatternInfo::new();
        if let Some(rsi) = self.rsi {
            info.insert("rsi".into(), rsi);
        }
        if let Some(atr) = self.atr {
            info.insert("atr".into(), atr);
        }
        if let Some(bar) = self.candles.last() {
            info.insert("close".into(), bar.close);
        }
        info
    }
}

// ─── MACD crossover ───────────────────────────────────────────────────────────

/// Trades MACD/signal crossovers. Confidence grows with the histogram size
/// relative to ATR; exits on the opposite crossover or when the histogram
/// flips against the position.
#[derive(Debug, Clone)]
pub struct MacdCrossStrategy {
    candles: Vec<Bar>,
    reading: Option<MacdReading>,
    atr: Option<f64>,
    risk: RiskParams,
}

impl MacdCrossStrategy {
    pub fn new(candles: Vec<Bar>, params: &StrategyParams) -> Result<Self> {
        let indicator = MacdIndicator::new(
            param_usize(params, "fast", 12),
            param_usize(params, "slow", 26),
            param_usize(params, "signal", 9),
        )?;
        let reading = indicator.compute(&closes(&candles));
        let atr = AtrIndicator::new(param_usize(params, "atr_period", 14))?.compute(&candles);

        Ok(Self {
            candles,
            reading,
            atr,
            risk: RiskParams::from_params(params),
        })
    }

    fn confidence(&self, reading: &MacdReading) -> f64 {
        match self.atr {
            Some(atr) if atr > 0.0 => (reading.histogram.abs() / atr).min(1.0),
            _ => 0.0,
        }
    }
}

impl Strategy for MacdCrossStrategy {
    fn name(&self) -> &str {
        "macd"
    }

    fn candles(&self) -> &[Bar] {
        &self.candles
    }

    fn pattern(&self) -> Option<Signal> {
        let reading = self.reading.as_ref()?;
        match reading.cross {
            MacdCross::Bullish => Some(Signal::long(self.confidence(reading))),
            MacdCross::Bearish => Some(Signal::short(self.confidence(reading))),
            MacdCross::None => None,
        }
    }

    fn units(&self, equity: f64, fee: f64, next_announcement: Option<&Announcement>) -> f64 {
        let (Some(signal), Some(bar)) = (self.pattern(), self.entry_bar()) else {
            return 0.0;
        };
        match self.adjust_stop_loss(bar.close, signal.direction) {
            Some(stop) => self.risk.units(bar, stop, equity, fee, next_announcement),
            None => 0.0,
        }
    }

    fn adjust_stop_loss(&self, entry_price: f64, direction: Direction) -> Option<f64> {
        self.risk.stop(self.atr, entry_price, direction)
    }

    fn take_profit(&self, entry_price: f64, direction: Direction) -> Option<f64> {
        self.risk.target(self.atr, entry_price, direction)
    }

    fn should_exit(&self, trade: &Trade) -> bool {
        let Some(reading) = self.reading else {
            return false;
        };
        match trade.signal.direction {
            Direction::Long => reading.cross == MacdCross::Bearish || reading.histogram < 0.0,
            Direction::Short => reading.cross == MacdCross::Bullish || reading.histogram > 0.0,
        }
    }

    fn pattern_information(&self) -> PatternInfo {
        let mut info = PatternInfo::new();
        if let Some(r) = self.reading {
            info.insert("macd".into(), r.macd);
            info.insert("signal".into(), r.signal);
            info.insert("histogram".into(), r.histogram);
        }
        if let Some(atr) = self.atr {
            info.insert("atr".into(), atr);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use common::Interval;

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                open_time: DateTime::from_timestamp(i as i64 * 60, 0).unwrap(),
                interval: Interval::from_secs(60),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: Some(1.0),
            })
            .collect()
    }

    fn falling(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64).collect()
    }

    fn small_params() -> StrategyParams {
        let mut p = StrategyParams::new();
        p.insert("period".into(), toml::Value::Integer(5));
        p.insert("atr_period".into(), toml::Value::Integer(5));
        p
    }

    #[test]
    fn rsi_oversold_votes_long_with_entry_bar() {
        let s = RsiReversalStrategy::new(bars_from(&falling(30)), &small_params()).unwrap();
        let signal = s.pattern().unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.confidence > 0.9, "all-loss series is deeply oversold");
        assert_eq!(s.entry_bar().unwrap().close, 171.0);
        assert!(s.pattern_information().contains_key("rsi"));
    }

    #[test]
    fn rsi_short_window_has_no_pattern_and_no_units() {
        let s = RsiReversalStrategy::new(bars_from(&[100.0, 99.0]), &small_params()).unwrap();
        assert!(s.pattern().is_none());
        assert!(s.entry_bar().is_none());
        assert_eq!(s.units(10_000.0, 1.0, None), 0.0);
        assert!(s.adjust_stop_loss(100.0, Direction::Long).is_none());
    }

    #[test]
    fn rsi_stop_is_atr_multiple_below_long_entry() {
        let s = RsiReversalStrategy::new(bars_from(&falling(30)), &small_params()).unwrap();
        // each bar: range 1.0, gap from previous close 1.5 below => TR = 1.5
        let stop = s.adjust_stop_loss(171.0, Direction::Long).unwrap();
        assert!((stop - 168.0).abs() < 1e-9, "got {stop}");
        let short_stop = s.adjust_stop_loss(171.0, Direction::Short).unwrap();
        assert!((short_stop - 174.0).abs() < 1e-9);
        assert!(s.units(10_000.0, 0.0, None) > 0.0);
    }

    #[test]
    fn rsi_exits_long_once_back_above_midline() {
        let mut closes = falling(30);
        closes.extend((0..10).map(|i| 171.0 + i as f64 * 2.0));
        let s = RsiReversalStrategy::new(bars_from(&closes), &small_params()).unwrap();
        let trade = Trade {
            entry_bar: bars_from(&[171.0]).remove(0),
            signal: Signal::long(0.8),
            price: 171.0,
            stop_price: 168.0,
            units: 1.0,
            pattern_info: PatternInfo::new(),
        };
        assert!(s.should_exit(&trade));
    }

    #[test]
    fn macd_without_cross_has_no_pattern() {
        // accelerating uptrend: MACD stays above its signal line
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + 0.05 * (i * i) as f64).collect();
        let s = MacdCrossStrategy::new(bars_from(&closes), &StrategyParams::new()).unwrap();
        assert!(s.pattern().is_none());
        assert!(s.pattern_information()["histogram"] > 0.0);
    }

    #[test]
    fn inverted_rsi_thresholds_are_refused() {
        let mut params = small_params();
        params.insert("oversold".into(), toml::Value::Integer(80));
        params.insert("overbought".into(), toml::Value::Integer(70));
        let err = RsiReversalStrategy::new(Vec::new(), &params).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn macd_zero_signal_is_refused() {
        let mut params = StrategyParams::new();
        params.insert("signal".into(), toml::Value::Integer(0));
        assert!(MacdCrossStrategy::new(Vec::new(), &params).is_err());
    }

    #[test]
    fn take_profit_only_when_configured() {
        let mut params = small_params();
        let s = RsiReversalStrategy::new(bars_from(&falling(30)), &params).unwrap();
        assert!(s.take_profit(171.0, Direction::Long).is_none());

        params.insert("take_profit_multiplier".into(), toml::Value::Float(3.0));
        let s = RsiReversalStrategy::new(bars_from(&falling(30)), &params).unwrap();
        let target = s.take_profit(171.0, Direction::Long).unwrap();
        assert!((target - 175.5).abs() < 1e-9);
    }
}
