use common::{Error, Result};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Returns `None` until at least `period + 1` closes are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

/// Where an RSI reading sits relative to the configured thresholds.
/// The carried value is how far past the threshold the reading is, scaled
/// to `[0, 1]` by the remaining distance to the extreme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RsiZone {
    Oversold(f64),
    Neutral,
    Overbought(f64),
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self> {
        if period < 2 {
            return Err(Error::Config(format!("RSI period must be >= 2, got {period}")));
        }
        if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
            return Err(Error::Config(format!(
                "RSI thresholds must satisfy 0 < oversold < overbought < 100, got {oversold}/{overbought}"
            )));
        }
        Ok(Self { period, overbought, oversold })
    }

    /// Compute RSI from close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let n = self.period as f64;
        let (seed_gain, seed_loss) = changes[..self.period]
            .iter()
            .fold((0.0, 0.0), |(g, l), &c| (g + c.max(0.0), l + (-c).max(0.0)));

        let (avg_gain, avg_loss) = changes[self.period..].iter().fold(
            (seed_gain / n, seed_loss / n),
            |(g, l), &c| {
                (
                    (g * (n - 1.0) + c.max(0.0)) / n,
                    (l * (n - 1.0) + (-c).max(0.0)) / n,
                )
            },
        );

        if avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    pub fn zone(&self, rsi: f64) -> RsiZone {
        if rsi <= self.oversold {
            RsiZone::Oversold((self.oversold - rsi) / self.oversold)
        } else if rsi >= self.overbought {
            RsiZone::Overbought((rsi - self.overbought) / (100.0 - self.overbought))
        } else {
            RsiZone::Neutral
        }
    }
}
