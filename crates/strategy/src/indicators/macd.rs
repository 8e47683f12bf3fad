use common::{Error, Result};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal line = EMA(macd_line, signal).
/// A reading reports the latest values and whether the MACD line crossed
/// the signal line on the latest bar.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCross {
    Bullish, // MACD crossed above signal line
    Bearish, // MACD crossed below signal line
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub cross: MacdCross,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast < 1 || fast >= slow {
            return Err(Error::Config(format!(
                "MACD fast period must be at least 1 and less than slow period, got {fast}/{slow}"
            )));
        }
        if signal < 1 {
            return Err(Error::Config("MACD signal period must be >= 1".into()));
        }
        Ok(Self { fast, slow, signal })
    }

    /// Needs at least `slow + signal` closes (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<MacdReading> {
        if closes.len() < self.slow + self.signal {
            return None;
        }

        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);
        // Both series are aligned to `closes`; the MACD line is only
        // meaningful once the slow EMA is seeded.
        let macd_line: Vec<f64> = fast[self.slow - 1..]
            .iter()
            .zip(&slow[self.slow - 1..])
            .map(|(f, s)| f - s)
            .collect();
        let signal_line = ema_series(&macd_line, self.signal);

        let n = macd_line.len();
        if n < self.signal + 1 {
            return None;
        }
        let (prev_macd, curr_macd) = (macd_line[n - 2], macd_line[n - 1]);
        let (prev_sig, curr_sig) = (signal_line[n - 2], signal_line[n - 1]);

        let cross = if prev_macd <= prev_sig && curr_macd > curr_sig {
            MacdCross::Bullish
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            MacdCross::Bearish
        } else {
            MacdCross::None
        };

        Some(MacdReading {
            cross,
            macd: curr_macd,
            signal: curr_sig,
            histogram: curr_macd - curr_sig,
        })
    }
}

/// EMA aligned index-for-index with `data`, seeded with the SMA of the first
/// `period` values. Entries before the seed repeat the running average.
fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    if data.is_empty() {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut sum = 0.0;
    let mut value = 0.0;
    for (i, &price) in data.iter().enumerate() {
        if i < period {
            sum += price;
            value = sum / (i + 1) as f64;
        } else {
            value = price * k + value * (1.0 - k);
        }
        out.push(value);
    }
    out
}
