use common::{Bar, Error, Result};

/// Average True Range with Wilder smoothing.
///
/// The first `period` true ranges seed a simple average; later ones are
/// folded in as `(prev * (n - 1) + tr) / n`.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    pub period: usize,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Result<Self> {
        if period < 1 {
            return Err(Error::Config("ATR period must be >= 1".into()));
        }
        Ok(Self { period })
    }

    /// ATR over `bars` (oldest first). `None` until `period + 1` bars exist,
    /// so every true range has a previous close.
    pub fn compute(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < self.period + 1 {
            return None;
        }

        let ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let bar = &w[1];
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            })
            .collect();

        let n = self.period as f64;
        let mut atr = ranges[..self.period].iter().sum::<f64>() / n;
        for &tr in &ranges[self.period..] {
            atr = (atr * (n - 1.0) + tr) / n;
        }
        Some(atr)
    }
}
