use common::{Bar, Interval};

/// Horizons (seconds) a window should be able to cover for derived
/// higher-timeframe analysis.
const TARGET_HORIZONS: [i64; 3] = [900, 3600, 7200];

const BASE_CANDLES: usize = 200;

/// Bounded rolling view of recent bars for one instrument and interval.
///
/// Bars are unique by `open_time` and kept in strictly increasing order.
#[derive(Debug, Clone, Default)]
pub struct CandleWindow {
    bars: Vec<Bar>,
}

impl CandleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Merge a batch of incoming bars.
    ///
    /// A bar whose `open_time` matches an existing bar replaces it (the
    /// forming candle updated). Otherwise a bar strictly after the last one
    /// and at or beyond its `open_time + interval` is appended. Anything else
    /// arrived out of cadence and is dropped. An empty window takes its
    /// first bar as is.
    pub fn merge<I>(&mut self, incoming: I, interval: Interval)
    where
        I: IntoIterator<Item = Bar>,
    {
        for bar in incoming {
            let Some(last) = self.bars.last() else {
                self.bars.push(bar);
                continue;
            };

            let next_open = last.open_time + interval.duration();
            let after_last = bar.open_time > last.open_time && bar.open_time >= next_open;
            match self
                .bars
                .binary_search_by_key(&bar.open_time, |b| b.open_time)
            {
                Ok(idx) => self.bars[idx] = bar,
                Err(_) if after_last => self.bars.push(bar),
                Err(_) => {}
            }
        }
    }

    /// Drop the oldest bars until at most `max` remain.
    pub fn trim(&mut self, max: usize) {
        if self.bars.len() > max {
            let excess = self.bars.len() - max;
            self.bars.drain(..excess);
        }
    }
}

/// Window capacity for `interval`: 200 bars, scaled up so the window spans
/// the smallest target horizon strictly longer than one bar.
pub fn max_candles_count(interval: Interval) -> usize {
    let secs = interval.as_secs();
    let multiplier = TARGET_HORIZONS
        .iter()
        .find(|&&target| target > secs)
        .filter(|_| secs > 0)
        .map(|&target| (target / secs) as usize)
        .unwrap_or(1);
    BASE_CANDLES * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    const MINUTE: Interval = Interval::from_secs(60);

    fn bar(open_secs: i64, close: f64) -> Bar {
        Bar {
            open_time: DateTime::from_timestamp(open_secs, 0).unwrap(),
            interval: MINUTE,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }

    #[test]
    fn same_open_time_replaces_forming_bar() {
        let mut w = CandleWindow::new();
        w.merge([bar(0, 1.0), bar(60, 2.0)], MINUTE);
        w.merge([bar(60, 2.5)], MINUTE);
        assert_eq!(w.len(), 2);
        assert_eq!(w.last().unwrap().close, 2.5);
    }

    #[test]
    fn early_bar_is_dropped_and_on_cadence_bar_appended() {
        let mut w = CandleWindow::new();
        w.merge([bar(0, 1.0)], MINUTE);
        w.merge([bar(30, 9.0)], MINUTE);
        assert_eq!(w.len(), 1);
        w.merge([bar(60, 2.0)], MINUTE);
        assert_eq!(w.len(), 2);
        // gaps are fine, only early bars are rejected
        w.merge([bar(300, 3.0)], MINUTE);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn duplicate_in_first_batch_yields_two_bars_then_three() {
        let mut w = CandleWindow::new();
        w.merge([bar(0, 1.0), bar(60, 2.0), bar(60, 2.2)], MINUTE);
        assert_eq!(w.len(), 2);
        w.merge([bar(120, 3.0)], MINUTE);
        assert_eq!(w.len(), 3);
        assert_eq!(w.bars()[1].close, 2.2);
    }

    #[test]
    fn zero_interval_still_keeps_open_times_unique() {
        let zero = Interval::from_secs(0);
        let mut w = CandleWindow::new();
        w.merge([bar(0, 1.0), bar(0, 1.5), bar(0, 2.0)], zero);
        assert_eq!(w.len(), 1);
        assert_eq!(w.last().unwrap().close, 2.0);
    }

    #[test]
    fn trim_drops_oldest() {
        let mut w = CandleWindow::new();
        w.merge((0..10).map(|i| bar(i * 60, i as f64)), MINUTE);
        w.trim(4);
        assert_eq!(w.len(), 4);
        assert_eq!(w.bars()[0].close, 6.0);
        w.trim(10);
        assert_eq!(w.len(), 4);
    }

    #[test]
    fn capacity_scales_with_interval() {
        assert_eq!(max_candles_count(Interval::from_secs(60)), 200 * 15);
        assert_eq!(max_candles_count(Interval::from_secs(300)), 200 * 3);
        assert_eq!(max_candles_count(Interval::from_secs(900)), 200 * 4);
        assert_eq!(max_candles_count(Interval::from_secs(3600)), 200 * 2);
        assert_eq!(max_candles_count(Interval::from_secs(7200)), 200);
        assert_eq!(max_candles_count(Interval::from_secs(86_400)), 200);
    }
}
