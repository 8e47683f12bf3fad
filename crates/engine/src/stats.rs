use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use common::{Interval, PatternInfo};

/// Outcome of one simulated round trip.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub contract_label: String,
    pub interval: Interval,
    pub is_long: bool,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit: f64,
    pub stop_hit: bool,
    pub confidence: f64,
    pub pattern_info: PatternInfo,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub stop_hits: usize,
    pub total_profit: f64,
    pub average_profit: f64,
    pub win_rate: f64,
}

/// Running collector of simulated results, shared by every aggregator.
#[derive(Debug, Default)]
pub struct SimulationStats {
    results: RwLock<Vec<SimulationResult>>,
}

impl SimulationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, result: SimulationResult) {
        self.results.write().await.push(result);
    }

    pub async fn results(&self) -> Vec<SimulationResult> {
        self.results.read().await.clone()
    }

    pub async fn summary(&self) -> SimulationSummary {
        let results = self.results.read().await;
        let trades = results.len();
        if trades == 0 {
            return SimulationSummary::default();
        }

        let wins = results.iter().filter(|r| r.profit > 0.0).count();
        let losses = results.iter().filter(|r| r.profit < 0.0).count();
        let total_profit: f64 = results.iter().map(|r| r.profit).sum();

        SimulationSummary {
            trades,
            wins,
            losses,
            stop_hits: results.iter().filter(|r| r.stop_hit).count(),
            total_profit,
            average_profit: total_profit / trades as f64,
            win_rate: wins as f64 / trades as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(profit: f64, stop_hit: bool) -> SimulationResult {
        SimulationResult {
            contract_label: "CRYPTO:BINANCE:BTCUSDT:USDT".into(),
            interval: Interval::from_secs(60),
            is_long: true,
            entry_price: 100.0,
            exit_price: 100.0 + profit,
            profit,
            stop_hit,
            confidence: 0.7,
            pattern_info: PatternInfo::new(),
            closed_at: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn empty_summary_is_zeroed() {
        assert_eq!(SimulationStats::new().summary().await, SimulationSummary::default());
    }

    #[tokio::test]
    async fn summary_counts_wins_losses_and_stops() {
        let stats = SimulationStats::new();
        stats.record(result(10.0, false)).await;
        stats.record(result(-4.0, true)).await;
        stats.record(result(-2.0, true)).await;
        stats.record(result(0.0, false)).await;

        let s = stats.summary().await;
        assert_eq!(s.trades, 4);
        assert_eq!(s.wins, 1);
        assert_eq!(s.losses, 2);
        assert_eq!(s.stop_hits, 2);
        assert!((s.total_profit - 4.0).abs() < 1e-9);
        assert!((s.average_profit - 1.0).abs() < 1e-9);
        assert!((s.win_rate - 0.25).abs() < 1e-9);
    }
}
