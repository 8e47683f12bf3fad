use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::Announcement;

/// Hypothetical account equity used when sizing simulated trades.
pub const SIMULATION_EQUITY: f64 = 10_000.0;

/// Flat per-trade fee assumed when sizing simulated trades.
pub const SIMULATION_FEE: f64 = 1.0;

/// No new exposure when an announcement lands this many minutes after entry.
pub const ANNOUNCEMENT_BLACKOUT_MINUTES: i64 = 120;

/// Inputs to the risk-per-trade sizing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingInput {
    pub equity: f64,
    pub fee: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    /// Fraction of equity put at risk between entry and stop (e.g. 0.01 = 1%).
    pub risk_fraction: f64,
    /// Smallest tradable quantity step; results are rounded down to it.
    pub lot_size: f64,
    pub entry_time: DateTime<Utc>,
    pub next_announcement: Option<Announcement>,
}

/// Units to buy or sell so that a stop-out loses `risk_fraction` of equity
/// (after the fee), capped by what the equity can pay for.
///
/// Returns `0.0` whenever no trade should be taken: non-positive or
/// non-finite inputs, a zero stop distance, or an announcement inside the
/// blackout window after `entry_time`.
pub fn position_units(input: &SizingInput) -> f64 {
    let (equity, fee, entry_price, stop_price, risk_fraction, lot_size) = (
        input.equity,
        input.fee,
        input.entry_price,
        input.stop_price,
        input.risk_fraction,
        input.lot_size,
    );

    if ![equity, fee, entry_price, stop_price, risk_fraction, lot_size]
        .iter()
        .all(|v| v.is_finite())
    {
        return 0.0;
    }
    if equity <= 0.0 || entry_price <= 0.0 || lot_size <= 0.0 || risk_fraction <= 0.0 {
        return 0.0;
    }
    if in_blackout(input.entry_time, input.next_announcement.as_ref()) {
        return 0.0;
    }

    let risk_per_unit = (entry_price - stop_price).abs();
    if risk_per_unit <= 0.0 {
        return 0.0;
    }

    let budget = equity * risk_fraction - fee.max(0.0);
    if budget <= 0.0 {
        return 0.0;
    }

    let by_risk = budget / risk_per_unit;
    let affordable = equity / entry_price;
    let lots = (by_risk.min(affordable) / lot_size).floor();
    (lots * lot_size).max(0.0)
}

fn in_blackout(entry_time: DateTime<Utc>, next: Option<&Announcement>) -> bool {
    match next {
        Some(a) => {
            a.time >= entry_time
                && a.time - entry_time <= Duration::minutes(ANNOUNCEMENT_BLACKOUT_MINUTES)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SizingInput {
        SizingInput {
            equity: 10_000.0,
            fee: 0.0,
            entry_price: 100.0,
            stop_price: 98.0,
            risk_fraction: 0.01,
            lot_size: 1.0,
            entry_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            next_announcement: None,
        }
    }

    #[test]
    fn risks_the_requested_fraction() {
        // 1% of 10k = 100 at risk, 2 per unit => 50 units
        assert_eq!(position_units(&input()), 50.0);
    }

    #[test]
    fn fee_reduces_budget() {
        let sized = position_units(&SizingInput { fee: 10.0, ..input() });
        assert_eq!(sized, 45.0);
    }

    #[test]
    fn capped_by_affordable_units() {
        let sized = position_units(&SizingInput {
            stop_price: 99.99,
            ..input()
        });
        assert_eq!(sized, 100.0);
    }

    #[test]
    fn fractional_lots_round_down() {
        let sized = position_units(&SizingInput {
            entry_price: 60_000.0,
            stop_price: 59_000.0,
            lot_size: 0.001,
            ..input()
        });
        assert!((sized - 0.1).abs() < 1e-9, "got {sized}");
    }

    #[test]
    fn zero_stop_distance_yields_nothing() {
        let sized = position_units(&SizingInput {
            stop_price: 100.0,
            ..input()
        });
        assert_eq!(sized, 0.0);
    }

    #[test]
    fn announcement_inside_blackout_blocks_entry() {
        let base = input();
        let soon = Announcement {
            title: "NFP".into(),
            time: base.entry_time + Duration::minutes(90),
        };
        let later = Announcement {
            title: "NFP".into(),
            time: base.entry_time + Duration::hours(5),
        };
        assert_eq!(
            position_units(&SizingInput { next_announcement: Some(soon), ..input() }),
            0.0
        );
        assert_eq!(
            position_units(&SizingInput { next_announcement: Some(later), ..input() }),
            50.0
        );
    }
}
