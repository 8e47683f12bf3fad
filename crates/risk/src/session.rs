use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use common::{Direction, Quote, RejectionReason, SessionStatus, TradingHour};

/// Minimum minutes left in the session before a new entry is armed:
/// six 30-minute bars.
pub const SESSION_CLOSE_BUFFER_MINUTES: i64 = 6 * 30;

fn current_session(hours: &[TradingHour], now: DateTime<Utc>) -> Option<&TradingHour> {
    hours.iter().find(|h| {
        h.status == SessionStatus::Open && h.open_time <= now && now < h.close_time
    })
}

pub fn is_market_open(hours: &[TradingHour], now: DateTime<Utc>) -> bool {
    current_session(hours, now).is_some()
}

/// Time left in the current session, or `None` if the market is closed.
pub fn time_until_close(hours: &[TradingHour], now: DateTime<Utc>) -> Option<Duration> {
    current_session(hours, now).map(|h| h.close_time - now)
}

/// Time until the market next opens or closes.
pub fn time_until_next_change(hours: &[TradingHour], now: DateTime<Utc>) -> Option<Duration> {
    if let Some(left) = time_until_close(hours, now) {
        return Some(left);
    }
    hours
        .iter()
        .filter(|h| h.status == SessionStatus::Open && h.open_time > now)
        .map(|h| h.open_time - now)
        .min()
}

/// Everything the entry gate looks at.
#[derive(Debug, Clone)]
pub struct MarketConditions<'a> {
    pub hours: &'a [TradingHour],
    pub now: DateTime<Utc>,
    pub has_active_trade: bool,
    pub quote: Option<&'a Quote>,
    pub direction: Direction,
    /// Close of the strategy's entry bar, used when the quote lacks the
    /// preferred side.
    pub fallback_price: f64,
}

/// Decide whether an entry may be armed now and at what price.
///
/// Longs are priced at the ask, shorts at the bid.
pub fn evaluate_market_conditions(c: &MarketConditions<'_>) -> Result<f64, RejectionReason> {
    let left = time_until_close(c.hours, c.now).ok_or(RejectionReason::MarketClosed)?;
    if left < Duration::minutes(SESSION_CLOSE_BUFFER_MINUTES) {
        return Err(RejectionReason::SessionEndingSoon);
    }
    if c.has_active_trade {
        return Err(RejectionReason::TradeAlreadyActive);
    }
    let quote = c.quote.ok_or(RejectionReason::NoQuote)?;

    let preferred = match c.direction {
        Direction::Long => quote.ask_price,
        Direction::Short => quote.bid_price,
    };
    match preferred.filter(|p| p.is_finite() && *p > 0.0) {
        Some(price) => Ok(price),
        None => {
            debug!(
                direction = %c.direction,
                fallback = c.fallback_price,
                "Quote side missing, pricing at entry bar close"
            );
            Ok(c.fallback_price)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(h * 3600, 0).unwrap()
    }

    fn day_session() -> Vec<TradingHour> {
        vec![
            TradingHour { open_time: at(9), close_time: at(17), status: SessionStatus::Open },
            TradingHour { open_time: at(17), close_time: at(33), status: SessionStatus::Closed },
            TradingHour { open_time: at(33), close_time: at(41), status: SessionStatus::Open },
        ]
    }

    fn quote() -> Quote {
        Quote {
            bid_price: Some(99.0),
            ask_price: Some(101.0),
            last_price: Some(100.0),
            volume: None,
            timestamp: at(10),
        }
    }

    fn conditions<'a>(hours: &'a [TradingHour], q: Option<&'a Quote>) -> MarketConditions<'a> {
        MarketConditions {
            hours,
            now: at(10),
            has_active_trade: false,
            quote: q,
            direction: Direction::Long,
            fallback_price: 100.5,
        }
    }

    #[test]
    fn open_and_close_times() {
        let hours = day_session();
        assert!(is_market_open(&hours, at(10)));
        assert!(!is_market_open(&hours, at(17)));
        assert_eq!(time_until_close(&hours, at(10)), Some(Duration::hours(7)));
        assert_eq!(time_until_next_change(&hours, at(20)), Some(Duration::hours(13)));
    }

    #[test]
    fn long_uses_ask_short_uses_bid() {
        let hours = day_session();
        let q = quote();
        assert_eq!(evaluate_market_conditions(&conditions(&hours, Some(&q))), Ok(101.0));
        let short = MarketConditions { direction: Direction::Short, ..conditions(&hours, Some(&q)) };
        assert_eq!(evaluate_market_conditions(&short), Ok(99.0));
    }

    #[test]
    fn missing_side_falls_back_to_entry_close() {
        let hours = day_session();
        let q = Quote { ask_price: None, ..quote() };
        assert_eq!(evaluate_market_conditions(&conditions(&hours, Some(&q))), Ok(100.5));
    }

    #[test]
    fn rejects_closed_market_and_late_session() {
        let hours = day_session();
        let q = quote();
        let closed = MarketConditions { now: at(20), ..conditions(&hours, Some(&q)) };
        assert_eq!(evaluate_market_conditions(&closed), Err(RejectionReason::MarketClosed));

        let late = MarketConditions {
            now: at(14) + Duration::minutes(1),
            ..conditions(&hours, Some(&q))
        };
        assert_eq!(evaluate_market_conditions(&late), Err(RejectionReason::SessionEndingSoon));

        let exactly_three_hours = MarketConditions { now: at(14), ..conditions(&hours, Some(&q)) };
        assert!(evaluate_market_conditions(&exactly_three_hours).is_ok());
    }

    #[test]
    fn rejects_active_trade_and_missing_quote() {
        let hours = day_session();
        let q = quote();
        let active = MarketConditions { has_active_trade: true, ..conditions(&hours, Some(&q)) };
        assert_eq!(evaluate_market_conditions(&active), Err(RejectionReason::TradeAlreadyActive));
        assert_eq!(
            evaluate_market_conditions(&conditions(&hours, None)),
            Err(RejectionReason::NoQuote)
        );
    }
}
