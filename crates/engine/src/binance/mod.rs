pub mod rest;
pub mod stream;

pub use rest::BinanceBroker;
pub use stream::BinanceMarketData;

use common::{Error, Interval, Result};

pub const EXCHANGE: &str = "BINANCE";
pub const REST_URL: &str = "https://api.binance.com";
pub const WS_URL: &str = "wss://stream.binance.com:9443";

/// Binance kline interval code for `interval`.
pub fn interval_code(interval: Interval) -> Result<&'static str> {
    let code = match interval.as_secs() {
        60 => "1m",
        180 => "3m",
        300 => "5m",
        900 => "15m",
        1800 => "30m",
        3600 => "1h",
        7200 => "2h",
        14_400 => "4h",
        21_600 => "6h",
        28_800 => "8h",
        43_200 => "12h",
        86_400 => "1d",
        259_200 => "3d",
        604_800 => "1w",
        other => {
            return Err(Error::Config(format!(
                "Binance has no kline interval of {other}s"
            )))
        }
    };
    Ok(code)
}

/// Parse one of Binance's decimal strings.
pub(crate) fn decimal(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::Exchange(format!("bad decimal '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_supported_intervals() {
        assert_eq!(interval_code(Interval::from_secs(60)).unwrap(), "1m");
        assert_eq!(interval_code(Interval::from_secs(3600)).unwrap(), "1h");
        assert!(matches!(
            interval_code(Interval::from_secs(42)),
            Err(Error::Config(_))
        ));
    }
}
