use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::{Contract, Error, Interval, Result};

/// Free-form strategy parameters from the watch list.
pub type StrategyParams = HashMap<String, toml::Value>;

/// Top-level watch list file (TOML).
///
/// Example `config/watchlist.toml`:
/// ```toml
/// [[watcher]]
/// strategy = "rsi"
/// contract = { type = "crypto", symbol = "BTCUSDT", exchange = "BINANCE", currency = "USDT" }
/// interval = 60
/// group = "btc"
/// min_confirmations = 2
///
/// [watcher.params]
/// period = 14
/// lot_size = 0.001
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchlistConfig {
    #[serde(rename = "watcher", default)]
    pub watchers: Vec<WatchConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Strategy key, `name` or `name@version`.
    pub strategy: String,
    pub contract: Contract,
    /// Bar interval in seconds.
    pub interval: Interval,
    /// Watchers of the same instrument with the same group vote together.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub min_confirmations: Option<usize>,
    #[serde(default)]
    pub params: StrategyParams,
}

impl WatchlistConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read watch list at '{path}': {e}")))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse watch list at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

pub(crate) fn param_f64(params: &StrategyParams, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

pub(crate) fn param_usize(params: &StrategyParams, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SecurityType;

    #[test]
    fn parses_watch_list() {
        let cfg = WatchlistConfig::parse(
            r#"
            [[watcher]]
            strategy = "rsi@1"
            contract = { type = "crypto", symbol = "ETHUSDT", exchange = "BINANCE", currency = "USDT" }
            interval = 300
            group = "eth"

            [watcher.params]
            period = 7
            oversold = 25

            [[watcher]]
            strategy = "macd"
            contract = { type = "stock", symbol = "AAPL", exchange = "SMART", currency = "USD" }
            interval = 60
            "#,
        )
        .unwrap();

        assert_eq!(cfg.watchers.len(), 2);
        let first = &cfg.watchers[0];
        assert_eq!(first.interval, Interval::from_secs(300));
        assert_eq!(first.group.as_deref(), Some("eth"));
        assert_eq!(param_usize(&first.params, "period", 14), 7);
        // integers are accepted where floats are expected
        assert_eq!(param_f64(&first.params, "oversold", 30.0), 25.0);
        assert_eq!(cfg.watchers[1].contract.security_type, SecurityType::Stock);
        assert!(cfg.watchers[1].params.is_empty());
    }

    #[test]
    fn non_positive_interval_is_refused() {
        for interval in ["0", "-60"] {
            let err = WatchlistConfig::parse(&format!(
                r#"
                [[watcher]]
                strategy = "rsi"
                contract = {{ type = "crypto", symbol = "BTCUSDT", exchange = "BINANCE", currency = "USDT" }}
                interval = {interval}
                "#
            ))
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "interval {interval}");
        }
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let err = WatchlistConfig::parse("[[watcher]]\nstrategy = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
