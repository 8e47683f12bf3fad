use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (live mode only)
    pub binance_api_key: Option<String>,
    pub binance_secret: Option<String>,

    // Telegram; alerts and commands are disabled when the token is absent
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    pub paper_balance_usd: f64,
    pub bracket_leg_delay_ms: u64,

    // Completed-trade persistence; no-op store when unset
    pub database_url: Option<String>,

    // Watch list and replay data
    pub watchlist_path: String,
    pub replay_dir: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = parse_mode(&required_env("TRADING_MODE"));

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (
                Some(required_env("BINANCE_API_KEY")),
                Some(required_env("BINANCE_SECRET")),
            ),
            _ => (optional_env("BINANCE_API_KEY"), optional_env("BINANCE_SECRET")),
        };

        let telegram_allowed_user_ids = optional_env("TELEGRAM_ALLOWED_USER_IDS")
            .map(|ids| parse_user_ids(&ids))
            .unwrap_or_default();

        Config {
            binance_api_key,
            binance_secret,
            telegram_token: optional_env("TELEGRAM_TOKEN"),
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            trading_mode,
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            paper_balance_usd: optional_env("PAPER_BALANCE_USD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            bracket_leg_delay_ms: optional_env("BRACKET_LEG_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
            database_url: optional_env("DATABASE_URL"),
            watchlist_path: optional_env("WATCHLIST_PATH")
                .unwrap_or_else(|| "config/watchlist.toml".to_string()),
            replay_dir: optional_env("REPLAY_DIR").unwrap_or_else(|| "data".to_string()),
        }
    }
}

fn parse_mode(raw: &str) -> TradingMode {
    match raw.to_lowercase().as_str() {
        "paper" => TradingMode::Paper,
        "live" => TradingMode::Live,
        "simulation" | "sim" => TradingMode::Simulation,
        other => panic!(
            "ERROR: TRADING_MODE must be 'live', 'paper' or 'simulation', got: '{other}'"
        ),
    }
}

fn parse_user_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().unwrap_or_else(|_| {
                panic!("TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{s}'")
            })
        })
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
