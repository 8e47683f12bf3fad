use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Broker, Config, Contract, MarketData, NoopNotifier, NoopTradeStore, Notifier, StaticCalendar,
    TradeStore, TradingMode,
};
use engine::{
    BinanceBroker, BinanceMarketData, Collaborators, OrderExecutor, SimulationStats,
    SqliteTradeStore, TradeManager,
};
use paper::{PaperBroker, ReplayMarketData};
use strategy::{StrategyRegistry, WatchlistConfig};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "TradeWatch starting");

    let watchlist = WatchlistConfig::load(&cfg.watchlist_path)?;
    if watchlist.watchers.is_empty() {
        warn!(path = %cfg.watchlist_path, "Watch list is empty");
    }

    // ── Broker and market data (injected based on TRADING_MODE) ──────────────
    let (broker, market): (Arc<dyn Broker>, Arc<dyn MarketData>) = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode, using Binance broker and streams");
            let key = cfg.binance_api_key.clone().unwrap_or_default();
            let secret = cfg.binance_secret.clone().unwrap_or_default();
            let broker: Arc<dyn Broker> = Arc::new(BinanceBroker::new(key, secret)?);
            let market: Arc<dyn MarketData> = Arc::new(BinanceMarketData::new()?);
            (broker, market)
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperBroker");
            let paper = Arc::new(PaperBroker::new(cfg.paper_balance_usd, cfg.paper_slippage_bps));
            let market: Arc<dyn MarketData> = Arc::new(BinanceMarketData::new()?);
            for contract in distinct_contracts(&watchlist) {
                paper
                    .track_prices(market.clone(), contract)
                    .await
                    .context("paper price feed")?;
            }
            let broker: Arc<dyn Broker> = paper;
            (broker, market)
        }
        TradingMode::Simulation => {
            info!(dir = %cfg.replay_dir, "Simulation mode, replaying files");
            let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(cfg.paper_balance_usd, 0.0));
            let market: Arc<dyn MarketData> = Arc::new(ReplayMarketData::new(&cfg.replay_dir));
            (broker, market)
        }
    };

    if let Err(e) = broker.connect().await {
        // reconnecting is an operator action; the watchers still run
        error!(error = %e, "Broker connection failed");
    }

    // ── Trade store ───────────────────────────────────────────────────────────
    let store: Arc<dyn TradeStore> = match &cfg.database_url {
        Some(url) => {
            let store = SqliteTradeStore::connect(url)
                .await
                .with_context(|| format!("trade store at {url}"))?;
            info!("Database ready");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set, completed trades are not persisted");
            Arc::new(NoopTradeStore)
        }
    };

    // ── Notifications ─────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match &cfg.telegram_token {
        Some(token) => Arc::new(TelegramNotifier::new(
            teloxide::Bot::new(token),
            &cfg.telegram_allowed_user_ids,
        )),
        None => {
            info!("TELEGRAM_TOKEN not set, alerts disabled");
            Arc::new(NoopNotifier)
        }
    };

    // ── Trade manager ─────────────────────────────────────────────────────────
    let collaborators = Collaborators {
        mode: cfg.trading_mode,
        executor: Arc::new(OrderExecutor::new(
            broker,
            Duration::from_millis(cfg.bracket_leg_delay_ms),
        )),
        announcements: Arc::new(StaticCalendar::default()),
        notifier,
        store,
        stats: Arc::new(SimulationStats::new()),
    };
    let registry = Arc::new(StrategyRegistry::with_builtins());
    info!(strategies = ?registry.keys(), "Strategy registry ready");
    let manager = TradeManager::new(market, registry, collaborators);

    for config in &watchlist.watchers {
        if let Err(e) = manager.add_watcher(config).await {
            error!(
                strategy = %config.strategy,
                contract = %config.contract,
                error = %e,
                "Watcher not started"
            );
        }
    }

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    if let Some(token) = cfg.telegram_token.clone() {
        let bot_deps = BotDeps {
            manager: manager.clone(),
            trading_mode: cfg.trading_mode,
            allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
        };
        tokio::spawn(start_bot(token, bot_deps));
    }

    // ── Dashboard API ─────────────────────────────────────────────────────────
    let api_state = api::AppState {
        manager: manager.clone(),
        trading_mode: cfg.trading_mode,
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Dashboard API stopped");
        }
    });

    info!(
        watchers = manager.watcher_count().await,
        "All subsystems started. Waiting for shutdown signal."
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping watchers.");
    manager.shutdown().await;
    Ok(())
}

/// Each instrument of the watch list once, in label order.
fn distinct_contracts(watchlist: &WatchlistConfig) -> Vec<Contract> {
    watchlist
        .watchers
        .iter()
        .map(|w| (w.contract.label(), w.contract.clone()))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}
