use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{Bar, CandleFeed, Contract, Interval, MarketData, Signal};
use strategy::{StrategyParams, StrategyRegistry};

use crate::aggregator::{Request, TradeAggregator};
use crate::cancel::CancelSignal;
use crate::candle_window::{max_candles_count, CandleWindow};
use crate::watcher_state::WatcherState;

/// How often venue session windows are re-fetched.
const TRADING_HOURS_REFRESH: Duration = Duration::from_secs(3600);

/// Grace period for a task to observe cancellation before it is aborted.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Everything a watcher needs to know about what it watches.
#[derive(Debug, Clone)]
pub struct WatcherSpec {
    pub strategy: String,
    pub params: StrategyParams,
    pub contract: Contract,
    pub interval: Interval,
    pub is_simulation: bool,
}

impl WatcherSpec {
    pub fn id(&self) -> String {
        watcher_id(&self.strategy, &self.contract, self.interval)
    }
}

pub fn watcher_id(strategy: &str, contract: &Contract, interval: Interval) -> String {
    format!("{strategy}{}:{interval}", contract.label())
}

/// Ingestion unit for one (strategy, instrument, interval).
///
/// Owns three tasks (quotes, candles, trading hours) that keep the shared
/// [`WatcherState`] current; the candle task votes into the aggregator
/// after every batch. All three stop together on [`Watcher::stop`].
pub struct Watcher {
    id: String,
    spec: WatcherSpec,
    state: Arc<WatcherState>,
    aggregator: Arc<TradeAggregator>,
    cancel: CancelSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Watcher {
    pub fn new(spec: WatcherSpec, aggregator: Arc<TradeAggregator>) -> Self {
        Self {
            id: spec.id(),
            spec,
            state: Arc::new(WatcherState::new()),
            aggregator,
            cancel: CancelSignal::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &WatcherSpec {
        &self.spec
    }

    pub fn contract(&self) -> &Contract {
        &self.spec.contract
    }

    pub fn interval(&self) -> Interval {
        self.spec.interval
    }

    pub fn state(&self) -> &Arc<WatcherState> {
        &self.state
    }

    pub fn aggregator(&self) -> &Arc<TradeAggregator> {
        &self.aggregator
    }

    /// This watcher's vote token.
    pub fn request(&self) -> Request {
        Request {
            is_simulation: self.spec.is_simulation,
            state: self.state.clone(),
            contract: self.spec.contract.clone(),
            interval: self.spec.interval,
            cancel: self.cancel.clone(),
        }
    }

    /// Spawn the quote, candle and trading-hours tasks.
    pub async fn start(&self, market: Arc<dyn MarketData>, registry: Arc<StrategyRegistry>) {
        info!(watcher = %self.id, "Starting watcher");
        let quotes = tokio::spawn(quote_task(
            self.id.clone(),
            self.spec.contract.clone(),
            market.clone(),
            self.state.clone(),
            self.cancel.clone(),
        ));
        let candles = tokio::spawn(candle_task(
            self.id.clone(),
            self.spec.clone(),
            market.clone(),
            registry,
            self.aggregator.clone(),
            self.request(),
        ));
        let hours = tokio::spawn(trading_hours_task(
            self.id.clone(),
            self.spec.contract.clone(),
            market,
            self.state.clone(),
            self.cancel.clone(),
        ));
        self.tasks.lock().await.extend([quotes, candles, hours]);
    }

    /// Cancel every task and any order sequencing they started, then wait
    /// for them to finish.
    pub async fn stop(&self) {
        info!(watcher = %self.id, "Stopping watcher");
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!(watcher = %self.id, "Task ignored cancellation, aborting");
                handle.abort();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

async fn quote_task(
    id: String,
    contract: Contract,
    market: Arc<dyn MarketData>,
    state: Arc<WatcherState>,
    cancel: CancelSignal,
) {
    let mut ticks = match market.quotes(&contract).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(watcher = %id, error = %e, "Quote subscription failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            tick = ticks.recv() => match tick {
                Some(tick) => {
                    state.apply_quote_tick(tick, Utc::now()).await;
                }
                None => {
                    warn!(watcher = %id, "Quote stream closed");
                    break;
                }
            },
        }
    }
}

async fn candle_task(
    id: String,
    spec: WatcherSpec,
    market: Arc<dyn MarketData>,
    registry: Arc<StrategyRegistry>,
    aggregator: Arc<TradeAggregator>,
    request: Request,
) {
    let max_candles = max_candles_count(spec.interval);
    let CandleFeed { mut batches, ack } =
        match market.candles(&spec.contract, spec.interval, max_candles).await {
            Ok(feed) => feed,
            Err(e) => {
                error!(watcher = %id, error = %e, "Candle subscription failed");
                return;
            }
        };

    let mut ingest = CandleIngest {
        window: CandleWindow::new(),
        max_candles,
        last_signal: None,
    };

    loop {
        tokio::select! {
            _ = request.cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => {
                    ingest
                        .process(&id, &spec, &registry, &aggregator, &request, batch)
                        .await;
                    if let Some(ack) = &ack {
                        if ack.send(()).await.is_err() {
                            debug!(watcher = %id, "Replay source gone");
                        }
                    }
                }
                None => {
                    warn!(watcher = %id, "Candle stream closed");
                    break;
                }
            },
        }
    }
}

/// Candle-path state local to the candle task.
struct CandleIngest {
    window: CandleWindow,
    max_candles: usize,
    last_signal: Option<Signal>,
}

impl CandleIngest {
    async fn process(
        &mut self,
        id: &str,
        spec: &WatcherSpec,
        registry: &StrategyRegistry,
        aggregator: &TradeAggregator,
        request: &Request,
        batch: Vec<Bar>,
    ) {
        self.window.merge(batch, spec.interval);
        self.window.trim(self.max_candles);

        let strategy = match registry.build(&spec.strategy, self.window.bars().to_vec(), &spec.params)
        {
            Ok(strategy) => strategy,
            Err(e) => {
                error!(watcher = %id, error = %e, "Strategy construction failed");
                return;
            }
        };

        let signal = strategy.pattern();
        if signal != self.last_signal {
            debug!(watcher = %id, signal = ?signal, "Pattern changed");
            aggregator
                .collaborators()
                .notifier
                .on_pattern_info_changed(
                    &spec.contract,
                    spec.interval,
                    signal,
                    &strategy.pattern_information(),
                )
                .await;
            self.last_signal = signal;
        }

        request.state.update_strategy(strategy).await;
        aggregator.register_trade_signal(request.clone()).await;
    }
}

async fn trading_hours_task(
    id: String,
    contract: Contract,
    market: Arc<dyn MarketData>,
    state: Arc<WatcherState>,
    cancel: CancelSignal,
) {
    loop {
        match market.trading_hours(&contract).await {
            Ok(hours) => {
                debug!(watcher = %id, sessions = hours.len(), "Trading hours refreshed");
                state.update_trading_hours(hours).await;
            }
            Err(e) => warn!(watcher = %id, error = %e, "Trading hours fetch failed"),
        }
        if !cancel.sleep(TRADING_HOURS_REFRESH).await {
            break;
        }
    }
}
