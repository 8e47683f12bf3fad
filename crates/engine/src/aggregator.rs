use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use common::{
    AnnouncementSource, Contract, Direction, Interval, Notifier, Signal, Trade, TradeRecord,
    TradeStore, TradingMode,
};
use risk::{evaluate_market_conditions, MarketConditions, SIMULATION_EQUITY, SIMULATION_FEE};

use crate::cancel::CancelSignal;
use crate::executor::OrderExecutor;
use crate::stats::{SimulationResult, SimulationStats};
use crate::watcher_state::WatcherState;

/// Identity of an aggregator: a stable id plus its instrument's label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregatorId {
    pub id: String,
    pub contract_label: String,
}

impl std::fmt::Display for AggregatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.contract_label)
    }
}

/// Live-mutable switches of one aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSettings {
    pub entry_enabled: bool,
    pub exit_enabled: bool,
    pub entry_notification_enabled: bool,
    pub exit_notification_enabled: bool,
    pub min_confirmations: usize,
    /// The winning group's mean confidence must be strictly above this.
    pub min_mean_confidence: f64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            entry_enabled: true,
            exit_enabled: true,
            entry_notification_enabled: true,
            exit_notification_enabled: true,
            min_confirmations: 1,
            min_mean_confidence: 0.0,
        }
    }
}

/// Partial update of [`AggregatorSettings`]; absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub entry_enabled: Option<bool>,
    pub exit_enabled: Option<bool>,
    pub entry_notification_enabled: Option<bool>,
    pub exit_notification_enabled: Option<bool>,
    pub min_confirmations: Option<usize>,
    pub min_mean_confidence: Option<f64>,
}

impl SettingsPatch {
    pub fn apply(&self, settings: &mut AggregatorSettings) {
        if let Some(v) = self.entry_enabled {
            settings.entry_enabled = v;
        }
        if let Some(v) = self.exit_enabled {
            settings.exit_enabled = v;
        }
        if let Some(v) = self.entry_notification_enabled {
            settings.entry_notification_enabled = v;
        }
        if let Some(v) = self.exit_notification_enabled {
            settings.exit_notification_enabled = v;
        }
        if let Some(v) = self.min_confirmations {
            settings.min_confirmations = v.max(1);
        }
        if let Some(v) = self.min_mean_confidence {
            settings.min_mean_confidence = v;
        }
    }
}

/// Vote key: which watcher a vote came from within one voting round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub contract_label: String,
    pub interval: Interval,
}

/// A watcher's vote token, carrying the handle to its state.
#[derive(Debug, Clone)]
pub struct Request {
    pub is_simulation: bool,
    pub state: Arc<WatcherState>,
    pub contract: Contract,
    pub interval: Interval,
    pub cancel: CancelSignal,
}

impl Request {
    pub fn key(&self) -> RequestKey {
        RequestKey {
            contract_label: self.contract.label(),
            interval: self.interval,
        }
    }
}

/// Collaborators shared by every aggregator of a process.
#[derive(Clone)]
pub struct Collaborators {
    pub mode: TradingMode,
    pub executor: Arc<OrderExecutor>,
    pub announcements: Arc<dyn AnnouncementSource>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn TradeStore>,
    pub stats: Arc<SimulationStats>,
}

struct Consensus {
    signal: Signal,
    voters: Vec<Request>,
}

/// Consensus and trade state machine shared by the watchers of one
/// instrument.
///
/// Each round: take the vote, tally every voter's *current* signal by
/// direction, and commit an entry once the leading direction has enough
/// confirmations. Trade management then runs for the calling watcher
/// whatever the vote outcome.
pub struct TradeAggregator {
    id: RwLock<AggregatorId>,
    settings: RwLock<AggregatorSettings>,
    votes: Mutex<HashMap<RequestKey, Request>>,
    collaborators: Collaborators,
}

impl TradeAggregator {
    pub fn new(id: AggregatorId, settings: AggregatorSettings, collaborators: Collaborators) -> Self {
        Self {
            id: RwLock::new(id),
            settings: RwLock::new(settings),
            votes: Mutex::new(HashMap::new()),
            collaborators,
        }
    }

    pub async fn id(&self) -> AggregatorId {
        self.id.read().await.clone()
    }

    /// Rebind this aggregator to a new identity.
    pub async fn set_id(&self, id: AggregatorId) {
        *self.id.write().await = id;
    }

    pub async fn settings(&self) -> AggregatorSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, patch: &SettingsPatch) -> AggregatorSettings {
        let mut settings = self.settings.write().await;
        patch.apply(&mut settings);
        let id = self.id().await;
        info!(aggregator = %id, settings = ?*settings, "Aggregator settings updated");
        settings.clone()
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub async fn pending_votes(&self) -> usize {
        self.votes.lock().await.len()
    }

    /// Drop the vote of a watcher that is going away.
    pub async fn withdraw(&self, key: &RequestKey) {
        self.votes.lock().await.remove(key);
    }

    /// Take `request`'s vote, decide, then manage its active trade.
    pub async fn register_trade_signal(&self, request: Request) {
        if request.cancel.is_cancelled() {
            return;
        }

        let signal = request.state.signal().await;
        let key = request.key();
        let decision = {
            let mut votes = self.votes.lock().await;
            match signal {
                None => {
                    if votes.remove(&key).is_some() {
                        debug!(contract = %key.contract_label, interval = %key.interval, "Vote withdrawn");
                    }
                    None
                }
                Some(_) => {
                    votes.insert(key.clone(), request.clone());
                    let settings = self.settings().await;
                    match tally(&votes).await {
                        Some(c)
                            if c.voters.len() >= settings.min_confirmations
                                && c.signal.confidence > settings.min_mean_confidence =>
                        {
                            votes.clear();
                            Some(c)
                        }
                        Some(c) => {
                            info!(
                                contract = %key.contract_label,
                                signal = %c.signal,
                                votes = c.voters.len(),
                                required = settings.min_confirmations,
                                "Awaiting confirmations"
                            );
                            None
                        }
                        None => None,
                    }
                }
            }
        };

        if let Some(consensus) = decision {
            info!(
                contract = %key.contract_label,
                signal = %consensus.signal,
                votes = consensus.voters.len(),
                "Consensus reached"
            );
            let entrant = pick_entrant(&request, signal, &consensus);
            self.enter_trade_if_strategy_is_validated(&entrant, consensus.signal)
                .await;
        }

        self.manage_active_trade(&request).await;
    }

    /// Open a trade for `request`'s watcher unless one is already active.
    pub async fn enter_trade_if_strategy_is_validated(&self, request: &Request, signal: Signal) {
        if request.cancel.is_cancelled() {
            return;
        }
        let state = &request.state;
        let contract = &request.contract;
        if state.active_trade().await.is_some() {
            debug!(contract = %contract, "Trade already active, entry skipped");
            return;
        }
        let Some(strategy) = state.strategy().await else {
            return;
        };
        let Some(entry_bar) = strategy.entry_bar().cloned() else {
            debug!(contract = %contract, "No entry bar, entry skipped");
            return;
        };
        let direction = signal.direction;
        let settings = self.settings().await;

        if request.is_simulation {
            let units = strategy.units(SIMULATION_EQUITY, SIMULATION_FEE, None);
            let Some(stop_price) = strategy.adjust_stop_loss(entry_bar.close, direction) else {
                debug!(contract = %contract, "Stop-loss unavailable, entry aborted");
                return;
            };
            if units <= 0.0 {
                debug!(contract = %contract, units, "Unit size not positive, entry aborted");
                return;
            }
            let trade = Trade {
                price: entry_bar.close,
                entry_bar,
                signal,
                stop_price,
                units,
                pattern_info: strategy.pattern_information(),
            };
            if state.open_trade(trade.clone()).await {
                info!(contract = %contract, signal = %signal, price = trade.price, units, "Simulated entry");
                if settings.entry_notification_enabled {
                    self.collaborators
                        .notifier
                        .on_entry(contract, &trade, &trade.entry_bar)
                        .await;
                }
            }
            return;
        }

        let account = match self.collaborators.executor.broker().account().await {
            Ok(account) => account,
            Err(e) => {
                error!(contract = %contract, error = %e, "Account snapshot failed, entry skipped");
                return;
            }
        };
        let next_announcement = match self
            .collaborators
            .announcements
            .next_after(entry_bar.close_time())
            .await
        {
            Ok(next) => next,
            Err(e) => {
                warn!(contract = %contract, error = %e, "Announcement lookup failed, entry skipped");
                return;
            }
        };

        let units = strategy.units(account.buying_power, 0.0, next_announcement.as_ref());
        let Some(stop_price) = strategy.adjust_stop_loss(entry_bar.close, direction) else {
            debug!(contract = %contract, "Stop-loss unavailable, entry aborted");
            return;
        };
        if units <= 0.0 {
            debug!(contract = %contract, units, "Unit size not positive, entry aborted");
            return;
        }

        let hours = state.trading_hours().await;
        let quote = state.quote().await;
        let price = match evaluate_market_conditions(&MarketConditions {
            hours: &hours,
            now: Utc::now(),
            has_active_trade: state.active_trade().await.is_some(),
            quote: quote.as_ref(),
            direction,
            fallback_price: entry_bar.close,
        }) {
            Ok(price) => price,
            Err(reason) => {
                info!(contract = %contract, %reason, "Entry rejected by market conditions");
                return;
            }
        };

        let trade = Trade {
            entry_bar,
            signal,
            price,
            stop_price,
            units,
            pattern_info: strategy.pattern_information(),
        };
        if !state.open_trade(trade.clone()).await {
            return;
        }
        info!(contract = %contract, signal = %signal, price, units, stop = stop_price, "Trade armed");

        if settings.entry_notification_enabled {
            self.collaborators
                .notifier
                .on_entry(contract, &trade, &trade.entry_bar)
                .await;
        }
        if !settings.entry_enabled {
            return;
        }

        let take_profit = strategy.take_profit(price, direction);
        if let Err(e) = self
            .collaborators
            .executor
            .place_bracket(contract, &trade, take_profit, &request.cancel)
            .await
        {
            // nothing is working at the broker, so nothing to manage
            error!(contract = %contract, error = %e, "Bracket order failed, trade dropped");
            state.update_active_trade(None).await;
        }
    }

    /// Exit the watcher's active trade when its strategy asks to or the
    /// stop was crossed, once at least one bar has closed since entry.
    pub async fn manage_active_trade(&self, request: &Request) {
        if request.cancel.is_cancelled() {
            return;
        }
        let state = &request.state;
        let contract = &request.contract;
        let Some(trade) = state.active_trade().await else {
            return;
        };
        let Some(strategy) = state.strategy().await else {
            return;
        };
        let Some(recent) = strategy.candles().last().cloned() else {
            return;
        };
        if recent.open_time == trade.entry_bar.open_time {
            return;
        }

        let stop_hit = trade.stop_hit(recent.close);
        if !stop_hit && !strategy.should_exit(&trade) {
            return;
        }

        let exit_price = state
            .quote()
            .await
            .and_then(|q| q.last_price)
            .unwrap_or(recent.close);
        let settings = self.settings().await;
        info!(contract = %contract, exit_price, stop_hit, "Exit triggered");

        if settings.exit_notification_enabled {
            self.collaborators
                .notifier
                .on_exit(contract, &trade, &recent)
                .await;
        }

        if request.is_simulation {
            let profit = trade.profit_at(exit_price);
            self.collaborators
                .stats
                .record(SimulationResult {
                    contract_label: contract.label(),
                    interval: request.interval,
                    is_long: trade.is_long(),
                    entry_price: trade.price,
                    exit_price,
                    profit,
                    stop_hit,
                    confidence: trade.signal.confidence,
                    pattern_info: trade.pattern_info.clone(),
                    closed_at: recent.close_time(),
                })
                .await;
            state.update_active_trade(None).await;
            self.persist(request, &trade, exit_price, stop_hit, recent.close_time())
                .await;
            return;
        }

        if !settings.exit_enabled {
            debug!(contract = %contract, "Exits disabled, trade kept");
            return;
        }
        let account = match self.collaborators.executor.broker().account().await {
            Ok(account) => account,
            Err(e) => {
                error!(contract = %contract, error = %e, "Account snapshot failed, exit deferred");
                return;
            }
        };
        let Some(position) = account.position_for(contract) else {
            warn!(contract = %contract, "No broker position to close, exit deferred");
            return;
        };

        match self
            .collaborators
            .executor
            .close_position(contract, position, exit_price)
            .await
        {
            Ok(_) => {
                state.update_active_trade(None).await;
                self.persist(request, &trade, exit_price, stop_hit, Utc::now())
                    .await;
            }
            Err(_) => {
                // trade stays active; the next bar re-evaluates the exit
            }
        }
    }

    async fn persist(
        &self,
        request: &Request,
        trade: &Trade,
        exit_price: f64,
        stop_hit: bool,
        closed_at: DateTime<Utc>,
    ) {
        let mode = if request.is_simulation {
            TradingMode::Simulation
        } else {
            self.collaborators.mode
        };
        let record = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_label: request.contract.label(),
            interval: request.interval,
            is_long: trade.is_long(),
            entry_price: trade.price,
            exit_price,
            units: trade.units,
            profit: trade.profit_at(exit_price),
            stop_hit,
            confidence: trade.signal.confidence,
            mode,
            opened_at: trade.entry_bar.close_time(),
            closed_at,
        };
        if let Err(e) = self.collaborators.store.save(&record).await {
            warn!(contract = %record.contract_label, error = %e, "Failed to persist trade record");
        }
    }
}

impl std::fmt::Debug for TradeAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeAggregator").finish_non_exhaustive()
    }
}

/// Tally the current signal of every voter by direction. Groups are formed
/// in vote-key order and the first group with the most members wins.
async fn tally(votes: &HashMap<RequestKey, Request>) -> Option<Consensus> {
    let mut ballots: Vec<(&RequestKey, &Request)> = votes.iter().collect();
    ballots.sort_by(|a, b| a.0.cmp(b.0));

    let mut groups: Vec<(Direction, Vec<(Request, f64)>)> = Vec::new();
    for (_, request) in ballots {
        let Some(signal) = request.state.signal().await else {
            continue;
        };
        let member = (request.clone(), signal.confidence);
        match groups.iter_mut().find(|(d, _)| *d == signal.direction) {
            Some((_, members)) => members.push(member),
            None => groups.push((signal.direction, vec![member])),
        }
    }

    let mut winner: Option<(Direction, Vec<(Request, f64)>)> = None;
    for group in groups {
        if winner.as_ref().map_or(true, |w| group.1.len() > w.1.len()) {
            winner = Some(group);
        }
    }
    let (direction, members) = winner?;
    let mean = members.iter().map(|(_, c)| c).sum::<f64>() / members.len() as f64;

    Some(Consensus {
        signal: Signal {
            direction,
            confidence: mean,
        },
        voters: members.into_iter().map(|(r, _)| r).collect(),
    })
}

/// The watcher that enters on a committed decision: the caller when it
/// voted with the majority, otherwise the first majority voter.
fn pick_entrant(request: &Request, own: Option<Signal>, consensus: &Consensus) -> Request {
    if own.map(|s| s.direction) == Some(consensus.signal.direction) {
        return request.clone();
    }
    consensus
        .voters
        .first()
        .cloned()
        .unwrap_or_else(|| request.clone())
}
