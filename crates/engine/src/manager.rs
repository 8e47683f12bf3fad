use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use common::{Error, MarketData, Result};
use strategy::{StrategyRegistry, WatchConfig};

use crate::aggregator::{
    AggregatorId, AggregatorSettings, Collaborators, SettingsPatch, TradeAggregator,
};
use crate::watcher::{Watcher, WatcherSpec};

/// Watchers grouped under the aggregator they vote into.
#[derive(Debug, Clone)]
pub struct WatcherGroup {
    pub aggregator: Arc<TradeAggregator>,
    pub watchers: Vec<Arc<Watcher>>,
}

/// (group name, contract label) → shared aggregator.
type PoolKey = (String, String);

/// Registry of running watchers and the aggregators they share.
///
/// Cloneable handle; passed to the Telegram bot and dashboard API.
#[derive(Clone)]
pub struct TradeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    market: Arc<dyn MarketData>,
    registry: Arc<StrategyRegistry>,
    collaborators: Collaborators,
    is_simulation: bool,
    watchers: RwLock<HashMap<String, Arc<Watcher>>>,
    aggregators: RwLock<HashMap<PoolKey, Arc<TradeAggregator>>>,
}

impl TradeManager {
    pub fn new(
        market: Arc<dyn MarketData>,
        registry: Arc<StrategyRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        let is_simulation = collaborators.mode.is_simulation();
        Self {
            inner: Arc::new(ManagerInner {
                market,
                registry,
                collaborators,
                is_simulation,
                watchers: RwLock::new(HashMap::new()),
                aggregators: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn is_simulation(&self) -> bool {
        self.inner.is_simulation
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collaborators
    }

    /// Create and start a watcher for `config`.
    ///
    /// Fails if a watcher with the same (strategy, instrument, interval)
    /// already exists, the strategy is not registered, or its parameters are
    /// rejected. Watchers of the same instrument with the same `group` share
    /// one aggregator; without a group the watcher gets an aggregator of its
    /// own, and only the first watcher's `min_confirmations` sets it up.
    pub async fn add_watcher(&self, config: &WatchConfig) -> Result<Arc<Watcher>> {
        if config.interval.as_secs() <= 0 {
            return Err(Error::Config(format!(
                "interval must be positive, got {}",
                config.interval
            )));
        }
        self.inner
            .registry
            .validate(&config.strategy, &config.params)?;

        let spec = WatcherSpec {
            strategy: config.strategy.clone(),
            params: config.params.clone(),
            contract: config.contract.clone(),
            interval: config.interval,
            is_simulation: self.inner.is_simulation,
        };
        let id = spec.id();

        let mut watchers = self.inner.watchers.write().await;
        if watchers.contains_key(&id) {
            return Err(Error::DuplicateWatcher(id));
        }

        let label = config.contract.label();
        let group = config.group.clone().unwrap_or_else(|| id.clone());
        let aggregator = {
            let mut aggregators = self.inner.aggregators.write().await;
            let key = (group.clone(), label.clone());
            if let (Some(existing), Some(wanted)) = (aggregators.get(&key), config.min_confirmations) {
                let current = existing.settings().await.min_confirmations;
                if current != wanted.max(1) {
                    warn!(
                        group = %group,
                        contract = %label,
                        current,
                        wanted,
                        "Aggregator already exists, min_confirmations of this watcher ignored"
                    );
                }
            }
            aggregators
                .entry(key)
                .or_insert_with(|| {
                    let settings = AggregatorSettings {
                        min_confirmations: config.min_confirmations.unwrap_or(1).max(1),
                        ..Default::default()
                    };
                    info!(group = %group, contract = %label, "Creating aggregator");
                    Arc::new(TradeAggregator::new(
                        AggregatorId {
                            id: group.clone(),
                            contract_label: label.clone(),
                        },
                        settings,
                        self.inner.collaborators.clone(),
                    ))
                })
                .clone()
        };

        let watcher = Arc::new(Watcher::new(spec, aggregator));
        watcher
            .start(self.inner.market.clone(), self.inner.registry.clone())
            .await;
        watchers.insert(id.clone(), watcher.clone());
        info!(watcher = %id, group = %group, "Watcher added");
        Ok(watcher)
    }

    /// Stop and forget a watcher. Its aggregator goes too once no watcher
    /// votes into it.
    pub async fn remove_watcher(&self, id: &str) -> Result<()> {
        let watcher = self
            .inner
            .watchers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::Other(format!("no watcher with id '{id}'")))?;

        watcher.stop().await;
        let aggregator = watcher.aggregator();
        aggregator.withdraw(&watcher.request().key()).await;

        let still_used = self
            .inner
            .watchers
            .read()
            .await
            .values()
            .any(|w| Arc::ptr_eq(w.aggregator(), aggregator));
        if !still_used {
            self.inner
                .aggregators
                .write()
                .await
                .retain(|_, a| !Arc::ptr_eq(a, aggregator));
        }
        info!(watcher = %id, "Watcher removed");
        Ok(())
    }

    pub async fn watcher(&self, id: &str) -> Option<Arc<Watcher>> {
        self.inner.watchers.read().await.get(id).cloned()
    }

    pub async fn watcher_count(&self) -> usize {
        self.inner.watchers.read().await.len()
    }

    /// Watchers grouped by aggregator. Watchers are ordered by instrument
    /// type, exchange, symbol, then interval; groups by their first watcher
    /// and then aggregator id.
    pub async fn watchers_by_aggregator(&self) -> Vec<WatcherGroup> {
        let watchers = self.inner.watchers.read().await;
        let mut sorted: Vec<Arc<Watcher>> = watchers.values().cloned().collect();
        drop(watchers);
        sorted.sort_by(|a, b| {
            let (ca, cb) = (a.contract(), b.contract());
            (ca.security_type, &ca.exchange, &ca.symbol, a.interval(), a.id())
                .cmp(&(cb.security_type, &cb.exchange, &cb.symbol, b.interval(), b.id()))
        });

        let mut groups: Vec<WatcherGroup> = Vec::new();
        for watcher in sorted {
            match groups
                .iter_mut()
                .find(|g| Arc::ptr_eq(&g.aggregator, watcher.aggregator()))
            {
                Some(group) => group.watchers.push(watcher),
                None => groups.push(WatcherGroup {
                    aggregator: watcher.aggregator().clone(),
                    watchers: vec![watcher],
                }),
            }
        }
        groups
    }

    /// Every aggregator, ordered by id.
    pub async fn aggregators(&self) -> Vec<Arc<TradeAggregator>> {
        let aggregators: Vec<Arc<TradeAggregator>> =
            self.inner.aggregators.read().await.values().cloned().collect();
        let mut keyed = Vec::with_capacity(aggregators.len());
        for aggregator in aggregators {
            keyed.push((aggregator.id().await, aggregator));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, a)| a).collect()
    }

    /// Apply `patch` to every aggregator whose id is `id`.
    pub async fn update_aggregator(
        &self,
        id: &str,
        patch: &SettingsPatch,
    ) -> Result<Vec<(AggregatorId, AggregatorSettings)>> {
        let mut updated = Vec::new();
        for aggregator in self.aggregators().await {
            let agg_id = aggregator.id().await;
            if agg_id.id == id {
                let settings = aggregator.update_settings(patch).await;
                updated.push((agg_id, settings));
            }
        }
        if updated.is_empty() {
            return Err(Error::UnknownAggregator(id.to_string()));
        }
        Ok(updated)
    }

    /// Apply `patch` to every aggregator. Returns how many were updated.
    pub async fn update_all(&self, patch: &SettingsPatch) -> usize {
        let aggregators = self.aggregators().await;
        for aggregator in &aggregators {
            aggregator.update_settings(patch).await;
        }
        aggregators.len()
    }

    /// Stop every watcher.
    pub async fn shutdown(&self) {
        let watchers: Vec<Arc<Watcher>> =
            self.inner.watchers.write().await.drain().map(|(_, w)| w).collect();
        if watchers.is_empty() {
            return;
        }
        warn!(count = watchers.len(), "Stopping all watchers");
        for watcher in watchers {
            watcher.stop().await;
        }
        self.inner.aggregators.write().await.clear();
    }
}
