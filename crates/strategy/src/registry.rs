use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use common::{Bar, Error, Result};

use crate::builtin::{MacdCrossStrategy, RsiReversalStrategy};
use crate::config::StrategyParams;
use crate::Strategy;

/// Builds a strategy value from a candle window. Must be a pure function of
/// its inputs; invalid parameters are an `Error::Config`.
pub type StrategyBuilder = fn(Vec<Bar>, &StrategyParams) -> Result<Box<dyn Strategy>>;

/// Static factory table of strategy kinds keyed by name and version.
///
/// Strategies discovered outside the process are added through `register`
/// by whoever discovers them; the engine only ever looks names up here.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    builders: BTreeMap<String, BTreeMap<u32, StrategyBuilder>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with `rsi@1` and `macd@1`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("rsi", 1, |candles, params| {
            Ok(Box::new(RsiReversalStrategy::new(candles, params)?))
        });
        registry.register("macd", 1, |candles, params| {
            Ok(Box::new(MacdCrossStrategy::new(candles, params)?))
        });
        registry
    }

    /// Add or replace the builder for `name@version`.
    pub fn register(&mut self, name: &str, version: u32, builder: StrategyBuilder) {
        let replaced = self
            .builders
            .entry(name.to_string())
            .or_default()
            .insert(version, builder)
            .is_some();
        info!(strategy = name, version, replaced, "Registered strategy");
    }

    /// Every registered `name@version`, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.builders
            .iter()
            .flat_map(|(name, versions)| versions.keys().map(move |v| format!("{name}@{v}")))
            .collect()
    }

    /// Construct the strategy value for `key` from `candles`.
    /// An unversioned key resolves to the latest registered version.
    pub fn build(
        &self,
        key: &str,
        candles: Vec<Bar>,
        params: &StrategyParams,
    ) -> Result<Arc<dyn Strategy>> {
        let builder = self.resolve(key)?;
        debug!(strategy = key, candles = candles.len(), "Building strategy");
        Ok(Arc::from(builder(candles, params)?))
    }

    /// Check that `key` resolves and that `params` are accepted, by building
    /// once from an empty window.
    pub fn validate(&self, key: &str, params: &StrategyParams) -> Result<()> {
        let builder = self.resolve(key)?;
        builder(Vec::new(), params).map(|_| ())
    }

    fn resolve(&self, key: &str) -> Result<StrategyBuilder> {
        let (name, version) = match key.split_once('@') {
            Some((name, v)) => {
                let v = v
                    .parse::<u32>()
                    .map_err(|_| Error::UnknownStrategy(key.to_string()))?;
                (name, Some(v))
            }
            None => (key, None),
        };

        let versions = self
            .builders
            .get(name)
            .ok_or_else(|| Error::UnknownStrategy(key.to_string()))?;
        let builder = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        builder
            .copied()
            .ok_or_else(|| Error::UnknownStrategy(key.to_string()))
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
