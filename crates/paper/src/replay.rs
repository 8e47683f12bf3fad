use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::{
    Bar, CandleFeed, Contract, Error, Interval, MarketData, QuoteTick, Result, SessionStatus,
    TradingHour,
};

/// Historical candles replayed from JSON files, one sample per pull.
///
/// `<dir>/<SYMBOL>_<interval secs>.json` holds a JSON array of bars in
/// open-time order. The first batch carries up to `buffer_size` bars; after
/// that a single bar is released each time the consumer acknowledges the
/// previous batch. The feed closes when the file is exhausted.
pub struct ReplayMarketData {
    dir: PathBuf,
    // Quote receivers stay open for the whole replay but never tick, so
    // exits price off the replayed bar close.
    quote_senders: Mutex<Vec<mpsc::Sender<QuoteTick>>>,
}

impl ReplayMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quote_senders: Mutex::new(Vec::new()),
        }
    }

    pub fn path_for(&self, contract: &Contract, interval: Interval) -> PathBuf {
        replay_path(&self.dir, contract, interval)
    }
}

fn replay_path(dir: &Path, contract: &Contract, interval: Interval) -> PathBuf {
    dir.join(format!("{}_{}.json", contract.symbol, interval.as_secs()))
}

async fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Replay(format!("{}: {e}", path.display())))?;
    let mut bars: Vec<Bar> = serde_json::from_str(&raw)?;
    bars.sort_by_key(|b| b.open_time);
    Ok(bars)
}

#[async_trait]
impl MarketData for ReplayMarketData {
    async fn candles(
        &self,
        contract: &Contract,
        interval: Interval,
        buffer_size: usize,
    ) -> Result<CandleFeed> {
        let path = self.path_for(contract, interval);
        let bars = load_bars(&path).await?;
        info!(
            contract = %contract,
            interval = %interval,
            bars = bars.len(),
            file = %path.display(),
            "Replay loaded"
        );

        let (tx, rx) = mpsc::channel(1);
        let (ack_tx, mut ack_rx) = mpsc::channel(1);
        let label = contract.label();

        tokio::spawn(async move {
            let seed = buffer_size.max(1).min(bars.len());
            let mut rest = bars.into_iter();
            let mut batch: Vec<Bar> = rest.by_ref().take(seed).collect();

            while !batch.is_empty() {
                if tx.send(batch).await.is_err() {
                    debug!(contract = %label, "Replay consumer gone");
                    return;
                }
                // pull: wait until the watcher has processed the batch
                if ack_rx.recv().await.is_none() {
                    debug!(contract = %label, "Replay acknowledgement channel closed");
                    return;
                }
                batch = rest.next().into_iter().collect();
            }
            info!(contract = %label, interval = %interval, "Replay finished");
        });

        Ok(CandleFeed {
            batches: rx,
            ack: Some(ack_tx),
        })
    }

    async fn quotes(&self, _contract: &Contract) -> Result<mpsc::Receiver<QuoteTick>> {
        let (tx, rx) = mpsc::channel(1);
        self.quote_senders.lock().await.push(tx);
        Ok(rx)
    }

    async fn trading_hours(&self, contract: &Contract) -> Result<Vec<TradingHour>> {
        if !self.dir.is_dir() {
            warn!(contract = %contract, dir = %self.dir.display(), "Replay directory missing");
        }
        let now = Utc::now();
        Ok(vec![TradingHour {
            open_time: now - Duration::days(1),
            close_time: now + Duration::days(31),
            status: SessionStatus::Open,
        }])
    }
}
