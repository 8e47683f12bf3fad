use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{
    Bar, CandleFeed, Contract, Error, Interval, MarketData, QuoteTick, Result, SessionStatus,
    TradingHour,
};

use super::{decimal, interval_code, REST_URL, WS_URL};

/// REST history is capped at this many klines per request.
const MAX_HISTORY: usize = 1000;

const CHANNEL_CAPACITY: usize = 1024;

/// Binance market data: kline candles seeded from REST history and kept
/// current over WebSocket, bookTicker/trade quote ticks, and an
/// always-open session calendar.
///
/// A dropped stream is logged and its channel closed; re-subscribing is
/// left to the operator.
pub struct BinanceMarketData {
    http: Client,
}

impl BinanceMarketData {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { http })
    }

    async fn history(&self, symbol: &str, code: &str, interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{REST_URL}/api/v3/klines?symbol={symbol}&interval={code}&limit={}",
            limit.clamp(1, MAX_HISTORY)
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        parse_history(&body, interval)
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn candles(
        &self,
        contract: &Contract,
        interval: Interval,
        buffer_size: usize,
    ) -> Result<CandleFeed> {
        let code = interval_code(interval)?;
        let seed = self
            .history(&contract.symbol, code, interval, buffer_size)
            .await?;
        info!(symbol = %contract.symbol, interval = %interval, bars = seed.len(), "Kline history loaded");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        if !seed.is_empty() {
            // fresh channel, cannot be full
            let _ = tx.try_send(seed);
        }

        let url = stream_url(&format!("{}@kline_{code}", contract.symbol.to_lowercase()))?;
        let symbol = contract.symbol.clone();
        tokio::spawn(async move {
            let result = pump(url, |text| parse_kline_event(text, interval), |bar| {
                let tx = tx.clone();
                async move { tx.send(vec![bar]).await.is_ok() }
            })
            .await;
            match result {
                Ok(()) => warn!(symbol = %symbol, "Kline stream closed"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Kline stream failed"),
            }
        });

        Ok(CandleFeed::streaming(rx))
    }

    async fn quotes(&self, contract: &Contract) -> Result<mpsc::Receiver<QuoteTick>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let lower = contract.symbol.to_lowercase();
        let url = stream_url(&format!("{lower}@bookTicker/{lower}@trade"))?;
        let symbol = contract.symbol.clone();

        tokio::spawn(async move {
            let result = pump(url, parse_quote_event, |ticks: Vec<QuoteTick>| {
                let tx = tx.clone();
                async move {
                    for tick in ticks {
                        if tx.send(tick).await.is_err() {
                            return false;
                        }
                    }
                    true
                }
            })
            .await;
            match result {
                Ok(()) => warn!(symbol = %symbol, "Quote stream closed"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Quote stream failed"),
            }
        });

        Ok(rx)
    }

    async fn trading_hours(&self, _contract: &Contract) -> Result<Vec<TradingHour>> {
        Ok(always_open(Utc::now()))
    }
}

/// Spot crypto trades around the clock: one open session spanning the
/// current day and the following 30.
fn always_open(now: DateTime<Utc>) -> Vec<TradingHour> {
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    vec![TradingHour {
        open_time: start,
        close_time: start + ChronoDuration::days(31),
        status: SessionStatus::Open,
    }]
}

fn stream_url(streams: &str) -> Result<Url> {
    let raw = if streams.contains('/') {
        format!("{WS_URL}/stream?streams={streams}")
    } else {
        format!("{WS_URL}/ws/{streams}")
    };
    Url::parse(&raw).map_err(|e| Error::WebSocket(e.to_string()))
}

/// Read text frames from `url`, parse each, and forward the results until
/// the socket closes or `forward` reports the receiver is gone.
async fn pump<T, P, F, Fut>(url: Url, parse: P, mut forward: F) -> Result<()>
where
    P: Fn(&str) -> Result<Option<T>>,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;
    let (_, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
        if let Message::Text(text) = msg {
            match parse(&text) {
                Ok(Some(item)) => {
                    if !forward(item).await {
                        debug!("Subscriber dropped, closing stream");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to parse stream event"),
            }
        }
    }
    Ok(())
}

// ─── Binance JSON parsing ─────────────────────────────────────────────────────

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Exchange(format!("bad timestamp {ms}")))
}

/// REST `/api/v3/klines` rows: `[openTime, open, high, low, close, volume, ...]`.
fn parse_history(body: &str, interval: Interval) -> Result<Vec<Bar>> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    rows.iter()
        .map(|row| {
            let field = |i: usize| -> Result<f64> {
                row.get(i)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Exchange(format!("kline field {i} missing")))
                    .and_then(decimal)
            };
            let open_ms = row
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Error::Exchange("kline open time missing".into()))?;
            Ok(Bar {
                open_time: millis(open_ms)?,
                interval,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: Some(field(5)?),
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

/// Forming and closed klines both become bars; the window replaces a
/// forming bar by open time.
fn parse_kline_event(text: &str, interval: Interval) -> Result<Option<Bar>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }
    let k = serde_json::from_value::<KlineWrapper>(value)?.k;
    Ok(Some(Bar {
        open_time: millis(k.open_time_ms)?,
        interval,
        open: decimal(&k.open)?,
        high: decimal(&k.high)?,
        low: decimal(&k.low)?,
        close: decimal(&k.close)?,
        volume: Some(decimal(&k.volume)?),
    }))
}

#[derive(Deserialize)]
struct Combined {
    stream: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct BookTicker {
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
}

#[derive(Deserialize)]
struct TradeEvent {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
}

/// Combined-stream frames: bookTicker yields bid and ask ticks, trade
/// yields last price and volume ticks.
fn parse_quote_event(text: &str) -> Result<Option<Vec<QuoteTick>>> {
    let frame: Combined = serde_json::from_str(text)?;
    if frame.stream.ends_with("@bookTicker") {
        let t: BookTicker = serde_json::from_value(frame.data)?;
        return Ok(Some(vec![
            QuoteTick::Bid(decimal(&t.bid)?),
            QuoteTick::Ask(decimal(&t.ask)?),
        ]));
    }
    if frame.stream.ends_with("@trade") {
        let t: TradeEvent = serde_json::from_value(frame.data)?;
        return Ok(Some(vec![
            QuoteTick::Last(decimal(&t.price)?),
            QuoteTick::Volume(decimal(&t.qty)?),
        ]));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_event() {
        let text = r#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":60000,"T":119999,"s":"BTCUSDT",
            "i":"1m","o":"100.0","c":"101.5","h":"102.0","l":"99.5","v":"12.5","x":false}}"#;
        let bar = parse_kline_event(text, Interval::from_secs(60)).unwrap().unwrap();
        assert_eq!(bar.open_time.timestamp(), 60);
        assert_eq!(bar.close, 101.5);
        assert_eq!(bar.volume, Some(12.5));
    }

    #[test]
    fn ignores_non_kline_frames() {
        assert!(parse_kline_event(r#"{"result":null,"id":1}"#, Interval::from_secs(60))
            .unwrap()
            .is_none());
    }

    #[test]
    fn book_ticker_yields_bid_and_ask() {
        let text = r#"{"stream":"btcusdt@bookTicker","data":{"u":1,"s":"BTCUSDT",
            "b":"99.0","B":"1.0","a":"101.0","A":"2.0"}}"#;
        let ticks = parse_quote_event(text).unwrap().unwrap();
        assert_eq!(ticks, vec![QuoteTick::Bid(99.0), QuoteTick::Ask(101.0)]);
    }

    #[test]
    fn trade_yields_last_and_volume() {
        let text = r#"{"stream":"btcusdt@trade","data":{"e":"trade","p":"100.5","q":"0.25"}}"#;
        let ticks = parse_quote_event(text).unwrap().unwrap();
        assert_eq!(ticks, vec![QuoteTick::Last(100.5), QuoteTick::Volume(0.25)]);
    }

    #[test]
    fn parses_rest_history() {
        let body = r#"[[0,"1.0","2.0","0.5","1.5","10.0",59999,"15.0",3,"5.0","7.5","0"],
                       [60000,"1.5","2.5","1.0","2.0","11.0",119999,"22.0",4,"5.0","10.0","0"]]"#;
        let bars = parse_history(body, Interval::from_secs(60)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].open_time.timestamp(), 60);
        assert_eq!(bars[1].high, 2.5);
    }

    #[test]
    fn combined_stream_url() {
        let url = stream_url("btcusdt@bookTicker/btcusdt@trade").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@bookTicker/btcusdt@trade"
        );
    }

    #[test]
    fn session_covers_now_with_room_to_spare() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap();
        let hours = always_open(now);
        assert!(hours[0].open_time <= now);
        assert!(hours[0].close_time - now > ChronoDuration::days(30));
    }
}
