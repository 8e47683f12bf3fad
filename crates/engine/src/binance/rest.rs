use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use common::{
    AccountSnapshot, Broker, Contract, Error, Order, OrderKind, OrderReceipt, OrderSide, Position,
    Result,
};

use super::{decimal, EXCHANGE, REST_URL};

const QUOTE_ASSET: &str = "USDT";

/// Signed REST client for Binance spot. Places and cancels orders and
/// reads the account snapshot.
///
/// Spot has no native brackets, so `parent_id`, `oca_group` and `transmit`
/// are carried by the order executor's sequencing, not sent to the venue.
pub struct BinanceBroker {
    api_key: String,
    secret: String,
    http: Client,
}

impl BinanceBroker {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http,
        })
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String> {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query);
        let url = format!("{REST_URL}{path}?{query}&signature={signature}");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

/// Query string for a new spot order.
pub(crate) fn order_params(order: &Order) -> String {
    let mut params = format!(
        "symbol={}&side={}&quantity={}&newClientOrderId={}",
        order.contract.symbol, order.side, order.quantity, order.id
    );
    match order.kind {
        OrderKind::Market => params.push_str("&type=MARKET"),
        OrderKind::Limit { price } => {
            params.push_str(&format!("&type=LIMIT&price={price}&timeInForce=GTC"))
        }
        OrderKind::Stop { price } => params.push_str(&format!("&type=STOP_LOSS&stopPrice={price}")),
    }
    params
}

#[async_trait]
impl Broker for BinanceBroker {
    async fn connect(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{REST_URL}/api/v3/ping"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Exchange(format!("ping failed: HTTP {}", resp.status())));
        }
        info!("Connected to Binance REST API");
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<OrderReceipt> {
        let params = order_params(order);
        debug!(symbol = %order.contract.symbol, side = %order.side, "Submitting order to Binance");
        let body = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;

        Ok(OrderReceipt {
            order_id: resp.client_order_id,
            broker_id: resp.order_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        // Binance needs the symbol, so look the order up among the open ones
        let body = self.signed(Method::GET, "/api/v3/openOrders", "").await?;
        let open: Vec<OpenOrder> = serde_json::from_str(&body)?;
        let Some(order) = open.iter().find(|o| o.client_order_id == order_id) else {
            return Err(Error::Exchange(format!("no open order '{order_id}'")));
        };

        let params = format!("symbol={}&origClientOrderId={order_id}", order.symbol);
        self.signed(Method::DELETE, "/api/v3/order", &params).await?;
        info!(order_id, "Order cancelled");
        Ok(())
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        let body = self.signed(Method::GET, "/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;
        let body = self.signed(Method::GET, "/api/v3/openOrders", "").await?;
        let open: Vec<OpenOrder> = serde_json::from_str(&body)?;

        let mut snapshot = AccountSnapshot::default();
        for balance in account.balances {
            let qty = decimal(&balance.free)? + decimal(&balance.locked)?;
            if balance.asset == QUOTE_ASSET {
                snapshot.buying_power = decimal(&balance.free)?;
            } else if qty > 0.0 {
                // entry price is unknown without trade history
                snapshot.positions.push(Position {
                    contract: spot_contract(&format!("{}{QUOTE_ASSET}", balance.asset)),
                    quantity: qty,
                    average_price: 0.0,
                });
            }
        }
        snapshot.open_orders = open
            .into_iter()
            .map(OpenOrder::into_order)
            .collect::<Result<_>>()?;
        Ok(snapshot)
    }
}

fn spot_contract(symbol: &str) -> Contract {
    Contract::crypto(symbol, EXCHANGE)
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    client_order_id: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrder {
    symbol: String,
    client_order_id: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    price: String,
    stop_price: Option<String>,
    orig_qty: String,
}

impl OpenOrder {
    fn into_order(self) -> Result<Order> {
        let contract = spot_contract(&self.symbol);
        let side = match self.side.as_str() {
            "BUY" => OrderSide::Buy,
            _ => OrderSide::Sell,
        };
        let quantity = decimal(&self.orig_qty)?;
        let mut order = match self.order_type.as_str() {
            "MARKET" => Order::market(&contract, side, quantity),
            "STOP_LOSS" | "STOP_LOSS_LIMIT" => {
                let stop = self.stop_price.as_deref().unwrap_or(&self.price);
                Order::stop(&contract, side, quantity, decimal(stop)?)
            }
            _ => Order::limit(&contract, side, quantity, decimal(&self.price)?),
        };
        order.id = self.client_order_id;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_leg_maps_to_stop_loss() {
        let contract = Contract::crypto("BTCUSDT", EXCHANGE);
        let order = Order::stop(&contract, OrderSide::Sell, 0.5, 95.0);
        let params = order_params(&order);
        assert!(params.starts_with("symbol=BTCUSDT&side=SELL&quantity=0.5"));
        assert!(params.ends_with("&type=STOP_LOSS&stopPrice=95"));
        assert!(params.contains(&format!("newClientOrderId={}", order.id)));
    }

    #[test]
    fn open_order_round_trips_client_id() {
        let raw = r#"{"symbol":"ETHUSDT","clientOrderId":"abc","side":"BUY","type":"LIMIT",
                      "price":"1500.5","stopPrice":"0.0","origQty":"2.0"}"#;
        let order = serde_json::from_str::<OpenOrder>(raw).unwrap().into_order().unwrap();
        assert_eq!(order.id, "abc");
        assert_eq!(order.kind, OrderKind::Limit { price: 1500.5 });
        assert_eq!(order.contract.label(), "CRYPTO:BINANCE:ETHUSDT:USDT");
    }
}
