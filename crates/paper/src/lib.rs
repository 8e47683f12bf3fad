pub mod replay;

pub use replay::ReplayMarketData;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use common::{
    AccountSnapshot, Broker, Contract, Error, MarketData, Order, OrderKind, OrderReceipt,
    OrderSide, Position, QuoteTick, RejectionReason, Result,
};

/// Simulated broker for paper trading.
///
/// Market orders fill at the latest known price with configurable slippage,
/// limit orders fill at their limit price. Bracket children and stop orders
/// rest until a price update crosses them. No real orders are ever sent.
pub struct PaperBroker {
    ledger: RwLock<Ledger>,
    /// Latest known price per contract label, updated via `update_price`.
    prices: RwLock<HashMap<String, f64>>,
    /// Slippage in basis points applied to market and triggered stop fills.
    slippage_bps: f64,
}

#[derive(Debug, Default)]
struct Ledger {
    buying_power: f64,
    positions: HashMap<String, Position>,
    open_orders: Vec<Order>,
}

impl Ledger {
    fn fill(&mut self, order: &Order, price: f64) -> Result<()> {
        let signed = match order.side {
            OrderSide::Buy => order.quantity,
            OrderSide::Sell => -order.quantity,
        };
        let cost = signed * price;
        if cost > self.buying_power {
            return Err(Error::OrderRejected {
                reason: RejectionReason::Other(format!(
                    "insufficient buying power: need {cost:.2}, have {:.2}",
                    self.buying_power
                )),
            });
        }
        self.buying_power -= cost;

        let label = order.contract.label();
        let position = self.positions.entry(label.clone()).or_insert_with(|| Position {
            contract: order.contract.clone(),
            quantity: 0.0,
            average_price: 0.0,
        });
        let held = position.quantity;
        let quantity = held + signed;

        if held == 0.0 || held.signum() == signed.signum() {
            position.average_price =
                (held.abs() * position.average_price + order.quantity * price) / quantity.abs();
        } else if quantity != 0.0 && quantity.signum() != held.signum() {
            // flipped through flat: the remainder was opened at this fill
            position.average_price = price;
        }
        position.quantity = quantity;

        if quantity.abs() < 1e-12 {
            self.positions.remove(&label);
        }
        Ok(())
    }
}

impl PaperBroker {
    pub fn new(initial_balance_usd: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_balance_usd,
            slippage_bps = slippage_bps,
            "PaperBroker initialized"
        );
        Self {
            ledger: RwLock::new(Ledger {
                buying_power: initial_balance_usd,
                ..Default::default()
            }),
            prices: RwLock::new(HashMap::new()),
            slippage_bps,
        }
    }

    /// Record the latest price for `contract` and fill any resting order it
    /// crosses. Filling one leg of an OCA group cancels its siblings.
    pub async fn update_price(&self, contract: &Contract, price: f64) {
        let label = contract.label();
        self.prices.write().await.insert(label.clone(), price);

        let mut ledger = self.ledger.write().await;
        let triggered: Vec<Order> = ledger
            .open_orders
            .iter()
            .filter(|o| o.contract.label() == label && crosses(o, price))
            .cloned()
            .collect();

        for order in triggered {
            if !ledger.open_orders.iter().any(|o| o.id == order.id) {
                // already cancelled by an OCA sibling
                continue;
            }
            let fill_price = match order.kind {
                OrderKind::Limit { price: limit } => limit,
                _ => self.slipped(price, order.side),
            };
            ledger.open_orders.retain(|o| {
                o.id != order.id
                    && (order.oca_group.is_none() || o.oca_group != order.oca_group)
            });
            match ledger.fill(&order, fill_price) {
                Ok(()) => debug!(
                    order = %order.id,
                    contract = %label,
                    side = %order.side,
                    fill = fill_price,
                    "Paper resting order filled"
                ),
                Err(e) => warn!(order = %order.id, error = %e, "Paper resting order dropped"),
            }
        }
    }

    /// Feed `update_price` from the last-trade ticks of `contract`.
    pub async fn track_prices(
        self: &Arc<Self>,
        market: Arc<dyn MarketData>,
        contract: Contract,
    ) -> Result<JoinHandle<()>> {
        let mut ticks = market.quotes(&contract).await?;
        let broker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                if let QuoteTick::Last(price) = tick {
                    broker.update_price(&contract, price).await;
                }
            }
            debug!(contract = %contract, "Paper price feed closed");
        }))
    }

    fn slipped(&self, mid: f64, side: OrderSide) -> f64 {
        // buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    async fn price_of(&self, contract: &Contract) -> Result<f64> {
        let label = contract.label();
        self.prices.read().await.get(&label).copied().ok_or_else(|| {
            Error::Exchange(format!(
                "PaperBroker has no price for '{label}'. Ensure market events are flowing."
            ))
        })
    }
}

/// Whether a resting order would trade at `price`.
fn crosses(order: &Order, price: f64) -> bool {
    match (order.kind, order.side) {
        (OrderKind::Stop { price: stop }, OrderSide::Sell) => price <= stop,
        (OrderKind::Stop { price: stop }, OrderSide::Buy) => price >= stop,
        (OrderKind::Limit { price: limit }, OrderSide::Sell) => price >= limit,
        (OrderKind::Limit { price: limit }, OrderSide::Buy) => price <= limit,
        (OrderKind::Market, _) => true,
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<()> {
        info!("PaperBroker connected");
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<OrderReceipt> {
        let rests = order.parent_id.is_some() || matches!(order.kind, OrderKind::Stop { .. });

        if rests {
            self.ledger.write().await.open_orders.push(order.clone());
            debug!(
                order = %order.id,
                contract = %order.contract,
                kind = ?order.kind,
                "Paper order resting"
            );
        } else {
            let fill_price = match order.kind {
                OrderKind::Limit { price } => price,
                _ => self.slipped(self.price_of(&order.contract).await?, order.side),
            };
            self.ledger.write().await.fill(order, fill_price)?;
            debug!(
                order = %order.id,
                contract = %order.contract,
                side = %order.side,
                fill = fill_price,
                qty = order.quantity,
                "Paper fill simulated"
            );
        }

        Ok(OrderReceipt {
            order_id: order.id.clone(),
            broker_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let before = ledger.open_orders.len();
        ledger.open_orders.retain(|o| o.id != order_id);
        if ledger.open_orders.len() == before {
            return Err(Error::Exchange(format!("no open paper order '{order_id}'")));
        }
        Ok(())
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        let ledger = self.ledger.read().await;
        let mut positions: Vec<Position> = ledger.positions.values().cloned().collect();
        positions.sort_by_key(|p| p.contract.label());
        Ok(AccountSnapshot {
            buying_power: ledger.buying_power,
            positions,
            open_orders: ledger.open_orders.clone(),
        })
    }
}
