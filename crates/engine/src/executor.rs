use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use common::{Broker, Contract, Error, Order, OrderReceipt, Position, Result, Trade};

use crate::cancel::CancelSignal;

/// Sequences order legs against the broker.
///
/// This is the ONLY component that calls `Broker::place_order` /
/// `Broker::cancel_order`. The broker offers no atomic multi-order
/// placement, so bracket legs are linked by parent id and a shared OCA
/// group, held back with `transmit = false` until the last leg, and
/// staggered by `leg_index * leg_delay`.
pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    leg_delay: Duration,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, leg_delay: Duration) -> Self {
        Self { broker, leg_delay }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Build the legs of an entry bracket for `trade`: a limit entry, a
    /// protective stop and an optional take-profit.
    pub fn bracket_legs(contract: &Contract, trade: &Trade, take_profit: Option<f64>) -> Vec<Order> {
        let direction = trade.signal.direction;
        let oca_group = format!("oca-{}", uuid::Uuid::new_v4());

        let mut parent = Order::limit(contract, direction.entry_side(), trade.units, trade.price);
        parent.transmit = false;

        let mut stop = Order::stop(contract, direction.exit_side(), trade.units, trade.stop_price);
        stop.parent_id = Some(parent.id.clone());
        stop.oca_group = Some(oca_group.clone());
        stop.transmit = take_profit.is_none();

        let mut legs = vec![parent, stop];
        if let Some(target) = take_profit {
            let mut tp = Order::limit(contract, direction.exit_side(), trade.units, target);
            tp.parent_id = legs.first().map(|p| p.id.clone());
            tp.oca_group = Some(oca_group);
            tp.transmit = true;
            legs.push(tp);
        }
        legs
    }

    /// Submit a bracket for `trade`.
    ///
    /// Cancellation is checked before every leg; once cancelled no further
    /// leg is sent. On cancellation or a leg failure the legs already
    /// accepted are cancelled best-effort and an error is returned. There is
    /// no retry.
    pub async fn place_bracket(
        &self,
        contract: &Contract,
        trade: &Trade,
        take_profit: Option<f64>,
        cancel: &CancelSignal,
    ) -> Result<Vec<OrderReceipt>> {
        let legs = Self::bracket_legs(contract, trade, take_profit);
        let mut placed: Vec<OrderReceipt> = Vec::with_capacity(legs.len());

        for (index, leg) in legs.iter().enumerate() {
            let delay = self.leg_delay * index as u32;
            let proceed = if delay.is_zero() {
                !cancel.is_cancelled()
            } else {
                cancel.sleep(delay).await
            };
            if !proceed {
                warn!(contract = %contract, leg = index, "Bracket cancelled before leg was sent");
                self.unwind(&placed).await;
                return Err(Error::Cancelled);
            }

            match self.broker.place_order(leg).await {
                Ok(receipt) => {
                    info!(
                        contract = %contract,
                        leg = index,
                        side = %leg.side,
                        qty = leg.quantity,
                        price = ?leg.price(),
                        "Bracket leg placed"
                    );
                    placed.push(receipt);
                }
                Err(e) => {
                    error!(contract = %contract, leg = index, error = %e, "Bracket leg failed");
                    self.unwind(&placed).await;
                    return Err(e);
                }
            }
        }

        Ok(placed)
    }

    /// Close `position` with an opposite-side limit order at `price`.
    pub async fn close_position(
        &self,
        contract: &Contract,
        position: &Position,
        price: f64,
    ) -> Result<OrderReceipt> {
        let side = if position.quantity > 0.0 {
            common::OrderSide::Sell
        } else {
            common::OrderSide::Buy
        };
        let order = Order::limit(contract, side, position.quantity.abs(), price);
        info!(contract = %contract, side = %side, qty = order.quantity, price, "Closing position");

        self.broker.place_order(&order).await.map_err(|e| {
            error!(contract = %contract, error = %e, "Close order failed");
            e
        })
    }

    async fn unwind(&self, placed: &[OrderReceipt]) {
        for receipt in placed.iter().rev() {
            if let Err(e) = self.broker.cancel_order(&receipt.order_id).await {
                warn!(order_id = %receipt.order_id, error = %e, "Failed to cancel bracket leg");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use common::{AccountSnapshot, Bar, Interval, OrderKind, OrderSide, PatternInfo, Signal};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroker {
        placed: Mutex<Vec<Order>>,
        cancelled: Mutex<Vec<String>>,
        fail_on_leg: Option<usize>,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn place_order(&self, order: &Order) -> Result<OrderReceipt> {
            let mut placed = self.placed.lock().await;
            if self.fail_on_leg == Some(placed.len()) {
                return Err(Error::Exchange("rejected".into()));
            }
            placed.push(order.clone());
            Ok(OrderReceipt {
                order_id: order.id.clone(),
                broker_id: format!("b{}", placed.len()),
                timestamp: Utc::now(),
            })
        }

        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            self.cancelled.lock().await.push(order_id.to_string());
            Ok(())
        }

        async fn account(&self) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }
    }

    fn trade() -> Trade {
        Trade {
            entry_bar: Bar {
                open_time: DateTime::from_timestamp(0, 0).unwrap(),
                interval: Interval::from_secs(60),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: None,
            },
            signal: Signal::long(0.8),
            price: 101.0,
            stop_price: 95.0,
            units: 3.0,
            pattern_info: PatternInfo::new(),
        }
    }

    fn contract() -> Contract {
        Contract::crypto("BTCUSDT", "BINANCE")
    }

    #[test]
    fn bracket_links_children_to_parent() {
        let legs = OrderExecutor::bracket_legs(&contract(), &trade(), Some(110.0));
        assert_eq!(legs.len(), 3);

        let parent = &legs[0];
        assert_eq!(parent.side, OrderSide::Buy);
        assert_eq!(parent.kind, OrderKind::Limit { price: 101.0 });
        assert!(!parent.transmit);

        let (stop, tp) = (&legs[1], &legs[2]);
        assert_eq!(stop.kind, OrderKind::Stop { price: 95.0 });
        assert_eq!(stop.side, OrderSide::Sell);
        assert!(!stop.transmit);
        assert!(tp.transmit);
        assert_eq!(stop.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(tp.parent_id.as_ref(), Some(&parent.id));
        assert!(stop.oca_group.is_some());
        assert_eq!(stop.oca_group, tp.oca_group);
    }

    #[test]
    fn two_leg_bracket_transmits_on_stop() {
        let legs = OrderExecutor::bracket_legs(&contract(), &trade(), None);
        assert_eq!(legs.len(), 2);
        assert!(legs[1].transmit);
    }

    #[tokio::test(start_paused = true)]
    async fn places_all_legs_in_order() {
        let broker = Arc::new(RecordingBroker::default());
        let executor = OrderExecutor::new(broker.clone(), Duration::from_millis(250));

        let receipts = executor
            .place_bracket(&contract(), &trade(), Some(110.0), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(receipts.len(), 3);

        let placed = broker.placed.lock().await;
        assert_eq!(placed[0].price(), Some(101.0));
        assert_eq!(placed[1].price(), Some(95.0));
        assert_eq!(placed[2].price(), Some(110.0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_leg_unwinds_placed_legs() {
        let broker = Arc::new(RecordingBroker {
            fail_on_leg: Some(1),
            ..Default::default()
        });
        let executor = OrderExecutor::new(broker.clone(), Duration::from_millis(250));

        let err = executor
            .place_bracket(&contract(), &trade(), None, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));

        let placed = broker.placed.lock().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(*broker.cancelled.lock().await, vec![placed[0].id.clone()]);
    }

    #[tokio::test]
    async fn cancelled_signal_sends_no_legs() {
        let broker = Arc::new(RecordingBroker::default());
        let executor = OrderExecutor::new(broker.clone(), Duration::from_millis(250));
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = executor
            .place_bracket(&contract(), &trade(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(broker.placed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn close_short_position_buys_back() {
        let broker = Arc::new(RecordingBroker::default());
        let executor = OrderExecutor::new(broker.clone(), Duration::ZERO);
        let position = Position {
            contract: contract(),
            quantity: -2.0,
            average_price: 100.0,
        };

        executor.close_position(&contract(), &position, 98.0).await.unwrap();
        let placed = broker.placed.lock().await;
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert_eq!(placed[0].quantity, 2.0);
        assert_eq!(placed[0].kind, OrderKind::Limit { price: 98.0 });
    }
}
