use crate::error::VenueError;
use crate::events::{
    AccountPnlUpdate, AccountValueUpdate, CommissionReport, PositionPnlUpdate, VenueEvent,
    VenueExecution, VenuePosition,
};
use crate::types::{OrderAck, OrderTicket, VenueContract};
use crate::VenueClient;
use async_trait::async_trait;
use chrono::Utc;
use core_types::OrderSide;
use rust_decimal::Decimal;
use rust_decimal::prelude::Signed;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// A simulated paper venue.
///
/// The counterpart to a real gateway binding, in the same way a simulated
/// executor stands in for a live exchange: every order placed through it
/// fills immediately at a synthetic mark price and comes back through the
/// normal event stream, so the entire reconciliation pipeline (ledger,
/// cache, durable write-back, valuation subscriptions) runs unmodified.
/// Marks drift deterministically; there is no market data here.
pub struct SimVenue {
    account: String,
    connected: AtomicBool,
    inner: Mutex<SimState>,
}

struct SimPosition {
    contract: VenueContract,
    qty: Decimal,
    avg_cost: Decimal,
}

#[derive(Default)]
struct SimState {
    event_tx: Option<mpsc::Sender<VenueEvent>>,
    positions: HashMap<String, SimPosition>,
    marks: HashMap<String, Decimal>,
    subscriptions: Vec<i64>,
    next_contract_id: i64,
    next_order_id: i64,
    exec_counter: u64,
    tick: u64,
}

impl SimVenue {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            connected: AtomicBool::new(false),
            inner: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Synthetic mark: seeded per symbol, drifting a cent per valuation tick.
    fn mark_price(state: &mut SimState, symbol: &str) -> Decimal {
        let seed = 100 + (symbol.bytes().map(u64::from).sum::<u64>() % 400) as i64;
        let base = *state
            .marks
            .entry(symbol.to_string())
            .or_insert_with(|| Decimal::from(seed));
        base + Decimal::new(state.tick as i64, 2)
    }

    /// Emits the periodic valuation events a live venue would push.
    fn valuation_tick(&self) {
        let mut state = self.lock();
        state.tick += 1;
        let Some(tx) = state.event_tx.clone() else {
            return;
        };

        let mut unrealized_total = 0.0;
        let mut events: Vec<VenueEvent> = Vec::new();
        let tick = state.tick;
        for position in state.positions.values() {
            let seed = 100 + (position.contract.symbol.bytes().map(u64::from).sum::<u64>() % 400);
            let mark = seed as f64 + tick as f64 * 0.01;
            let avg = position.avg_cost.to_f64().unwrap_or(0.0);
            let qty = position.qty.to_f64().unwrap_or(0.0);
            let unrealized = (mark - avg) * qty;
            unrealized_total += unrealized;
            if let Some(contract_id) = position.contract.contract_id {
                // Only subscribed contracts receive live valuation, as on a
                // real gateway.
                if state.subscriptions.contains(&contract_id) {
                    events.push(VenueEvent::PositionPnl(PositionPnlUpdate {
                        contract_id,
                        unrealized_pnl: Some(unrealized),
                        daily_pnl: Some(unrealized / 2.0),
                    }));
                }
            }
        }
        events.push(VenueEvent::AccountPnl(AccountPnlUpdate {
            account: Some(self.account.clone()),
            daily_pnl: Some(unrealized_total / 2.0),
            unrealized_pnl: Some(unrealized_total),
            realized_pnl: Some(0.0),
        }));
        events.push(VenueEvent::AccountValue(AccountValueUpdate {
            account: Some(self.account.clone()),
            tag: "NetLiquidation".to_string(),
            value: format!("{:.2}", 100_000.0 + unrealized_total),
            currency: Some("BASE".to_string()),
        }));
        drop(state);

        for event in events {
            let _ = tx.try_send(event);
        }
    }
}

#[async_trait]
impl VenueClient for SimVenue {
    async fn connect(&self) -> Result<mpsc::Receiver<VenueEvent>, VenueError> {
        let (tx, rx) = mpsc::channel(256);
        {
            let mut state = self.lock();
            state.event_tx = Some(tx);
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(account = %self.account, "Simulated venue session opened.");
        Ok(rx)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.lock();
        state.event_tx = None;
        state.subscriptions.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn managed_account(&self) -> Result<String, VenueError> {
        Ok(self.account.clone())
    }

    async fn request_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let state = self.lock();
        Ok(state
            .positions
            .values()
            .map(|p| VenuePosition {
                account: Some(self.account.clone()),
                contract: p.contract.clone(),
                qty: p.qty,
                avg_cost: p.avg_cost,
            })
            .collect())
    }

    async fn request_executions(&self) -> Result<Vec<VenueExecution>, VenueError> {
        // The paper venue has no execution history beyond what it already
        // streamed live.
        Ok(vec![])
    }

    async fn subscribe_account_pnl(&self, _account: &str) -> Result<(), VenueError> {
        Ok(())
    }

    async fn subscribe_account_summary(&self, _tags: &[&'static str]) -> Result<(), VenueError> {
        Ok(())
    }

    async fn subscribe_position_pnl(
        &self,
        _account: &str,
        contract_id: i64,
    ) -> Result<(), VenueError> {
        self.lock().subscriptions.push(contract_id);
        Ok(())
    }

    async fn unsubscribe_position_pnl(&self, contract_id: i64) -> Result<(), VenueError> {
        self.lock().subscriptions.retain(|id| *id != contract_id);
        Ok(())
    }

    async fn qualify_instrument(
        &self,
        symbol: &str,
        exchange: &str,
        currency: &str,
    ) -> Result<VenueContract, VenueError> {
        let mut state = self.lock();
        let contract_id = match state.positions.get(symbol) {
            Some(position) => position.contract.contract_id,
            None => {
                state.next_contract_id += 1;
                Some(state.next_contract_id)
            }
        };
        Ok(VenueContract {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            contract_id,
        })
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<OrderAck, VenueError> {
        if !self.is_connected() {
            return Err(VenueError::Disconnected);
        }
        let (order_id, exec_id, price, tx) = {
            let mut state = self.lock();
            state.next_order_id += 1;
            state.exec_counter += 1;
            let order_id = state.next_order_id;
            let exec_id = format!("sim-{:08}", state.exec_counter);
            let price = ticket
                .limit_price
                .unwrap_or_else(|| Self::mark_price(&mut state, &ticket.contract.symbol));

            // Book the fill into the paper venue's own position state so
            // position snapshots stay truthful across reconnects.
            let signed = match ticket.side {
                OrderSide::Buy => ticket.qty,
                OrderSide::Sell => -ticket.qty,
            };
            let entry = state
                .positions
                .entry(ticket.contract.symbol.clone())
                .or_insert_with(|| SimPosition {
                    contract: ticket.contract.clone(),
                    qty: Decimal::ZERO,
                    avg_cost: price,
                });
            let new_qty = entry.qty + signed;
            if entry.qty.is_zero() || entry.qty.signum() == signed.signum() {
                let total = entry.avg_cost * entry.qty + price * signed;
                entry.avg_cost = if new_qty.is_zero() { price } else { total / new_qty };
            } else if new_qty.signum() != entry.qty.signum() && !new_qty.is_zero() {
                entry.avg_cost = price;
            }
            entry.qty = new_qty;
            if new_qty.is_zero() {
                state.positions.remove(&ticket.contract.symbol);
            }

            (order_id, exec_id, price, state.event_tx.clone())
        };

        if let Some(tx) = tx {
            let commission = (ticket.qty * Decimal::new(5, 3)).max(Decimal::ONE);
            let event = VenueEvent::Execution(VenueExecution {
                account: Some(self.account.clone()),
                contract: ticket.contract.clone(),
                exec_id: exec_id.clone(),
                perm_id: None,
                side: match ticket.side {
                    OrderSide::Buy => "BOT".to_string(),
                    OrderSide::Sell => "SLD".to_string(),
                },
                qty: ticket.qty,
                price,
                time: Some(Utc::now()),
                commission: Some(CommissionReport {
                    exec_id,
                    commission,
                    realized_pnl: None,
                }),
            });
            let _ = tx.send(event).await;
        }

        Ok(OrderAck {
            order_id,
            status: "Filled".to_string(),
            filled: ticket.qty,
            remaining: Decimal::ZERO,
            avg_fill_price: Some(price),
        })
    }

    async fn liveness_probe(&self) -> Result<(), VenueError> {
        if !self.is_connected() {
            return Err(VenueError::Disconnected);
        }
        // Piggyback the valuation push on the engine's keepalive cadence.
        self.valuation_tick();
        Ok(())
    }
}

/// Drives the paper venue's valuation stream on a fixed cadence, for runs
/// where the engine keepalive is too slow to make the demo feel live.
pub fn spawn_valuation_feed(venue: std::sync::Arc<SimVenue>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if venue.is_connected() {
                venue.valuation_tick();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderType;
    use rust_decimal_macros::dec;

    fn ticket(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> OrderTicket {
        OrderTicket {
            contract: VenueContract {
                symbol: symbol.to_string(),
                exchange: "SMART".to_string(),
                currency: "USD".to_string(),
                contract_id: Some(1),
            },
            side,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(price),
            tif: None,
            account: None,
        }
    }

    #[tokio::test]
    async fn fills_stream_back_as_executions() {
        let venue = SimVenue::new("SIM");
        let mut events = venue.connect().await.unwrap();

        let ack = venue
            .place_order(&ticket("MSFT", OrderSide::Buy, dec!(10), dec!(100)))
            .await
            .unwrap();
        assert_eq!(ack.status, "Filled");

        match events.recv().await.unwrap() {
            VenueEvent::Execution(exec) => {
                assert_eq!(exec.side, "BOT");
                assert_eq!(exec.qty, dec!(10));
                assert_eq!(exec.price, dec!(100));
                assert!(exec.commission.is_some());
            }
            other => panic!("expected Execution, got {other:?}"),
        }

        let positions = venue.request_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].qty, dec!(10));
    }

    #[tokio::test]
    async fn closing_a_position_removes_it_from_snapshots() {
        let venue = SimVenue::new("SIM");
        let _events = venue.connect().await.unwrap();
        venue
            .place_order(&ticket("MSFT", OrderSide::Buy, dec!(10), dec!(100)))
            .await
            .unwrap();
        venue
            .place_order(&ticket("MSFT", OrderSide::Sell, dec!(10), dec!(110)))
            .await
            .unwrap();
        assert!(venue.request_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orders_fail_when_disconnected() {
        let venue = SimVenue::new("SIM");
        let result = venue
            .place_order(&ticket("MSFT", OrderSide::Buy, dec!(1), dec!(1)))
            .await;
        assert!(matches!(result, Err(VenueError::Disconnected)));
    }
}
