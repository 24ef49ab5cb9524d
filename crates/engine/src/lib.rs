//! # Meridian Engine Crate
//!
//! The reconciliation orchestrator: owns the venue connection lifecycle,
//! maps every inbound venue event to ledger/cache/storage mutations, runs
//! the periodic write-back tick, and serializes order submission through a
//! bounded queue.
//!
//! ## Architectural Principles
//!
//! - **Single writer:** one long-lived worker task drives the venue session
//!   and processes events, ticks, and queued orders sequentially. The cache
//!   absorbs concurrent readers; nothing else mutates state.
//! - **Sessions are disposable:** any error while connected tears the whole
//!   session down and falls through to the backoff/retry loop. Per-session
//!   state (subscriptions, pending buffers) is rebuilt on reconnect from the
//!   cache and durable storage.
//! - **Callers never hang:** every order submission is resolved — with the
//!   venue's answer, a "still queued" timeout response, or a disconnect
//!   failure when the session dies.
//!
//! ## Public API
//!
//! - `SyncEngine`: construct, `spawn`, `stop`, `status`, `enqueue_order`.
//! - `SyncStatus`: connectivity/lifecycle flags for the serving layer.
//! - `OrderResult`: the typed outcome of an order submission.

pub mod error;
pub mod orders;
pub mod session;
pub mod status;

use cache::{CacheStore, Hydration};
use chrono::Utc;
use configuration::Config;
use core_types::OrderRequest;
use database::DbRepository;
use session::Session;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;
use venue_client::VenueClient;

pub use error::EngineError;
pub use orders::{OrderJob, OrderResult, OrderWaiters};
pub use status::SyncStatus;

/// Why a connected session ended.
enum SessionEnd {
    Stopped,
    Disconnected,
}

/// The central orchestrator for venue reconciliation.
pub struct SyncEngine {
    pub(crate) config: Config,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) venue: Arc<dyn VenueClient>,
    pub(crate) repo: DbRepository,
    status: Mutex<SyncStatus>,
    stop_tx: watch::Sender<bool>,
    order_tx: mpsc::Sender<OrderJob>,
    order_rx: tokio::sync::Mutex<Option<mpsc::Receiver<OrderJob>>>,
    pub(crate) waiters: OrderWaiters,
}

impl SyncEngine {
    pub fn new(
        config: Config,
        venue: Arc<dyn VenueClient>,
        repo: DbRepository,
        cache: Arc<CacheStore>,
    ) -> Self {
        let (order_tx, order_rx) = mpsc::channel(config.sync.order_queue_max);
        let (stop_tx, _stop_rx) = watch::channel(false);
        Self {
            config,
            cache,
            venue,
            repo,
            status: Mutex::new(SyncStatus::default()),
            stop_tx,
            order_tx,
            order_rx: tokio::sync::Mutex::new(Some(order_rx)),
            waiters: OrderWaiters::default(),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn with_status(&self, mutate: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        mutate(&mut status);
    }

    pub(crate) fn mark_update(&self) {
        self.with_status(|s| s.last_update = Some(Utc::now()));
    }

    /// Requests clean shutdown. Checked inside the event loop and at the top
    /// of the reconnect loop; in-flight order waiters are failed on teardown.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Spawns the reconciliation worker and returns its handle.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Validated order submission. Registers a completion waiter, places the
    /// request on the bounded queue (a full queue fails immediately), and
    /// waits up to `timeout` for the worker. Timing out yields a "still
    /// queued" response — the request is not abandoned.
    pub async fn enqueue_order(
        &self,
        request: OrderRequest,
        request_id: Option<String>,
        timeout: Duration,
    ) -> OrderResult {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        if !self.status().connected {
            return OrderResult::failed(request_id, "Venue gateway disconnected");
        }

        let rx = self.waiters.register(&request_id);
        let job = OrderJob {
            request_id: request_id.clone(),
            request,
        };
        if let Err(err) = self.order_tx.try_send(job) {
            self.waiters.remove(&request_id);
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "Order queue full",
                mpsc::error::TrySendError::Closed(_) => "Venue gateway disconnected",
            };
            return OrderResult::failed(request_id, reason);
        }
        tracing::info!(request_id = %request_id, "Order queued.");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // The waiter sender vanished, which only happens on teardown.
            Ok(Err(_)) => OrderResult::failed(request_id, "Venue gateway disconnected"),
            Err(_elapsed) => OrderResult::Queued { request_id },
        }
    }

    /// The reconnect state machine: disconnected -> connecting -> connected,
    /// with exponential backoff between attempts, reset on every success.
    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut order_rx = match self.order_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::error!("Engine worker already running, refusing to start twice.");
                return;
            }
        };

        self.with_status(|s| {
            s.running = true;
            s.started_at = Some(Utc::now());
        });

        let min_backoff = Duration::from_secs(self.config.sync.reconnect_min_delay_secs.max(1));
        let max_backoff = Duration::from_secs(self.config.sync.reconnect_max_delay_secs.max(1));
        let mut backoff = min_backoff;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let end = self
                .run_session(&mut order_rx, &mut stop_rx, &mut backoff, min_backoff)
                .await;

            let now = Utc::now();
            self.with_status(|s| {
                s.connected = false;
                s.last_disconnected_at = Some(now);
                s.venue_reachable = Some(false);
                s.venue_last_down_at = Some(now);
                match &end {
                    Ok(SessionEnd::Stopped) => {}
                    Ok(SessionEnd::Disconnected) => {
                        s.error = Some("Disconnected from venue gateway".to_string());
                    }
                    Err(err) => s.error = Some(err.to_string()),
                }
            });
            if let Err(err) = &end {
                tracing::error!(error = %err, "Session ended with error.");
            }

            // Teardown: drop the venue session and make sure nobody is left
            // blocked on an order that will never be processed.
            self.venue.disconnect().await;
            self.waiters.fail_all("Venue gateway disconnected");

            if matches!(end, Ok(SessionEnd::Stopped)) || *stop_rx.borrow() {
                break;
            }

            tracing::info!(delay_secs = backoff.as_secs(), "Reconnecting after backoff.");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(max_backoff);
        }

        self.with_status(|s| {
            s.running = false;
            s.connected = false;
        });
        *self.order_rx.lock().await = Some(order_rx);
        tracing::info!("Engine worker stopped.");
    }

    async fn run_session(
        &self,
        order_rx: &mut mpsc::Receiver<OrderJob>,
        stop_rx: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
        min_backoff: Duration,
    ) -> Result<SessionEnd, EngineError> {
        let mut events = self.venue.connect().await?;
        let now = Utc::now();
        self.with_status(|s| {
            s.connected = true;
            s.last_connected_at = Some(now);
            s.venue_reachable = Some(true);
            s.venue_last_up_at = Some(now);
            s.error = None;
        });
        tracing::info!("Venue gateway connected.");
        *backoff = min_backoff;

        // Resolve the account identity and hydrate the cache exactly once
        // per process; later reconnects keep serving the warm cache.
        let account = self.venue.managed_account().await?;
        let account_id = self
            .repo
            .upsert_account(&account, &self.config.account.base_currency)
            .await?;
        self.cache
            .set_account(account_id, &self.config.account.base_currency);
        if !self.cache.is_ready() {
            self.hydrate(account_id).await?;
            tracing::info!(account_id, "Cache hydrated from durable storage.");
        }

        let mut session = Session::new(self, account, account_id);
        session.replay().await?;

        let mut keepalive = interval(Duration::from_secs(self.config.sync.keepalive_secs.max(1)));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;
        let mut flush = interval(Duration::from_secs(self.config.sync.cache_flush_secs.max(1)));
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush.tick().await;

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return Ok(SessionEnd::Stopped);
                    }
                }
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => session.handle_event(event).await?,
                        None => return Ok(SessionEnd::Disconnected),
                    }
                }
                maybe_job = order_rx.recv() => {
                    if let Some(job) = maybe_job {
                        session.process_order(job).await;
                    }
                }
                _ = keepalive.tick() => {
                    self.venue.liveness_probe().await?;
                }
                _ = flush.tick() => {
                    session.flush().await?;
                }
            }
            if !self.venue.is_connected() {
                return Ok(SessionEnd::Disconnected);
            }
        }
    }

    async fn hydrate(&self, account_id: i64) -> Result<(), EngineError> {
        let realized_total = self.repo.sum_realized_total(account_id).await?;
        let positions = self.repo.load_positions(account_id).await?;
        let history = self.repo.load_history(account_id).await?;
        let summary = self.repo.load_account_summary(account_id).await?;
        let daily = self
            .repo
            .load_daily_pnl(account_id)
            .await?
            .into_iter()
            .map(|point| (point.trade_date, point.daily_pnl))
            .collect();

        self.cache.hydrate(Hydration {
            account_id,
            base_currency: self.config.account.base_currency.clone(),
            realized_total,
            positions,
            history,
            summary,
            daily,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::{OrderSide, OrderType};
    use rust_decimal_macros::dec;
    use venue_client::{
        OrderAck, OrderTicket, VenueContract, VenueError, VenueEvent, VenueExecution, VenuePosition,
    };

    /// An in-memory venue double: orders succeed unless the symbol is
    /// "REJECT", qualification fails for "UNKNOWN".
    struct MockVenue;

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn connect(&self) -> Result<mpsc::Receiver<VenueEvent>, VenueError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        async fn managed_account(&self) -> Result<String, VenueError> {
            Ok("TEST".to_string())
        }
        async fn request_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
            Ok(vec![])
        }
        async fn request_executions(&self) -> Result<Vec<VenueExecution>, VenueError> {
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
            _contract_id: i64,
        ) -> Result<(), VenueError> {
            Ok(())
        }
        async fn unsubscribe_position_pnl(&self, _contract_id: i64) -> Result<(), VenueError> {
            Ok(())
        }
        async fn qualify_instrument(
            &self,
            symbol: &str,
            exchange: &str,
            currency: &str,
        ) -> Result<VenueContract, VenueError> {
            if symbol == "UNKNOWN" {
                return Err(VenueError::UnqualifiedInstrument(symbol.to_string()));
            }
            Ok(VenueContract {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                currency: currency.to_string(),
                contract_id: Some(1),
            })
        }
        async fn place_order(&self, ticket: &OrderTicket) -> Result<OrderAck, VenueError> {
            if ticket.contract.symbol == "REJECT" {
                return Err(VenueError::Rejected("margin".to_string()));
            }
            Ok(OrderAck {
                order_id: 7,
                status: "Submitted".to_string(),
                filled: dec!(0),
                remaining: ticket.qty,
                avg_fill_price: None,
            })
        }
        async fn liveness_probe(&self) -> Result<(), VenueError> {
            Ok(())
        }
    }

    fn test_engine(queue_capacity: usize) -> Arc<SyncEngine> {
        let mut config = Config::default();
        config.sync.order_queue_max = queue_capacity;
        // connect_lazy never touches the network; the order path does not
        // reach the database in these tests.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/meridian_test")
            .expect("lazy pool");
        Arc::new(SyncEngine::new(
            config,
            Arc::new(MockVenue),
            DbRepository::new(pool),
            Arc::new(CacheStore::new()),
        ))
    }

    fn order(symbol: &str, order_type: OrderType, price: Option<rust_decimal::Decimal>) -> OrderRequest {
        OrderRequest {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type,
            qty: dec!(10),
            price,
            exchange: None,
            currency: None,
            tif: None,
            account: None,
        }
    }

    #[tokio::test]
    async fn enqueue_fails_when_disconnected() {
        let engine = test_engine(4);
        let result = engine
            .enqueue_order(order("MSFT", OrderType::Market, None), None, Duration::from_millis(50))
            .await;
        assert!(result.is_failure());
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let engine = test_engine(1);
        engine.with_status(|s| s.connected = true);

        // Nobody is draining the queue, so the second enqueue hits capacity.
        let first = engine
            .enqueue_order(order("MSFT", OrderType::Market, None), None, Duration::from_millis(10))
            .await;
        assert!(matches!(first, OrderResult::Queued { .. }));

        let second = engine
            .enqueue_order(order("AAPL", OrderType::Market, None), None, Duration::from_millis(10))
            .await;
        match second {
            OrderResult::Failed { error, .. } => assert_eq!(error, "Order queue full"),
            other => panic!("expected queue-full failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timed_out_request_reports_still_queued_and_is_not_abandoned() {
        let engine = test_engine(4);
        engine.with_status(|s| s.connected = true);

        let result = engine
            .enqueue_order(
                order("MSFT", OrderType::Market, None),
                Some("req-1".to_string()),
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(
            result,
            OrderResult::Queued {
                request_id: "req-1".to_string()
            }
        );
        // The waiter is still registered for the worker to resolve later.
        assert_eq!(engine.waiters.pending(), 1);
    }

    #[tokio::test]
    async fn worker_resolves_market_order_with_initial_status() {
        let engine = test_engine(4);
        engine.with_status(|s| s.connected = true);

        let mut session = Session::new(&engine, "TEST".to_string(), 1);
        let rx = engine.waiters.register("req-2");
        session
            .process_order(OrderJob {
                request_id: "req-2".to_string(),
                request: order("MSFT", OrderType::Market, None),
            })
            .await;
        match rx.await.unwrap() {
            OrderResult::Placed {
                order_id,
                order_status,
                ..
            } => {
                assert_eq!(order_id, 7);
                assert_eq!(order_status, "Submitted");
            }
            other => panic!("expected Placed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn limit_order_without_price_fails_before_submission() {
        let engine = test_engine(4);
        let mut session = Session::new(&engine, "TEST".to_string(), 1);
        let rx = engine.waiters.register("req-3");
        session
            .process_order(OrderJob {
                request_id: "req-3".to_string(),
                request: order("MSFT", OrderType::Limit, None),
            })
            .await;
        match rx.await.unwrap() {
            OrderResult::Failed { error, .. } => assert_eq!(error, "Limit price required"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unqualifiable_instrument_fails_the_order() {
        let engine = test_engine(4);
        let mut session = Session::new(&engine, "TEST".to_string(), 1);
        let rx = engine.waiters.register("req-4");
        session
            .process_order(OrderJob {
                request_id: "req-4".to_string(),
                request: order("UNKNOWN", OrderType::Market, None),
            })
            .await;
        match rx.await.unwrap() {
            OrderResult::Failed { error, .. } => assert_eq!(error, "Unable to qualify contract"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn teardown_fails_every_pending_waiter() {
        let engine = test_engine(4);
        let rx_a = engine.waiters.register("a");
        let rx_b = engine.waiters.register("b");
        engine.waiters.fail_all("Venue gateway disconnected");
        assert!(rx_a.await.unwrap().is_failure());
        assert!(rx_b.await.unwrap().is_failure());
        assert_eq!(engine.waiters.pending(), 0);
    }
}
