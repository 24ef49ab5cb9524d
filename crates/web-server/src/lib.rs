//! # Meridian Web Server
//!
//! The read-only serving layer plus the order-submission endpoint. Every
//! position/PnL read comes straight out of the in-process cache; durable
//! storage is only consulted for the full trade log, which the cache does
//! not retain.

use axum::{
    Router,
    routing::{get, post},
};
use cache::CacheStore;
use configuration::Config;
use database::DbRepository;
use engine::{OrderResult, SyncEngine};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

/// A remembered order submission, so a retried idempotency key returns the
/// original outcome instead of double-submitting.
pub(crate) struct IdempotencyEntry {
    pub request_id: String,
    /// Present once the order completed; absent while it is still queued.
    pub response: Option<OrderResult>,
    pub ts: Instant,
}

/// The shared application state that all handlers can access.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<CacheStore>,
    pub engine: Arc<SyncEngine>,
    pub repo: DbRepository,
    pub(crate) order_idempotency: Mutex<HashMap<String, IdempotencyEntry>>,
}

impl AppState {
    pub fn new(
        config: Config,
        cache: Arc<CacheStore>,
        engine: Arc<SyncEngine>,
        repo: DbRepository,
    ) -> Self {
        Self {
            config,
            cache,
            engine,
            repo,
            order_idempotency: Mutex::new(HashMap::new()),
        }
    }
}

/// The main function to configure and run the web server.
pub async fn run_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    // --- DEFINE THE APPLICATION ROUTES ---
    let app = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/sync/status", get(handlers::sync_status))
        .route("/api/sync/stop", post(handlers::sync_stop))
        .route("/api/positions", get(handlers::positions))
        .route("/api/positions/history", get(handlers::positions_history))
        .route(
            "/api/positions/:position_id/trades",
            get(handlers::position_trades),
        )
        .route("/api/pnl/summary", get(handlers::pnl_summary))
        .route("/api/pnl/daily", get(handlers::pnl_daily))
        .route("/api/account/summary", get(handlers::account_summary))
        .route("/api/trades", get(handlers::trades))
        .route("/api/orders", post(handlers::place_order))
        .route("/ws/updates", get(handlers::websocket_handler))
        .with_state(state)
        .layer(cors)
        // This middleware automatically logs information about every incoming request.
        .layer(TraceLayer::new_for_http());

    tracing::info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
