use crate::{AppState, IdempotencyEntry, error::AppError};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use core_types::{
    AccountPnl, AccountSummary, DailyPnlPoint, HistoryEntry, OrderRequest, OrderSide, OrderType,
    Position,
};
use database::TradeRow;
use engine::{OrderResult, SyncStatus};
use events::{StateUpdate, WsMessage};
use futures_util::{sink::SinkExt, stream::StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a completed idempotency-key entry is remembered.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

fn ensure_ready(state: &AppState) -> Result<(), AppError> {
    if state.cache.is_ready() {
        Ok(())
    } else {
        Err(AppError::CacheNotReady)
    }
}

fn account_id(state: &AppState) -> Result<i64, AppError> {
    state
        .cache
        .account_identity()
        .0
        .ok_or(AppError::CacheNotReady)
}

/// # GET /api/health
pub async fn health() -> &'static str {
    "OK"
}

/// # GET /api/sync/status
pub async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.engine.status())
}

/// # POST /api/sync/stop
/// Requests clean shutdown of the reconciliation loop. The engine drains its
/// teardown path asynchronously; the returned status reflects the request.
pub async fn sync_stop(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    state.engine.stop();
    Json(state.engine.status())
}

/// # GET /api/positions
pub async fn positions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Position>>, AppError> {
    ensure_ready(&state)?;
    Ok(Json(state.cache.snapshot_positions()))
}

/// # GET /api/positions/history
pub async fn positions_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    ensure_ready(&state)?;
    Ok(Json(state.cache.snapshot_history()))
}

/// # GET /api/pnl/summary
pub async fn pnl_summary(State(state): State<Arc<AppState>>) -> Result<Json<AccountPnl>, AppError> {
    ensure_ready(&state)?;
    Ok(Json(state.cache.snapshot_account_pnl()))
}

/// # GET /api/pnl/daily
pub async fn pnl_daily(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DailyPnlPoint>>, AppError> {
    ensure_ready(&state)?;
    Ok(Json(state.cache.snapshot_daily_pnl()))
}

/// The account-summary payload: valuation fields plus account identity.
#[derive(Debug, Serialize)]
pub struct AccountSummaryResponse {
    pub account_id: Option<i64>,
    pub base_currency: Option<String>,
    #[serde(flatten)]
    pub summary: AccountSummary,
}

/// # GET /api/account/summary
pub async fn account_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AccountSummaryResponse>, AppError> {
    ensure_ready(&state)?;
    let (account_id, base_currency) = state.cache.account_identity();
    Ok(Json(AccountSummaryResponse {
        account_id,
        base_currency,
        summary: state.cache.snapshot_account_summary(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub symbol: Option<String>,
    pub currency: Option<String>,
    #[serde(default = "default_trades_limit")]
    pub limit: i64,
}

fn default_trades_limit() -> i64 {
    200
}

/// # GET /api/trades
/// The one read that goes to durable storage: the cache does not retain the
/// full trade log.
pub async fn trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRow>>, AppError> {
    let account_id = account_id(&state)?;
    let rows = state
        .repo
        .list_trades(
            account_id,
            query.symbol.as_deref(),
            query.currency.as_deref(),
            query.limit.clamp(1, 1000),
        )
        .await?;
    Ok(Json(rows))
}

/// # GET /api/positions/:position_id/trades
/// Trades inside the position's lifetime window. Works for open positions
/// (open to now) and archived ones (open to close), addressed by the same id.
pub async fn position_trades(
    State(state): State<Arc<AppState>>,
    Path(position_id): Path<i64>,
) -> Result<Json<Vec<TradeRow>>, AppError> {
    let account_id = account_id(&state)?;

    if let Some(row) = state.repo.get_position_by_id(position_id).await? {
        if row.account_id != account_id {
            return Err(AppError::NotFound(format!("position {position_id}")));
        }
        let rows = state
            .repo
            .trades_in_window(
                account_id,
                &row.symbol,
                &row.currency,
                Some(row.open_time),
                None,
            )
            .await?;
        return Ok(Json(rows));
    }

    if let Some(entry) = state
        .repo
        .history_entry_by_id(account_id, position_id)
        .await?
    {
        let rows = state
            .repo
            .trades_in_window(
                account_id,
                &entry.symbol,
                &entry.currency,
                Some(entry.open_time),
                Some(entry.close_time),
            )
            .await?;
        return Ok(Json(rows));
    }

    Err(AppError::NotFound(format!("position {position_id}")))
}

/// The order submission body, as posted by API consumers. Side and order
/// type are free-form strings here and validated into the typed vocabulary.
#[derive(Debug, Deserialize)]
pub struct OrderBody {
    pub symbol: String,
    pub qty: Decimal,
    pub side: String,
    pub order_type: String,
    pub price: Option<Decimal>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub tif: Option<String>,
    pub account: Option<String>,
    pub idempotency_key: Option<String>,
}

fn validate_order(body: &OrderBody) -> Result<OrderRequest, AppError> {
    let symbol = body.symbol.trim();
    if symbol.is_empty() {
        return Err(AppError::BadRequest("symbol must not be empty".to_string()));
    }
    let side = OrderSide::parse(&body.side).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let order_type =
        OrderType::parse(&body.order_type).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if body.qty <= Decimal::ZERO {
        return Err(AppError::BadRequest("qty must be positive".to_string()));
    }
    if let Some(price) = body.price {
        if price <= Decimal::ZERO {
            return Err(AppError::BadRequest("price must be positive".to_string()));
        }
    }
    if order_type == OrderType::Limit && body.price.is_none() {
        return Err(AppError::BadRequest("Limit price required".to_string()));
    }

    Ok(OrderRequest {
        client_order_id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        side,
        order_type,
        qty: body.qty,
        price: body.price,
        exchange: body.exchange.clone(),
        currency: body.currency.clone(),
        tif: body.tif.clone(),
        account: body.account.clone(),
    })
}

/// # POST /api/orders
///
/// Validates synchronously, deduplicates on an optional idempotency key, and
/// hands the request to the engine's bounded queue. The caller gets the
/// venue's initial status, a "queued" response if the worker is busy, or a
/// 400 with the typed failure.
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OrderBody>,
) -> Result<Json<OrderResult>, AppError> {
    if state.config.venue.readonly {
        return Err(AppError::BadRequest(
            "Order submission is disabled (readonly mode)".to_string(),
        ));
    }
    if !state.engine.status().connected {
        return Err(AppError::BadRequest(
            "Venue gateway disconnected".to_string(),
        ));
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| body.idempotency_key.clone());

    if let Some(key) = &idempotency_key {
        let mut table = state
            .order_idempotency
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        table.retain(|_, entry| entry.ts.elapsed() < IDEMPOTENCY_TTL);
        if let Some(entry) = table.get(key) {
            if let Some(response) = &entry.response {
                return Ok(Json(response.clone()));
            }
            return Ok(Json(OrderResult::Queued {
                request_id: entry.request_id.clone(),
            }));
        }
        table.insert(
            key.clone(),
            IdempotencyEntry {
                request_id: key.clone(),
                response: None,
                ts: Instant::now(),
            },
        );
    }

    let request = match validate_order(&body) {
        Ok(request) => request,
        Err(err) => {
            if let Some(key) = &idempotency_key {
                state
                    .order_idempotency
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(key);
            }
            return Err(err);
        }
    };

    let result = state
        .engine
        .enqueue_order(
            request,
            idempotency_key.clone(),
            Duration::from_secs(state.config.sync.order_wait_secs),
        )
        .await;

    match &result {
        OrderResult::Failed { error, .. } => {
            if let Some(key) = &idempotency_key {
                state
                    .order_idempotency
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(key);
            }
            Err(AppError::BadRequest(error.clone()))
        }
        OrderResult::Placed { .. } => {
            if let Some(key) = &idempotency_key {
                if let Some(entry) = state
                    .order_idempotency
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get_mut(key)
                {
                    entry.response = Some(result.clone());
                }
            }
            Ok(Json(result))
        }
        OrderResult::Queued { .. } => Ok(Json(result)),
    }
}

/// # GET /ws/updates
/// Pushes a full state snapshot on the configured interval.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("[WS] New client connected.");
    let (mut sender, mut receiver) = socket.split();

    let hello = serde_json::to_string(&WsMessage::Connected).unwrap_or_default();
    if sender.send(Message::Text(hello)).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(
        state.config.server.ws_update_interval_ms.max(50),
    ));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !state.cache.is_ready() {
                    continue;
                }
                let update = WsMessage::StateUpdate(StateUpdate {
                    timestamp: Utc::now(),
                    positions: state.cache.snapshot_positions(),
                    history: state.cache.snapshot_history(),
                    account_pnl: state.cache.snapshot_account_pnl(),
                    account_summary: state.cache.snapshot_account_summary(),
                    daily_pnl: state.cache.snapshot_daily_pnl(),
                });
                let Ok(payload) = serde_json::to_string(&update) else {
                    continue;
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            received = receiver.next() => {
                match received {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("[WS] Client disconnected.");
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "[WS] Error.");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    tracing::info!("[WS] Connection closed.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(side: &str, order_type: &str, qty: Decimal, price: Option<Decimal>) -> OrderBody {
        OrderBody {
            symbol: "MSFT".to_string(),
            qty,
            side: side.to_string(),
            order_type: order_type.to_string(),
            price,
            exchange: None,
            currency: None,
            tif: None,
            account: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let err = validate_order(&body("buy", "MKT", Decimal::ZERO, None)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn rejects_limit_without_price() {
        let err = validate_order(&body("buy", "LMT", Decimal::ONE, None)).unwrap_err();
        match err {
            AppError::BadRequest(message) => assert_eq!(message, "Limit price required"),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn accepts_venue_side_spellings() {
        let request = validate_order(&body("SLD", "market", Decimal::ONE, None)).unwrap();
        assert_eq!(request.side, OrderSide::Sell);
        assert_eq!(request.order_type, OrderType::Market);
    }
}
