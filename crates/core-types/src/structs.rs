use crate::enums::{OrderSide, OrderType};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies at most one *open* position at a time.
///
/// The exchange component may be empty, meaning "unspecified / primary
/// listing" — venues frequently omit it on execution reports even when the
/// position itself was opened with one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

impl PositionKey {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            currency: currency.into(),
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.exchange, self.currency)
    }
}

/// An open position. Quantity is signed: positive = long, negative = short.
///
/// `total_pnl` is derived (`realized_pnl + unrealized_pnl`) and must be
/// recomputed whenever either input changes — every mutation site calls
/// [`Position::recompute_total`] rather than writing the field directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Stable numeric identity, assigned by durable storage when the position
    /// is first persisted and preserved when it is archived to history.
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub open_time: DateTime<Utc>,
    /// Venue contract identifier, used only to correlate live-valuation
    /// subscriptions. A weak back-reference, not an ownership link.
    pub contract_id: Option<i64>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(
            self.symbol.clone(),
            self.exchange.clone(),
            self.currency.clone(),
        )
    }

    pub fn recompute_total(&mut self) {
        self.total_pnl = self.realized_pnl + self.unrealized_pnl;
    }
}

/// A closed position, archived out of the open set.
///
/// Keeps the id it had while open, so consumers can keep addressing it.
/// Immutable once archived, except that a late-arriving realization report
/// may widen its close-time window exactly once more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
}

impl HistoryEntry {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(
            self.symbol.clone(),
            self.exchange.clone(),
            self.currency.clone(),
        )
    }
}

/// One executed trade, append-only. A direction flip produces two records
/// from a single venue execution: the legs share the base execution id with
/// `-close` / `-open` suffixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    /// Realized PnL attributed to this specific trade (0 for opening legs).
    pub realized_pnl: Decimal,
    pub trade_time: DateTime<Utc>,
    /// External execution id, unique across the trade log. Used for
    /// idempotent re-application of late commission reports.
    pub venue_exec_id: Option<String>,
    pub perm_id: Option<String>,
}

impl TradeRecord {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(
            self.symbol.clone(),
            self.exchange.clone(),
            self.currency.clone(),
        )
    }
}

/// Account-wide PnL rollup, served straight from the cache. Identity fields
/// are `None` until the orchestrator has resolved the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPnl {
    pub account_id: Option<i64>,
    pub base_currency: Option<String>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Named account valuation fields, updated field-by-field as venue valuation
/// events arrive. A field stays `None` until the venue first reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub net_liquidation: Option<Decimal>,
    pub total_cash_value: Option<Decimal>,
    pub available_funds: Option<Decimal>,
    pub excess_liquidity: Option<Decimal>,
    pub init_margin_req: Option<Decimal>,
    pub maint_margin_req: Option<Decimal>,
    pub gross_position_value: Option<Decimal>,
    pub short_market_value: Option<Decimal>,
    pub as_of: Option<DateTime<Utc>>,
}

impl AccountSummary {
    pub fn get(&self, field: crate::enums::SummaryField) -> Option<Decimal> {
        use crate::enums::SummaryField::*;
        match field {
            NetLiquidation => self.net_liquidation,
            TotalCashValue => self.total_cash_value,
            AvailableFunds => self.available_funds,
            ExcessLiquidity => self.excess_liquidity,
            InitMarginReq => self.init_margin_req,
            MaintMarginReq => self.maint_margin_req,
            GrossPositionValue => self.gross_position_value,
            ShortMarketValue => self.short_market_value,
        }
    }

    pub fn set(&mut self, field: crate::enums::SummaryField, value: Decimal) {
        use crate::enums::SummaryField::*;
        match field {
            NetLiquidation => self.net_liquidation = Some(value),
            TotalCashValue => self.total_cash_value = Some(value),
            AvailableFunds => self.available_funds = Some(value),
            ExcessLiquidity => self.excess_liquidity = Some(value),
            InitMarginReq => self.init_margin_req = Some(value),
            MaintMarginReq => self.maint_margin_req = Some(value),
            GrossPositionValue => self.gross_position_value = Some(value),
            ShortMarketValue => self.short_market_value = Some(value),
        }
    }
}

/// One day of the account's daily-PnL series. `cumulative_pnl` is a running
/// sum over the date-ordered series and is rebuilt whenever any date changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyPnlPoint {
    pub trade_date: NaiveDate,
    pub daily_pnl: Decimal,
    pub cumulative_pnl: Decimal,
}

/// A validated order submission, as handed to the orchestrator's queue.
/// Validation (positive quantity, limit price presence) happens before one
/// of these is constructed; the queue only ever carries well-formed requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub tif: Option<String>,
    pub account: Option<String>,
}
