use crate::error::DbError;
use chrono::{DateTime, Utc};
use core_types::{
    AccountSummary, DailyPnlPoint, HistoryEntry, Position, PositionKey, SummaryField, TradeRecord,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use std::collections::HashSet;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// A row from the `trades` table, served straight through the API layer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TradeRow {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub side: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
    pub trade_time: DateTime<Utc>,
    pub venue_exec_id: Option<String>,
    pub perm_id: Option<String>,
}

/// A row from the `positions` table.
#[derive(Debug, Clone, FromRow)]
pub struct PositionRow {
    pub id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub contract_id: Option<i64>,
    pub open_time: DateTime<Utc>,
}

impl PositionRow {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(
            self.symbol.clone(),
            self.exchange.clone(),
            self.currency.clone(),
        )
    }
}

impl From<PositionRow> for Position {
    fn from(row: PositionRow) -> Self {
        let mut position = Position {
            id: row.id,
            symbol: row.symbol,
            exchange: row.exchange,
            currency: row.currency,
            qty: row.qty,
            avg_cost: row.avg_cost,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            daily_pnl: row.daily_pnl,
            total_pnl: Decimal::ZERO,
            open_time: row.open_time,
            contract_id: row.contract_id,
        };
        position.recompute_total();
        position
    }
}

/// The slice of a `positions_history` row needed to widen a close window.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

const POSITION_COLUMNS: &str = "id, account_id, symbol, exchange, currency, qty, avg_cost, \
     total_cost, realized_pnl, unrealized_pnl, daily_pnl, contract_id, open_time";

const TRADE_COLUMNS: &str = "id, symbol, exchange, currency, side, qty, price, commission, \
     realized_pnl, trade_time, venue_exec_id, perm_id";

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Resolves a venue account label to its numeric id, creating the row on
    /// first sight. Idempotent.
    pub async fn upsert_account(
        &self,
        venue_account: &str,
        base_currency: &str,
    ) -> Result<i64, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO accounts (venue_account, base_currency)
            VALUES ($1, $2)
            ON CONFLICT (venue_account) DO UPDATE SET base_currency = EXCLUDED.base_currency
            RETURNING id
            "#,
        )
        .bind(venue_account)
        .bind(base_currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------

    /// Appends one trade to the log. Unique on the external execution id: a
    /// duplicate insert is swallowed and reported as `false`, not an error.
    pub async fn insert_trade(
        &self,
        account_id: i64,
        trade: &TradeRecord,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades
                (account_id, symbol, exchange, currency, side, qty, price, commission,
                 realized_pnl, trade_time, venue_exec_id, perm_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (venue_exec_id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(&trade.symbol)
        .bind(&trade.exchange)
        .bind(&trade.currency)
        .bind(trade.side.as_str())
        .bind(trade.qty)
        .bind(trade.price)
        .bind(trade.commission)
        .bind(trade.realized_pnl)
        .bind(trade.trade_time)
        .bind(&trade.venue_exec_id)
        .bind(&trade.perm_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Whether an execution id has already produced trade rows. Checks the
    /// `-close` suffix too, so a replayed flip execution is recognized.
    pub async fn execution_seen(&self, exec_id: &str) -> Result<bool, DbError> {
        let seen = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trades
                WHERE venue_exec_id = $1 OR venue_exec_id = $1 || '-close'
            )
            "#,
        )
        .bind(exec_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    pub async fn find_trade_by_exec(&self, exec_id: &str) -> Result<Option<TradeRow>, DbError> {
        let row = sqlx::query_as::<_, TradeRow>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE venue_exec_id = $1"
        ))
        .bind(exec_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Back-fills the commission/realized columns of an existing trade row
    /// once its delayed commission report arrives.
    pub async fn update_trade_report(
        &self,
        trade_id: i64,
        commission: Decimal,
        realized_pnl: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE trades SET commission = $1, realized_pnl = $2 WHERE id = $3")
            .bind(commission)
            .bind(realized_pnl)
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sum of realized PnL for a symbol/currency, optionally bounded in time.
    pub async fn sum_realized(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Decimal, DbError> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(realized_pnl), 0)
            FROM trades
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
              AND ($4::timestamptz IS NULL OR trade_time >= $4)
              AND ($5::timestamptz IS NULL OR trade_time <= $5)
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .bind(start_time)
        .bind(end_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// Account-wide realized total over the full trade log, for hydration.
    pub async fn sum_realized_total(&self, account_id: i64) -> Result<Decimal, DbError> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(realized_pnl), 0) FROM trades WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// Most recent trades, optionally narrowed to one symbol/currency.
    pub async fn list_trades(
        &self,
        account_id: i64,
        symbol: Option<&str>,
        currency: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TradeRow>, DbError> {
        let rows = sqlx::query_as::<_, TradeRow>(&format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE account_id = $1
              AND ($2::text IS NULL OR symbol = $2)
              AND ($3::text IS NULL OR currency = $3)
            ORDER BY trade_time DESC
            LIMIT $4
            "#
        ))
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Trades for one symbol/currency inside a time window, oldest first.
    /// This is how a position's (open or archived) trade list is assembled.
    pub async fn trades_in_window(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<TradeRow>, DbError> {
        let rows = sqlx::query_as::<_, TradeRow>(&format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
              AND ($4::timestamptz IS NULL OR trade_time >= $4)
              AND ($5::timestamptz IS NULL OR trade_time <= $5)
            ORDER BY trade_time ASC
            "#
        ))
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .bind(start_time)
        .bind(end_time)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn first_trade_time_after(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
        after_time: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let time = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MIN(trade_time)
            FROM trades
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
              AND ($4::timestamptz IS NULL OR trade_time > $4)
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .bind(after_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(time)
    }

    pub async fn last_trade_time(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let time = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(trade_time)
            FROM trades
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(time)
    }

    // ------------------------------------------------------------------
    // Open positions
    // ------------------------------------------------------------------

    pub async fn get_position(
        &self,
        account_id: i64,
        key: &PositionKey,
    ) -> Result<Option<PositionRow>, DbError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            SELECT {POSITION_COLUMNS}
            FROM positions
            WHERE account_id = $1 AND symbol = $2 AND exchange = $3 AND currency = $4
            "#
        ))
        .bind(account_id)
        .bind(&key.symbol)
        .bind(&key.exchange)
        .bind(&key.currency)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_position_by_id(
        &self,
        position_id: i64,
    ) -> Result<Option<PositionRow>, DbError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE id = $1"
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_positions(&self, account_id: i64) -> Result<Vec<PositionRow>, DbError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE account_id = $1 ORDER BY symbol"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Upsert driven by the cost-basis engine: overwrites the accounting
    /// columns (including realized PnL and open time) and leaves live
    /// valuation columns alone. Returns the stable position id.
    pub async fn upsert_position_state(
        &self,
        account_id: i64,
        key: &PositionKey,
        qty: Decimal,
        avg_cost: Decimal,
        total_cost: Decimal,
        realized_pnl: Decimal,
        open_time: DateTime<Utc>,
        contract_id: Option<i64>,
    ) -> Result<i64, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO positions
                (account_id, symbol, exchange, currency, qty, avg_cost, total_cost,
                 realized_pnl, contract_id, open_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (account_id, symbol, exchange, currency) DO UPDATE
            SET qty = EXCLUDED.qty,
                avg_cost = EXCLUDED.avg_cost,
                total_cost = EXCLUDED.total_cost,
                realized_pnl = EXCLUDED.realized_pnl,
                contract_id = COALESCE(EXCLUDED.contract_id, positions.contract_id),
                open_time = EXCLUDED.open_time,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(&key.symbol)
        .bind(&key.exchange)
        .bind(&key.currency)
        .bind(qty)
        .bind(avg_cost)
        .bind(total_cost)
        .bind(realized_pnl)
        .bind(contract_id)
        .bind(open_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Upsert driven by a venue position snapshot: refreshes quantity, cost
    /// basis, and contract id, but preserves the previously-known open time
    /// and all PnL columns.
    pub async fn upsert_position_snapshot(
        &self,
        account_id: i64,
        key: &PositionKey,
        qty: Decimal,
        avg_cost: Decimal,
        contract_id: Option<i64>,
        open_time: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO positions
                (account_id, symbol, exchange, currency, qty, avg_cost, total_cost,
                 realized_pnl, contract_id, open_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $5 * $6, 0, $7, $8, NOW())
            ON CONFLICT (account_id, symbol, exchange, currency) DO UPDATE
            SET qty = EXCLUDED.qty,
                avg_cost = EXCLUDED.avg_cost,
                total_cost = EXCLUDED.total_cost,
                contract_id = EXCLUDED.contract_id,
                open_time = positions.open_time,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(&key.symbol)
        .bind(&key.exchange)
        .bind(&key.currency)
        .bind(qty)
        .bind(avg_cost)
        .bind(contract_id)
        .bind(open_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn set_position_realized(
        &self,
        account_id: i64,
        key: &PositionKey,
        realized_pnl: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE positions
            SET realized_pnl = $1, updated_at = NOW()
            WHERE account_id = $2 AND symbol = $3 AND exchange = $4 AND currency = $5
            "#,
        )
        .bind(realized_pnl)
        .bind(account_id)
        .bind(&key.symbol)
        .bind(&key.exchange)
        .bind(&key.currency)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_position_open_time(
        &self,
        position_id: i64,
        open_time: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE positions SET open_time = $1, updated_at = NOW() WHERE id = $2")
            .bind(open_time)
            .bind(position_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Moves an open position into history with its id preserved: one
    /// transaction inserting the history row and deleting the open row, so a
    /// crash can never leave the position in both sets.
    pub async fn archive_position(
        &self,
        row: &PositionRow,
        close_time: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO positions_history
                (id, account_id, symbol, exchange, currency, qty, avg_cost, total_cost,
                 realized_pnl, open_time, close_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            "#,
        )
        .bind(row.id)
        .bind(row.account_id)
        .bind(&row.symbol)
        .bind(&row.exchange)
        .bind(&row.currency)
        .bind(row.qty)
        .bind(row.avg_cost)
        .bind(row.total_cost)
        .bind(realized_pnl)
        .bind(row.open_time)
        .bind(close_time)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM positions WHERE id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Position history
    // ------------------------------------------------------------------

    /// The most recently closed position for a symbol/currency, used to
    /// decide whether a late execution should widen a close window.
    pub async fn latest_history(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
    ) -> Result<Option<HistoryRow>, DbError> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, open_time, close_time
            FROM positions_history
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
            ORDER BY close_time DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_history(
        &self,
        history_id: i64,
        close_time: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE positions_history
            SET close_time = $1, realized_pnl = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(close_time)
        .bind(realized_pnl)
        .bind(history_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history_entry_by_id(
        &self,
        account_id: i64,
        history_id: i64,
    ) -> Result<Option<HistoryEntry>, DbError> {
        let row = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT id, symbol, exchange, currency, open_time, close_time, realized_pnl
            FROM positions_history
            WHERE account_id = $1 AND id = $2
            "#,
        )
        .bind(account_id)
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn last_close_time(
        &self,
        account_id: i64,
        symbol: &str,
        currency: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let time = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(close_time)
            FROM positions_history
            WHERE account_id = $1 AND symbol = $2 AND currency = $3
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(time)
    }

    // ------------------------------------------------------------------
    // Valuation write-back
    // ------------------------------------------------------------------

    /// Batched write-back of live per-position valuation: one transaction,
    /// one UPDATE per contract. Updates without a daily component leave the
    /// daily column untouched.
    pub async fn batch_update_position_valuations(
        &self,
        account_id: i64,
        updates: &[(i64, Decimal, Option<Decimal>)],
    ) -> Result<(), DbError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (contract_id, unrealized, daily) in updates {
            match daily {
                Some(daily) => {
                    sqlx::query(
                        r#"
                        UPDATE positions
                        SET unrealized_pnl = $1, daily_pnl = $2, updated_at = NOW()
                        WHERE account_id = $3 AND contract_id = $4
                        "#,
                    )
                    .bind(unrealized)
                    .bind(daily)
                    .bind(account_id)
                    .bind(contract_id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE positions
                        SET unrealized_pnl = $1, updated_at = NOW()
                        WHERE account_id = $2 AND contract_id = $3
                        "#,
                    )
                    .bind(unrealized)
                    .bind(account_id)
                    .bind(contract_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upserts only the given account-summary columns, leaving the rest of
    /// the row untouched. The column list is built from the closed
    /// `SummaryField` enum, never from external input.
    pub async fn upsert_account_summary(
        &self,
        account_id: i64,
        summary: &AccountSummary,
        fields: &HashSet<SummaryField>,
    ) -> Result<(), DbError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut columns: Vec<SummaryField> = fields.iter().copied().collect();
        columns.sort_by_key(|f| f.column());

        let insert_cols = columns
            .iter()
            .map(|f| f.column())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (0..columns.len())
            .map(|i| format!("${}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .map(|f| format!("{col} = EXCLUDED.{col}", col = f.column()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r#"
            INSERT INTO account_summary (account_id, {insert_cols}, updated_at)
            VALUES ($1, {placeholders}, NOW())
            ON CONFLICT (account_id) DO UPDATE
            SET {updates}, updated_at = EXCLUDED.updated_at
            "#
        );

        let mut query = sqlx::query(&sql).bind(account_id);
        for field in &columns {
            query = query.bind(summary.get(*field));
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_daily_pnl(
        &self,
        account_id: i64,
        point: &DailyPnlPoint,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO account_daily_pnl (account_id, trade_date, daily_pnl, cumulative_pnl, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (account_id, trade_date) DO UPDATE
            SET daily_pnl = EXCLUDED.daily_pnl,
                cumulative_pnl = EXCLUDED.cumulative_pnl,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account_id)
        .bind(point.trade_date)
        .bind(point.daily_pnl)
        .bind(point.cumulative_pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    pub async fn load_positions(&self, account_id: i64) -> Result<Vec<Position>, DbError> {
        let rows = self.list_positions(account_id).await?;
        Ok(rows.into_iter().map(Position::from).collect())
    }

    pub async fn load_history(&self, account_id: i64) -> Result<Vec<HistoryEntry>, DbError> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT id, symbol, exchange, currency, open_time, close_time, realized_pnl
            FROM positions_history
            WHERE account_id = $1
            ORDER BY close_time DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn load_account_summary(&self, account_id: i64) -> Result<AccountSummary, DbError> {
        #[derive(FromRow)]
        struct SummaryRow {
            net_liquidation: Option<Decimal>,
            total_cash_value: Option<Decimal>,
            available_funds: Option<Decimal>,
            excess_liquidity: Option<Decimal>,
            init_margin_req: Option<Decimal>,
            maint_margin_req: Option<Decimal>,
            gross_position_value: Option<Decimal>,
            short_market_value: Option<Decimal>,
            updated_at: DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT net_liquidation, total_cash_value, available_funds, excess_liquidity,
                   init_margin_req, maint_margin_req, gross_position_value, short_market_value,
                   updated_at
            FROM account_summary
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| AccountSummary {
                net_liquidation: r.net_liquidation,
                total_cash_value: r.total_cash_value,
                available_funds: r.available_funds,
                excess_liquidity: r.excess_liquidity,
                init_margin_req: r.init_margin_req,
                maint_margin_req: r.maint_margin_req,
                gross_position_value: r.gross_position_value,
                short_market_value: r.short_market_value,
                as_of: Some(r.updated_at),
            })
            .unwrap_or_default())
    }

    pub async fn load_daily_pnl(&self, account_id: i64) -> Result<Vec<DailyPnlPoint>, DbError> {
        let rows = sqlx::query_as::<_, DailyPnlPoint>(
            r#"
            SELECT trade_date, daily_pnl, cumulative_pnl
            FROM account_daily_pnl
            WHERE account_id = $1
            ORDER BY trade_date
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
