use crate::SyncEngine;
use crate::error::EngineError;
use crate::orders::{OrderJob, OrderResult};
use cache::PositionUpsert;
use chrono::{NaiveDate, Utc};
use core_types::{
    HistoryEntry, OrderSide, OrderType, Position, PositionKey, SummaryField, TradeRecord,
};
use database::PositionRow;
use ledger::{Fill, PositionState, TradeOutcome, apply_fill};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{HashMap, HashSet};
use venue_client::{
    AccountPnlUpdate, AccountValueUpdate, CommissionReport, ConnectivityKind, OrderTicket,
    PositionPnlUpdate, VenueEvent, VenueExecution, VenuePosition,
};

/// Off-exchange execution venues that should never become a position's
/// display exchange when resolving the label for an incoming fill.
const ALTERNATIVE_VENUES: [&str; 2] = ["IBKRATS", "OVERNIGHT"];

/// Per-connection state of the reconciliation loop. A fresh `Session` is
/// built for every successful connect and dropped on teardown; anything that
/// must survive reconnects lives in the cache or durable storage instead.
pub(crate) struct Session<'e> {
    engine: &'e SyncEngine,
    account: String,
    account_id: i64,
    /// Commission reports that arrived before their trade row existed,
    /// buffered by execution id until the execution shows up.
    pending_commissions: HashMap<String, CommissionReport>,
    /// Contract ids with an active per-position valuation subscription.
    subscribed_contracts: HashSet<i64>,
    /// Last (daily, unrealized) pair seen per contract, for deduplication.
    last_position_pnl: HashMap<i64, (Option<Decimal>, Decimal)>,
    /// Valuation updates queued for the next batched durable write-back.
    pending_valuations: HashMap<i64, (Decimal, Option<Decimal>)>,
}

/// Converts a raw venue float to a decimal, dropping NaN/infinities. Venues
/// emit transient garbage on valuation channels; a `None` here means "ignore
/// the update", never an error.
fn coerce(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

/// The trading date for account-level daily PnL bucketing, pinned to the
/// exchange calendar's timezone regardless of where this process runs.
fn trade_date_eastern() -> NaiveDate {
    Utc::now()
        .with_timezone(&chrono_tz::America::New_York)
        .date_naive()
}

/// Picks the exchange label to book a fill under. Venues often report fills
/// with a different (or empty) exchange than the position was opened with:
/// prefer an existing position whose exchange matches the report, then any
/// existing non-alternative-venue exchange, then whatever was reported.
fn resolve_trade_exchange(existing: &[Position], reported: &str) -> String {
    if existing.is_empty() {
        return reported.to_string();
    }
    if existing.iter().any(|p| p.exchange == reported) {
        return reported.to_string();
    }
    if let Some(position) = existing
        .iter()
        .find(|p| !p.exchange.is_empty() && !ALTERNATIVE_VENUES.contains(&p.exchange.as_str()))
    {
        return position.exchange.clone();
    }
    existing[0].exchange.clone()
}

impl<'e> Session<'e> {
    pub(crate) fn new(engine: &'e SyncEngine, account: String, account_id: i64) -> Self {
        Self {
            engine,
            account,
            account_id,
            pending_commissions: HashMap::new(),
            subscribed_contracts: HashSet::new(),
            last_position_pnl: HashMap::new(),
            pending_valuations: HashMap::new(),
        }
    }

    fn is_foreign_account(&self, account: &Option<String>) -> bool {
        matches!(account, Some(a) if a != &self.account)
    }

    pub(crate) async fn handle_event(&mut self, event: VenueEvent) -> Result<(), EngineError> {
        match event {
            VenueEvent::Execution(exec) => self.on_execution(exec).await,
            VenueEvent::Commission(report) => self.on_commission(report).await,
            VenueEvent::Position(position) => self.on_position(position).await,
            VenueEvent::AccountPnl(update) => {
                self.on_account_pnl(update);
                Ok(())
            }
            VenueEvent::PositionPnl(update) => {
                self.on_position_pnl(update);
                Ok(())
            }
            VenueEvent::AccountValue(update) => self.on_account_value(update).await,
            VenueEvent::Connectivity { kind, message } => {
                self.on_connectivity(kind, &message);
                Ok(())
            }
        }
    }

    /// Startup replay: reconcile open positions against the venue's full
    /// snapshot (archiving anything the venue no longer reports), re-apply
    /// recent executions, then turn on the live valuation subscriptions.
    pub(crate) async fn replay(&mut self) -> Result<(), EngineError> {
        let venue_positions = self.engine.venue.request_positions().await?;
        let mut seen: HashSet<PositionKey> = HashSet::new();
        for position in venue_positions {
            if self.is_foreign_account(&position.account) {
                continue;
            }
            seen.insert(PositionKey::new(
                position.contract.symbol.clone(),
                position.contract.exchange.clone(),
                position.contract.currency.clone(),
            ));
            self.on_position(position).await?;
        }
        for row in self.engine.repo.list_positions(self.account_id).await? {
            if !seen.contains(&row.key()) {
                self.archive_row(row).await?;
            }
        }
        tracing::info!("Position replay complete.");

        for fill in self.engine.venue.request_executions().await? {
            self.on_execution(fill).await?;
        }
        tracing::info!("Execution replay complete.");

        self.engine.venue.subscribe_account_pnl(&self.account).await?;
        let tags: Vec<&'static str> = SummaryField::ALL.iter().map(|f| f.venue_tag()).collect();
        self.engine.venue.subscribe_account_summary(&tags).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    async fn on_execution(&mut self, exec: VenueExecution) -> Result<(), EngineError> {
        if self.is_foreign_account(&exec.account) {
            return Ok(());
        }
        let side = match OrderSide::parse(&exec.side) {
            Ok(side) => side,
            Err(err) => {
                tracing::warn!(exec_id = %exec.exec_id, error = %err, "Dropping execution with unknown side.");
                return Ok(());
            }
        };
        let existing = self
            .engine
            .cache
            .positions_for_symbol(&exec.contract.symbol, &exec.contract.currency);
        let exchange = resolve_trade_exchange(&existing, &exec.contract.exchange);
        let key = PositionKey::new(
            exec.contract.symbol.clone(),
            exchange,
            exec.contract.currency.clone(),
        );

        // The trade log is unique on execution id, so a replayed execution
        // must not re-run the accounting either.
        if self.engine.repo.execution_seen(&exec.exec_id).await? {
            tracing::debug!(exec_id = %exec.exec_id, "Duplicate execution, ignoring.");
            return Ok(());
        }

        let trade_time = exec.time.unwrap_or_else(Utc::now);
        let commission = exec
            .commission
            .as_ref()
            .map(|r| r.commission)
            .unwrap_or(Decimal::ZERO);
        let reported_realized = exec.commission.as_ref().and_then(|r| r.realized_pnl);
        let contract_id = exec.contract.contract_id;

        let prior_position = self.engine.cache.position(&key);

        // A realizing execution with no open position behind it is a late
        // straggler for an already-archived position: it must widen that
        // position's close window, not open a new one through the ledger.
        if prior_position.is_none() && reported_realized.is_some_and(|r| !r.is_zero()) {
            let realized = reported_realized.unwrap_or(Decimal::ZERO);
            self.insert_trade(
                &key,
                side,
                exec.qty,
                exec.price,
                commission,
                realized,
                trade_time,
                Some(exec.exec_id.clone()),
                exec.perm_id.clone(),
            )
            .await?;
            self.engine
                .cache
                .record_exec_realized(&exec.exec_id, &key, realized);
            self.maybe_widen_history(&key.symbol, &key.currency, trade_time, realized)
                .await?;
            self.engine.mark_update();
            return Ok(());
        }

        let prior_state = prior_position.as_ref().map(|p| PositionState {
            qty: p.qty,
            avg_cost: p.avg_cost,
            total_cost: p.avg_cost * p.qty,
            realized_pnl: p.realized_pnl,
        });
        let open_time = prior_position
            .as_ref()
            .map(|p| p.open_time)
            .unwrap_or(trade_time);

        let fill = Fill {
            side,
            qty: exec.qty,
            price: exec.price,
            commission,
        };
        let outcome = match apply_fill(prior_state.as_ref(), &fill) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(exec_id = %exec.exec_id, error = %err, "Dropping invalid execution payload.");
                return Ok(());
            }
        };

        let mut ledger_realized = Decimal::ZERO;
        match outcome {
            TradeOutcome::Opened { state } => {
                let id = self
                    .persist_position_state(&key, &state, trade_time, contract_id)
                    .await?;
                self.insert_trade(
                    &key,
                    side,
                    exec.qty,
                    exec.price,
                    commission,
                    Decimal::ZERO,
                    trade_time,
                    Some(exec.exec_id.clone()),
                    exec.perm_id.clone(),
                )
                .await?;
                self.upsert_cached_position(id, &key, &state, trade_time, contract_id);
                self.subscribe_position_pnl(contract_id).await;
            }
            TradeOutcome::Increased { state } => {
                let id = self
                    .persist_position_state(&key, &state, open_time, contract_id)
                    .await?;
                self.insert_trade(
                    &key,
                    side,
                    exec.qty,
                    exec.price,
                    commission,
                    Decimal::ZERO,
                    trade_time,
                    Some(exec.exec_id.clone()),
                    exec.perm_id.clone(),
                )
                .await?;
                self.upsert_cached_position(id, &key, &state, open_time, contract_id);
            }
            TradeOutcome::Reduced { state, closed } => {
                ledger_realized = closed.realized;
                let id = self
                    .persist_position_state(&key, &state, open_time, contract_id)
                    .await?;
                self.insert_trade(
                    &key,
                    side,
                    closed.qty,
                    exec.price,
                    closed.commission,
                    closed.realized,
                    trade_time,
                    Some(exec.exec_id.clone()),
                    exec.perm_id.clone(),
                )
                .await?;
                self.upsert_cached_position(id, &key, &state, open_time, contract_id);
            }
            TradeOutcome::Closed { state, closed } => {
                ledger_realized = closed.realized;
                self.insert_trade(
                    &key,
                    side,
                    closed.qty,
                    exec.price,
                    closed.commission,
                    closed.realized,
                    trade_time,
                    Some(exec.exec_id.clone()),
                    exec.perm_id.clone(),
                )
                .await?;
                if let Some(row) = self.engine.repo.get_position(self.account_id, &key).await? {
                    self.engine
                        .repo
                        .archive_position(&row, trade_time, state.realized_pnl)
                        .await?;
                    self.engine.cache.add_history(HistoryEntry {
                        id: row.id,
                        symbol: row.symbol.clone(),
                        exchange: row.exchange.clone(),
                        currency: row.currency.clone(),
                        open_time: row.open_time,
                        close_time: trade_time,
                        realized_pnl: state.realized_pnl,
                    });
                    self.engine.cache.remove_position(&key);
                    self.unsubscribe_position_pnl(row.contract_id).await;
                }
            }
            TradeOutcome::Flipped {
                closed_state,
                closed,
                opened_state,
                open_commission,
            } => {
                ledger_realized = closed.realized;
                // Closing leg, archiving the old identity.
                self.insert_trade(
                    &key,
                    side,
                    closed.qty,
                    exec.price,
                    closed.commission,
                    closed.realized,
                    trade_time,
                    Some(format!("{}-close", exec.exec_id)),
                    exec.perm_id.clone(),
                )
                .await?;
                if let Some(row) = self.engine.repo.get_position(self.account_id, &key).await? {
                    self.engine
                        .repo
                        .archive_position(&row, trade_time, closed_state.realized_pnl)
                        .await?;
                    self.engine.cache.add_history(HistoryEntry {
                        id: row.id,
                        symbol: row.symbol.clone(),
                        exchange: row.exchange.clone(),
                        currency: row.currency.clone(),
                        open_time: row.open_time,
                        close_time: trade_time,
                        realized_pnl: closed_state.realized_pnl,
                    });
                    self.engine.cache.remove_position(&key);
                }
                // Opening leg, with a brand-new identity at the fill price.
                let id = self
                    .persist_position_state(&key, &opened_state, trade_time, contract_id)
                    .await?;
                self.insert_trade(
                    &key,
                    side,
                    opened_state.qty.abs(),
                    exec.price,
                    open_commission,
                    Decimal::ZERO,
                    trade_time,
                    Some(format!("{}-open", exec.exec_id)),
                    exec.perm_id.clone(),
                )
                .await?;
                self.upsert_cached_position(id, &key, &opened_state, trade_time, contract_id);
                self.subscribe_position_pnl(contract_id).await;
            }
        }

        // A commission report may have arrived before this execution did.
        if let Some(report) = self.pending_commissions.remove(&exec.exec_id) {
            self.apply_commission(report).await?;
        }

        // Out-of-order replay: an older execution moves the open time back.
        if let Some(position) = self.engine.cache.position(&key) {
            if trade_time < position.open_time {
                self.engine
                    .repo
                    .set_position_open_time(position.id, trade_time)
                    .await?;
                self.engine
                    .cache
                    .advance_open_time(&key.symbol, &key.currency, trade_time);
            }
        }

        // Realized attribution through the idempotency boundary: the venue's
        // reported value wins when attached, otherwise the ledger's, and a
        // later commission report only applies its delta on top.
        let realized_for_exec = reported_realized.unwrap_or(ledger_realized);
        if !realized_for_exec.is_zero() {
            self.engine
                .cache
                .record_exec_realized(&exec.exec_id, &key, realized_for_exec);
            self.persist_position_realized(&key).await?;
        }

        self.maybe_widen_history(&key.symbol, &key.currency, trade_time, realized_for_exec)
            .await?;
        self.engine.mark_update();
        Ok(())
    }

    async fn persist_position_state(
        &self,
        key: &PositionKey,
        state: &PositionState,
        open_time: chrono::DateTime<Utc>,
        contract_id: Option<i64>,
    ) -> Result<i64, EngineError> {
        let id = self
            .engine
            .repo
            .upsert_position_state(
                self.account_id,
                key,
                state.qty,
                state.avg_cost,
                state.total_cost,
                state.realized_pnl,
                open_time,
                contract_id,
            )
            .await?;
        Ok(id)
    }

    fn upsert_cached_position(
        &self,
        id: i64,
        key: &PositionKey,
        state: &PositionState,
        open_time: chrono::DateTime<Utc>,
        contract_id: Option<i64>,
    ) {
        self.engine.cache.upsert_position(PositionUpsert {
            id,
            key: key.clone(),
            qty: state.qty,
            avg_cost: state.avg_cost,
            open_time,
            contract_id,
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_trade(
        &self,
        key: &PositionKey,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        commission: Decimal,
        realized_pnl: Decimal,
        trade_time: chrono::DateTime<Utc>,
        venue_exec_id: Option<String>,
        perm_id: Option<String>,
    ) -> Result<(), EngineError> {
        let trade = TradeRecord {
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
            currency: key.currency.clone(),
            side,
            qty,
            price,
            commission,
            realized_pnl,
            trade_time,
            venue_exec_id,
            perm_id,
        };
        let inserted = self.engine.repo.insert_trade(self.account_id, &trade).await?;
        if !inserted {
            tracing::debug!(exec_id = ?trade.venue_exec_id, "Trade row already present, insert skipped.");
        }
        Ok(())
    }

    async fn persist_position_realized(&self, key: &PositionKey) -> Result<(), EngineError> {
        if let Some(realized) = self.engine.cache.position_realized(key) {
            self.engine
                .repo
                .set_position_realized(self.account_id, key, realized)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commission / realization reports
    // ------------------------------------------------------------------

    async fn on_commission(&mut self, report: CommissionReport) -> Result<(), EngineError> {
        self.apply_commission(report).await?;
        self.engine.mark_update();
        Ok(())
    }

    /// Applies a commission report if its trade row exists, otherwise
    /// buffers it until the execution arrives. A flip execution stores its
    /// realization on the `-close` leg, so that suffix is checked too.
    async fn apply_commission(&mut self, report: CommissionReport) -> Result<(), EngineError> {
        let row = match self.engine.repo.find_trade_by_exec(&report.exec_id).await? {
            Some(row) => row,
            None => {
                let close_leg = format!("{}-close", report.exec_id);
                match self.engine.repo.find_trade_by_exec(&close_leg).await? {
                    Some(row) => row,
                    None => {
                        tracing::debug!(exec_id = %report.exec_id, "Buffering commission report until its trade arrives.");
                        self.pending_commissions
                            .insert(report.exec_id.clone(), report);
                        return Ok(());
                    }
                }
            }
        };

        let realized = report.realized_pnl.unwrap_or(Decimal::ZERO);
        self.engine
            .repo
            .update_trade_report(row.id, report.commission, realized)
            .await?;
        let key = PositionKey::new(row.symbol.clone(), row.exchange.clone(), row.currency.clone());
        self.engine
            .cache
            .record_exec_realized(&report.exec_id, &key, realized);
        self.persist_position_realized(&key).await?;
        self.maybe_widen_history(&row.symbol, &row.currency, row.trade_time, realized)
            .await?;
        Ok(())
    }

    /// A nonzero realization for a symbol with no open position means a late
    /// trade landed after the archive: widen the closed position's window to
    /// cover it and resum its realized PnL from the trade log.
    async fn maybe_widen_history(
        &self,
        symbol: &str,
        currency: &str,
        trade_time: chrono::DateTime<Utc>,
        realized: Decimal,
    ) -> Result<(), EngineError> {
        if realized.is_zero() {
            return Ok(());
        }
        if !self
            .engine
            .cache
            .positions_for_symbol(symbol, currency)
            .is_empty()
        {
            return Ok(());
        }
        let Some(history) = self
            .engine
            .repo
            .latest_history(self.account_id, symbol, currency)
            .await?
        else {
            return Ok(());
        };
        let new_close = trade_time.max(history.close_time);
        let realized_total = self
            .engine
            .repo
            .sum_realized(
                self.account_id,
                symbol,
                currency,
                Some(history.open_time),
                Some(new_close),
            )
            .await?;
        self.engine
            .repo
            .update_history(history.id, new_close, realized_total)
            .await?;
        self.engine
            .cache
            .update_history_realized(history.id, new_close, realized_total);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Position snapshots
    // ------------------------------------------------------------------

    async fn on_position(&mut self, position: VenuePosition) -> Result<(), EngineError> {
        if self.is_foreign_account(&position.account) {
            return Ok(());
        }
        let key = PositionKey::new(
            position.contract.symbol.clone(),
            position.contract.exchange.clone(),
            position.contract.currency.clone(),
        );

        if position.qty.is_zero() {
            if let Some(row) = self.engine.repo.get_position(self.account_id, &key).await? {
                self.archive_row(row).await?;
            }
            return Ok(());
        }

        let existing = self.engine.repo.get_position(self.account_id, &key).await?;
        let open_time = match &existing {
            Some(row) => row.open_time,
            None => {
                // Best-effort open time for a position we never saw open:
                // the first trade after the last recorded close.
                let last_close = self
                    .engine
                    .repo
                    .last_close_time(self.account_id, &key.symbol, &key.currency)
                    .await?;
                self.engine
                    .repo
                    .first_trade_time_after(self.account_id, &key.symbol, &key.currency, last_close)
                    .await?
                    .unwrap_or_else(Utc::now)
            }
        };

        let id = self
            .engine
            .repo
            .upsert_position_snapshot(
                self.account_id,
                &key,
                position.qty,
                position.avg_cost,
                position.contract.contract_id,
                open_time,
            )
            .await?;
        self.engine.cache.upsert_position(PositionUpsert {
            id,
            key,
            qty: position.qty,
            avg_cost: position.avg_cost,
            open_time,
            contract_id: position.contract.contract_id,
        });
        self.subscribe_position_pnl(position.contract.contract_id).await;
        self.engine.mark_update();
        Ok(())
    }

    /// Archives an open position the venue no longer reports: close time is
    /// the last trade seen for it, realized PnL is resummed over its window.
    async fn archive_row(&mut self, row: PositionRow) -> Result<(), EngineError> {
        let close_time = self
            .engine
            .repo
            .last_trade_time(self.account_id, &row.symbol, &row.currency)
            .await?
            .unwrap_or_else(Utc::now);
        let realized = self
            .engine
            .repo
            .sum_realized(
                self.account_id,
                &row.symbol,
                &row.currency,
                Some(row.open_time),
                Some(close_time),
            )
            .await?;
        self.engine
            .repo
            .archive_position(&row, close_time, realized)
            .await?;
        self.engine.cache.add_history(HistoryEntry {
            id: row.id,
            symbol: row.symbol.clone(),
            exchange: row.exchange.clone(),
            currency: row.currency.clone(),
            open_time: row.open_time,
            close_time,
            realized_pnl: realized,
        });
        self.engine.cache.remove_position(&row.key());
        self.unsubscribe_position_pnl(row.contract_id).await;
        self.engine.mark_update();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Valuation
    // ------------------------------------------------------------------

    fn on_account_pnl(&mut self, update: AccountPnlUpdate) {
        if self.is_foreign_account(&update.account) {
            return;
        }
        // Realized/unrealized must at least parse; the daily bucket falls
        // back to zero like the venue does overnight.
        let realized = update.realized_pnl.and_then(coerce);
        let unrealized = update.unrealized_pnl.and_then(coerce);
        if realized.is_none() || unrealized.is_none() {
            tracing::debug!("Dropping account PnL update with unusable values.");
            return;
        }
        let daily = update
            .daily_pnl
            .and_then(coerce)
            .unwrap_or(Decimal::ZERO);
        self.engine
            .cache
            .update_daily_pnl(trade_date_eastern(), daily);
        self.engine.mark_update();
    }

    fn on_position_pnl(&mut self, update: PositionPnlUpdate) {
        let Some(unrealized) = update.unrealized_pnl.and_then(coerce) else {
            return;
        };
        let daily = update.daily_pnl.and_then(coerce);

        // Unchanged pairs are dropped so the write-back batch only carries
        // real movement.
        if self.last_position_pnl.get(&update.contract_id) == Some(&(daily, unrealized)) {
            return;
        }
        self.last_position_pnl
            .insert(update.contract_id, (daily, unrealized));
        self.pending_valuations
            .insert(update.contract_id, (unrealized, daily));
        self.engine
            .cache
            .update_position_valuation(update.contract_id, unrealized, daily);
    }

    async fn on_account_value(&mut self, update: AccountValueUpdate) -> Result<(), EngineError> {
        if self.is_foreign_account(&update.account) {
            return Ok(());
        }
        if let Some(currency) = &update.currency {
            let base = &self.engine.config.account.base_currency;
            if !currency.is_empty() && currency != "BASE" && currency != base {
                return Ok(());
            }
        }
        let Some(field) = SummaryField::from_venue_tag(&update.tag) else {
            return Ok(());
        };
        let Ok(value) = update.value.trim().parse::<Decimal>() else {
            tracing::debug!(tag = %update.tag, value = %update.value, "Dropping unparseable account value.");
            return Ok(());
        };
        self.engine.cache.update_account_summary_field(field, value);
        // Account valuation is low-volume; flush the field straight through
        // instead of waiting for the periodic tick.
        self.flush_summary().await?;
        self.engine.mark_update();
        Ok(())
    }

    fn on_connectivity(&mut self, kind: ConnectivityKind, message: &str) {
        let now = Utc::now();
        match kind {
            ConnectivityKind::VenueDown => {
                tracing::warn!(message, "Venue reports itself unreachable.");
                self.engine.with_status(|s| {
                    s.venue_reachable = Some(false);
                    s.venue_last_down_at = Some(now);
                });
            }
            ConnectivityKind::VenueRestored => {
                tracing::info!(message, "Venue connectivity restored.");
                self.engine.with_status(|s| {
                    s.venue_reachable = Some(true);
                    s.venue_last_up_at = Some(now);
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    async fn subscribe_position_pnl(&mut self, contract_id: Option<i64>) {
        let Some(contract_id) = contract_id else {
            return;
        };
        if !self.subscribed_contracts.insert(contract_id) {
            return;
        }
        if let Err(err) = self
            .engine
            .venue
            .subscribe_position_pnl(&self.account, contract_id)
            .await
        {
            tracing::warn!(contract_id, error = %err, "Failed to subscribe position valuation.");
            self.subscribed_contracts.remove(&contract_id);
        }
    }

    async fn unsubscribe_position_pnl(&mut self, contract_id: Option<i64>) {
        let Some(contract_id) = contract_id else {
            return;
        };
        if !self.subscribed_contracts.remove(&contract_id) {
            return;
        }
        self.last_position_pnl.remove(&contract_id);
        self.pending_valuations.remove(&contract_id);
        if let Err(err) = self.engine.venue.unsubscribe_position_pnl(contract_id).await {
            tracing::warn!(contract_id, error = %err, "Failed to unsubscribe position valuation.");
        }
    }

    // ------------------------------------------------------------------
    // Write-back
    // ------------------------------------------------------------------

    /// Periodic flush: batched per-position valuations, then whatever
    /// aggregate fields the cache marked dirty since the last pass.
    pub(crate) async fn flush(&mut self) -> Result<(), EngineError> {
        if !self.pending_valuations.is_empty() {
            let updates: Vec<(i64, Decimal, Option<Decimal>)> = self
                .pending_valuations
                .iter()
                .map(|(contract_id, (unrealized, daily))| (*contract_id, *unrealized, *daily))
                .collect();
            self.engine
                .repo
                .batch_update_position_valuations(self.account_id, &updates)
                .await?;
            self.pending_valuations.clear();
        }

        let payload = self.engine.cache.collect_dirty();
        if let Some(daily) = &payload.daily {
            self.engine
                .repo
                .upsert_daily_pnl(self.account_id, daily)
                .await?;
        }
        if let Some(summary) = &payload.summary {
            self.engine
                .repo
                .upsert_account_summary(self.account_id, summary, &payload.summary_fields)
                .await?;
        }
        if payload.daily.is_some() || payload.summary.is_some() {
            self.engine.cache.clear_dirty(
                &payload.summary_fields,
                payload.daily.is_some(),
                payload.watermark,
            );
            self.engine.mark_update();
        }
        Ok(())
    }

    async fn flush_summary(&mut self) -> Result<(), EngineError> {
        let payload = self.engine.cache.collect_dirty();
        if let Some(summary) = &payload.summary {
            self.engine
                .repo
                .upsert_account_summary(self.account_id, summary, &payload.summary_fields)
                .await?;
            self.engine
                .cache
                .clear_dirty(&payload.summary_fields, false, payload.watermark);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Processes one queued order: qualify, build the ticket, submit, and
    /// report the initial status back through the caller's waiter. Failures
    /// resolve the waiter; they never tear the session down.
    pub(crate) async fn process_order(&mut self, job: OrderJob) {
        let request = job.request;
        tracing::info!(
            request_id = %job.request_id,
            symbol = %request.symbol,
            side = ?request.side,
            qty = %request.qty,
            order_type = ?request.order_type,
            "Order dequeued."
        );

        if request.order_type == OrderType::Limit && request.price.is_none() {
            self.engine.waiters.resolve(
                &job.request_id,
                OrderResult::failed(job.request_id.as_str(), "Limit price required"),
            );
            return;
        }

        let exchange = request.exchange.as_deref().unwrap_or("SMART");
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.engine.config.account.base_currency.clone());
        let contract = match self
            .engine
            .venue
            .qualify_instrument(request.symbol.trim().to_uppercase().as_str(), exchange, &currency)
            .await
        {
            Ok(contract) => contract,
            Err(err) => {
                tracing::warn!(request_id = %job.request_id, error = %err, "Order failed to qualify.");
                self.engine.waiters.resolve(
                    &job.request_id,
                    OrderResult::failed(job.request_id.as_str(), "Unable to qualify contract"),
                );
                return;
            }
        };

        let ticket = OrderTicket {
            contract,
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            limit_price: request.price,
            tif: request.tif.clone(),
            account: request.account.clone(),
        };

        match self.engine.venue.place_order(&ticket).await {
            Ok(ack) => {
                tracing::info!(
                    request_id = %job.request_id,
                    order_id = ack.order_id,
                    status = %ack.status,
                    filled = %ack.filled,
                    remaining = %ack.remaining,
                    "Order placed."
                );
                self.engine.waiters.resolve(
                    &job.request_id,
                    OrderResult::Placed {
                        request_id: job.request_id.clone(),
                        order_id: ack.order_id,
                        order_status: ack.status,
                        filled: ack.filled,
                        remaining: ack.remaining,
                        avg_fill_price: ack.avg_fill_price,
                    },
                );
            }
            Err(err) => {
                tracing::error!(request_id = %job.request_id, error = %err, "Order submission failed.");
                self.engine.waiters.resolve(
                    &job.request_id,
                    OrderResult::failed(job.request_id.as_str(), err.to_string()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(symbol: &str, exchange: &str) -> Position {
        Position {
            id: 1,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            currency: "USD".to_string(),
            qty: Decimal::ONE,
            avg_cost: Decimal::ONE,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            open_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            contract_id: None,
        }
    }

    #[test]
    fn exchange_resolution_prefers_exact_match() {
        let existing = vec![position("MSFT", "NASDAQ"), position("MSFT", "IBKRATS")];
        assert_eq!(resolve_trade_exchange(&existing, "NASDAQ"), "NASDAQ");
    }

    #[test]
    fn exchange_resolution_skips_alternative_venues() {
        let existing = vec![position("MSFT", "IBKRATS"), position("MSFT", "NASDAQ")];
        assert_eq!(resolve_trade_exchange(&existing, "OVERNIGHT"), "NASDAQ");
    }

    #[test]
    fn exchange_resolution_falls_back_to_first_known() {
        let existing = vec![position("MSFT", "IBKRATS")];
        assert_eq!(resolve_trade_exchange(&existing, ""), "IBKRATS");
    }

    #[test]
    fn exchange_resolution_uses_report_when_nothing_known() {
        assert_eq!(resolve_trade_exchange(&[], "ARCA"), "ARCA");
    }

    #[test]
    fn coerce_drops_non_finite_values() {
        assert_eq!(coerce(1.5), Some(Decimal::new(15, 1)));
        assert_eq!(coerce(f64::NAN), None);
        assert_eq!(coerce(f64::INFINITY), None);
    }
}
