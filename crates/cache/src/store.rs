use chrono::{DateTime, NaiveDate, Utc};
use core_types::{
    AccountPnl, AccountSummary, DailyPnlPoint, HistoryEntry, Position, PositionKey, SummaryField,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Bulk-load payload applied once at startup, straight from durable storage.
#[derive(Debug, Clone, Default)]
pub struct Hydration {
    pub account_id: i64,
    pub base_currency: String,
    /// Account-wide realized total, summed over the full trade log.
    pub realized_total: Decimal,
    pub positions: Vec<Position>,
    pub history: Vec<HistoryEntry>,
    pub summary: AccountSummary,
    pub daily: Vec<(NaiveDate, Decimal)>,
}

/// Partial update for an open position. PnL fields are deliberately absent:
/// an upsert must never zero valuation state it does not carry.
#[derive(Debug, Clone)]
pub struct PositionUpsert {
    pub id: i64,
    pub key: PositionKey,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub open_time: DateTime<Utc>,
    pub contract_id: Option<i64>,
}

/// Everything currently awaiting durable write-back, plus the mutation
/// watermark at collection time. Pass the watermark back to
/// [`CacheStore::clear_dirty`] so fields mutated *after* the collect stay
/// dirty ("clear what you flushed, not everything").
#[derive(Debug, Clone)]
pub struct DirtyPayload {
    pub summary: Option<AccountSummary>,
    pub summary_fields: HashSet<SummaryField>,
    pub daily: Option<DailyPnlPoint>,
    pub watermark: u64,
}

#[derive(Default)]
struct CacheInner {
    initialized: bool,
    account_id: Option<i64>,
    base_currency: Option<String>,
    last_update: Option<DateTime<Utc>>,
    /// Account-wide realized PnL, maintained by exec-realized deltas.
    realized_total: Decimal,
    positions_by_key: HashMap<PositionKey, Position>,
    history_by_id: BTreeMap<i64, HistoryEntry>,
    contract_to_key: HashMap<i64, PositionKey>,
    account_summary: AccountSummary,
    daily_pnl_by_date: BTreeMap<NaiveDate, Decimal>,
    daily_series: Vec<DailyPnlPoint>,
    current_trade_date: Option<NaiveDate>,
    pending_daily_payload: Option<DailyPnlPoint>,
    /// exec id -> (position key, last realized value reported for it).
    exec_realized: HashMap<String, (PositionKey, Decimal)>,
    /// Dirty bookkeeping: each entry records the mutation sequence at which
    /// the field was last touched, so clearing can skip anything newer than
    /// the flushed collect.
    dirty_summary: HashMap<SummaryField, u64>,
    dirty_daily_seq: Option<u64>,
    mutation_seq: u64,
}

impl CacheInner {
    fn touch(&mut self) {
        self.last_update = Some(Utc::now());
        self.initialized = true;
    }

    fn next_seq(&mut self) -> u64 {
        self.mutation_seq += 1;
        self.mutation_seq
    }

    fn rebuild_daily_series(&mut self) {
        let mut cumulative = Decimal::ZERO;
        self.daily_series = self
            .daily_pnl_by_date
            .iter()
            .map(|(date, value)| {
                cumulative += *value;
                DailyPnlPoint {
                    trade_date: *date,
                    daily_pnl: *value,
                    cumulative_pnl: cumulative,
                }
            })
            .collect();
    }

    fn daily_point_for(&self, date: NaiveDate) -> Option<DailyPnlPoint> {
        self.daily_series
            .iter()
            .find(|point| point.trade_date == date)
            .cloned()
    }

    fn apply_realized_delta(&mut self, key: &PositionKey, delta: Decimal) {
        if let Some(position) = self.positions_by_key.get_mut(key) {
            position.realized_pnl += delta;
            position.recompute_total();
        }
        // Late corrections for an already-archived position do not resurrect
        // it; the history-widening path owns those.
    }
}

/// Thread-safe, read-optimized mirror of ledger and account state.
///
/// One `CacheStore` is shared between the reconciliation worker (the only
/// writer of substance) and any number of read-side consumers. All methods
/// lock, mutate or copy, and return; none performs I/O.
pub struct CacheStore {
    inner: Mutex<CacheInner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A poisoned lock only means a panic happened mid-mutation elsewhere;
        // the data itself is still the best state we have.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.lock().initialized
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.lock().last_update
    }

    pub fn account_identity(&self) -> (Option<i64>, Option<String>) {
        let inner = self.lock();
        (inner.account_id, inner.base_currency.clone())
    }

    /// First-writer-wins initialization of the account identity.
    pub fn set_account(&self, account_id: i64, base_currency: &str) {
        let mut inner = self.lock();
        if inner.account_id.is_none() {
            inner.account_id = Some(account_id);
        }
        if inner.base_currency.is_none() {
            inner.base_currency = Some(base_currency.to_string());
        }
    }

    /// Replaces all in-memory state atomically with a durable-storage
    /// snapshot and marks the cache ready.
    pub fn hydrate(&self, snapshot: Hydration) {
        let mut inner = self.lock();
        inner.account_id = Some(snapshot.account_id);
        inner.base_currency = Some(snapshot.base_currency);
        inner.realized_total = snapshot.realized_total;

        inner.positions_by_key.clear();
        inner.contract_to_key.clear();
        for position in snapshot.positions {
            if let Some(contract_id) = position.contract_id {
                inner.contract_to_key.insert(contract_id, position.key());
            }
            inner.positions_by_key.insert(position.key(), position);
        }

        inner.history_by_id = snapshot
            .history
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();

        inner.account_summary = snapshot.summary;
        inner.daily_pnl_by_date = snapshot.daily.into_iter().collect();
        inner.rebuild_daily_series();
        inner.current_trade_date = inner.daily_pnl_by_date.keys().next_back().copied();
        inner.pending_daily_payload = None;
        inner.dirty_summary.clear();
        inner.dirty_daily_seq = None;
        inner.touch();
        tracing::debug!(
            positions = inner.positions_by_key.len(),
            history = inner.history_by_id.len(),
            daily_points = inner.daily_series.len(),
            "Cache hydrated."
        );
    }

    /// Creates or replaces the open position for a key. Valuation fields
    /// (unrealized/daily/realized PnL) of an existing entry are preserved —
    /// a partial update must not zero fields it does not carry.
    pub fn upsert_position(&self, upsert: PositionUpsert) {
        let mut inner = self.lock();
        let existing = inner.positions_by_key.get(&upsert.key);
        let (unrealized, daily, realized) = existing
            .map(|p| (p.unrealized_pnl, p.daily_pnl, p.realized_pnl))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
        let stale_contract = existing.and_then(|p| p.contract_id);

        let mut position = Position {
            id: upsert.id,
            symbol: upsert.key.symbol.clone(),
            exchange: upsert.key.exchange.clone(),
            currency: upsert.key.currency.clone(),
            qty: upsert.qty,
            avg_cost: upsert.avg_cost,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            daily_pnl: daily,
            total_pnl: Decimal::ZERO,
            open_time: upsert.open_time,
            contract_id: upsert.contract_id,
        };
        position.recompute_total();

        if let Some(old) = stale_contract {
            if Some(old) != upsert.contract_id {
                inner.contract_to_key.remove(&old);
            }
        }
        if let Some(contract_id) = upsert.contract_id {
            inner.contract_to_key.insert(contract_id, upsert.key.clone());
        }
        inner.positions_by_key.insert(upsert.key, position);
        inner.touch();
    }

    /// Deletes the open entry for a key. History is untouched.
    pub fn remove_position(&self, key: &PositionKey) {
        let mut inner = self.lock();
        if let Some(position) = inner.positions_by_key.remove(key) {
            if let Some(contract_id) = position.contract_id {
                inner.contract_to_key.remove(&contract_id);
            }
        }
        inner.touch();
    }

    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        self.lock().positions_by_key.get(key).cloned()
    }

    /// All open positions sharing a symbol/currency, regardless of exchange.
    /// Used for exchange-label resolution on incoming executions.
    pub fn positions_for_symbol(&self, symbol: &str, currency: &str) -> Vec<Position> {
        self.lock()
            .positions_by_key
            .values()
            .filter(|p| p.symbol == symbol && p.currency == currency)
            .cloned()
            .collect()
    }

    pub fn add_history(&self, entry: HistoryEntry) {
        let mut inner = self.lock();
        inner.history_by_id.insert(entry.id, entry);
        inner.touch();
    }

    /// Amends a closed-position record after a late realization correction
    /// widened its close window. No-op for unknown ids.
    pub fn update_history_realized(
        &self,
        position_id: i64,
        close_time: DateTime<Utc>,
        realized_pnl: Decimal,
    ) {
        let mut inner = self.lock();
        if let Some(entry) = inner.history_by_id.get_mut(&position_id) {
            entry.close_time = close_time;
            entry.realized_pnl = realized_pnl;
            inner.touch();
        }
    }

    /// Moves a position's recorded open time backward when an out-of-order
    /// replayed execution predates it. Never moves it forward.
    pub fn advance_open_time(&self, symbol: &str, currency: &str, trade_time: DateTime<Utc>) {
        let mut inner = self.lock();
        for position in inner.positions_by_key.values_mut() {
            if position.symbol == symbol
                && position.currency == currency
                && trade_time < position.open_time
            {
                position.open_time = trade_time;
            }
        }
        inner.touch();
    }

    /// Adds a realized-PnL delta to the named open position, if it exists.
    pub fn apply_realized_delta(&self, key: &PositionKey, delta: Decimal) {
        let mut inner = self.lock();
        inner.apply_realized_delta(key, delta);
        inner.touch();
    }

    /// The idempotency boundary against duplicate or corrected commission
    /// reports: only the delta versus the last value recorded for this
    /// execution id is applied to the position and the account-wide total.
    pub fn record_exec_realized(&self, exec_id: &str, key: &PositionKey, realized: Decimal) {
        let mut inner = self.lock();
        let delta = match inner.exec_realized.get(exec_id) {
            Some((_, last)) => realized - *last,
            None => realized,
        };
        inner
            .exec_realized
            .insert(exec_id.to_string(), (key.clone(), realized));
        if !delta.is_zero() {
            inner.realized_total += delta;
            inner.apply_realized_delta(key, delta);
        }
        inner.touch();
    }

    /// Current realized PnL of an open position, for durable write-back.
    pub fn position_realized(&self, key: &PositionKey) -> Option<Decimal> {
        self.lock()
            .positions_by_key
            .get(key)
            .map(|p| p.realized_pnl)
    }

    /// Updates live valuation on the position subscribed under a contract id.
    /// No-op when nothing is subscribed under that id (already closed).
    pub fn update_position_valuation(
        &self,
        contract_id: i64,
        unrealized_pnl: Decimal,
        daily_pnl: Option<Decimal>,
    ) {
        let mut inner = self.lock();
        let Some(key) = inner.contract_to_key.get(&contract_id).cloned() else {
            return;
        };
        if let Some(position) = inner.positions_by_key.get_mut(&key) {
            position.unrealized_pnl = unrealized_pnl;
            if let Some(daily) = daily_pnl {
                position.daily_pnl = daily;
            }
            position.recompute_total();
        }
        inner.touch();
    }

    /// Upserts one trading date's daily PnL and rebuilds the cumulative
    /// series. When the current trading date rolls over, the *previous*
    /// date's final payload is staged for durable flush — "yesterday's
    /// number is now final" without an explicit close-of-day signal.
    pub fn update_daily_pnl(&self, trade_date: NaiveDate, daily_pnl: Decimal) {
        let mut inner = self.lock();
        let previous_date = inner.current_trade_date;
        inner.daily_pnl_by_date.insert(trade_date, daily_pnl);
        inner.rebuild_daily_series();
        if let Some(previous) = previous_date {
            if previous != trade_date {
                if let Some(payload) = inner.daily_point_for(previous) {
                    inner.pending_daily_payload = Some(payload);
                    let seq = inner.next_seq();
                    inner.dirty_daily_seq = Some(seq);
                }
            }
        }
        inner.current_trade_date = Some(trade_date);
        inner.touch();
    }

    /// Sets one account valuation field, stamps freshness, marks it dirty.
    pub fn update_account_summary_field(&self, field: SummaryField, value: Decimal) {
        let mut inner = self.lock();
        inner.account_summary.set(field, value);
        inner.account_summary.as_of = Some(Utc::now());
        let seq = inner.next_seq();
        inner.dirty_summary.insert(field, seq);
        inner.touch();
    }

    /// Returns everything awaiting write-back together with the watermark to
    /// hand back to [`CacheStore::clear_dirty`] after a successful flush.
    pub fn collect_dirty(&self) -> DirtyPayload {
        let inner = self.lock();
        let summary_fields: HashSet<SummaryField> = inner.dirty_summary.keys().copied().collect();
        DirtyPayload {
            summary: (!summary_fields.is_empty()).then(|| inner.account_summary.clone()),
            summary_fields,
            daily: inner
                .dirty_daily_seq
                .and_then(|_| inner.pending_daily_payload.clone()),
            watermark: inner.mutation_seq,
        }
    }

    /// Clears exactly what was flushed. A field mutated again after the
    /// collect carries a newer sequence than the watermark and stays dirty.
    pub fn clear_dirty(
        &self,
        summary_fields: &HashSet<SummaryField>,
        daily_pnl: bool,
        watermark: u64,
    ) {
        let mut inner = self.lock();
        inner
            .dirty_summary
            .retain(|field, seq| !summary_fields.contains(field) || *seq > watermark);
        if daily_pnl {
            if let Some(seq) = inner.dirty_daily_seq {
                if seq <= watermark {
                    inner.dirty_daily_seq = None;
                    inner.pending_daily_payload = None;
                }
            }
        }
    }

    /// Open positions, sorted by symbol.
    pub fn snapshot_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.lock().positions_by_key.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Closed positions, most recently closed first.
    pub fn snapshot_history(&self) -> Vec<HistoryEntry> {
        let mut history: Vec<HistoryEntry> = self.lock().history_by_id.values().cloned().collect();
        history.sort_by(|a, b| b.close_time.cmp(&a.close_time));
        history
    }

    pub fn snapshot_account_pnl(&self) -> AccountPnl {
        let inner = self.lock();
        let unrealized: Decimal = inner
            .positions_by_key
            .values()
            .map(|p| p.unrealized_pnl)
            .sum();
        let daily = inner
            .daily_pnl_by_date
            .iter()
            .next_back()
            .map(|(_, value)| *value)
            .unwrap_or(Decimal::ZERO);
        AccountPnl {
            account_id: inner.account_id,
            base_currency: inner.base_currency.clone(),
            realized_pnl: inner.realized_total,
            unrealized_pnl: unrealized,
            daily_pnl: daily,
            total_pnl: inner.realized_total + unrealized,
            as_of: inner.last_update.unwrap_or_else(Utc::now),
        }
    }

    pub fn snapshot_account_summary(&self) -> AccountSummary {
        self.lock().account_summary.clone()
    }

    /// The daily-PnL series, date ascending.
    pub fn snapshot_daily_pnl(&self) -> Vec<DailyPnlPoint> {
        self.lock().daily_series.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn key(symbol: &str) -> PositionKey {
        PositionKey::new(symbol, "NASDAQ", "USD")
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn upsert(symbol: &str, id: i64, qty: Decimal) -> PositionUpsert {
        PositionUpsert {
            id,
            key: key(symbol),
            qty,
            avg_cost: dec!(100),
            open_time: ts(0),
            contract_id: Some(id * 10),
        }
    }

    #[test]
    fn upsert_preserves_valuation_fields_it_does_not_carry() {
        let cache = CacheStore::new();
        cache.upsert_position(upsert("MSFT", 1, dec!(10)));
        cache.update_position_valuation(10, dec!(5.5), Some(dec!(2)));
        cache.apply_realized_delta(&key("MSFT"), dec!(3));

        // Identity-only refresh, as a venue position snapshot would send.
        cache.upsert_position(upsert("MSFT", 1, dec!(12)));
        let position = cache.position(&key("MSFT")).unwrap();
        assert_eq!(position.qty, dec!(12));
        assert_eq!(position.unrealized_pnl, dec!(5.5));
        assert_eq!(position.daily_pnl, dec!(2));
        assert_eq!(position.realized_pnl, dec!(3));
        assert_eq!(position.total_pnl, dec!(8.5));
    }

    #[test]
    fn exec_realized_applies_delta_only_once_per_value() {
        let cache = CacheStore::new();
        cache.upsert_position(upsert("MSFT", 1, dec!(10)));

        cache.record_exec_realized("exec-1", &key("MSFT"), dec!(5));
        assert_eq!(cache.snapshot_account_pnl().realized_pnl, dec!(5));

        // Redelivery of the same value is a no-op.
        cache.record_exec_realized("exec-1", &key("MSFT"), dec!(5));
        assert_eq!(cache.snapshot_account_pnl().realized_pnl, dec!(5));

        // A corrected value applies only the difference: 5 then 8 adds 3.
        cache.record_exec_realized("exec-1", &key("MSFT"), dec!(8));
        assert_eq!(cache.snapshot_account_pnl().realized_pnl, dec!(8));
        assert_eq!(
            cache.position(&key("MSFT")).unwrap().realized_pnl,
            dec!(8)
        );
    }

    #[test]
    fn realized_delta_for_unknown_key_is_a_noop() {
        let cache = CacheStore::new();
        cache.apply_realized_delta(&key("GONE"), dec!(42));
        assert!(cache.snapshot_positions().is_empty());
    }

    #[test]
    fn daily_series_is_insertion_order_independent() {
        let dates: Vec<NaiveDate> = ["2024-03-04", "2024-03-05", "2024-03-06"]
            .iter()
            .map(|d| d.parse().unwrap())
            .collect();
        let values = [dec!(10), dec!(-4), dec!(7)];

        let in_order = CacheStore::new();
        for (date, value) in dates.iter().zip(values) {
            in_order.update_daily_pnl(*date, value);
        }
        let shuffled = CacheStore::new();
        for index in [2usize, 0, 1] {
            shuffled.update_daily_pnl(dates[index], values[index]);
        }

        assert_eq!(in_order.snapshot_daily_pnl(), shuffled.snapshot_daily_pnl());
        let series = in_order.snapshot_daily_pnl();
        assert_eq!(series[2].cumulative_pnl, dec!(13));
    }

    #[test]
    fn date_rollover_stages_previous_days_final_payload() {
        let cache = CacheStore::new();
        let monday: NaiveDate = "2024-03-04".parse().unwrap();
        let tuesday: NaiveDate = "2024-03-05".parse().unwrap();

        cache.update_daily_pnl(monday, dec!(10));
        assert!(cache.collect_dirty().daily.is_none());

        cache.update_daily_pnl(monday, dec!(12));
        assert!(cache.collect_dirty().daily.is_none());

        cache.update_daily_pnl(tuesday, dec!(1));
        let staged = cache.collect_dirty().daily.unwrap();
        assert_eq!(staged.trade_date, monday);
        assert_eq!(staged.daily_pnl, dec!(12));
    }

    #[test]
    fn clear_dirty_skips_fields_mutated_after_collect() {
        let cache = CacheStore::new();
        cache.update_account_summary_field(SummaryField::NetLiquidation, dec!(1000));
        cache.update_account_summary_field(SummaryField::AvailableFunds, dec!(500));

        let collected = cache.collect_dirty();
        assert_eq!(collected.summary_fields.len(), 2);

        // A concurrent update lands between collect and clear.
        cache.update_account_summary_field(SummaryField::NetLiquidation, dec!(1001));
        cache.clear_dirty(&collected.summary_fields, false, collected.watermark);

        let after = cache.collect_dirty();
        assert_eq!(
            after.summary_fields,
            HashSet::from([SummaryField::NetLiquidation])
        );
        assert_eq!(
            after.summary.unwrap().net_liquidation,
            Some(dec!(1001))
        );
    }

    #[test]
    fn snapshots_are_sorted() {
        let cache = CacheStore::new();
        cache.upsert_position(upsert("ZM", 1, dec!(1)));
        cache.upsert_position(upsert("AAPL", 2, dec!(2)));
        let symbols: Vec<String> = cache
            .snapshot_positions()
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        assert_eq!(symbols, vec!["AAPL", "ZM"]);

        cache.add_history(HistoryEntry {
            id: 1,
            symbol: "OLD".to_string(),
            exchange: String::new(),
            currency: "USD".to_string(),
            open_time: ts(0),
            close_time: ts(100),
            realized_pnl: dec!(1),
        });
        cache.add_history(HistoryEntry {
            id: 2,
            symbol: "NEW".to_string(),
            exchange: String::new(),
            currency: "USD".to_string(),
            open_time: ts(0),
            close_time: ts(200),
            realized_pnl: dec!(2),
        });
        let ids: Vec<i64> = cache.snapshot_history().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn valuation_update_for_unsubscribed_contract_is_dropped() {
        let cache = CacheStore::new();
        cache.upsert_position(upsert("MSFT", 1, dec!(10)));
        cache.remove_position(&key("MSFT"));
        cache.update_position_valuation(10, dec!(99), None);
        assert!(cache.snapshot_positions().is_empty());
    }

    #[test]
    fn open_time_only_moves_backward() {
        let cache = CacheStore::new();
        cache.upsert_position(PositionUpsert {
            open_time: ts(100),
            ..upsert("MSFT", 1, dec!(10))
        });
        cache.advance_open_time("MSFT", "USD", ts(500));
        assert_eq!(cache.position(&key("MSFT")).unwrap().open_time, ts(100));
        cache.advance_open_time("MSFT", "USD", ts(50));
        assert_eq!(cache.position(&key("MSFT")).unwrap().open_time, ts(50));
    }

    #[test]
    fn hydrate_replaces_state_and_marks_ready() {
        let cache = CacheStore::new();
        assert!(!cache.is_ready());
        cache.upsert_position(upsert("STALE", 9, dec!(1)));

        cache.hydrate(Hydration {
            account_id: 7,
            base_currency: "USD".to_string(),
            realized_total: dec!(55),
            positions: vec![Position {
                id: 1,
                symbol: "MSFT".to_string(),
                exchange: "NASDAQ".to_string(),
                currency: "USD".to_string(),
                qty: dec!(10),
                avg_cost: dec!(100.1),
                realized_pnl: dec!(0),
                unrealized_pnl: dec!(2),
                daily_pnl: dec!(1),
                total_pnl: dec!(2),
                open_time: ts(0),
                contract_id: Some(42),
            }],
            history: vec![],
            summary: AccountSummary::default(),
            daily: vec![("2024-03-04".parse().unwrap(), dec!(12))],
        });

        assert!(cache.is_ready());
        assert!(cache.position(&key("STALE")).is_none());
        let pnl = cache.snapshot_account_pnl();
        assert_eq!(pnl.account_id, Some(7));
        assert_eq!(pnl.realized_pnl, dec!(55));
        assert_eq!(pnl.unrealized_pnl, dec!(2));
        assert_eq!(pnl.daily_pnl, dec!(12));
        // Contract subscription survives hydration.
        cache.update_position_valuation(42, dec!(9), None);
        assert_eq!(
            cache.position(&key("MSFT")).unwrap().unrealized_pnl,
            dec!(9)
        );
    }
}
