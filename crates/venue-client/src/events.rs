use crate::types::VenueContract;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An execution fill. The side label is the venue's raw spelling; the engine
/// normalizes it. A commission report may ride along when the venue already
/// attached one to the fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueExecution {
    pub account: Option<String>,
    pub contract: VenueContract,
    pub exec_id: String,
    pub perm_id: Option<String>,
    pub side: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub time: Option<DateTime<Utc>>,
    pub commission: Option<CommissionReport>,
}

/// A commission / realization report, keyed by execution id. Arrives before,
/// with, or after its execution — the engine handles all three orderings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionReport {
    pub exec_id: String,
    pub commission: Decimal,
    pub realized_pnl: Option<Decimal>,
}

/// A periodic/full-refresh position report from the venue. Zero quantity
/// means the venue considers the position closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub account: Option<String>,
    pub contract: VenueContract,
    pub qty: Decimal,
    pub avg_cost: Decimal,
}

/// Account-level valuation. Values come through as raw floats because venues
/// emit transient garbage (NaN, infinities) on these channels; the engine
/// drops anything non-finite with no state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPnlUpdate {
    pub account: Option<String>,
    pub daily_pnl: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub realized_pnl: Option<f64>,
}

/// Live valuation for one position, identified by contract id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPnlUpdate {
    pub contract_id: i64,
    pub unrealized_pnl: Option<f64>,
    pub daily_pnl: Option<f64>,
}

/// One named account valuation field. The value is the venue's raw string;
/// unparseable values are dropped by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountValueUpdate {
    pub account: Option<String>,
    pub tag: String,
    pub value: String,
    pub currency: Option<String>,
}

/// Venue session health, as normalized by the binding. "Down" does not tear
/// the session itself — the gateway stays connected while the venue behind
/// it degrades and recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityKind {
    VenueDown,
    VenueRestored,
}

/// The single normalized event type every venue binding produces. Keeping
/// this tagged enum as the only inbound shape keeps the engine independent
/// of any particular binding's callback signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VenueEvent {
    Execution(VenueExecution),
    Commission(CommissionReport),
    Position(VenuePosition),
    AccountPnl(AccountPnlUpdate),
    PositionPnl(PositionPnlUpdate),
    AccountValue(AccountValueUpdate),
    Connectivity {
        kind: ConnectivityKind,
        message: String,
    },
}
