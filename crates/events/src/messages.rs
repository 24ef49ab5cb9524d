use chrono::{DateTime, Utc};
use core_types::{AccountPnl, AccountSummary, DailyPnlPoint, HistoryEntry, Position};
use serde::{Deserialize, Serialize};

/// A complete snapshot of the tracked account's state. One of these gives a
/// consumer everything needed to render a dashboard without further queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub timestamp: DateTime<Utc>,
    pub positions: Vec<Position>,
    pub history: Vec<HistoryEntry>,
    pub account_pnl: AccountPnl,
    pub account_summary: AccountSummary,
    pub daily_pnl: Vec<DailyPnlPoint>,
}

/// The top-level WebSocket message enum.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute serializes
/// each variant into a clean `{"type": ..., "payload": ...}` JSON object,
/// which is easy for frontend consumers to dispatch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    /// Confirms to a newly connected client that its stream is active.
    Connected,
    /// A full snapshot of account state, pushed on the configured interval.
    StateUpdate(StateUpdate),
}
