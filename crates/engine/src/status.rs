use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connectivity and lifecycle flags for the reconciliation loop, served
/// read-only through the API. Two layers of health are tracked separately:
/// `connected` is our session to the gateway, `venue_reachable` is the
/// venue behind it, which can degrade while the session stays up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub connected: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub venue_reachable: Option<bool>,
    pub venue_last_up_at: Option<DateTime<Utc>>,
    pub venue_last_down_at: Option<DateTime<Utc>>,
}
