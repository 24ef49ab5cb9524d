use serde::Deserialize;

/// The root configuration structure for the entire application.
///
/// Every section and field has a sensible default, so the service boots with
/// no config file at all; `meridian.toml` and `MERIDIAN_*` environment
/// variables override selectively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: Account,
    #[serde(default)]
    pub venue: Venue,
    #[serde(default)]
    pub sync: Sync,
    #[serde(default)]
    pub server: Server,
}

/// Identity of the tracked account.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    /// The currency all account-level aggregates are reported in (e.g., "USD").
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
}

/// Connection parameters for the trading venue's gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Venue {
    #[serde(default = "default_venue_host")]
    pub host: String,
    #[serde(default = "default_venue_port")]
    pub port: u16,
    /// Client id presented to the gateway; each concurrent session needs its own.
    #[serde(default = "default_client_id")]
    pub client_id: i64,
    /// When true, order submission is refused at the API edge.
    #[serde(default)]
    pub readonly: bool,
}

/// Tuning for the reconciliation loop.
#[derive(Debug, Clone, Deserialize)]
pub struct Sync {
    /// Capacity of the bounded order-submission queue. A full queue rejects
    /// new orders immediately rather than blocking the caller.
    #[serde(default = "default_order_queue_max")]
    pub order_queue_max: usize,
    /// Reconnect backoff starts here and doubles up to the maximum,
    /// resetting on every successful connect.
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_delay_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_delay_secs: u64,
    /// Interval between liveness probes to the venue.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Interval between flushes of dirty cache fields to durable storage.
    #[serde(default = "default_cache_flush")]
    pub cache_flush_secs: u64,
    /// How long an order submission waits for its result before reporting
    /// "still queued" back to the caller.
    #[serde(default = "default_order_wait")]
    pub order_wait_secs: u64,
}

/// The HTTP serving layer.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Push interval for the /ws/updates stream, in milliseconds.
    #[serde(default = "default_ws_interval")]
    pub ws_update_interval_ms: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
        }
    }
}

impl Default for Venue {
    fn default() -> Self {
        Self {
            host: default_venue_host(),
            port: default_venue_port(),
            client_id: default_client_id(),
            readonly: false,
        }
    }
}

impl Default for Sync {
    fn default() -> Self {
        Self {
            order_queue_max: default_order_queue_max(),
            reconnect_min_delay_secs: default_reconnect_min(),
            reconnect_max_delay_secs: default_reconnect_max(),
            keepalive_secs: default_keepalive(),
            cache_flush_secs: default_cache_flush(),
            order_wait_secs: default_order_wait(),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ws_update_interval_ms: default_ws_interval(),
        }
    }
}

fn default_base_currency() -> String {
    "USD".to_string()
}
fn default_venue_host() -> String {
    "127.0.0.1".to_string()
}
fn default_venue_port() -> u16 {
    7497
}
fn default_client_id() -> i64 {
    1
}
fn default_order_queue_max() -> usize {
    50
}
fn default_reconnect_min() -> u64 {
    3
}
fn default_reconnect_max() -> u64 {
    60
}
fn default_keepalive() -> u64 {
    15
}
fn default_cache_flush() -> u64 {
    30
}
fn default_order_wait() -> u64 {
    8
}
fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_ws_interval() -> u64 {
    300
}
