//! # Meridian Venue Client Crate
//!
//! The boundary to the trading venue. Everything above this crate is
//! binding-agnostic: venue callbacks of whatever physical shape are
//! normalized into the single tagged [`VenueEvent`] type before they reach
//! the reconciliation engine, and all commands go through the [`VenueClient`]
//! trait so the engine can be driven by a real gateway binding in production
//! and an in-memory double in tests.
//!
//! ## Public API
//!
//! - `VenueClient`: the command surface (connect, replay requests,
//!   subscriptions, order placement, liveness probe).
//! - `VenueEvent`: the normalized inbound event stream.
//! - `VenueError`: the typed failures a venue interaction can produce.

pub mod error;
pub mod events;
pub mod sim;
pub mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use error::VenueError;
pub use events::{
    AccountPnlUpdate, AccountValueUpdate, CommissionReport, ConnectivityKind, PositionPnlUpdate,
    VenueEvent, VenueExecution, VenuePosition,
};
pub use sim::SimVenue;
pub use types::{OrderAck, OrderTicket, VenueContract};

/// Commands the reconciliation engine issues to the venue.
///
/// One session at a time: `connect` hands back the normalized event stream
/// for that session, and the stream closing means the session is gone.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Opens a session and returns its event stream. Events arrive in venue
    /// order and are processed sequentially by the single engine worker.
    async fn connect(&self) -> Result<mpsc::Receiver<VenueEvent>, VenueError>;

    /// Tears the session down. Safe to call when already disconnected.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// The account label this session manages.
    async fn managed_account(&self) -> Result<String, VenueError>;

    /// One-shot snapshot of all currently open positions.
    async fn request_positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    /// One-shot replay of recent executions.
    async fn request_executions(&self) -> Result<Vec<VenueExecution>, VenueError>;

    /// Subscribes to account-level daily/realized/unrealized valuation.
    async fn subscribe_account_pnl(&self, account: &str) -> Result<(), VenueError>;

    /// Subscribes to the named account valuation tags.
    async fn subscribe_account_summary(&self, tags: &[&'static str]) -> Result<(), VenueError>;

    /// Subscribes to live valuation for one position, by contract id.
    async fn subscribe_position_pnl(&self, account: &str, contract_id: i64)
    -> Result<(), VenueError>;

    async fn unsubscribe_position_pnl(&self, contract_id: i64) -> Result<(), VenueError>;

    /// Resolves a symbol/exchange/currency to a concrete venue contract.
    async fn qualify_instrument(
        &self,
        symbol: &str,
        exchange: &str,
        currency: &str,
    ) -> Result<VenueContract, VenueError>;

    /// Submits an order and waits briefly for its initial status.
    async fn place_order(&self, ticket: &OrderTicket) -> Result<OrderAck, VenueError>;

    /// Cheap liveness probe keeping the session warm.
    async fn liveness_probe(&self) -> Result<(), VenueError>;
}
