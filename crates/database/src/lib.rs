//! # Meridian Database Crate
//!
//! Durable storage for the position/PnL ledger: connection management,
//! schema migrations, and the `DbRepository` every other component goes
//! through. The write patterns are deliberately idempotent where venues can
//! redeliver (trade inserts keyed on execution id) and transactional where
//! two tables must move together (archiving a position into history).

pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to provide a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, HistoryRow, PositionRow, TradeRow};
