//! # Meridian Cache Crate
//!
//! The in-process source of truth for reads. The cache mirrors everything the
//! durable ledger knows about one account — open positions, closed-position
//! history, account valuation, the daily-PnL series — and additionally tracks
//! exactly which aggregate fields have drifted from durable storage and are
//! awaiting write-back.
//!
//! ## Architectural Principles
//!
//! - **Single short lock, no I/O under it:** every operation takes one
//!   mutual-exclusion region over the whole store, does its in-memory work,
//!   and releases. Durable writes are the orchestrator's job; the cache only
//!   hands it the dirty payload via [`CacheStore::collect_dirty`].
//! - **Snapshots are owned copies:** readers get independently consistent
//!   `Vec`s/structs and never hold the lock while serializing a response.
//! - **Idempotency lives here:** repeated delivery of the same execution's
//!   realized value is collapsed to a delta by [`CacheStore::record_exec_realized`].
//!
//! ## Public API
//!
//! - `CacheStore`: the store itself.
//! - `Hydration`: the bulk-load payload applied once at startup.
//! - `PositionUpsert`: the partial-update shape for open positions.
//! - `DirtyPayload`: what the write-back loop flushes.

pub mod store;

pub use store::{CacheStore, DirtyPayload, Hydration, PositionUpsert};
