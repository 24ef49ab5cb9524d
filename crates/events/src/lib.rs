//! # Meridian Events
//!
//! This crate defines the real-time message structures pushed over the
//! `/ws/updates` WebSocket to consumers that want the account state without
//! polling the REST endpoints.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the
//! definitive language for all real-time state synchronization.

// Declare the modules that make up this crate.
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use messages::{StateUpdate, WsMessage};
