//! # Meridian Ledger Crate
//!
//! This crate is the cost-basis accounting engine: given a position's current
//! state and one incoming fill, it computes the new state, the realized-PnL
//! contribution of the trade, and the lifecycle transition (open, add,
//! partial close, full close, direction flip).
//!
//! ## Architectural Principles
//!
//! - **Pure accounting, no I/O:** the engine never touches storage, clocks,
//!   or the network. The orchestrator owns all side effects; this crate only
//!   answers "what does this fill do to this position?". Two calls with the
//!   same inputs always produce the same outcome, which is what makes the
//!   lifecycle logic testable in isolation.
//! - **One position at a time:** there is no portfolio-level state here.
//!   Cross-position aggregation lives in the cache.
//!
//! ## Public API
//!
//! - `apply_fill`: the single entry point.
//! - `PositionState` / `Fill`: the inputs.
//! - `TradeOutcome`: the lifecycle transition plus everything the caller
//!   needs to emit trade records and archive decisions.
//! - `LedgerError`: rejection of invalid fills.

pub mod cost_basis;
pub mod error;

pub use cost_basis::{ClosedLeg, Direction, Fill, PositionState, TradeOutcome, apply_fill};
pub use error::LedgerError;
