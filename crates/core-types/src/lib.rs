pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderType, SummaryField};
pub use error::CoreError;
pub use structs::{
    AccountPnl, AccountSummary, DailyPnlPoint, HistoryEntry, OrderRequest, Position, PositionKey,
    TradeRecord,
};
