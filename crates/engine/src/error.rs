use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Venue client error: {0}")]
    Venue(#[from] venue_client::VenueError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Invalid event payload: {0}")]
    Core(#[from] core_types::CoreError),
}
