use thiserror::Error;

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("Not connected to the venue gateway")]
    Disconnected,

    #[error("The venue rejected the request: {0}")]
    Rejected(String),

    #[error("Unable to qualify instrument: {0}")]
    UnqualifiedInstrument(String),

    #[error("Venue transport error: {0}")]
    Transport(String),
}
