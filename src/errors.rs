use thiserror::Error;

use crate::models::ConnectionState;

/// Everything that can go wrong while establishing or holding the database
/// connection. `Clone` so a single handshake outcome can fan out to every
/// `ready()` waiter.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("no connection string configured: set MONGODB_URI or DATABASE_URL")]
    MissingUri,
    #[error("connection error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("connection closed")]
    Closed,
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}
