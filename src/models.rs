use serde::{Deserialize, Serialize};

use crate::errors::ConnectionError;

/// Lifecycle state of the shared connection.
///
/// `Error` is not terminal: the driver keeps monitoring the topology in the
/// background, and a later successful heartbeat moves the state back to
/// `Open`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial handshake in flight.
    Connecting,
    /// Handshake succeeded, connection usable.
    Open,
    /// The server is currently unreachable.
    Error,
    /// Explicitly shut down.
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Error)
                | (Open, Error)
                | (Error, Open)
                | (Connecting, Closed)
                | (Open, Closed)
                | (Error, Closed)
        )
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), ConnectionError> {
        if !self.can_transition_to(next) {
            return Err(ConnectionError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Error => write!(f, "error"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle notification delivered on the event stream.
///
/// `Opened` fires at most once per `connect()` call; `Error` may fire any
/// number of times, including after a prior `Opened`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Opened { uri: String },
    Error { message: String },
    Closed,
}

/// Health report printed by the `check` subcommand.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HealthStatus {
    pub db_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
