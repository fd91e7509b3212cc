//! # Database connection module
//!
//! This module owns the lifecycle of the shared MongoDB connection.
//!
//! ## Configuration
//!
//! The connection string comes from [`DbConfig`], usually built with
//! [`DbConfig::from_env`]:
//! - `MONGODB_URI` or `DATABASE_URL`: MongoDB connection string
//!
//! ## Usage
//!
//! [`connect`] returns a [`DbHandle`] immediately and performs the handshake
//! in the background. The handle is the single hand-off point: the hosting
//! application keeps it, awaits [`DbHandle::ready`] at startup, and clones
//! the [`Client`] out of it for whatever needs the database. Connection
//! failures are logged and delivered on the handle's channels; they are
//! never panicked and never returned from [`connect`] itself.

use std::sync::Arc;

use mongodb::Client;
use mongodb::bson::doc;
use mongodb::event::EventHandler;
use mongodb::event::sdam::SdamEvent;
use mongodb::options::ClientOptions;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use crate::config::DbConfig;
use crate::errors::ConnectionError;
use crate::models::{ConnectionEvent, ConnectionState};

/// Buffered lifecycle events per subscriber; slow subscribers lag rather
/// than block the connection.
const EVENT_BUFFER: usize = 32;

struct Shared {
    config: DbConfig,
    state_tx: watch::Sender<ConnectionState>,
    ready_tx: watch::Sender<Option<Result<Client, ConnectionError>>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

/// Owned handle to the shared connection.
///
/// Cheap to clone; all clones observe the same connection.
#[derive(Clone)]
pub struct DbHandle {
    shared: Arc<Shared>,
}

/// Open the configured connection.
///
/// Returns immediately; the handshake runs on a background task. Must be
/// called within a Tokio runtime. Each call creates exactly one client and
/// one independent handle, so callers should connect once at startup and
/// pass the handle around.
pub fn connect(config: DbConfig) -> DbHandle {
    let (state_tx, _) = watch::channel(ConnectionState::Connecting);
    let (ready_tx, _) = watch::channel(None);
    let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

    let shared = Arc::new(Shared {
        config,
        state_tx,
        ready_tx,
        events_tx,
    });

    tokio::spawn(establish(Arc::clone(&shared)));

    DbHandle { shared }
}

impl DbHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch channel mirroring [`state`](Self::state); late subscribers
    /// always observe the current value.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events, including transient errors detected
    /// after the connection opened.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// The configured connection string.
    pub fn uri(&self) -> &str {
        &self.shared.config.uri
    }

    /// Wait for the initial handshake outcome.
    ///
    /// Resolves exactly once per handle; any number of tasks may wait
    /// concurrently and all observe the same result. Returns
    /// [`ConnectionError::Closed`] if the handle is closed before the
    /// handshake completes.
    pub async fn ready(&self) -> Result<Client, ConnectionError> {
        let mut rx = self.shared.ready_tx.subscribe();
        let outcome = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| ConnectionError::Closed)?;

        match &*outcome {
            Some(result) => result.clone(),
            None => Err(ConnectionError::Closed),
        }
    }

    /// The connected client, if the handshake has succeeded and the handle
    /// has not been closed.
    pub fn client(&self) -> Option<Client> {
        if self.state() == ConnectionState::Closed {
            return None;
        }
        match &*self.shared.ready_tx.borrow() {
            Some(Ok(client)) => Some(client.clone()),
            _ => None,
        }
    }

    /// Shut the connection down. Idempotent; pending `ready()` waiters
    /// resolve with [`ConnectionError::Closed`] if the handshake never
    /// completed.
    pub async fn close(&self) {
        let closed = self.shared.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !closed {
            return;
        }

        let _ = self.shared.events_tx.send(ConnectionEvent::Closed);

        let resolved_now = self.shared.ready_tx.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(Err(ConnectionError::Closed));
                true
            } else {
                false
            }
        });

        let client = if resolved_now {
            None
        } else {
            match &*self.shared.ready_tx.borrow() {
                Some(Ok(client)) => Some(client.clone()),
                _ => None,
            }
        };

        if let Some(client) = client {
            client.shutdown().await;
        }
        info!("MongoDB connection on {} closed", self.shared.config.uri);
    }
}

/// Background establishment task: one run per `connect()` call.
async fn establish(shared: Arc<Shared>) {
    let uri = shared.config.uri.clone();

    match open_client(&shared).await {
        Ok(client) => {
            let opened = shared.state_tx.send_if_modified(|state| {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Open;
                    true
                } else {
                    false
                }
            });

            if opened {
                info!("MongoDB connected on {uri}");
                let _ = shared.events_tx.send(ConnectionEvent::Opened { uri });
                resolve(&shared, Ok(client));
            } else {
                // Closed while the handshake was in flight.
                client.shutdown().await;
            }
        }
        Err(err) => {
            shared.state_tx.send_if_modified(|state| {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Error;
                    true
                } else {
                    false
                }
            });

            error!("connection error: {err}");
            let _ = shared.events_tx.send(ConnectionEvent::Error {
                message: err.to_string(),
            });
            resolve(&shared, Err(err));
        }
    }
}

/// Parse options, wire up topology monitoring, build the client and run the
/// `ping` handshake.
async fn open_client(shared: &Arc<Shared>) -> Result<Client, ConnectionError> {
    let mut options = ClientOptions::parse(&shared.config.uri).await?;
    if let Some(name) = &shared.config.app_name {
        options.app_name = Some(name.clone());
    }

    let monitor = Arc::clone(shared);
    options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
        match event {
            SdamEvent::ServerHeartbeatFailed(ev) => {
                error!("connection error on {}: {}", ev.server_address, ev.failure);
                let _ = monitor.events_tx.send(ConnectionEvent::Error {
                    message: ev.failure.to_string(),
                });
                monitor.state_tx.send_if_modified(|state| {
                    if *state == ConnectionState::Open {
                        *state = ConnectionState::Error;
                        true
                    } else {
                        false
                    }
                });
            }
            SdamEvent::ServerHeartbeatSucceeded(_) => {
                // The driver retries transparently; a healthy heartbeat
                // after an outage brings the state back.
                monitor.state_tx.send_if_modified(|state| {
                    if *state == ConnectionState::Error {
                        *state = ConnectionState::Open;
                        true
                    } else {
                        false
                    }
                });
            }
            _ => {}
        }
    }));

    let client = Client::with_options(options)?;

    // The driver connects lazily; a ping is the actual handshake.
    if let Err(err) = client.database("admin").run_command(doc! { "ping": 1 }).await {
        client.shutdown().await;
        return Err(err.into());
    }

    Ok(client)
}

fn resolve(shared: &Shared, outcome: Result<Client, ConnectionError>) {
    shared.ready_tx.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(outcome);
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    // All tests run offline: a malformed URI fails inside
    // `ClientOptions::parse` before any network activity.
    const BAD_URI: &str = "not-a-connection-string";

    #[tokio::test]
    async fn test_connect_returns_before_resolving() {
        let handle = connect(DbConfig::new(BAD_URI));

        // Nothing has run yet on the current-thread test runtime.
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(handle.client().is_none());
    }

    #[tokio::test]
    async fn test_malformed_uri_resolves_to_error() {
        let handle = connect(DbConfig::new(BAD_URI));
        let mut events = handle.events();

        match handle.ready().await {
            Err(ConnectionError::Mongo(_)) => {}
            Err(other) => panic!("Expected Mongo error, got {other:?}"),
            Ok(_) => panic!("Expected Mongo error, got a client"),
        }

        assert_eq!(handle.state(), ConnectionState::Error);
        assert!(handle.client().is_none());

        match events.recv().await {
            Ok(ConnectionEvent::Error { message }) => assert!(!message.is_empty()),
            other => panic!("Expected Error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ready_supports_concurrent_waiters() {
        let handle = connect(DbConfig::new(BAD_URI));

        let (a, b) = tokio::join!(handle.ready(), handle.ready());
        assert!(a.is_err());
        assert!(b.is_err());

        // Late waiters see the same resolved outcome.
        assert!(handle.ready().await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_connect_is_independent() {
        let first = connect(DbConfig::new(BAD_URI));
        let second = connect(DbConfig::new(BAD_URI));

        assert!(first.ready().await.is_err());
        assert!(second.ready().await.is_err());
    }

    #[tokio::test]
    async fn test_close_before_open_resolves_closed() {
        let handle = connect(DbConfig::new(BAD_URI));
        let mut events = handle.events();

        handle.close().await;
        assert_eq!(handle.state(), ConnectionState::Closed);

        match handle.ready().await {
            Err(ConnectionError::Closed) => {}
            Err(other) => panic!("Expected Closed, got {other:?}"),
            Ok(_) => panic!("Expected Closed, got a client"),
        }

        match events.recv().await {
            Ok(ConnectionEvent::Closed) => {}
            other => panic!("Expected Closed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let handle = connect(DbConfig::new(BAD_URI));

        handle.close().await;
        handle.close().await;

        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_handle_clones_share_state() {
        let handle = connect(DbConfig::new(BAD_URI));
        let clone = handle.clone();

        assert!(handle.ready().await.is_err());
        assert_eq!(clone.state(), ConnectionState::Error);
        assert_eq!(clone.uri(), BAD_URI);
    }
}
