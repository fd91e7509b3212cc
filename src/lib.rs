//! # Mongoline - MongoDB connection lifecycle management
//!
//! Opens one shared MongoDB connection per [`connect`] call and hands the
//! caller an owned [`DbHandle`]: await [`DbHandle::ready`] for the handshake
//! outcome, subscribe to [`DbHandle::events`] for transient errors, clone
//! the client out for the rest of the application. Connection failures are
//! logged and delivered on the handle's channels; [`connect`] itself never
//! fails.
//!
//! ## Environment Variables
//!
//! - `MONGODB_URI` or `DATABASE_URL`: MongoDB connection string

pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;

pub use config::DbConfig;
pub use db::{DbHandle, connect};
pub use errors::ConnectionError;
pub use models::{ConnectionEvent, ConnectionState};
