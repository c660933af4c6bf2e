//! Async SQLite access built on prepared statements.
//!
//! [`Database`] ties the workspace crates together:
//!
//! - `sqlite3-conn` owns the engine handle ([`Connection`]).
//! - `sqlite3-toolkit` prepares, binds and steps statements on tokio's blocking
//!   pool, waits out shared-cache lock contention, and returns rows as canonical
//!   text (`{"col":value,...}`).
//! - `sqlite3-observer` shares the engine's update hook between any number of
//!   change subscriptions and listeners.
//!
//! Errors from every layer are folded into [`Error`], which serializes as
//! `{ code, message, resultCode }`.

mod config;
mod database;
mod error;
mod subscriptions;

pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, Result};
pub use subscriptions::ListenerId;

pub use sqlite3_conn::{Connection, ConnectionConfig};
pub use sqlite3_observer::{ChangeEvent, ChangeKind, ChangeSubscription, ObserverConfig};
pub use sqlite3_toolkit::{ParameterValue, Parameters, Row, RunResult, ToParameter};
