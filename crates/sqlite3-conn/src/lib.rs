//! # sqlite3-conn
//!
//! Owns a single raw SQLite connection handle and the per-connection state that
//! the execution layer needs around it.
//!
//! ## Core Types
//!
//! - **[`Connection`]**: Exclusive owner of one `sqlite3*`, opened in serialized
//!   (`SQLITE_OPEN_FULLMUTEX`) mode so it may be shared across worker threads
//! - **[`ConnectionConfig`]**: Open flags and pragmas applied at open time
//! - **[`DbMutexGuard`]**: RAII guard over the connection's internal mutex, used to
//!   read error text and change counters atomically with the call that produced them
//! - **[`EngineError`]**: Result code plus message captured from the engine
//! - **[`Error`]**: Error type for connection operations
//!
//! ## Usage
//!
//! ```no_run
//! use sqlite3_conn::{Connection, ConnectionConfig};
//!
//! # fn example() -> sqlite3_conn::Result<()> {
//! let conn = Connection::open("example.db", &ConnectionConfig::default())?;
//! conn.execute_batch("CREATE TABLE IF NOT EXISTS t (a INTEGER, b TEXT)")?;
//! assert!(conn.autocommit());
//! # Ok(())
//! # }
//! ```
//!
mod config;
mod connection;
mod error;
mod lock;

// Re-export public types
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::{EngineError, Error};
pub use lock::DbMutexGuard;

// Re-export the raw bindings so dependents agree on a single version
pub use libsqlite3_sys as ffi;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
