//! Prepared statement execution for SQLite.
//!
//! This crate is the layer between callers and SQLite's prepared-statement API:
//!
//! - **Binding** ([`params`]): dynamically typed [`ParameterValue`]s (or JSON values)
//!   bound by position or by name.
//! - **Stepping** ([`statement`], [`retry`]): [`PreparedStatement`] drives the step
//!   loop and waits out shared-cache lock contention with unlock notifications,
//!   failing with [`Error::DeadlockDetected`] when waiting could never succeed.
//! - **Row text** ([`serialize`]): rows are returned as canonical text
//!   `{"col":value,...}` so they can cross thread and task boundaries freely.
//! - **Async execution** ([`executor`]): [`Executor`] runs each operation on
//!   tokio's blocking pool and streams rows back in order for `each`.

pub mod error;
pub mod executor;
pub mod params;
pub mod retry;
pub mod serialize;
pub mod statement;

pub use error::{Error, ErrorKind, Result};
pub use executor::Executor;
pub use params::{ParameterValue, Parameters, ToParameter};
pub use retry::LockRetryController;
pub use serialize::{Row, RowSerializer, decode_row, decode_rows};
pub use statement::{CancelCheck, PreparedStatement, RunResult};
