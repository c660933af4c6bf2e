//! Prepared statement execution.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use libsqlite3_sys::{
   SQLITE_DONE, SQLITE_MISUSE, SQLITE_OK, SQLITE_RANGE, SQLITE_ROW, SQLITE_TOOBIG,
   SQLITE_TRANSIENT, SQLITE_UTF8, sqlite3_bind_blob64, sqlite3_bind_double, sqlite3_bind_int64,
   sqlite3_bind_null, sqlite3_bind_parameter_count, sqlite3_bind_parameter_name,
   sqlite3_bind_text64, sqlite3_finalize, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step,
   sqlite3_stmt, sqlite3_stmt_readonly,
};
use serde::{Deserialize, Serialize};
use sqlite3_conn::{Connection, DbMutexGuard, EngineError};
use tracing::trace;

use crate::params::{ParameterValue, Parameters, ToParameter, strip_prefix};
use crate::retry::LockRetryController;
use crate::serialize::{RowSerializer, join_rows};
use crate::{Error, Result};

/// Result returned from [`PreparedStatement::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
   /// The number of rows affected by the statement.
   ///
   /// Read from the connection's change counter in the same critical section as
   /// the final step. Statements that changed no rows, including read-only
   /// statements and DDL, report 0.
   pub rows_affected: u64,
   /// The connection's last inserted row ID (SQLite ROWID) after the statement.
   ///
   /// Only changed by INSERT into a table with a ROWID.
   pub last_insert_rowid: i64,
}

/// Consulted each time a statement wakes from an unlock wait. Returning true
/// abandons execution with [`Error::Cancelled`].
pub type CancelCheck<'c> = Box<dyn Fn() -> bool + 'c>;

/// Outcome of one successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
   Row,
   Done,
}

/// One compiled statement, used for a single execution.
///
/// Created with [`prepare`](Self::prepare), bound once with
/// [`bind`](Self::bind), then consumed by exactly one of [`run`](Self::run),
/// [`one`](Self::one), [`all`](Self::all) or [`each`](Self::each). The compiled
/// handle is finalized when the statement is dropped, whichever way execution
/// ends.
///
/// Stepping goes through a [`LockRetryController`], so shared-cache lock
/// contention is waited out instead of reported.
///
/// # Example
///
/// ```no_run
/// use sqlite3_conn::{Connection, ConnectionConfig};
/// use sqlite3_toolkit::{ParameterValue, Parameters, PreparedStatement};
///
/// # fn example() -> sqlite3_toolkit::Result<()> {
/// let conn = Connection::open(":memory:", &ConnectionConfig::default())?;
/// conn.execute_batch("CREATE TABLE t (a INTEGER, b TEXT)")?;
///
/// let mut insert = PreparedStatement::prepare(&conn, "INSERT INTO t (a, b) VALUES (?, ?)")?;
/// insert.bind(&Parameters::Positional(vec![
///     ParameterValue::Integer(5),
///     ParameterValue::Text("x".into()),
/// ]))?;
/// assert_eq!(insert.run()?.rows_affected, 1);
///
/// let mut select = PreparedStatement::prepare(&conn, "SELECT a, b FROM t")?;
/// assert_eq!(select.one()?.as_deref(), Some(r#"{"a":5,"b":"x"}"#));
/// # Ok(())
/// # }
/// ```
pub struct PreparedStatement<'c> {
   conn: &'c Connection,
   stmt: NonNull<sqlite3_stmt>,
   retry: LockRetryController,
   serializer: Option<RowSerializer>,
   cancel: Option<CancelCheck<'c>>,
   changed: bool,
}

impl<'c> PreparedStatement<'c> {
   /// Compiles the first statement in `sql`.
   ///
   /// Any text after the first complete statement is ignored. Text with no
   /// statement at all (empty, whitespace or comments only) is a prepare error.
   pub fn prepare(conn: &'c Connection, sql: &str) -> Result<Self> {
      Self::prepare_inner(conn, sql, None)
   }

   /// Like [`prepare`](Self::prepare), but stops with [`Error::Cancelled`] when
   /// `cancelled` returns true after any wait for another connection's lock,
   /// during preparation or stepping.
   pub fn prepare_cancellable<F>(conn: &'c Connection, sql: &str, cancelled: F) -> Result<Self>
   where
      F: Fn() -> bool + 'c,
   {
      Self::prepare_inner(conn, sql, Some(Box::new(cancelled)))
   }

   fn prepare_inner(
      conn: &'c Connection,
      sql: &str,
      cancel: Option<CancelCheck<'c>>,
   ) -> Result<Self> {
      let db = conn.as_raw();
      let len = c_int::try_from(sql.len()).map_err(|_| Error::Prepare {
         code: SQLITE_TOOBIG,
         message: "SQL text is too long".to_string(),
      })?;

      let mut retry = LockRetryController::new();

      loop {
         let guard = conn.lock();
         let mut raw: *mut sqlite3_stmt = ptr::null_mut();

         // SAFETY: db is valid for the lifetime of conn; sql is valid for len bytes
         // and does not need a terminator when the length is given.
         let rc = unsafe {
            sqlite3_prepare_v2(db, sql.as_ptr() as *const c_char, len, &mut raw, ptr::null_mut())
         };

         if rc == SQLITE_OK {
            drop(guard);
            let stmt = NonNull::new(raw).ok_or_else(|| Error::Prepare {
               code: SQLITE_MISUSE,
               message: "SQL text contains no statement".to_string(),
            })?;
            trace!(sql, "Prepared statement");
            return Ok(Self {
               conn,
               stmt,
               retry,
               serializer: None,
               cancel,
               changed: false,
            });
         }

         // SAFETY: the guard has been held since prepare returned.
         if unsafe { LockRetryController::is_contention(db, rc) } {
            unsafe { retry.register(db) }?;
            drop(guard);
            unsafe { retry.wait(db) };
            if cancel.as_ref().is_some_and(|cancelled| cancelled()) {
               trace!("Cancelled while waiting to prepare");
               return Err(Error::Cancelled);
            }
            continue;
         }

         let source = unsafe { EngineError::from_handle(db, rc) };
         return Err(Error::prepare(source));
      }
   }

   fn raw(&self) -> *mut sqlite3_stmt {
      self.stmt.as_ptr()
   }

   /// Number of parameters (the largest parameter index) in the statement.
   pub fn parameter_count(&self) -> usize {
      // SAFETY: stmt is valid until drop.
      unsafe { sqlite3_bind_parameter_count(self.raw()) }.max(0) as usize
   }

   /// Name of parameter `index` (1-based) including its prefix, or `None` for
   /// anonymous `?` parameters.
   pub fn parameter_name(&self, index: usize) -> Option<String> {
      let index = c_int::try_from(index).ok()?;
      // SAFETY: stmt is valid; out-of-range indexes return null.
      let ptr = unsafe { sqlite3_bind_parameter_name(self.raw(), index) };
      if ptr.is_null() {
         return None;
      }
      // SAFETY: non-null names are NUL-terminated UTF-8 owned by the statement.
      Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
   }

   /// Whether the statement makes no direct changes to the database.
   pub fn is_read_only(&self) -> bool {
      // SAFETY: stmt is valid until drop.
      unsafe { sqlite3_stmt_readonly(self.raw()) != 0 }
   }

   /// Binds all parameters.
   ///
   /// Positional values bind to indexes 1..=n. Named values are looked up by each
   /// statement parameter's name with its prefix removed; parameters with no
   /// entry stay unbound (NULL). The first failure stops binding.
   pub fn bind<P: ToParameter>(&mut self, params: &Parameters<P>) -> Result<()> {
      match params {
         Parameters::None => Ok(()),
         Parameters::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
               self.bind_one(i + 1, value)?;
            }
            Ok(())
         }
         Parameters::Named(values) => {
            for index in 1..=self.parameter_count() {
               let Some(name) = self.parameter_name(index) else {
                  continue;
               };
               match values.get(strip_prefix(&name)) {
                  Some(value) => self.bind_one(index, value)?,
                  None => trace!(name = %name, "No value for named parameter, leaving NULL"),
               }
            }
            Ok(())
         }
      }
   }

   fn bind_one<P: ToParameter>(&mut self, index: usize, value: &P) -> Result<()> {
      let value = value
         .to_parameter()
         .map_err(|type_name| Error::InvalidParameterType {
            index,
            type_name: type_name.to_string(),
         })?;
      self.bind_value(index, &value)
   }

   /// Binds a single value at `index` (1-based).
   pub fn bind_value(&mut self, index: usize, value: &ParameterValue) -> Result<()> {
      let stmt = self.raw();
      let db = self.conn.as_raw();
      let position = c_int::try_from(index)
         .map_err(|_| Error::bind(index, EngineError::from_code(SQLITE_RANGE)))?;

      let _guard = self.conn.lock();

      // SAFETY: stmt is valid. Text and blob are bound with SQLITE_TRANSIENT, so
      // the engine copies them before returning and keeps no reference.
      let rc = unsafe {
         match value {
            ParameterValue::Null => sqlite3_bind_null(stmt, position),
            ParameterValue::Integer(v) => sqlite3_bind_int64(stmt, position, *v),
            ParameterValue::Boolean(v) => sqlite3_bind_int64(stmt, position, i64::from(*v)),
            ParameterValue::Real(v) => sqlite3_bind_double(stmt, position, *v),
            ParameterValue::Timestamp(ticks) => {
               sqlite3_bind_int64(stmt, position, ParameterValue::ticks_to_unix_millis(*ticks))
            }
            ParameterValue::Text(v) => sqlite3_bind_text64(
               stmt,
               position,
               v.as_ptr() as *const c_char,
               v.len() as u64,
               SQLITE_TRANSIENT(),
               SQLITE_UTF8 as u8,
            ),
            ParameterValue::Blob(v) => sqlite3_bind_blob64(
               stmt,
               position,
               v.as_ptr() as *const c_void,
               v.len() as u64,
               SQLITE_TRANSIENT(),
            ),
         }
      };

      if rc != SQLITE_OK {
         return Err(Error::bind(index, unsafe { EngineError::from_handle(db, rc) }));
      }

      Ok(())
   }

   /// Steps once, absorbing shared-cache lock contention.
   ///
   /// Returns with the connection mutex still held, so callers can read counters
   /// or error state that belong to this step.
   fn step(&mut self) -> Result<(Step, DbMutexGuard<'c>)> {
      let conn = self.conn;
      let db = conn.as_raw();
      let stmt = self.raw();

      loop {
         let guard = conn.lock();
         let before = conn.total_changes();

         // SAFETY: stmt and db are valid; the guard covers the step and every
         // follow-up read of connection error state.
         let rc = unsafe { sqlite3_step(stmt) };

         let step = match rc {
            SQLITE_ROW => Step::Row,
            SQLITE_DONE => Step::Done,
            _ if unsafe { LockRetryController::is_contention(db, rc) } => {
               unsafe { self.retry.register(db) }?;
               drop(guard);
               unsafe { self.retry.wait(db) };
               // SAFETY: discard partial state before retrying from the top.
               unsafe { sqlite3_reset(stmt) };
               if self.is_cancelled() {
                  trace!("Cancelled while waiting for unlock");
                  return Err(Error::Cancelled);
               }
               continue;
            }
            _ => return Err(Error::step(unsafe { EngineError::from_handle(db, rc) })),
         };

         // The guard keeps other statements on this connection out of the delta.
         if conn.total_changes() != before {
            self.changed = true;
         }
         return Ok((step, guard));
      }
   }

   fn is_cancelled(&self) -> bool {
      self.cancel.as_ref().is_some_and(|cancelled| cancelled())
   }

   fn serialize_row(&mut self) -> Result<String> {
      let stmt = self.raw();
      // SAFETY: stmt is valid and positioned on a row (callers only get here after Row).
      let serializer = self
         .serializer
         .get_or_insert_with(|| unsafe { RowSerializer::new(stmt) });
      unsafe { serializer.serialize(stmt) }
   }

   /// Steps to completion, discarding any rows.
   pub fn run(&mut self) -> Result<RunResult> {
      loop {
         let (step, _guard) = self.step()?;
         if step == Step::Done {
            let rows_affected = if self.changed {
               self.conn.changes().max(0) as u64
            } else {
               0
            };
            return Ok(RunResult {
               rows_affected,
               last_insert_rowid: self.conn.last_insert_rowid(),
            });
         }
      }
   }

   /// Steps once. Returns the row text, or `None` when there are no rows.
   pub fn one(&mut self) -> Result<Option<String>> {
      let (step, guard) = self.step()?;
      match step {
         Step::Row => {
            let row = self.serialize_row();
            drop(guard);
            row.map(Some)
         }
         Step::Done => Ok(None),
      }
   }

   /// Steps to completion, returning `[row,row,...]` (`[]` for no rows).
   pub fn all(&mut self) -> Result<String> {
      let mut rows = Vec::new();
      loop {
         let (step, guard) = self.step()?;
         match step {
            Step::Row => {
               let row = self.serialize_row();
               drop(guard);
               rows.push(row?);
            }
            Step::Done => return Ok(join_rows(&rows)),
         }
      }
   }

   /// Steps to completion, handing each row to `dispatch` before the next step.
   ///
   /// The connection mutex is released while `dispatch` runs, so it may block on
   /// other work against the same connection. An error from `dispatch` stops
   /// execution and is returned. Returns the number of rows delivered.
   pub fn each<F>(&mut self, mut dispatch: F) -> Result<usize>
   where
      F: FnMut(String) -> Result<()>,
   {
      let mut count = 0;
      loop {
         let (step, guard) = self.step()?;
         match step {
            Step::Row => {
               let row = self.serialize_row();
               drop(guard);
               dispatch(row?)?;
               count += 1;
            }
            Step::Done => return Ok(count),
         }
      }
   }

   /// How many times this statement waited for another connection's lock.
   pub fn lock_waits(&self) -> usize {
      self.retry.wait_count()
   }
}

impl Drop for PreparedStatement<'_> {
   fn drop(&mut self) {
      // SAFETY: stmt is valid and finalized exactly once, here. The return value
      // repeats the last step error, which has already been reported.
      unsafe { sqlite3_finalize(self.raw()) };
   }
}
