//! Exclusive owner of a raw SQLite connection handle

use std::ffi::{CStr, CString, c_char, c_void};
use std::fmt;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use libsqlite3_sys::{
   SQLITE_MISUSE, SQLITE_NOMEM, SQLITE_OK, sqlite3, sqlite3_busy_timeout, sqlite3_changes64,
   sqlite3_exec, sqlite3_free, sqlite3_get_autocommit,
   sqlite3_last_insert_rowid, sqlite3_open_v2, sqlite3_total_changes64,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::Result;
use crate::config::ConnectionConfig;
use crate::error::{EngineError, Error};
use crate::lock::DbMutexGuard;

// libsqlite3-sys 0.30 omits `sqlite3_close_v2` from its bundled bindings; the
// symbol is still part of the compiled engine.
unsafe extern "C" {
   fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
}

/// An open SQLite connection.
///
/// The handle is opened with `SQLITE_OPEN_FULLMUTEX`, so every engine call on it is
/// serialized by the engine and the connection can be shared across worker threads
/// behind an `Arc`. It is closed exactly once, when the last `Arc` is dropped.
///
/// Besides the handle, the connection keeps the text of the most recent failure
/// (overwritten by every failing operation) and the collation language setting.
///
/// # Example
///
/// ```no_run
/// use sqlite3_conn::{Connection, ConnectionConfig};
///
/// # fn example() -> sqlite3_conn::Result<()> {
/// let conn = Connection::open("test.db", &ConnectionConfig::default())?;
/// conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// conn.execute_batch("INSERT INTO users (name) VALUES ('Alice')")?;
/// assert_eq!(conn.last_insert_rowid(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Connection {
   db: NonNull<sqlite3>,

   /// Path or URI the connection was opened with
   path: String,

   /// Message of the most recent failed operation
   last_error: Mutex<String>,

   /// Language used by locale-aware collations registered on this connection
   collation_language: RwLock<Option<String>>,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX; the engine serializes
// all calls on it internally, so it may be used from any thread concurrently.
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
   /// Open a connection to `path`.
   ///
   /// `path` may be a filesystem path, `:memory:`, or a `file:` URI such as
   /// `file:shared_db?mode=memory&cache=shared`.
   ///
   /// # Errors
   ///
   /// - [`Error::Io`] if the path is empty or not valid UTF-8
   /// - [`Error::Open`] if the engine cannot open the database (e.g. `SQLITE_CANTOPEN`)
   pub fn open(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Arc<Self>> {
      let path = path.as_ref();

      // Validate path is not empty
      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let path_str = path.to_str().ok_or_else(|| {
         Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path must be valid UTF-8",
         ))
      })?;

      let c_path = CString::new(path_str).map_err(|_| {
         Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot contain NUL bytes",
         ))
      })?;

      let mut raw: *mut sqlite3 = ptr::null_mut();
      // SAFETY: c_path is a valid C string and raw is a valid out pointer.
      let rc = unsafe { sqlite3_open_v2(c_path.as_ptr(), &mut raw, config.open_flags(), ptr::null()) };

      if rc != SQLITE_OK {
         // SAFETY: on failure the engine may still hand back a handle that carries the
         // error message; it must be closed either way.
         let source = unsafe { EngineError::from_handle(raw, rc) };
         if !raw.is_null() {
            unsafe { sqlite3_close_v2(raw) };
         }
         return Err(Error::Open {
            path: path_str.to_string(),
            source,
         });
      }

      let db = NonNull::new(raw).ok_or_else(|| Error::Open {
         path: path_str.to_string(),
         source: EngineError::from_code(SQLITE_NOMEM),
      })?;

      let conn = Self {
         db,
         path: path_str.to_string(),
         last_error: Mutex::new(String::new()),
         collation_language: RwLock::new(None),
      };

      if config.busy_timeout_ms > 0 {
         // SAFETY: db is a valid open handle.
         unsafe { sqlite3_busy_timeout(conn.as_raw(), config.busy_timeout_ms.min(i32::MAX as u32) as i32) };
      }

      if config.foreign_keys {
         conn.execute_batch("PRAGMA foreign_keys = ON")?;
      }

      debug!(
         path = %conn.path,
         read_only = config.read_only,
         shared_cache = config.shared_cache,
         "Opened SQLite connection"
      );

      Ok(Arc::new(conn))
   }

   /// Open a private in-memory database with the given configuration.
   pub fn open_in_memory(config: &ConnectionConfig) -> Result<Arc<Self>> {
      Self::open(":memory:", config)
   }

   /// The raw handle, for use with the engine's C API.
   ///
   /// The pointer is valid for as long as `self` is alive.
   pub fn as_raw(&self) -> *mut sqlite3 {
      self.db.as_ptr()
   }

   /// Path or URI this connection was opened with.
   pub fn path(&self) -> &str {
      &self.path
   }

   /// Enter the connection's engine mutex until the returned guard is dropped.
   pub fn lock(&self) -> DbMutexGuard<'_> {
      // SAFETY: db is valid for the lifetime of self, which bounds the guard.
      unsafe { DbMutexGuard::acquire(self.as_raw()) }
   }

   /// Whether the connection is in autocommit mode (no explicit transaction open).
   pub fn autocommit(&self) -> bool {
      // SAFETY: db is a valid open handle.
      unsafe { sqlite3_get_autocommit(self.as_raw()) != 0 }
   }

   /// Rows modified by the most recently completed INSERT, UPDATE or DELETE.
   ///
   /// Read under [`lock`](Self::lock) to tie the value to a specific statement.
   pub fn changes(&self) -> i64 {
      // SAFETY: db is a valid open handle.
      unsafe { sqlite3_changes64(self.as_raw()) }
   }

   /// Rows modified by every INSERT, UPDATE or DELETE completed since open,
   /// including changes made by triggers.
   pub fn total_changes(&self) -> i64 {
      // SAFETY: db is a valid open handle.
      unsafe { sqlite3_total_changes64(self.as_raw()) }
   }

   /// Rowid of the most recent successful INSERT on this connection.
   pub fn last_insert_rowid(&self) -> i64 {
      // SAFETY: db is a valid open handle.
      unsafe { sqlite3_last_insert_rowid(self.as_raw()) }
   }

   /// Text of the most recent failed operation, or an empty string.
   pub fn last_error(&self) -> String {
      self.last_error.lock().clone()
   }

   /// Record the text of a failed operation.
   pub fn set_last_error(&self, message: impl Into<String>) {
      let message = message.into();
      trace!(path = %self.path, error = %message, "Recording last error");
      *self.last_error.lock() = message;
   }

   /// Language used by locale-aware collations, if one has been set.
   pub fn collation_language(&self) -> Option<String> {
      self.collation_language.read().clone()
   }

   pub fn set_collation_language(&self, language: Option<String>) {
      *self.collation_language.write() = language;
   }

   /// Run one or more semicolon-separated statements that return no rows.
   ///
   /// Failures are recorded as the connection's last error.
   pub fn execute_batch(&self, sql: &str) -> Result<()> {
      let c_sql = CString::new(sql).map_err(|_| {
         let err = EngineError::new(SQLITE_MISUSE, "SQL text cannot contain NUL bytes");
         self.set_last_error(err.message.clone());
         err
      })?;

      let _guard = self.lock();
      let mut errmsg: *mut c_char = ptr::null_mut();

      // SAFETY: db is valid; c_sql is a valid C string; errmsg is a valid out pointer
      // whose allocation (if any) is released with sqlite3_free below.
      let rc = unsafe { sqlite3_exec(self.as_raw(), c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

      if rc != SQLITE_OK {
         let mut err = unsafe { EngineError::from_handle(self.as_raw(), rc) };
         if !errmsg.is_null() {
            err.message = unsafe { CStr::from_ptr(errmsg) }.to_string_lossy().into_owned();
            unsafe { sqlite3_free(errmsg as *mut c_void) };
         }
         self.set_last_error(err.message.clone());
         return Err(Error::Engine(err));
      }

      Ok(())
   }
}

impl fmt::Debug for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connection").field("path", &self.path).finish_non_exhaustive()
   }
}

impl Drop for Connection {
   fn drop(&mut self) {
      // SAFETY: db is valid and this is the only place it is closed. close_v2 defers
      // the actual close until outstanding statements are finalized.
      let rc = unsafe { sqlite3_close_v2(self.as_raw()) };
      if rc != SQLITE_OK {
         error!(path = %self.path, code = rc, "Failed to close SQLite connection");
      } else {
         debug!(path = %self.path, "Closed SQLite connection");
      }
   }
}
