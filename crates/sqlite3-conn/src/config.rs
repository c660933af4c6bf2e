//! Configuration for opening a SQLite connection

use serde::{Deserialize, Serialize};

/// Configuration applied when a [`Connection`](crate::Connection) is opened
///
/// # Examples
///
/// ```
/// use sqlite3_conn::ConnectionConfig;
///
/// // Use defaults
/// let config = ConnectionConfig::default();
///
/// // Builder style
/// let config = ConnectionConfig::new()
///     .with_shared_cache(true)
///     .with_busy_timeout_ms(250);
///
/// // Override just one field
/// let config = ConnectionConfig {
///     read_only: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
   /// Open the database read-only
   ///
   /// Default: false
   pub read_only: bool,

   /// Create the database file if it does not exist
   ///
   /// Ignored when `read_only` is set.
   ///
   /// Default: true
   pub create_if_missing: bool,

   /// Open the connection in shared-cache mode
   ///
   /// Connections to the same database in shared-cache mode contend on table-level
   /// locks instead of file locks. That contention is reported as
   /// `SQLITE_LOCKED_SHAREDCACHE`, which statement execution absorbs by waiting on
   /// an unlock notification.
   ///
   /// Default: false
   pub shared_cache: bool,

   /// How long the engine retries internally on `SQLITE_BUSY` (file-level locks)
   ///
   /// A value of 0 disables the busy handler.
   ///
   /// Default: 5000
   pub busy_timeout_ms: u32,

   /// Enable `PRAGMA foreign_keys` on open
   ///
   /// Default: true
   pub foreign_keys: bool,
}

impl Default for ConnectionConfig {
   fn default() -> Self {
      Self {
         read_only: false,
         create_if_missing: true,
         shared_cache: false,
         busy_timeout_ms: 5000,
         foreign_keys: true,
      }
   }
}

impl ConnectionConfig {
   /// Creates a configuration with default settings.
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_read_only(mut self, read_only: bool) -> Self {
      self.read_only = read_only;
      self
   }

   pub fn with_create_if_missing(mut self, create: bool) -> Self {
      self.create_if_missing = create;
      self
   }

   pub fn with_shared_cache(mut self, shared: bool) -> Self {
      self.shared_cache = shared;
      self
   }

   pub fn with_busy_timeout_ms(mut self, millis: u32) -> Self {
      self.busy_timeout_ms = millis;
      self
   }

   pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
      self.foreign_keys = enabled;
      self
   }

   /// Translates the configuration into `sqlite3_open_v2` flags.
   ///
   /// The connection is always opened with `SQLITE_OPEN_FULLMUTEX` and
   /// `SQLITE_OPEN_URI`.
   pub(crate) fn open_flags(&self) -> std::ffi::c_int {
      use libsqlite3_sys as ffi;

      let mut flags = ffi::SQLITE_OPEN_FULLMUTEX | ffi::SQLITE_OPEN_URI;

      if self.read_only {
         flags |= ffi::SQLITE_OPEN_READONLY;
      } else {
         flags |= ffi::SQLITE_OPEN_READWRITE;
         if self.create_if_missing {
            flags |= ffi::SQLITE_OPEN_CREATE;
         }
      }

      if self.shared_cache {
         flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
      } else {
         flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
      }

      flags
   }
}
