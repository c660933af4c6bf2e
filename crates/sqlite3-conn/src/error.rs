//! Error types for sqlite3-conn

use std::ffi::{CStr, c_int};

use libsqlite3_sys::{sqlite3, sqlite3_errmsg, sqlite3_errstr, sqlite3_extended_errcode};
use thiserror::Error;

/// A result code and message reported by the engine.
///
/// `code` is the primary result code (the low byte of the extended code), which is
/// what callers match on. `extended_code` keeps the full value for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct EngineError {
   pub code: c_int,
   pub extended_code: c_int,
   pub message: String,
}

impl EngineError {
   pub fn new(code: c_int, message: impl Into<String>) -> Self {
      Self {
         code: code & 0xff,
         extended_code: code,
         message: message.into(),
      }
   }

   /// Builds an error for `code` using the engine's generic text for it.
   pub fn from_code(code: c_int) -> Self {
      Self::new(code, errstr(code))
   }

   /// Captures the extended code and message currently recorded on `db`.
   ///
   /// The caller should hold the connection's [`DbMutexGuard`](crate::DbMutexGuard)
   /// from the failing call through this read, otherwise another thread may
   /// overwrite the message in between.
   ///
   /// # Safety
   ///
   /// `db` must be null or a valid, open sqlite3 handle.
   pub unsafe fn from_handle(db: *mut sqlite3, code: c_int) -> Self {
      if db.is_null() {
         return Self::from_code(code);
      }

      // SAFETY: db is a valid handle (guaranteed by caller). The returned message
      // pointer stays valid until the next call on this connection; it is copied
      // out immediately.
      let extended = unsafe { sqlite3_extended_errcode(db) };
      let message = unsafe {
         let ptr = sqlite3_errmsg(db);
         if ptr.is_null() {
            errstr(code)
         } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
         }
      };

      // errmsg can lag behind when the failing call did not record an error
      // on the handle (e.g. a misuse caught before touching the connection)
      let extended = if extended & 0xff == code & 0xff {
         extended
      } else {
         code
      };

      Self {
         code: code & 0xff,
         extended_code: extended,
         message,
      }
   }
}

fn errstr(code: c_int) -> String {
   // SAFETY: sqlite3_errstr returns a pointer to a static string for any input.
   unsafe {
      let ptr = sqlite3_errstr(code);
      if ptr.is_null() {
         format!("unknown error {code}")
      } else {
         CStr::from_ptr(ptr).to_string_lossy().into_owned()
      }
   }
}

/// Errors that may occur when working with sqlite3-conn
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when validating the database path.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// The engine refused to open the database
   #[error("failed to open database '{path}': {source}")]
   Open {
      path: String,
      #[source]
      source: EngineError,
   },

   /// Any other engine failure on an open connection
   #[error("SQLite error: {0}")]
   Engine(#[from] EngineError),
}

impl Error {
   /// The engine's primary result code, if this error came from the engine.
   pub fn result_code(&self) -> Option<c_int> {
      match self {
         Error::Io(_) => None,
         Error::Open { source, .. } => Some(source.code),
         Error::Engine(e) => Some(e.code),
      }
   }
}
