use std::ffi::c_int;

use libsqlite3_sys::SQLITE_LOCKED;
use sqlite3_conn::EngineError;

/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
   /// The SQL text could not be compiled.
   Prepare,
   /// A parameter could not be bound (unsupported value or engine rejection).
   Bind,
   /// The engine reported a fatal code while stepping.
   Step,
   /// Waiting for an unlock notification would deadlock.
   Deadlock,
   /// A column could not be converted to row text.
   Serialization,
   /// The caller stopped consuming rows.
   Cancelled,
   /// Connection-level or worker failure.
   Other,
}

/// Error types for statement execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The SQL text could not be prepared.
   #[error("failed to prepare statement: {message} (code {code})")]
   Prepare { code: c_int, message: String },

   /// The engine rejected a bound value, e.g. an out-of-range index.
   #[error("failed to bind parameter {index}: {message} (code {code})")]
   Bind {
      index: usize,
      code: c_int,
      message: String,
   },

   /// A supplied value has no SQLite representation.
   #[error("invalid type for parameter {index}: {type_name}")]
   InvalidParameterType { index: usize, type_name: String },

   /// The engine returned a code other than ROW or DONE, and not a
   /// recoverable shared-cache lock.
   #[error("{message} (code {code})")]
   Step { code: c_int, message: String },

   /// Registering for an unlock notification reported that waiting would
   /// deadlock.
   #[error("deadlock detected: {message}")]
   DeadlockDetected { message: String },

   /// A column had a type code outside the five storage classes.
   #[error("unsupported type {type_code} in column {column}")]
   UnsupportedColumnType { column: usize, type_code: c_int },

   /// The receiver of streamed rows went away before the statement finished.
   #[error("operation cancelled: row receiver dropped")]
   Cancelled,

   /// The worker running the statement panicked or was aborted.
   #[error("worker task failed: {0}")]
   Task(String),

   /// Error from the connection layer.
   #[error(transparent)]
   Connection(#[from] sqlite3_conn::Error),
}

impl Error {
   pub(crate) fn prepare(source: EngineError) -> Self {
      Error::Prepare {
         code: source.code,
         message: source.message,
      }
   }

   pub(crate) fn bind(index: usize, source: EngineError) -> Self {
      Error::Bind {
         index,
         code: source.code,
         message: source.message,
      }
   }

   pub(crate) fn step(source: EngineError) -> Self {
      Error::Step {
         code: source.code,
         message: source.message,
      }
   }

   pub fn kind(&self) -> ErrorKind {
      match self {
         Error::Prepare { .. } => ErrorKind::Prepare,
         Error::Bind { .. } | Error::InvalidParameterType { .. } => ErrorKind::Bind,
         Error::Step { .. } => ErrorKind::Step,
         Error::DeadlockDetected { .. } => ErrorKind::Deadlock,
         Error::UnsupportedColumnType { .. } => ErrorKind::Serialization,
         Error::Cancelled => ErrorKind::Cancelled,
         Error::Task(_) | Error::Connection(_) => ErrorKind::Other,
      }
   }

   /// The engine's primary result code, when the error came from the engine.
   pub fn result_code(&self) -> Option<c_int> {
      match self {
         Error::Prepare { code, .. } | Error::Bind { code, .. } | Error::Step { code, .. } => {
            Some(*code)
         }
         Error::DeadlockDetected { .. } => Some(SQLITE_LOCKED),
         Error::Connection(e) => e.result_code(),
         _ => None,
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Prepare { code, .. } | Error::Bind { code, .. } | Error::Step { code, .. } => {
            format!("SQLITE_{}", code)
         }
         Error::InvalidParameterType { .. } => "INVALID_PARAMETER_TYPE".to_string(),
         Error::DeadlockDetected { .. } => "DEADLOCK_DETECTED".to_string(),
         Error::UnsupportedColumnType { .. } => "UNSUPPORTED_COLUMN_TYPE".to_string(),
         Error::Cancelled => "CANCELLED".to_string(),
         Error::Task(_) => "TASK_FAILED".to_string(),
         Error::Connection(e) => match e.result_code() {
            Some(code) => format!("SQLITE_{}", code),
            None => "CONNECTION_ERROR".to_string(),
         },
      }
   }

   /// Text recorded as the connection's last error.
   ///
   /// Engine failures record the engine's own message; everything else records
   /// the display text.
   pub fn last_error_text(&self) -> String {
      match self {
         Error::Prepare { message, .. }
         | Error::Bind { message, .. }
         | Error::Step { message, .. }
         | Error::DeadlockDetected { message } => message.clone(),
         Error::Connection(sqlite3_conn::Error::Engine(e)) => e.message.clone(),
         other => other.to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use libsqlite3_sys::{SQLITE_CONSTRAINT, SQLITE_ERROR, SQLITE_RANGE};

   #[test]
   fn test_error_code_prepare() {
      let err = Error::Prepare {
         code: SQLITE_ERROR,
         message: "near \"SELEC\": syntax error".into(),
      };
      assert_eq!(err.error_code(), "SQLITE_1");
      assert_eq!(err.kind(), ErrorKind::Prepare);
      assert_eq!(err.result_code(), Some(SQLITE_ERROR));
      assert_eq!(err.last_error_text(), "near \"SELEC\": syntax error");
   }

   #[test]
   fn test_error_code_bind_range() {
      let err = Error::Bind {
         index: 3,
         code: SQLITE_RANGE,
         message: "column index out of range".into(),
      };
      assert_eq!(err.error_code(), "SQLITE_25");
      assert_eq!(err.kind(), ErrorKind::Bind);
      assert!(err.to_string().contains("parameter 3"));
   }

   #[test]
   fn test_error_code_invalid_parameter_type() {
      let err = Error::InvalidParameterType {
         index: 2,
         type_name: "array".into(),
      };
      assert_eq!(err.error_code(), "INVALID_PARAMETER_TYPE");
      assert_eq!(err.kind(), ErrorKind::Bind);
      assert_eq!(err.result_code(), None);
      assert!(err.to_string().contains("parameter 2"));
      assert!(err.to_string().contains("array"));
   }

   #[test]
   fn test_error_code_step() {
      let err = Error::Step {
         code: SQLITE_CONSTRAINT,
         message: "UNIQUE constraint failed: t.id".into(),
      };
      assert_eq!(err.error_code(), "SQLITE_19");
      assert_eq!(err.kind(), ErrorKind::Step);
   }

   #[test]
   fn test_error_code_deadlock() {
      let err = Error::DeadlockDetected {
         message: "database is deadlocked".into(),
      };
      assert_eq!(err.error_code(), "DEADLOCK_DETECTED");
      assert_eq!(err.result_code(), Some(SQLITE_LOCKED));
      assert_eq!(err.kind(), ErrorKind::Deadlock);
   }

   #[test]
   fn test_error_code_unsupported_column_type() {
      let err = Error::UnsupportedColumnType {
         column: 0,
         type_code: 42,
      };
      assert_eq!(err.error_code(), "UNSUPPORTED_COLUMN_TYPE");
      assert_eq!(err.kind(), ErrorKind::Serialization);
      assert!(err.to_string().contains("42"));
   }

   #[test]
   fn test_error_code_cancelled_and_task() {
      assert_eq!(Error::Cancelled.error_code(), "CANCELLED");
      assert_eq!(Error::Task("panicked".into()).error_code(), "TASK_FAILED");
      assert_eq!(
         Error::Task("panicked".into()).last_error_text(),
         "worker task failed: panicked"
      );
   }

   #[test]
   fn test_error_code_connection() {
      let err = Error::Connection(sqlite3_conn::Error::Io(std::io::Error::new(
         std::io::ErrorKind::InvalidInput,
         "empty",
      )));
      assert_eq!(err.error_code(), "CONNECTION_ERROR");

      let err = Error::Connection(sqlite3_conn::Error::Engine(EngineError::new(
         SQLITE_ERROR,
         "no such table: t",
      )));
      assert_eq!(err.error_code(), "SQLITE_1");
      assert_eq!(err.last_error_text(), "no such table: t");
   }
}
