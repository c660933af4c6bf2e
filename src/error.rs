use std::ffi::c_int;

use serde::{Serialize, Serializer};

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for callers that forward errors.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
   code: String,
   message: String,
   #[serde(skip_serializing_if = "Option::is_none")]
   result_code: Option<c_int>,
}

/// Error types for [`Database`](crate::Database) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error while preparing, binding, stepping or serializing a statement.
   #[error(transparent)]
   Statement(#[from] sqlite3_toolkit::Error),

   /// Error opening or using the connection.
   #[error(transparent)]
   Connection(#[from] sqlite3_conn::Error),

   /// Row text could not be decoded.
   #[error("failed to decode row: {0}")]
   Decode(#[from] serde_json::Error),

   /// The blocking task that opened the database did not complete.
   #[error("open task failed: {0}")]
   Task(String),
}

impl Error {
   /// The engine's primary result code, when the error came from the engine.
   pub fn result_code(&self) -> Option<c_int> {
      match self {
         Error::Statement(e) => e.result_code(),
         Error::Connection(e) => e.result_code(),
         Error::Decode(_) | Error::Task(_) => None,
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for caller error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Statement(e) => e.error_code(),
         Error::Connection(e) => match e.result_code() {
            Some(code) => format!("SQLITE_{}", code),
            None => "CONNECTION_ERROR".to_string(),
         },
         Error::Decode(_) => "DECODE_ERROR".to_string(),
         Error::Task(_) => "TASK_FAILED".to_string(),
      }
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
         result_code: self.result_code(),
      };
      response.serialize(serializer)
   }
}
