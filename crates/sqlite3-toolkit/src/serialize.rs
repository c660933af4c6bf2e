//! Canonical row text.
//!
//! Rows leave the worker as text of the form `{"col":value,...}` so nothing that
//! references engine memory crosses the async boundary. Encoding per column type:
//!
//! | Storage class | Output |
//! |---|---|
//! | INTEGER | the engine's own text rendering, unquoted |
//! | FLOAT | shortest text that parses back to the same double; `null` for infinities |
//! | TEXT | quoted, escaped over UTF-16 code units |
//! | BLOB | quoted standard base64 |
//! | NULL | `null` |

use std::ffi::{CStr, c_int};
use std::fmt::Write;

use indexmap::IndexMap;
use libsqlite3_sys::{
   SQLITE_BLOB, SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_NULL, SQLITE_TEXT, sqlite3_column_blob,
   sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_double, sqlite3_column_name,
   sqlite3_column_text,
   sqlite3_column_type, sqlite3_stmt,
};
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// A decoded row: column name to JSON value, in result-set order.
///
/// When a query yields duplicate column names the last one wins here; the row
/// text itself keeps every pair.
pub type Row = IndexMap<String, JsonValue>;

/// Converts the current row of a statement into canonical row text.
///
/// Column names are read and escaped once, when the serializer is created.
#[derive(Debug, Clone)]
pub struct RowSerializer {
   /// `"name":` for each column, already escaped
   keys: Vec<String>,
}

impl RowSerializer {
   /// Captures the column names of `stmt`.
   ///
   /// # Safety
   ///
   /// `stmt` must be a valid prepared statement.
   pub(crate) unsafe fn new(stmt: *mut sqlite3_stmt) -> Self {
      // SAFETY: stmt is valid (guaranteed by caller).
      let count = unsafe { sqlite3_column_count(stmt) }.max(0);

      let keys = (0..count)
         .map(|i| {
            // SAFETY: i is in [0, count). The name pointer is valid until the
            // statement is finalized; it is copied immediately.
            let name = unsafe {
               let ptr = sqlite3_column_name(stmt, i);
               if ptr.is_null() {
                  String::new()
               } else {
                  CStr::from_ptr(ptr).to_string_lossy().into_owned()
               }
            };
            let mut key = String::with_capacity(name.len() + 3);
            escape_into(&mut key, &name);
            key.push(':');
            key
         })
         .collect();

      Self { keys }
   }

   pub fn column_count(&self) -> usize {
      self.keys.len()
   }

   /// Serializes the row the statement is currently positioned on.
   ///
   /// # Safety
   ///
   /// `stmt` must be the statement this serializer was created from, and its last
   /// step must have returned `SQLITE_ROW`.
   pub(crate) unsafe fn serialize(&self, stmt: *mut sqlite3_stmt) -> Result<String> {
      let mut out = String::with_capacity(16 * self.keys.len() + 2);
      out.push('{');

      for (i, key) in self.keys.iter().enumerate() {
         if i > 0 {
            out.push(',');
         }
         out.push_str(key);
         // SAFETY: forwarded from the caller; i is a valid column index.
         unsafe { write_column(&mut out, stmt, i) }?;
      }

      out.push('}');
      Ok(out)
   }
}

/// # Safety
///
/// `stmt` must be positioned on a row and `column` must be in range.
unsafe fn write_column(out: &mut String, stmt: *mut sqlite3_stmt, column: usize) -> Result<()> {
   let index = column as c_int;

   // The type must be read before any conversion the text/blob accessors apply.
   let type_code = unsafe { sqlite3_column_type(stmt, index) };

   match type_code {
      SQLITE_INTEGER => {
         // SAFETY: the text pointer stays valid until the next step/reset/finalize.
         out.push_str(&unsafe { column_text(stmt, index) });
      }
      SQLITE_FLOAT => {
         // The engine renders only 15 significant digits.
         let value = unsafe { sqlite3_column_double(stmt, index) };
         write_real(out, value);
      }
      SQLITE_TEXT => {
         let text = unsafe { column_text(stmt, index) };
         escape_into(out, &text);
      }
      SQLITE_BLOB => {
         // SAFETY: blob must be fetched before bytes; a zero-length blob may be null.
         let bytes = unsafe {
            let ptr = sqlite3_column_blob(stmt, index);
            let len = sqlite3_column_bytes(stmt, index).max(0) as usize;
            if ptr.is_null() || len == 0 {
               &[][..]
            } else {
               std::slice::from_raw_parts(ptr as *const u8, len)
            }
         };
         out.push('"');
         out.push_str(&base64_encode(bytes));
         out.push('"');
      }
      SQLITE_NULL => out.push_str("null"),
      other => {
         return Err(Error::UnsupportedColumnType {
            column,
            type_code: other,
         });
      }
   }

   Ok(())
}

/// Non-finite values have no JSON form and are written as `null`.
fn write_real(out: &mut String, value: f64) {
   out.push_str(&JsonValue::from(value).to_string());
}

/// # Safety
///
/// `stmt` must be positioned on a row and `index` must be in range.
unsafe fn column_text(stmt: *mut sqlite3_stmt, index: c_int) -> String {
   // SAFETY: text must be fetched before bytes so the length matches the UTF-8 form.
   unsafe {
      let ptr = sqlite3_column_text(stmt, index);
      let len = sqlite3_column_bytes(stmt, index).max(0) as usize;
      if ptr.is_null() || len == 0 {
         return String::new();
      }
      let slice = std::slice::from_raw_parts(ptr, len);
      String::from_utf8_lossy(slice).into_owned()
   }
}

/// Appends `text` as a quoted string.
///
/// Works over UTF-16 code units: printable ASCII is copied as-is except `"` and
/// `\`, which are backslash-escaped; tab, carriage return and line feed use their
/// short escapes; every other unit (including each half of a surrogate pair) is
/// written as `\uXXXX` in lowercase hex.
pub fn escape_into(out: &mut String, text: &str) {
   out.push('"');
   for unit in text.encode_utf16() {
      match unit {
         0x22 => out.push_str("\\\""),
         0x5C => out.push_str("\\\\"),
         0x09 => out.push_str("\\t"),
         0x0D => out.push_str("\\r"),
         0x0A => out.push_str("\\n"),
         0x20..=0x7E => out.push(unit as u8 as char),
         _ => {
            // Writing to a String cannot fail
            let _ = write!(out, "\\u{:04x}", unit);
         }
      }
   }
   out.push('"');
}

/// Returns `text` as a quoted, escaped string. See [`escape_into`].
pub fn escape(text: &str) -> String {
   let mut out = String::with_capacity(text.len() + 2);
   escape_into(&mut out, text);
   out
}

/// Base64 encode binary data for row text.
///
/// SQLite BLOB columns are encoded as base64 strings,
/// as JSON does not have a native binary type.
pub fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}

/// Wraps serialized rows as `[row,row,...]`.
pub fn join_rows(rows: &[String]) -> String {
   let mut out = String::with_capacity(rows.iter().map(|r| r.len() + 1).sum::<usize>() + 2);
   out.push('[');
   for (i, row) in rows.iter().enumerate() {
      if i > 0 {
         out.push(',');
      }
      out.push_str(row);
   }
   out.push(']');
   out
}

/// Decode one row of canonical row text.
pub fn decode_row(text: &str) -> serde_json::Result<Row> {
   serde_json::from_str(text)
}

/// Decode the output of an `all` query.
pub fn decode_rows(text: &str) -> serde_json::Result<Vec<Row>> {
   serde_json::from_str(text)
}
