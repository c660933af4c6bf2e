use std::fmt;

use libsqlite3_sys::{SQLITE_DELETE, SQLITE_INSERT, SQLITE_UPDATE};
use serde::{Deserialize, Serialize};

/// Kind of row mutation reported by the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
   Insert,
   Update,
   Delete,
}

impl ChangeKind {
   pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];

   /// Maps the operation code passed to the update hook.
   pub fn from_code(code: i32) -> Option<Self> {
      match code {
         SQLITE_INSERT => Some(ChangeKind::Insert),
         SQLITE_UPDATE => Some(ChangeKind::Update),
         SQLITE_DELETE => Some(ChangeKind::Delete),
         _ => None,
      }
   }

   pub fn as_str(&self) -> &'static str {
      match self {
         ChangeKind::Insert => "insert",
         ChangeKind::Update => "update",
         ChangeKind::Delete => "delete",
      }
   }
}

impl fmt::Display for ChangeKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// A single row change on a rowid table.
///
/// Built inside the update hook from the table name, rowid and operation the
/// engine reports, then delivered to subscribers asynchronously. Changes to
/// `WITHOUT ROWID` tables are not reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
   /// Name of the table that changed.
   pub table: String,
   /// Rowid of the affected row.
   pub rowid: i64,
   pub kind: ChangeKind,
}
