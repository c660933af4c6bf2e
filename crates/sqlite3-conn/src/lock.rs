//! DbMutexGuard for exclusive access to a connection's engine state

use std::marker::PhantomData;

use libsqlite3_sys::{sqlite3, sqlite3_db_mutex, sqlite3_mutex, sqlite3_mutex_enter, sqlite3_mutex_leave};

/// RAII guard over the connection's internal `sqlite3_db_mutex`.
///
/// In serialized mode every API call takes this mutex for its own duration, so
/// state such as `sqlite3_errmsg`, `sqlite3_changes` and
/// `sqlite3_last_insert_rowid` can be overwritten by another thread between two
/// calls. Holding the guard across the producing call and the read makes the
/// pair atomic. The mutex is recursive, so API calls made while holding it do
/// not deadlock.
///
/// The guard must be released on the thread that acquired it, so it is neither
/// `Send` nor `Sync`.
///
/// # Example
///
/// ```no_run
/// use sqlite3_conn::{Connection, ConnectionConfig};
///
/// # fn example() -> sqlite3_conn::Result<()> {
/// let conn = Connection::open(":memory:", &ConnectionConfig::default())?;
/// let guard = conn.lock();
/// // step a statement, then read counters with no interleaving
/// let changes = conn.changes();
/// drop(guard);
/// # Ok(())
/// # }
/// ```
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct DbMutexGuard<'a> {
   mutex: *mut sqlite3_mutex,
   _conn: PhantomData<&'a ()>,
   _not_send: PhantomData<*mut ()>,
}

impl<'a> DbMutexGuard<'a> {
   /// Enters the connection mutex of `db`.
   ///
   /// # Safety
   ///
   /// `db` must be a valid, open sqlite3 handle that outlives `'a`.
   pub(crate) unsafe fn acquire(db: *mut sqlite3) -> Self {
      // SAFETY: db is valid (guaranteed by caller). For connections opened without
      // a mutex this returns null, and mutex_enter/leave accept null as a no-op.
      let mutex = unsafe { sqlite3_db_mutex(db) };
      unsafe { sqlite3_mutex_enter(mutex) };
      Self {
         mutex,
         _conn: PhantomData,
         _not_send: PhantomData,
      }
   }
}

impl Drop for DbMutexGuard<'_> {
   fn drop(&mut self) {
      // SAFETY: the mutex was entered in acquire() on this thread.
      unsafe { sqlite3_mutex_leave(self.mutex) };
   }
}
