//! Shared-cache lock contention handling.
//!
//! In shared-cache mode, a connection that needs a table lock held by another
//! connection to the same cache gets `SQLITE_LOCKED_SHAREDCACHE` back from
//! `sqlite3_step` (or `sqlite3_prepare_v2` for schema locks). Instead of surfacing
//! that, the statement registers an unlock notification on its connection, blocks
//! the worker thread until the lock holder commits or rolls back, resets and
//! retries.
//!
//! ```text
//!  Idle ──step──► Stepped(Row|Done)
//!   ▲               │
//!   │             Locked (shared cache)
//!   │               │ sqlite3_unlock_notify
//!   │               ├── SQLITE_LOCKED ──► DeadlockDetected
//!   │               ▼
//!   └── reset ── WaitingForUnlock
//! ```
//!
//! A plain `SQLITE_LOCKED` without the shared-cache extended code means the
//! conflict is on the same connection, which waiting cannot resolve; it is
//! reported as a step error.
//!
//! A connection holds at most one unlock-notify registration. When two statements
//! on the same connection are blocked at once, the later registration replaces the
//! earlier one, so each wait is bounded by [`RECHECK_INTERVAL`] and followed by a
//! retry that re-registers if the lock is still held. A cancelled or replaced
//! registration therefore costs one extra step, never a lost wakeup.

use std::ffi::{c_int, c_void};
use std::panic::catch_unwind;
use std::time::{Duration, Instant};

use libsqlite3_sys::{
   SQLITE_LOCKED, SQLITE_LOCKED_SHAREDCACHE, SQLITE_OK, sqlite3, sqlite3_extended_errcode,
   sqlite3_unlock_notify,
};
use parking_lot::{Condvar, Mutex};
use sqlite3_conn::EngineError;
use tracing::trace;

use crate::{Error, Result};

/// Longest a single wait blocks before the statement is retried anyway.
pub const RECHECK_INTERVAL: Duration = Duration::from_millis(250);

/// One-shot wake primitive handed to `sqlite3_unlock_notify`.
#[derive(Debug, Default)]
struct UnlockNotification {
   fired: Mutex<bool>,
   cond: Condvar,
}

impl UnlockNotification {
   fn reset(&self) {
      *self.fired.lock() = false;
   }

   fn fire(&self) {
      let mut fired = self.fired.lock();
      *fired = true;
      self.cond.notify_one();
   }

   /// Waits until fired or `timeout` elapses. Returns whether it fired.
   fn wait_for(&self, timeout: Duration) -> bool {
      let deadline = Instant::now() + timeout;
      let mut fired = self.fired.lock();
      while !*fired {
         if self.cond.wait_until(&mut fired, deadline).timed_out() {
            break;
         }
      }
      *fired
   }
}

/// Unlock notification callback.
///
/// SQLite batches all notifications that become ready together into one call,
/// passing each registration's context pointer in `args`.
unsafe extern "C" fn unlock_notify_callback(args: *mut *mut c_void, count: c_int) {
   if args.is_null() {
      return;
   }

   // Catch any panics to prevent unwinding across the FFI boundary (which is UB).
   let result = catch_unwind(|| {
      for i in 0..count.max(0) as usize {
         // SAFETY: args holds `count` pointers, each registered by
         // LockRetryController::register and kept alive until fired or cancelled.
         let ptr = unsafe { *args.add(i) } as *const UnlockNotification;
         if let Some(notification) = unsafe { ptr.as_ref() } {
            notification.fire();
         }
      }
   });

   if result.is_err() {
      eprintln!("sqlite3-toolkit: panic in unlock_notify_callback (absorbed to prevent UB)");
   }
}

/// Per-statement lock retry state.
///
/// The wait handle is allocated on first contention and dropped with the
/// statement; it is never shared between statements.
#[derive(Debug, Default)]
pub struct LockRetryController {
   notification: Option<Box<UnlockNotification>>,
   waits: usize,
}

impl LockRetryController {
   pub fn new() -> Self {
      Self::default()
   }

   /// How many times this controller has waited for an unlock.
   pub fn wait_count(&self) -> usize {
      self.waits
   }

   /// Whether `rc` from the last call on `db` is shared-cache lock contention.
   ///
   /// # Safety
   ///
   /// `db` must be valid, and the caller must hold the connection mutex since the
   /// call that produced `rc`.
   pub(crate) unsafe fn is_contention(db: *mut sqlite3, rc: c_int) -> bool {
      rc & 0xff == SQLITE_LOCKED
         && unsafe { sqlite3_extended_errcode(db) } == SQLITE_LOCKED_SHAREDCACHE
   }

   /// Registers for an unlock notification on `db`.
   ///
   /// Must be called while holding the connection mutex, directly after the call
   /// that reported contention. On success, the caller releases the mutex and
   /// calls [`wait`](Self::wait).
   ///
   /// # Safety
   ///
   /// `db` must be a valid connection handle.
   pub(crate) unsafe fn register(&mut self, db: *mut sqlite3) -> Result<()> {
      let notification = self
         .notification
         .get_or_insert_with(|| Box::new(UnlockNotification::default()));
      notification.reset();

      let context = &**notification as *const UnlockNotification as *mut c_void;

      // SAFETY: db is valid; context points into a Box owned by self that outlives
      // the wait. If the blocking connection has already finished, the callback
      // runs synchronously before this returns.
      let rc = unsafe { sqlite3_unlock_notify(db, Some(unlock_notify_callback), context) };

      match rc {
         SQLITE_OK => {
            trace!("Registered unlock notification");
            Ok(())
         }
         // No callback was registered; waiting would never wake.
         SQLITE_LOCKED => Err(Error::DeadlockDetected {
            message: unsafe { EngineError::from_handle(db, rc) }.message,
         }),
         other => Err(Error::step(unsafe { EngineError::from_handle(db, other) })),
      }
   }

   /// Blocks the current thread until the registered notification fires or
   /// [`RECHECK_INTERVAL`] elapses.
   ///
   /// On timeout the registration is cancelled, so the engine never holds a
   /// pointer to a notification that may be dropped with its statement.
   ///
   /// # Safety
   ///
   /// `db` must be the handle passed to [`register`](Self::register). Must not be
   /// called while holding the connection mutex.
   pub(crate) unsafe fn wait(&mut self, db: *mut sqlite3) {
      let Some(notification) = &self.notification else {
         return;
      };

      trace!(waits = self.waits, "Waiting for unlock notification");
      if !notification.wait_for(RECHECK_INTERVAL) {
         // SAFETY: a null callback cancels the connection's pending registration.
         // This serializes with callback delivery, so once it returns our pointer
         // is no longer reachable from the engine.
         unsafe { sqlite3_unlock_notify(db, None, std::ptr::null_mut()) };
         trace!("Unlock wait timed out, retrying");
      }
      self.waits += 1;
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::sync::Arc;
   use std::time::Duration;

   #[test]
   fn test_notification_wakes_waiter() {
      let notification = Arc::new(UnlockNotification::default());
      let waker = Arc::clone(&notification);

      let handle = std::thread::spawn(move || {
         std::thread::sleep(Duration::from_millis(20));
         waker.fire();
      });

      assert!(notification.wait_for(Duration::from_secs(5)));
      handle.join().unwrap();
   }

   #[test]
   fn test_wait_times_out_without_fire() {
      let notification = UnlockNotification::default();
      assert!(!notification.wait_for(Duration::from_millis(10)));
   }

   #[test]
   fn test_fire_before_wait_does_not_block() {
      let notification = UnlockNotification::default();
      notification.fire();
      assert!(notification.wait_for(Duration::ZERO));

      notification.reset();
      assert!(!*notification.fired.lock());
   }

   #[test]
   fn test_callback_fires_every_argument() {
      let first = UnlockNotification::default();
      let second = UnlockNotification::default();
      let mut args = [
         &first as *const UnlockNotification as *mut c_void,
         &second as *const UnlockNotification as *mut c_void,
      ];

      unsafe { unlock_notify_callback(args.as_mut_ptr(), 2) };

      assert!(*first.fired.lock());
      assert!(*second.fired.lock());
   }
}
