//! SQLite native update hook registration.
//!
//! The engine has a single update-hook slot per connection. This module installs
//! a typed Rust handler into that slot and removes it again, reclaiming the boxed
//! handler. Callers never see the raw context pointer.
//!
//! The hook fires synchronously inside the engine's write path while the
//! connection mutex is held. Handlers must not call back into the engine.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use libsqlite3_sys::{sqlite3, sqlite3_int64, sqlite3_update_hook};
use tracing::trace;

use crate::change::ChangeKind;

/// Handler invoked for each row change with `(kind, table, rowid)`.
pub(crate) type UpdateHandler = Box<dyn Fn(ChangeKind, &str, i64) + Send + Sync>;

/// Context data passed to the update hook callback.
///
/// Stored as the user_data pointer of the hook; owned by the hook slot from
/// registration until [`unregister_update_hook`] reclaims it.
struct HookContext {
   handler: UpdateHandler,
}

/// Installs `handler` as the connection's update hook.
///
/// Any handler previously installed through this module is replaced and freed.
///
/// # Safety
///
/// - `db` must be a valid pointer to an open sqlite3 connection
/// - The slot must be owned by this module: no other code may install an update
///   hook on `db`, since the previous user_data is reclaimed as a `HookContext`
pub(crate) unsafe fn register_update_hook(db: *mut sqlite3, handler: UpdateHandler) {
   // Heap-allocate the context so it outlives this function. The engine only
   // stores the pointer and hands it back to the callback.
   let context = Box::new(HookContext { handler });
   let context_ptr = Box::into_raw(context) as *mut c_void;

   // SAFETY: db is a valid sqlite3 pointer (guaranteed by caller). The call takes
   // the connection mutex, so no callback for the previous context is running once
   // it returns.
   let prev = unsafe { sqlite3_update_hook(db, Some(update_callback), context_ptr) };

   if !prev.is_null() {
      // SAFETY: prev was created by Box::into_raw in an earlier registration.
      drop(unsafe { Box::from_raw(prev as *mut HookContext) });
   }

   trace!("SQLite update hook registered");
}

/// Removes the connection's update hook and frees its handler.
///
/// # Safety
///
/// - `db` must be the same valid sqlite3 pointer passed to `register_update_hook`
pub(crate) unsafe fn unregister_update_hook(db: *mut sqlite3) {
   // SAFETY: Passing a null callback and null user_data removes the hook.
   // sqlite3_update_hook returns the previous user_data pointer, which we use to
   // reclaim the Box leaked in register_update_hook.
   let prev = unsafe { sqlite3_update_hook(db, None, ptr::null_mut()) };

   if !prev.is_null() {
      // SAFETY: prev was created by Box::into_raw in register_update_hook
      drop(unsafe { Box::from_raw(prev as *mut HookContext) });
      trace!("SQLite update hook unregistered and context freed");
   }
}

/// Update hook callback.
///
/// Called by SQLite for every row inserted, updated or deleted in a rowid table.
///
/// Note: `user_data` is SQLite's C API term for callback context (our HookContext).
unsafe extern "C" fn update_callback(
   user_data: *mut c_void,
   op: c_int,
   _database: *const c_char,
   table: *const c_char,
   rowid: sqlite3_int64,
) {
   if user_data.is_null() || table.is_null() {
      return;
   }

   // Catch any panics to prevent unwinding across the FFI boundary (which is UB).
   let result = catch_unwind(AssertUnwindSafe(|| {
      // SAFETY: user_data is a valid HookContext pointer created in
      // register_update_hook and valid until the hook is replaced.
      let context = unsafe { &*(user_data as *const HookContext) };

      let Some(kind) = ChangeKind::from_code(op) else {
         return;
      };

      // SAFETY: table is a non-null C string provided by SQLite, valid for this callback.
      let Ok(table_name) = unsafe { CStr::from_ptr(table) }.to_str() else {
         return;
      };

      (context.handler)(kind, table_name, rowid);
   }));

   if result.is_err() {
      // Cannot use tracing here since it may have been the source of the panic.
      eprintln!("sqlite3-observer: panic in update_callback (absorbed to prevent UB)");
   }
}
