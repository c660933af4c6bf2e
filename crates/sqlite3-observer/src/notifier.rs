//! Reference-counted multiplexer over the connection's single update-hook slot.
//!
//! # Data Flow
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  update_hook    │────►│ Shared::dispatch │────►│  subscriber tx  │
//! │ (engine thread, │     │ fire_events?     │     │  (unbounded,    │
//! │  db mutex held) │     │ counts[kind] > 0?│     │  never blocks)  │
//! └─────────────────┘     └──────────────────┘     └────────┬────────┘
//!                                                           │
//!                                                           ▼
//!                                                 ChangeSubscription
//!                                                  (Stream, async)
//! ```
//!
//! The hook is installed when the subscriber total goes from 0 to 1 and removed
//! when it returns to 0.
//!
//! # Lock ordering
//!
//! `hook_installed` → engine db mutex → `state`. The update hook runs with the db
//! mutex held and only takes `state`, so `state` is never held while the hook slot
//! is being changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sqlite3_conn::Connection;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::change::{ChangeEvent, ChangeKind};
use crate::config::ObserverConfig;
use crate::hooks::{register_update_hook, unregister_update_hook};
use crate::stream::ChangeSubscription;

struct Subscriber {
   kind: ChangeKind,
   tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct SubscriberState {
   /// Per-kind subscriber counts
   counts: HashMap<ChangeKind, usize>,
   /// Total subscribers across all kinds
   total: usize,
   subscribers: HashMap<Uuid, Subscriber>,
}

pub(crate) struct Shared {
   conn: Arc<Connection>,
   state: Mutex<SubscriberState>,
   /// Whether our handler currently occupies the hook slot. Also serializes
   /// install/remove so the slot always matches the last observed total.
   hook_installed: Mutex<bool>,
   fire_events: AtomicBool,
}

impl Shared {
   /// Called from the update hook. Must not call into the engine.
   fn dispatch(&self, kind: ChangeKind, table: &str, rowid: i64) {
      if !self.fire_events.load(Ordering::Acquire) {
         return;
      }

      let state = self.state.lock();
      if state.counts.get(&kind).copied().unwrap_or(0) == 0 {
         return;
      }

      let event = ChangeEvent {
         table: table.to_string(),
         rowid,
         kind,
      };

      trace!(table = %event.table, rowid, %kind, "Dispatching change event");

      for subscriber in state.subscribers.values().filter(|s| s.kind == kind) {
         // A closed receiver means the subscription is being dropped; its
         // unsubscribe is already on the way.
         let _ = subscriber.tx.send(event.clone());
      }
   }

   pub(crate) fn unsubscribe(self: &Arc<Self>, id: &Uuid) {
      let removed = {
         let mut state = self.state.lock();
         match state.subscribers.remove(id) {
            Some(subscriber) => {
               if let Some(count) = state.counts.get_mut(&subscriber.kind) {
                  *count = count.saturating_sub(1);
               }
               state.total = state.total.saturating_sub(1);
               trace!(%id, kind = %subscriber.kind, total = state.total, "Unsubscribed");
               true
            }
            None => false,
         }
      };

      if removed {
         self.sync_hook();
      }
   }

   /// Installs or removes the hook so that it is present iff total > 0.
   fn sync_hook(self: &Arc<Self>) {
      let mut installed = self.hook_installed.lock();
      let wanted = self.state.lock().total > 0;

      match (wanted, *installed) {
         (true, false) => {
            let weak: Weak<Shared> = Arc::downgrade(self);
            let handler = Box::new(move |kind: ChangeKind, table: &str, rowid: i64| {
               if let Some(shared) = weak.upgrade() {
                  shared.dispatch(kind, table, rowid);
               }
            });

            // SAFETY: the connection is open for as long as self holds it, and the
            // notifier is the only owner of its update-hook slot.
            unsafe { register_update_hook(self.conn.as_raw(), handler) };
            *installed = true;
            debug!(path = %self.conn.path(), "Installed update hook");
         }
         (false, true) => {
            // SAFETY: same connection the hook was registered on.
            unsafe { unregister_update_hook(self.conn.as_raw()) };
            *installed = false;
            debug!(path = %self.conn.path(), "Removed update hook");
         }
         _ => {}
      }
   }
}

impl Drop for Shared {
   fn drop(&mut self) {
      if *self.hook_installed.get_mut() {
         // SAFETY: the connection is still open; self holds an Arc to it.
         unsafe { unregister_update_hook(self.conn.as_raw()) };
      }
   }
}

/// Reference-counted change notification multiplexer for one connection.
///
/// Each [`subscribe`](Self::subscribe) call registers one subscriber for one
/// [`ChangeKind`] and returns a [`ChangeSubscription`] stream. The engine's
/// update hook is installed while at least one subscription is alive.
///
/// Cloning the notifier is cheap; clones share the same subscribers and flag.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use sqlite3_conn::{Connection, ConnectionConfig};
/// use sqlite3_observer::{ChangeKind, ChangeNotifier, ObserverConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = Connection::open("app.db", &ConnectionConfig::default())?;
/// let notifier = ChangeNotifier::new(conn.clone(), ObserverConfig::default());
///
/// let mut inserts = notifier.subscribe(ChangeKind::Insert);
/// conn.execute_batch("INSERT INTO users (name) VALUES ('Alice')")?;
///
/// if let Some(event) = inserts.next().await {
///     println!("row {} inserted into {}", event.rowid, event.table);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChangeNotifier {
   shared: Arc<Shared>,
}

impl ChangeNotifier {
   pub fn new(conn: Arc<Connection>, config: ObserverConfig) -> Self {
      Self {
         shared: Arc::new(Shared {
            conn,
            state: Mutex::new(SubscriberState::default()),
            hook_installed: Mutex::new(false),
            fire_events: AtomicBool::new(config.fire_events),
         }),
      }
   }

   /// Subscribes to changes of one kind.
   ///
   /// Installs the update hook if this is the first live subscription.
   /// Dropping the returned subscription unsubscribes.
   pub fn subscribe(&self, kind: ChangeKind) -> ChangeSubscription {
      let (tx, rx) = mpsc::unbounded_channel();
      let id = Uuid::new_v4();

      {
         let mut state = self.shared.state.lock();
         *state.counts.entry(kind).or_default() += 1;
         state.total += 1;
         state.subscribers.insert(id, Subscriber { kind, tx });
         trace!(%id, %kind, total = state.total, "Subscribed");
      }

      self.shared.sync_hook();

      ChangeSubscription::new(id, kind, rx, Arc::clone(&self.shared))
   }

   /// Suspends (`false`) or resumes (`true`) event dispatch.
   ///
   /// Changes made while suspended are discarded, not queued.
   pub fn set_fire_events(&self, enabled: bool) {
      debug!(enabled, "Setting fire_events");
      self.shared.fire_events.store(enabled, Ordering::Release);
   }

   pub fn fire_events(&self) -> bool {
      self.shared.fire_events.load(Ordering::Acquire)
   }

   /// Number of live subscriptions for `kind`.
   pub fn subscriber_count(&self, kind: ChangeKind) -> usize {
      self.shared.state.lock().counts.get(&kind).copied().unwrap_or(0)
   }

   /// Number of live subscriptions across all kinds.
   pub fn total_subscribers(&self) -> usize {
      self.shared.state.lock().total
   }

   /// Whether the update hook is currently installed on the connection.
   pub fn is_hook_installed(&self) -> bool {
      *self.shared.hook_installed.lock()
   }

   pub fn connection(&self) -> &Arc<Connection> {
      &self.shared.conn
   }
}
