//! Callback-style change listeners.
//!
//! A listener is a [`ChangeSubscription`](sqlite3_observer::ChangeSubscription)
//! drained by a forwarding task that calls the listener for every event.
//! Aborting the task drops the subscription, which releases the update hook
//! when it was the last one.

use std::collections::HashMap;
use std::sync::Arc;

use sqlite3_observer::ChangeKind;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

/// Identifies a listener registered with
/// [`Database::add_listener`](crate::Database::add_listener).
pub type ListenerId = Uuid;

/// Tracks an active listener's forwarding task.
struct ActiveListener {
   abort_handle: AbortHandle,
   kind: ChangeKind,
}

/// All listeners registered on one database.
#[derive(Clone, Default)]
pub(crate) struct ActiveListeners(Arc<RwLock<HashMap<ListenerId, ActiveListener>>>);

impl ActiveListeners {
   pub(crate) async fn insert(&self, id: ListenerId, kind: ChangeKind, abort_handle: AbortHandle) {
      let mut listeners = self.0.write().await;
      listeners.insert(id, ActiveListener { abort_handle, kind });
   }

   /// Remove and abort a listener. Returns true if found.
   pub(crate) async fn remove(&self, id: &ListenerId) -> bool {
      let mut listeners = self.0.write().await;
      if let Some(listener) = listeners.remove(id) {
         listener.abort_handle.abort();
         debug!(%id, kind = %listener.kind, "Removed listener");
         true
      } else {
         false
      }
   }

   pub(crate) async fn len(&self) -> usize {
      self.0.read().await.len()
   }

   /// Abort every listener.
   pub(crate) async fn abort_all(&self) {
      let mut listeners = self.0.write().await;
      debug!("Aborting {} active listener(s)", listeners.len());
      for (_, listener) in listeners.drain() {
         listener.abort_handle.abort();
      }
   }
}
