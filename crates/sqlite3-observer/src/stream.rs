use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::change::{ChangeEvent, ChangeKind};
use crate::notifier::Shared;

/// A live subscription to one kind of row change.
///
/// Yields [`ChangeEvent`]s in the order the engine reported them. Events are
/// buffered without bound, so the writer that produced them is never blocked.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// releases it; when the last subscription on a connection goes away the
/// update hook is removed.
pub struct ChangeSubscription {
   id: Uuid,
   kind: ChangeKind,
   inner: UnboundedReceiverStream<ChangeEvent>,
   shared: Arc<Shared>,
}

impl ChangeSubscription {
   pub(crate) fn new(
      id: Uuid,
      kind: ChangeKind,
      rx: mpsc::UnboundedReceiver<ChangeEvent>,
      shared: Arc<Shared>,
   ) -> Self {
      Self {
         id,
         kind,
         inner: UnboundedReceiverStream::new(rx),
         shared,
      }
   }

   pub fn id(&self) -> Uuid {
      self.id
   }

   pub fn kind(&self) -> ChangeKind {
      self.kind
   }

   /// Waits for the next event.
   pub async fn recv(&mut self) -> Option<ChangeEvent> {
      self.inner.as_mut().recv().await
   }

   /// Returns an already-delivered event without waiting.
   pub fn try_recv(&mut self) -> Option<ChangeEvent> {
      self.inner.as_mut().try_recv().ok()
   }

   /// Stops delivery and releases this subscriber.
   pub fn unsubscribe(self) {
      drop(self);
   }
}

impl Stream for ChangeSubscription {
   type Item = ChangeEvent;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      // UnboundedReceiverStream is Unpin, so we can safely create a pinned reference
      Pin::new(&mut self.inner).poll_next(cx)
   }
}

impl Drop for ChangeSubscription {
   fn drop(&mut self) {
      self.shared.unsubscribe(&self.id);
   }
}

impl fmt::Debug for ChangeSubscription {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ChangeSubscription")
         .field("id", &self.id)
         .field("kind", &self.kind)
         .finish_non_exhaustive()
   }
}
