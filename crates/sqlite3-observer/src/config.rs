use serde::{Deserialize, Serialize};

/// Configuration for a [`ChangeNotifier`](crate::ChangeNotifier).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
   /// Whether change events are dispatched when the notifier is created.
   ///
   /// While disabled, the hook stays installed for as long as there are
   /// subscribers, but every change it reports is dropped. Dropped changes are
   /// never delivered later, so a bulk maintenance job can suspend dispatch
   /// without flooding subscribers afterwards.
   ///
   /// Default: true.
   pub fire_events: bool,
}

impl Default for ObserverConfig {
   fn default() -> Self {
      Self { fire_events: true }
   }
}

impl ObserverConfig {
   /// Creates a new observer configuration with default settings.
   pub fn new() -> Self {
      Self::default()
   }

   /// Sets whether change events are dispatched initially.
   pub fn with_fire_events(mut self, enabled: bool) -> Self {
      self.fire_events = enabled;
      self
   }
}
