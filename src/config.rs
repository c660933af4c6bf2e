use serde::{Deserialize, Serialize};
use sqlite3_conn::ConnectionConfig;
use sqlite3_observer::ObserverConfig;

/// Configuration for [`Database::open`](crate::Database::open).
///
/// # Example
///
/// ```
/// use sqlite3_async::{ConnectionConfig, DatabaseConfig, ObserverConfig};
///
/// let config = DatabaseConfig::new()
///     .with_connection(ConnectionConfig::new().with_shared_cache(true))
///     .with_observer(ObserverConfig::new().with_fire_events(false));
///
/// assert!(config.connection.shared_cache);
/// assert!(!config.observer.fire_events);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
   pub connection: ConnectionConfig,
   pub observer: ObserverConfig,
}

impl DatabaseConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
      self.connection = connection;
      self
   }

   pub fn with_observer(mut self, observer: ObserverConfig) -> Self {
      self.observer = observer;
      self
   }
}
