//! Row change notifications for SQLite connections.
//!
//! SQLite exposes a single update-hook slot per connection. This crate shares it
//! between any number of independent subscribers:
//!
//! - Each subscriber listens for one [`ChangeKind`] (insert, update or delete).
//! - The hook is installed only while at least one subscription is alive, so a
//!   connection with no listeners pays nothing on its write path.
//! - The hook never calls back into the engine. It captures
//!   `{table, rowid, kind}` and hands the [`ChangeEvent`] to subscriber channels,
//!   which are drained asynchronously.
//! - Dispatch can be suspended with [`ChangeNotifier::set_fire_events`]. Changes made
//!   while suspended are dropped, not replayed.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use sqlite3_conn::{Connection, ConnectionConfig};
//! use sqlite3_observer::{ChangeKind, ChangeNotifier, ObserverConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::open(":memory:", &ConnectionConfig::default())?;
//! conn.execute_batch("CREATE TABLE t (a INTEGER)")?;
//!
//! let notifier = ChangeNotifier::new(conn.clone(), ObserverConfig::default());
//! let mut deletes = notifier.subscribe(ChangeKind::Delete);
//! assert!(notifier.is_hook_installed());
//!
//! conn.execute_batch("INSERT INTO t VALUES (1); DELETE FROM t;")?;
//! let event = deletes.next().await.unwrap();
//! assert_eq!(event.table, "t");
//!
//! drop(deletes);
//! assert!(!notifier.is_hook_installed());
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod config;
mod hooks;
pub mod notifier;
pub mod stream;

pub use change::{ChangeEvent, ChangeKind};
pub use config::ObserverConfig;
pub use notifier::ChangeNotifier;
pub use stream::ChangeSubscription;
