use std::path::Path;
use std::sync::Arc;

use sqlite3_conn::Connection;
use sqlite3_observer::{ChangeEvent, ChangeKind, ChangeNotifier, ChangeSubscription};
use sqlite3_toolkit::{
   Executor, ParameterValue, Parameters, Row, RunResult, ToParameter, decode_row, decode_rows,
};
use tracing::{debug, trace};

use crate::config::DatabaseConfig;
use crate::subscriptions::{ActiveListeners, ListenerId};
use crate::{Error, Result};

/// An open SQLite database with async statement execution and change
/// notifications.
///
/// Cloning is cheap; clones share the connection, the change notifier and the
/// listener registry.
///
/// # Example
///
/// ```no_run
/// use sqlite3_async::{ChangeKind, Database, DatabaseConfig, ParameterValue, Parameters};
///
/// # async fn example() -> sqlite3_async::Result<()> {
/// let db = Database::open("app.db", DatabaseConfig::default()).await?;
///
/// let mut inserts = db.subscribe(ChangeKind::Insert);
///
/// db.run("CREATE TABLE IF NOT EXISTS t (a INTEGER, b TEXT)", Parameters::<ParameterValue>::None)
///    .await?;
/// db.run(
///    "INSERT INTO t (a, b) VALUES (?, ?)",
///    Parameters::<ParameterValue>::positional([ParameterValue::Integer(5), "x".into()]),
/// )
/// .await?;
///
/// let event = inserts.recv().await.unwrap();
/// assert_eq!(event.table, "t");
///
/// let row = db.one("SELECT a, b FROM t", Parameters::<ParameterValue>::None).await?;
/// assert_eq!(row.as_deref(), Some(r#"{"a":5,"b":"x"}"#));
///
/// db.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
   conn: Arc<Connection>,
   executor: Executor,
   notifier: ChangeNotifier,
   listeners: ActiveListeners,
}

impl Database {
   /// Open (or create) the database at `path`.
   ///
   /// `path` may also be `:memory:` or a `file:` URI. The engine open runs on
   /// the blocking pool.
   pub async fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
      let path = path.as_ref().to_path_buf();
      let connection_config = config.connection.clone();

      let conn = tokio::task::spawn_blocking(move || Connection::open(&path, &connection_config))
         .await
         .map_err(|e| Error::Task(e.to_string()))??;

      debug!(path = %conn.path(), "Opened database");

      Ok(Self::from_connection(conn, config))
   }

   /// Wrap an already open connection.
   pub fn from_connection(conn: Arc<Connection>, config: DatabaseConfig) -> Self {
      Self {
         executor: Executor::new(Arc::clone(&conn)),
         notifier: ChangeNotifier::new(Arc::clone(&conn), config.observer),
         listeners: ActiveListeners::default(),
         conn,
      }
   }

   pub fn connection(&self) -> &Arc<Connection> {
      &self.conn
   }

   pub fn path(&self) -> &str {
      self.conn.path()
   }

   // ==========================================================================
   // Statement execution
   // ==========================================================================

   /// Execute a statement to completion, discarding any rows.
   pub async fn run<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<RunResult>
   where
      P: ToParameter + Send + 'static,
   {
      Ok(self.executor.run(sql, params).await?)
   }

   /// First row as row text, or `None` when the statement yields no rows.
   pub async fn one<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<Option<String>>
   where
      P: ToParameter + Send + 'static,
   {
      Ok(self.executor.one(sql, params).await?)
   }

   /// Every row as `[row,row,...]`.
   pub async fn all<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<String>
   where
      P: ToParameter + Send + 'static,
   {
      Ok(self.executor.all(sql, params).await?)
   }

   /// Call `callback` for each row, in order. Returns the number of rows.
   pub async fn each<P, F>(
      &self,
      sql: impl Into<String>,
      params: Parameters<P>,
      callback: F,
   ) -> Result<usize>
   where
      P: ToParameter + Send + 'static,
      F: FnMut(String),
   {
      Ok(self.executor.each(sql, params, callback).await?)
   }

   /// Collect `f(row)` for each row, in order.
   pub async fn map<P, F, T>(&self, sql: impl Into<String>, params: Parameters<P>, f: F) -> Result<Vec<T>>
   where
      P: ToParameter + Send + 'static,
      F: FnMut(String) -> T,
   {
      Ok(self.executor.map(sql, params, f).await?)
   }

   /// Like [`one`](Self::one), decoded into a column map.
   pub async fn one_row<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<Option<Row>>
   where
      P: ToParameter + Send + 'static,
   {
      match self.one(sql, params).await? {
         Some(text) => Ok(Some(decode_row(&text)?)),
         None => Ok(None),
      }
   }

   /// Like [`all`](Self::all), decoded into column maps.
   pub async fn all_rows<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<Vec<Row>>
   where
      P: ToParameter + Send + 'static,
   {
      let text = self.all(sql, params).await?;
      Ok(decode_rows(&text)?)
   }

   /// Rebuild the database file, reclaiming free pages.
   pub async fn vacuum(&self) -> Result<()> {
      self.run("VACUUM", Parameters::<ParameterValue>::None).await?;
      Ok(())
   }

   /// Whether `sql` would make no direct changes to the database.
   pub async fn is_read_only(&self, sql: impl Into<String>) -> Result<bool> {
      Ok(self.executor.is_read_only(sql).await?)
   }

   // ==========================================================================
   // Connection state
   // ==========================================================================

   /// Message of the most recent failure on this connection, or `""`.
   pub fn last_error(&self) -> String {
      self.conn.last_error()
   }

   pub fn last_insert_rowid(&self) -> i64 {
      self.conn.last_insert_rowid()
   }

   /// Whether the connection is outside an explicit transaction.
   pub fn autocommit(&self) -> bool {
      self.conn.autocommit()
   }

   pub fn collation_language(&self) -> Option<String> {
      self.conn.collation_language()
   }

   pub fn set_collation_language(&self, language: Option<String>) {
      self.conn.set_collation_language(language);
   }

   // ==========================================================================
   // Change notifications
   // ==========================================================================

   /// Subscribe to one kind of row change. Dropping the subscription
   /// unsubscribes.
   pub fn subscribe(&self, kind: ChangeKind) -> ChangeSubscription {
      self.notifier.subscribe(kind)
   }

   /// Call `listener` for every change of `kind` until it is removed.
   ///
   /// The listener runs on a task spawned on the current tokio runtime.
   pub async fn add_listener<F>(&self, kind: ChangeKind, listener: F) -> ListenerId
   where
      F: Fn(ChangeEvent) + Send + 'static,
   {
      let mut subscription = self.notifier.subscribe(kind);
      let id = subscription.id();

      let handle = tokio::spawn(async move {
         while let Some(event) = subscription.recv().await {
            trace!(table = %event.table, rowid = event.rowid, "Forwarding change to listener");
            listener(event);
         }
      });

      self.listeners.insert(id, kind, handle.abort_handle()).await;
      debug!(%id, %kind, "Added listener");
      id
   }

   /// Stop a listener. Returns false if no listener has that id.
   pub async fn remove_listener(&self, id: ListenerId) -> bool {
      self.listeners.remove(&id).await
   }

   pub async fn listener_count(&self) -> usize {
      self.listeners.len().await
   }

   /// Suspend (`false`) or resume (`true`) change dispatch. Changes made while
   /// suspended are dropped.
   pub fn set_fire_events(&self, enabled: bool) {
      self.notifier.set_fire_events(enabled);
   }

   pub fn fire_events(&self) -> bool {
      self.notifier.fire_events()
   }

   /// The notifier shared by this database's subscriptions.
   pub fn notifier(&self) -> &ChangeNotifier {
      &self.notifier
   }

   /// Stop all listeners and release this handle.
   ///
   /// The engine connection closes once the last clone, subscription and
   /// in-flight operation has released it.
   pub async fn close(self) {
      self.listeners.abort_all().await;
      debug!(path = %self.conn.path(), "Closing database");
   }
}

impl std::fmt::Debug for Database {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Database")
         .field("path", &self.conn.path())
         .finish_non_exhaustive()
   }
}
