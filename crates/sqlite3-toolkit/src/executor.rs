//! Async execution of prepared statements on the blocking pool.

use std::sync::Arc;

use sqlite3_conn::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::params::{Parameters, ToParameter};
use crate::statement::{PreparedStatement, RunResult};
use crate::{Error, Result};

/// Schedules statement execution for one connection.
///
/// Every call prepares a fresh statement, binds the parameters, steps it and
/// serializes rows inside a single `spawn_blocking` unit, and resolves exactly
/// once. Failures are recorded as the connection's last error before the future
/// resolves. Any number of calls may be in flight on the same connection.
///
/// # Example
///
/// ```no_run
/// use sqlite3_conn::{Connection, ConnectionConfig};
/// use sqlite3_toolkit::{Executor, ParameterValue, Parameters};
///
/// # async fn example() -> sqlite3_toolkit::Result<()> {
/// let conn = Connection::open("app.db", &ConnectionConfig::default())?;
/// let executor = Executor::new(conn);
///
/// executor
///    .run("CREATE TABLE IF NOT EXISTS t (a INTEGER, b TEXT)", Parameters::<ParameterValue>::None)
///    .await?;
/// executor
///    .run(
///       "INSERT INTO t (a, b) VALUES (?, ?)",
///       Parameters::<ParameterValue>::positional([ParameterValue::Integer(5), "x".into()]),
///    )
///    .await?;
///
/// let rows = executor.all("SELECT a, b FROM t", Parameters::<ParameterValue>::None).await?;
/// assert_eq!(rows, r#"[{"a":5,"b":"x"}]"#);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Executor {
   conn: Arc<Connection>,
}

impl Executor {
   pub fn new(conn: Arc<Connection>) -> Self {
      Self { conn }
   }

   pub fn connection(&self) -> &Arc<Connection> {
      &self.conn
   }

   /// Runs `op` against the connection on the blocking pool.
   async fn execute<T, F>(&self, op: F) -> Result<T>
   where
      T: Send + 'static,
      F: FnOnce(&Connection) -> Result<T> + Send + 'static,
   {
      let conn = Arc::clone(&self.conn);

      let joined = tokio::task::spawn_blocking(move || {
         let result = op(&conn);
         if let Err(e) = &result {
            conn.set_last_error(e.last_error_text());
         }
         result
      })
      .await;

      match joined {
         Ok(result) => result,
         Err(join_err) => {
            let err = Error::Task(join_err.to_string());
            debug!(error = %err, "Statement worker did not complete");
            self.conn.set_last_error(err.last_error_text());
            Err(err)
         }
      }
   }

   /// Executes a statement to completion, discarding rows.
   pub async fn run<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<RunResult>
   where
      P: ToParameter + Send + 'static,
   {
      let sql = sql.into();
      self
         .execute(move |conn| {
            let mut stmt = PreparedStatement::prepare(conn, &sql)?;
            stmt.bind(&params)?;
            stmt.run()
         })
         .await
   }

   /// Returns the first row's text, or `None` if the statement yields no rows.
   pub async fn one<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<Option<String>>
   where
      P: ToParameter + Send + 'static,
   {
      let sql = sql.into();
      self
         .execute(move |conn| {
            let mut stmt = PreparedStatement::prepare(conn, &sql)?;
            stmt.bind(&params)?;
            stmt.one()
         })
         .await
   }

   /// Returns every row as `[row,row,...]`; `[]` when there are none.
   pub async fn all<P>(&self, sql: impl Into<String>, params: Parameters<P>) -> Result<String>
   where
      P: ToParameter + Send + 'static,
   {
      let sql = sql.into();
      self
         .execute(move |conn| {
            let mut stmt = PreparedStatement::prepare(conn, &sql)?;
            stmt.bind(&params)?;
            stmt.all()
         })
         .await
   }

   /// Calls `callback` once per row, in result order, on the awaiting task.
   ///
   /// The worker hands over one row at a time and does not step again until the
   /// callback for that row has returned. Dropping the returned future stops the
   /// worker with [`Error::Cancelled`] at its next row, or at its next wake-up if
   /// it is waiting for another connection's lock. Returns the number of rows
   /// delivered.
   pub async fn each<P, F>(
      &self,
      sql: impl Into<String>,
      params: Parameters<P>,
      mut callback: F,
   ) -> Result<usize>
   where
      P: ToParameter + Send + 'static,
      F: FnMut(String),
   {
      let sql = sql.into();
      let (row_tx, mut row_rx) = mpsc::channel::<(String, oneshot::Sender<()>)>(1);

      let worker = self.execute(move |conn| {
         // Also stop while blocked on another connection's lock, not only at a row
         let watch = row_tx.clone();
         let mut stmt =
            PreparedStatement::prepare_cancellable(conn, &sql, move || watch.is_closed())?;
         stmt.bind(&params)?;
         stmt.each(|row| {
            let (ack_tx, ack_rx) = oneshot::channel();
            row_tx
               .blocking_send((row, ack_tx))
               .map_err(|_| Error::Cancelled)?;
            ack_rx.blocking_recv().map_err(|_| Error::Cancelled)
         })
      });

      let deliver = async {
         // Ends once the worker drops its sender
         while let Some((row, ack)) = row_rx.recv().await {
            callback(row);
            let _ = ack.send(());
         }
      };

      let (result, ()) = tokio::join!(worker, deliver);
      trace!(rows = ?result.as_ref().ok(), "each() finished");
      result
   }

   /// Applies `f` to every row and collects the results, in row order.
   pub async fn map<P, F, T>(
      &self,
      sql: impl Into<String>,
      params: Parameters<P>,
      mut f: F,
   ) -> Result<Vec<T>>
   where
      P: ToParameter + Send + 'static,
      F: FnMut(String) -> T,
   {
      let mut out = Vec::new();
      self.each(sql, params, |row| out.push(f(row))).await?;
      Ok(out)
   }

   /// Whether `sql` would make no direct changes to the database.
   ///
   /// Prepares the statement without executing it.
   pub async fn is_read_only(&self, sql: impl Into<String>) -> Result<bool> {
      let sql = sql.into();
      self
         .execute(move |conn| Ok(PreparedStatement::prepare(conn, &sql)?.is_read_only()))
         .await
   }
}
