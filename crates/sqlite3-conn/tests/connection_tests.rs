use sqlite3_conn::ffi;
use sqlite3_conn::{Connection, ConnectionConfig, Error};
use tempfile::TempDir;

#[test]
fn test_open_creates_file() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("created.db");

   let conn = Connection::open(&db_path, &ConnectionConfig::default()).unwrap();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   assert!(db_path.exists());
   assert_eq!(conn.path(), db_path.to_str().unwrap());
}

#[test]
fn test_empty_path_rejected() {
   let err = Connection::open("", &ConnectionConfig::default()).unwrap_err();
   assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_missing_file_without_create() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("missing.db");

   let config = ConnectionConfig::new().with_create_if_missing(false);
   let err = Connection::open(&db_path, &config).unwrap_err();

   match err {
      Error::Open { source, .. } => assert_eq!(source.code, ffi::SQLITE_CANTOPEN),
      other => panic!("expected open error, got {other:?}"),
   }
}

#[test]
fn test_autocommit_tracks_transactions() {
   let conn = Connection::open_in_memory(&ConnectionConfig::default()).unwrap();
   assert!(conn.autocommit());

   conn.execute_batch("BEGIN").unwrap();
   assert!(!conn.autocommit());

   conn.execute_batch("COMMIT").unwrap();
   assert!(conn.autocommit());
}

#[test]
fn test_changes_and_last_insert_rowid() {
   let conn = Connection::open_in_memory(&ConnectionConfig::default()).unwrap();
   conn
      .execute_batch(
         "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
          INSERT INTO t (v) VALUES ('a'), ('b'), ('c');",
      )
      .unwrap();

   assert_eq!(conn.changes(), 3);
   assert_eq!(conn.last_insert_rowid(), 3);

   conn.execute_batch("UPDATE t SET v = 'x' WHERE id < 3").unwrap();
   assert_eq!(conn.changes(), 2);
   assert_eq!(conn.total_changes(), 5);

   // DDL leaves both counters alone
   conn.execute_batch("CREATE TABLE u (b INTEGER)").unwrap();
   assert_eq!(conn.changes(), 2);
   assert_eq!(conn.total_changes(), 5);
}

#[test]
fn test_execute_batch_records_last_error() {
   let conn = Connection::open_in_memory(&ConnectionConfig::default()).unwrap();
   assert_eq!(conn.last_error(), "");

   let err = conn.execute_batch("SELEC nonsense").unwrap_err();
   match &err {
      Error::Engine(e) => assert_eq!(e.code, ffi::SQLITE_ERROR),
      other => panic!("expected engine error, got {other:?}"),
   }

   assert!(conn.last_error().contains("syntax error"));
}

#[test]
fn test_read_only_rejects_writes() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("ro.db");

   {
      let conn = Connection::open(&db_path, &ConnectionConfig::default()).unwrap();
      conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
   }

   let config = ConnectionConfig::new().with_read_only(true);
   let conn = Connection::open(&db_path, &config).unwrap();
   let err = conn.execute_batch("INSERT INTO t VALUES (1)").unwrap_err();

   assert_eq!(err.result_code(), Some(ffi::SQLITE_READONLY));
}

#[test]
fn test_collation_language_setting() {
   let conn = Connection::open_in_memory(&ConnectionConfig::default()).unwrap();
   assert_eq!(conn.collation_language(), None);

   conn.set_collation_language(Some("de-DE".into()));
   assert_eq!(conn.collation_language().as_deref(), Some("de-DE"));

   conn.set_collation_language(None);
   assert_eq!(conn.collation_language(), None);
}

#[test]
fn test_shared_cache_connections_see_same_data() {
   let uri = "file:conn_shared_cache_test?mode=memory&cache=shared";
   let config = ConnectionConfig::new().with_shared_cache(true);

   let first = Connection::open(uri, &config).unwrap();
   let second = Connection::open(uri, &config).unwrap();

   first
      .execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (42);")
      .unwrap();

   // Visible through the second handle only if both share one in-memory cache
   second.execute_batch("DELETE FROM t WHERE a = 42").unwrap();
   assert_eq!(second.changes(), 1);
}

#[test]
fn test_connection_is_shareable_across_threads() {
   let conn = Connection::open_in_memory(&ConnectionConfig::default()).unwrap();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   let handles: Vec<_> = (0..4)
      .map(|i| {
         let conn = std::sync::Arc::clone(&conn);
         std::thread::spawn(move || {
            for j in 0..25 {
               conn
                  .execute_batch(&format!("INSERT INTO t VALUES ({})", i * 100 + j))
                  .unwrap();
            }
         })
      })
      .collect();

   for handle in handles {
      handle.join().unwrap();
   }

   conn.execute_batch("DELETE FROM t").unwrap();
   assert_eq!(conn.changes(), 100);
}
