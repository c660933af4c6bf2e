//! Tests for synchronous prepared statement execution.

use serde_json::json;
use sqlite3_conn::{Connection, ConnectionConfig, ffi};
use sqlite3_toolkit::{
   Error, ErrorKind, ParameterValue, Parameters, PreparedStatement, RunResult, decode_row,
   decode_rows,
};
use std::sync::Arc;
use time::macros::datetime;

fn memory_db() -> Arc<Connection> {
   Connection::open_in_memory(&ConnectionConfig::default()).unwrap()
}

fn none() -> Parameters {
   Parameters::None
}

fn run(conn: &Connection, sql: &str, params: Parameters) -> RunResult {
   let mut stmt = PreparedStatement::prepare(conn, sql).unwrap();
   stmt.bind(&params).unwrap();
   stmt.run().unwrap()
}

fn all(conn: &Connection, sql: &str, params: Parameters) -> String {
   let mut stmt = PreparedStatement::prepare(conn, sql).unwrap();
   stmt.bind(&params).unwrap();
   stmt.all().unwrap()
}

// ============================================================================
// Prepare
// ============================================================================

#[test]
fn test_prepare_syntax_error() {
   let conn = memory_db();
   let err = PreparedStatement::prepare(&conn, "SELEC 1").err().unwrap();

   assert_eq!(err.kind(), ErrorKind::Prepare);
   assert_eq!(err.result_code(), Some(ffi::SQLITE_ERROR));
   assert!(err.to_string().contains("syntax error"));
}

#[test]
fn test_prepare_empty_sql_is_error() {
   let conn = memory_db();

   for sql in ["", "   ", "-- just a comment"] {
      let err = PreparedStatement::prepare(&conn, sql).err().unwrap();
      match err {
         Error::Prepare { code, .. } => assert_eq!(code, ffi::SQLITE_MISUSE),
         other => panic!("expected prepare error for {sql:?}, got {other:?}"),
      }
   }
}

#[test]
fn test_prepare_only_compiles_first_statement() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   run(&conn, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)", none());

   assert_eq!(all(&conn, "SELECT a FROM t", none()), r#"[{"a":1}]"#);
}

#[test]
fn test_prepare_missing_table() {
   let conn = memory_db();
   let err = PreparedStatement::prepare(&conn, "SELECT * FROM nope").err().unwrap();
   assert!(err.to_string().contains("no such table"));
}

#[test]
fn test_parameter_introspection() {
   let conn = memory_db();
   let stmt = PreparedStatement::prepare(&conn, "SELECT :a, @b, $c, ?").unwrap();

   assert_eq!(stmt.parameter_count(), 4);
   assert_eq!(stmt.parameter_name(1).as_deref(), Some(":a"));
   assert_eq!(stmt.parameter_name(2).as_deref(), Some("@b"));
   assert_eq!(stmt.parameter_name(3).as_deref(), Some("$c"));
   assert_eq!(stmt.parameter_name(4), None);
   assert_eq!(stmt.parameter_name(99), None);
}

#[test]
fn test_is_read_only() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   assert!(PreparedStatement::prepare(&conn, "SELECT * FROM t").unwrap().is_read_only());
   assert!(!PreparedStatement::prepare(&conn, "INSERT INTO t VALUES (1)").unwrap().is_read_only());
   assert!(!PreparedStatement::prepare(&conn, "DELETE FROM t").unwrap().is_read_only());
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_bind_positional() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER, b TEXT)").unwrap();

   let result = run(
      &conn,
      "INSERT INTO t (a, b) VALUES (?, ?)",
      Parameters::positional([ParameterValue::Integer(5), "x".into()]),
   );
   assert_eq!(result.rows_affected, 1);
   assert_eq!(result.last_insert_rowid, 1);

   assert_eq!(all(&conn, "SELECT a, b FROM t", none()), r#"[{"a":5,"b":"x"}]"#);
}

#[test]
fn test_bind_named_strips_prefix() {
   let conn = memory_db();

   let rows = all(
      &conn,
      "SELECT :a AS a, @b AS b, $c AS c",
      Parameters::named([("a", ParameterValue::Integer(1)), ("b", "two".into()), ("c", 3.5.into())]),
   );

   assert_eq!(rows, r#"[{"a":1,"b":"two","c":3.5}]"#);
}

#[test]
fn test_bind_named_unmatched_stays_null() {
   let conn = memory_db();

   let rows = all(
      &conn,
      "SELECT :present AS p, :missing AS m",
      Parameters::named([("present", ParameterValue::Integer(7)), ("unused", 8.into())]),
   );

   assert_eq!(rows, r#"[{"p":7,"m":null}]"#);
}

#[test]
fn test_bind_too_many_positional_is_range_error() {
   let conn = memory_db();
   let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?").unwrap();

   let err = stmt
      .bind(&Parameters::positional([ParameterValue::Integer(1), 2.into()]))
      .unwrap_err();

   match err {
      Error::Bind { index, code, .. } => {
         assert_eq!(index, 2);
         assert_eq!(code, ffi::SQLITE_RANGE);
      }
      other => panic!("expected bind error, got {other:?}"),
   }
}

#[test]
fn test_bind_json_array_rejected() {
   let conn = memory_db();
   let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?, ?").unwrap();

   let err = stmt
      .bind(&Parameters::Positional(vec![json!(1), json!([1, 2])]))
      .unwrap_err();

   match err {
      Error::InvalidParameterType { index, type_name } => {
         assert_eq!(index, 2);
         assert_eq!(type_name, "array");
      }
      other => panic!("expected invalid parameter type, got {other:?}"),
   }
}

#[test]
fn test_bind_json_scalars() {
   let conn = memory_db();
   let mut stmt = PreparedStatement::prepare(&conn, "SELECT ? AS a, ? AS b, ? AS c, ? AS d").unwrap();
   stmt
      .bind(&Parameters::Positional(vec![json!(null), json!(true), json!(-3), json!("s")]))
      .unwrap();

   assert_eq!(stmt.all().unwrap(), r#"[{"a":null,"b":1,"c":-3,"d":"s"}]"#);
}

#[test]
fn test_bind_every_value_kind() {
   let conn = memory_db();
   conn.execute_batch(
      "CREATE TABLE kinds (n, i INTEGER, r REAL, t TEXT, b INTEGER, ts INTEGER, bl BLOB)",
   )
   .unwrap();

   run(
      &conn,
      "INSERT INTO kinds VALUES (?, ?, ?, ?, ?, ?, ?)",
      Parameters::Positional(vec![
         ParameterValue::Null,
         ParameterValue::Integer(42),
         ParameterValue::Real(1.5),
         ParameterValue::Text("hi".into()),
         ParameterValue::Boolean(true),
         datetime!(2020-01-01 0:00 UTC).into(),
         ParameterValue::Blob(vec![1, 2, 3]),
      ]),
   );

   assert_eq!(
      all(&conn, "SELECT * FROM kinds", none()),
      r#"[{"n":null,"i":42,"r":1.5,"t":"hi","b":1,"ts":1577836800000,"bl":"AQID"}]"#
   );
}

#[test]
fn test_real_columns_keep_full_precision() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE reals (v REAL)").unwrap();

   let values = [0.1 + 0.2, 1.0 / 3.0, -2.5e-300, 1e21, 2.0];
   for value in values {
      run(&conn, "INSERT INTO reals VALUES (?)", Parameters::positional([value]));
   }

   let text = all(&conn, "SELECT v FROM reals ORDER BY rowid", none());
   assert_eq!(
      text,
      r#"[{"v":0.30000000000000004},{"v":0.3333333333333333},{"v":-2.5e-300},{"v":1e21},{"v":2.0}]"#
   );

   let decoded: Vec<f64> = decode_rows(&text)
      .unwrap()
      .iter()
      .map(|row| row["v"].as_f64().unwrap())
      .collect();
   assert_eq!(decoded, values);
}

#[test]
fn test_non_finite_reals_are_written_as_null() {
   let conn = memory_db();
   let rows = all(
      &conn,
      "SELECT ? AS pos, ? AS neg",
      Parameters::positional([f64::INFINITY, f64::NEG_INFINITY]),
   );

   assert_eq!(rows, r#"[{"pos":null,"neg":null}]"#);
   let decoded = decode_rows(&rows).unwrap();
   assert!(decoded[0]["pos"].is_null());
}

#[test]
fn test_timestamp_truncates_to_milliseconds() {
   let conn = memory_db();

   let ticks = match ParameterValue::from_unix_millis(1_000) {
      ParameterValue::Timestamp(ticks) => ticks + 9_999,
      other => panic!("expected timestamp, got {other:?}"),
   };

   let rows = all(
      &conn,
      "SELECT ? AS ts",
      Parameters::Positional(vec![ParameterValue::Timestamp(ticks)]),
   );
   assert_eq!(rows, r#"[{"ts":1000}]"#);
}

#[test]
fn test_text_with_interior_nul_is_preserved() {
   let conn = memory_db();
   let rows = all(
      &conn,
      "SELECT length(CAST(? AS BLOB)) AS len",
      Parameters::Positional(vec![ParameterValue::Text("a\0b".into())]),
   );
   assert_eq!(rows, r#"[{"len":3}]"#);
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_one_returns_first_row_or_none() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2)").unwrap();

   let mut stmt = PreparedStatement::prepare(&conn, "SELECT a FROM t ORDER BY a").unwrap();
   assert_eq!(stmt.one().unwrap().as_deref(), Some(r#"{"a":1}"#));

   let mut stmt = PreparedStatement::prepare(&conn, "SELECT a FROM t WHERE a > 5").unwrap();
   assert_eq!(stmt.one().unwrap(), None);
}

#[test]
fn test_all_empty_result() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   assert_eq!(all(&conn, "SELECT a FROM t", none()), "[]");
}

#[test]
fn test_each_delivers_rows_in_order() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
   for i in 0..20 {
      run(&conn, "INSERT INTO t VALUES (?)", Parameters::positional([i]));
   }

   let mut seen = Vec::new();
   let mut stmt = PreparedStatement::prepare(&conn, "SELECT a FROM t ORDER BY a").unwrap();
   let count = stmt
      .each(|row| {
         seen.push(decode_row(&row).unwrap()["a"].as_i64().unwrap());
         Ok(())
      })
      .unwrap();

   assert_eq!(count, 20);
   assert_eq!(seen, (0..20).collect::<Vec<i64>>());
}

#[test]
fn test_each_stops_on_dispatch_error() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2), (3)").unwrap();

   let mut calls = 0;
   let mut stmt = PreparedStatement::prepare(&conn, "SELECT a FROM t").unwrap();
   let err = stmt
      .each(|_| {
         calls += 1;
         if calls == 2 { Err(Error::Cancelled) } else { Ok(()) }
      })
      .unwrap_err();

   assert!(matches!(err, Error::Cancelled));
   assert_eq!(calls, 2);
}

#[test]
fn test_run_counts_changes() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2), (3)").unwrap();

   let updated = run(&conn, "UPDATE t SET a = a + 10 WHERE a >= 2", none());
   assert_eq!(updated.rows_affected, 2);

   let deleted = run(&conn, "DELETE FROM t", none());
   assert_eq!(deleted.rows_affected, 3);
}

#[test]
fn test_run_ddl_reports_zero_rows_affected() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   let inserted = run(&conn, "INSERT INTO t VALUES (1), (2), (3)", none());
   assert_eq!(inserted.rows_affected, 3);

   let created = run(&conn, "CREATE TABLE u (b INTEGER)", none());
   assert_eq!(created.rows_affected, 0);

   let unmatched = run(&conn, "UPDATE t SET a = 0 WHERE a > 99", none());
   assert_eq!(unmatched.rows_affected, 0);
}

#[test]
fn test_run_read_only_reports_zero_rows_affected() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
   run(&conn, "INSERT INTO t VALUES (1)", none());

   let result = run(&conn, "SELECT * FROM t", none());
   assert_eq!(result.rows_affected, 0);
   assert_eq!(result.last_insert_rowid, 1);
}

#[test]
fn test_step_constraint_violation() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)").unwrap();

   let mut stmt = PreparedStatement::prepare(&conn, "INSERT INTO t (v) VALUES (NULL)").unwrap();
   let err = stmt.run().unwrap_err();

   assert_eq!(err.kind(), ErrorKind::Step);
   assert_eq!(err.result_code(), Some(ffi::SQLITE_CONSTRAINT));
   assert!(err.to_string().contains("NOT NULL"));
}

#[test]
fn test_dropped_statement_releases_table() {
   let conn = memory_db();
   conn.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();

   {
      let mut stmt = PreparedStatement::prepare(&conn, "SELECT a FROM t").unwrap();
      stmt.one().unwrap();
   }

   // Dropping the statement must not leave a read open on the connection
   conn.execute_batch("DROP TABLE t").unwrap();
   assert!(conn.autocommit());
}

// ============================================================================
// Row text
// ============================================================================

#[test]
fn test_text_escaping() {
   let conn = memory_db();
   let rows = all(
      &conn,
      "SELECT ? AS s",
      Parameters::positional(["quote\" back\\ tab\t nl\n é 😀 \u{1}"]),
   );

   assert_eq!(
      rows,
      r#"[{"s":"quote\" back\\ tab\t nl\n \u00e9 \ud83d\ude00 \u0001"}]"#
   );

   let decoded = decode_rows(&rows).unwrap();
   assert_eq!(decoded[0]["s"], "quote\" back\\ tab\t nl\n é 😀 \u{1}");
}

#[test]
fn test_column_names_are_escaped() {
   let conn = memory_db();
   let rows = all(&conn, r#"SELECT 1 AS "we""ird""#, none());
   assert_eq!(rows, r#"[{"we\"ird":1}]"#);
}

#[test]
fn test_blob_is_base64() {
   let conn = memory_db();
   let rows = all(
      &conn,
      "SELECT ? AS b, zeroblob(0) AS empty",
      Parameters::Positional(vec![ParameterValue::Blob(b"hello".to_vec())]),
   );
   assert_eq!(rows, r#"[{"b":"aGVsbG8=","empty":""}]"#);
}

#[test]
fn test_numbers_use_engine_rendering() {
   let conn = memory_db();
   let rows = all(
      &conn,
      "SELECT 9223372036854775807 AS big, -2 AS neg, 0.25 AS frac, 2.0 AS whole",
      none(),
   );
   assert_eq!(
      rows,
      r#"[{"big":9223372036854775807,"neg":-2,"frac":0.25,"whole":2.0}]"#
   );
}

#[test]
fn test_duplicate_column_names_are_kept() {
   let conn = memory_db();
   let rows = all(&conn, "SELECT 1 AS a, 2 AS a", none());
   assert_eq!(rows, r#"[{"a":1,"a":2}]"#);
}
