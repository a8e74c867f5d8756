///
/// # Integration Tests for connections, statements and queries
///
/// Runs against the bundled engine: value round trips through binding and
/// reading, multi-statement scripts, named parameters, inline commands,
/// transparent reopen and connection introspection.
///

use async_trait::async_trait;

use sqlbridge::codes::{primary, SQLITE_ERROR};
use sqlbridge::{Conn, ErrorKind, OpenParams, Query, Result, SqlCommand, Value, MAX_SAFE_INTEGER};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn memory_conn() -> Conn {
    init_logging();
    Conn::connect(OpenParams::default())
        .await
        .expect("Failed to open in-memory database")
}

#[tokio::test]
async fn test_select_round_trips_values() {
    let mut conn = memory_conn().await;
    let query = Query::new("SELECT ")
        .bind(42)
        .sql(", ")
        .bind(1.5)
        .sql(", ")
        .bind("hello")
        .sql(", ")
        .bind(vec![1u8, 2, 3])
        .sql(", ")
        .bind(Value::Null)
        .sql(", ")
        .bind(true);
    let row = conn
        .sql(query)
        .exec()
        .await
        .expect("Query failed")
        .expect("Query should produce a row");

    assert_eq!(row[0], Value::Number(42.0));
    assert_eq!(row[1], Value::Number(1.5));
    assert_eq!(row[2], Value::Text("hello".into()));
    assert_eq!(row[3], Value::Blob(vec![1, 2, 3]));
    assert_eq!(row[4], Value::Null);
    assert_eq!(row[5], Value::Number(1.0), "Booleans bind as integers");
}

#[tokio::test]
async fn test_big_integers_keep_precision() {
    let mut conn = memory_conn().await;
    let query = Query::new("SELECT ")
        .bind(MAX_SAFE_INTEGER)
        .sql(", ")
        .bind(Value::BigInt(MAX_SAFE_INTEGER + 1))
        .sql(", ")
        .bind(-MAX_SAFE_INTEGER)
        .sql(", ")
        .bind(i64::MIN)
        .sql(", 9007199254740992, typeof(")
        .bind(MAX_SAFE_INTEGER)
        .sql(")");
    let row = conn.sql(query).exec().await.unwrap().unwrap();

    assert_eq!(row[0], Value::Number(MAX_SAFE_INTEGER as f64));
    assert_eq!(row[1], Value::BigInt(MAX_SAFE_INTEGER + 1));
    assert_eq!(row[2], Value::Number(-MAX_SAFE_INTEGER as f64));
    assert_eq!(row[3], Value::BigInt(i64::MIN));
    assert_eq!(row[4], Value::BigInt(1 << 53));
    assert_eq!(row[5], Value::Text("integer".into()));
}

#[tokio::test]
async fn test_large_integer_valued_number_binds_as_integer() {
    let mut conn = memory_conn().await;
    let big = Value::Number(2f64.powi(60));
    let query = Query::new("SELECT ")
        .bind(big.clone())
        .sql(", typeof(")
        .bind(big)
        .sql("), typeof(")
        .bind(Value::Number(2.5))
        .sql(")");
    let row = conn.sql(query).exec().await.unwrap().unwrap();

    assert_eq!(row[0], Value::BigInt(1 << 60));
    assert_eq!(row[1], Value::Text("integer".into()));
    assert_eq!(row[2], Value::Text("real".into()));
}

#[tokio::test]
async fn test_text_with_nul_and_empty_blob() {
    let mut conn = memory_conn().await;
    let query = Query::new("SELECT ")
        .bind("a\0b")
        .sql(", ")
        .bind(Vec::<u8>::new())
        .sql(", typeof(")
        .bind(Vec::<u8>::new())
        .sql("), ")
        .bind("")
        .sql(", 0.1 + 0.2");
    let row = conn.sql(query).exec().await.unwrap().unwrap();

    assert_eq!(row[0], Value::Text("a\0b".into()));
    assert_eq!(row[1], Value::Blob(Vec::new()));
    assert_eq!(row[2], Value::Text("blob".into()));
    assert_eq!(row[3], Value::Text(String::new()));
    assert_eq!(row[4], Value::Number(0.1 + 0.2));
}

#[tokio::test]
async fn test_script_yields_only_select_rows() {
    let mut conn = memory_conn().await;
    let rows = conn
        .sql(
            "CREATE TABLE t(x INTEGER, y TEXT);
             INSERT INTO t VALUES (1, 'one'), (2, 'two');
             SELECT x, y FROM t ORDER BY x;",
        )
        .all()
        .await
        .expect("Script failed");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].column_names(), &["x".to_string(), "y".to_string()]);
    assert_eq!(rows[0]["x"], Value::Number(1.0));
    assert_eq!(rows[1]["y"], Value::Text("two".into()));
}

#[tokio::test]
async fn test_rows_of_consecutive_selects_in_source_order() {
    let mut conn = memory_conn().await;
    conn.sql("CREATE TABLE t(a)").exec().await.unwrap();

    let rows = conn
        .sql("INSERT INTO t VALUES(1); SELECT a FROM t; SELECT count(*) FROM t;")
        .all()
        .await
        .expect("Script failed");

    let values: Vec<Value> = rows.iter().map(|row| row[0].clone()).collect();
    assert_eq!(values, vec![Value::Number(1.0), Value::Number(1.0)]);
    assert_eq!(rows[0].column_names(), &["a".to_string()]);
    assert_eq!(rows[1].column_names(), &["count(*)".to_string()]);
}

#[tokio::test]
async fn test_values_are_claimed_per_statement() {
    let mut conn = memory_conn().await;
    let query = Query::new("CREATE TABLE t(x); INSERT INTO t VALUES (")
        .bind(10)
        .sql("), (")
        .bind(20)
        .sql("); SELECT sum(x) AS total FROM t WHERE x > ")
        .bind(5);
    let row = conn.sql(query).exec().await.unwrap().unwrap();
    assert_eq!(row["total"], Value::Number(30.0));
}

#[tokio::test]
async fn test_named_parameters() {
    let mut conn = memory_conn().await;

    // A value followed by a name binds under that name.
    let query = Query::new("SELECT ").bind(7).sql(":n * 2, :n + 1");
    let row = conn.sql(query).exec().await.unwrap().unwrap();
    assert_eq!(row.values(), &[Value::Number(14.0), Value::Number(8.0)]);

    // A parameter map serves every statement after it is pulled in.
    let query = Query::new("SELECT :a, @b; SELECT $a")
        .params([("a", Value::from(1)), (":b", Value::from("bee"))]);
    let rows = conn.sql(query).all().await.unwrap();
    assert_eq!(rows[0].values(), &[Value::Number(1.0), Value::Text("bee".into())]);
    assert_eq!(rows[1][0], Value::Number(1.0));

    // Nothing supplies :missing, so it binds NULL.
    let row = conn.sql("SELECT :missing").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Null);
}

struct CreateTable;

#[async_trait]
impl SqlCommand for CreateTable {
    async fn execute(&self, conn: &mut Conn) -> Result<()> {
        conn.sql("CREATE TABLE made_by_command(x)").exec().await?;
        Ok(())
    }
}

struct Insert(i32);

#[async_trait]
impl SqlCommand for Insert {
    async fn execute(&self, conn: &mut Conn) -> Result<()> {
        conn.sql(Query::new("INSERT INTO log VALUES (").bind(self.0).sql(")"))
            .exec()
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_leading_command_runs_before_first_statement() {
    let mut conn = memory_conn().await;
    let query = Query::new("")
        .command(CreateTable)
        .sql("SELECT count(*) AS n FROM made_by_command");
    let row = conn.sql(query).exec().await.expect("Command should create the table");
    assert_eq!(row.unwrap()["n"], Value::Number(0.0));
}

#[tokio::test]
async fn test_commands_run_once_preceding_values_are_claimed() {
    let mut conn = memory_conn().await;
    let query = Query::new("CREATE TABLE log(x); INSERT INTO log VALUES (")
        .bind(0)
        .sql("); SELECT group_concat(x) AS seen, ")
        .bind("first")
        .sql(" AS tag FROM log; ")
        .command(Insert(1))
        .command(Insert(2))
        .sql("SELECT group_concat(x) AS seen FROM log");
    let rows = conn.sql(query).all().await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["seen"], Value::Text("0".into()));
    assert_eq!(rows[0]["tag"], Value::Text("first".into()));
    assert_eq!(rows[1]["seen"], Value::Text("0,1,2".into()));
}

#[tokio::test]
async fn test_commands_behind_unclaimed_values_run_at_end() {
    let mut conn = memory_conn().await;
    let query = Query::new("CREATE TABLE log(x)")
        .params([("unused", 1)])
        .command(Insert(9));
    conn.sql(query).exec().await.unwrap();

    let row = conn.sql("SELECT x FROM log").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(9.0));
}

#[tokio::test]
async fn test_open_params_as_command() {
    let mut conn = memory_conn().await;
    let query = Query::new("")
        .command(OpenParams::new("file:command-open.db").vfs("mem"))
        .sql("CREATE TABLE t(x); INSERT INTO t VALUES (1)");
    conn.sql(query).exec().await.unwrap();

    assert_eq!(conn.params().unwrap().pathname, "file:command-open.db");
    assert_eq!(conn.vfsname("main").await.unwrap().as_deref(), Some("mem"));
    let row = conn.sql("SELECT count(*) FROM t").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(1.0));
}

#[tokio::test]
async fn test_closed_connection_reopens_transparently() {
    init_logging();
    let mut conn = Conn::new().unwrap();
    assert!(!conn.is_open());
    assert_eq!(conn.filename("main").await.unwrap(), None);

    let row = conn.sql("SELECT 1").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(1.0));
    assert!(conn.is_open());

    conn.close();
    conn.close();
    assert!(!conn.is_open());
    let row = conn.sql("SELECT 2").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(2.0));
}

#[tokio::test]
async fn test_engine_errors_carry_code_and_message() {
    let mut conn = memory_conn().await;
    let err = conn.sql("SELEC 1").exec().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.code().map(primary), Some(SQLITE_ERROR));
    assert!(err.to_string().contains("syntax error"), "got: {err}");

    // The failed query leaves the connection usable.
    let row = conn.sql("SELECT 3").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(3.0));
}

#[tokio::test]
async fn test_statement_lifecycle() {
    let mut conn = memory_conn().await;
    let mut stmt = conn
        .prepare("SELECT ?, :x; SELECT 'ignored'")
        .await
        .unwrap()
        .expect("Should prepare a statement");

    assert_eq!(stmt.parameter_count(), 2);
    assert_eq!(stmt.parameter_names(), &[None, Some(":x".to_string())]);
    assert_eq!(stmt.sql().await.unwrap(), "SELECT ?, :x;");

    stmt.bind(1, None).await.unwrap();
    stmt.bind("named", Some(":x")).await.unwrap();
    let rows = stmt.rows().all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values(), &[Value::Number(1.0), Value::Text("named".into())]);

    // Reset after completion: stepping again reuses the bindings.
    let row = stmt.step().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(1.0));
    stmt.reset().await.unwrap();

    stmt.clear().await.unwrap();
    let row = stmt.step().await.unwrap().unwrap();
    assert_eq!(row.values(), &[Value::Null, Value::Null]);

    stmt.finalize().await.unwrap();
    assert!(stmt.is_finalized());
    let err = stmt.finalize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert_eq!(stmt.step().await.unwrap_err().kind(), ErrorKind::Lifecycle);
}

#[tokio::test]
async fn test_prepare_empty_text() {
    let mut conn = memory_conn().await;
    assert!(conn.prepare("  -- nothing here").await.unwrap().is_none());
    assert!(conn.sql("   ").all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_introspection() {
    let mut conn = memory_conn().await;
    assert_eq!(conn.filename("main").await.unwrap().as_deref(), Some(":memory:"));
    assert_eq!(conn.filename("nope").await.unwrap(), None);

    let names = conn.dbnames().await.unwrap().unwrap();
    assert_eq!(names[0], "main");
    assert!(names.contains(&"temp".to_string()));

    assert!(conn.vfsname("main").await.unwrap().is_some());
    // The default backend is not one of ours.
    assert!(conn.vfs("main").await.unwrap().is_none());

    assert!(conn.autocommit().await.unwrap());
    conn.sql("BEGIN").exec().await.unwrap();
    assert!(!conn.autocommit().await.unwrap());
    conn.sql("COMMIT").exec().await.unwrap();
    assert!(conn.autocommit().await.unwrap());

    assert!(!conn.interrupted().await.unwrap());
}

#[tokio::test]
async fn test_interrupt_stops_long_query() {
    let mut conn = memory_conn().await;
    let handle = conn.interrupt_handle();

    let interrupter = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.interrupt();
    });
    let err = conn
        .sql(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
             SELECT count(*) FROM c",
        )
        .exec()
        .await
        .unwrap_err();
    interrupter.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(err.to_string().contains("interrupt"), "got: {err}");
}
