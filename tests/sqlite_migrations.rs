//! End-to-end migrator runs against SQLite databases
//!
//! Each test uses an in-memory database or a file in a temporary directory,
//! so nothing needs to be running.

#![cfg(feature = "sqlite")]

use lockstep::{
    Context, Driver, DriverError, Migration, MigrationError, MigrationState, Migrator,
    MigratorConfig, SqlParam, SqliteDriver, TestHarness,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn schema() -> Vec<Migration> {
    vec![
        Migration::new("1", "create_users")
            .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)")
            .down_sql("DROP TABLE users"),
        Migration::new("2", "seed_admin")
            .manual_checksum("seed-admin-v1")
            .up_fn(|_ctx, tx| {
                tx.execute(
                    "INSERT INTO users (id, email) VALUES (?1, ?2)",
                    &[SqlParam::Int(1), SqlParam::Text("admin@example.com")],
                )?;
                Ok(())
            })
            .down_fn(|_ctx, tx| tx.execute_batch("DELETE FROM users WHERE id = 1")),
        Migration::new("10", "create_posts")
            .up_sql(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL);
                 CREATE INDEX posts_user_id ON posts (user_id);",
            )
            .down_sql("DROP TABLE posts"),
    ]
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .expect("query sqlite_master")
        > 0
}

fn migrator_for(path: &Path, config: MigratorConfig) -> Migrator {
    let conn = Connection::open(path).expect("open database");
    let driver = SqliteDriver::with_config(conn, &config);
    let mut migrator = Migrator::with_config(driver, config);
    for m in schema() {
        migrator.register(m).expect("register");
    }
    migrator
}

#[test]
fn test_up_then_reset_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("app.db");
    let mut migrator = migrator_for(&path, MigratorConfig::default());
    let ctx = Context::background();

    assert_eq!(migrator.up(&ctx).expect("up"), 3);

    let conn = Connection::open(&path).expect("inspect");
    assert!(table_exists(&conn, "users"));
    assert!(table_exists(&conn, "posts"));
    let admin: String = conn
        .query_row("SELECT email FROM users WHERE id = 1", [], |row| row.get(0))
        .expect("seeded row");
    assert_eq!(admin, "admin@example.com");

    let mut stmt = conn
        .prepare("SELECT version FROM lockstep_migrations ORDER BY version")
        .expect("prepare");
    let versions = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("versions");
    drop(stmt);
    assert_eq!(versions, vec!["1", "10", "2"]);

    assert_eq!(migrator.reset(&ctx).expect("reset"), 3);
    assert!(!table_exists(&conn, "users"));
    assert!(!table_exists(&conn, "posts"));
    let remaining: i64 = conn
        .query_row("SELECT count(*) FROM lockstep_migrations", [], |row| row.get(0))
        .expect("count");
    assert_eq!(remaining, 0);
}

#[test]
fn test_failed_migration_is_not_recorded_and_earlier_ones_stay() {
    let mut migrator = Migrator::new(SqliteDriver::open_in_memory().expect("open"));
    migrator
        .register(Migration::new("001", "create_a").up_sql("CREATE TABLE a (id INT)"))
        .expect("register");
    migrator
        .register(
            Migration::new("002", "broken")
                .up_sql("CREATE TABLE b (id INT); INSERT INTO missing_table VALUES (1);"),
        )
        .expect("register");
    let ctx = Context::background();

    let err = migrator.up(&ctx).expect_err("second migration fails");
    match &err {
        MigrationError::ExecutionFailed { version, name, source } => {
            assert_eq!(version, "002");
            assert_eq!(name, "broken");
            assert!(matches!(source, DriverError::Sqlite(_)));
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }

    let status = migrator.status(&ctx).expect("status");
    assert_eq!(status[0].state, MigrationState::Applied);
    assert_eq!(status[1].state, MigrationState::Pending);

    let driver = migrator.driver_mut().expect("driver");
    let applied = driver.applied(&ctx).expect("applied");
    assert_eq!(applied.len(), 1);
}

#[test]
fn test_lock_held_by_other_connection_times_out() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("locked.db");
    let ctx = Context::background();

    let mut holder = SqliteDriver::open(&path).expect("open holder");
    holder.init(&ctx).expect("init holder");
    holder.lock(&ctx, Duration::from_secs(1)).expect("holder locks");

    let config = MigratorConfig::default().lock_timeout(Duration::from_millis(150));
    let mut migrator = migrator_for(&path, config);

    assert!(matches!(migrator.up(&ctx), Err(MigrationError::LockTimeout(_))));
    let conn = Connection::open(&path).expect("inspect");
    assert!(!table_exists(&conn, "users"));

    holder.unlock(&ctx).expect("holder unlocks");
    assert_eq!(migrator.up(&ctx).expect("up after release"), 3);

    let lock_rows: i64 = conn
        .query_row("SELECT count(*) FROM lockstep_migrations_lock", [], |row| row.get(0))
        .expect("count");
    assert_eq!(lock_rows, 0, "lock is released after the run");
}

#[test]
fn test_concurrent_migrators_share_one_database_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("shared.db");
    let busy_timeout = Duration::from_millis(100);
    let runs = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                let config = MigratorConfig::default().lock_timeout(Duration::from_secs(10));
                let conn = Connection::open(&path).expect("open database");
                let driver = SqliteDriver::with_config(conn, &config).with_busy_timeout(busy_timeout);
                let mut migrator = Migrator::with_config(driver, config);
                migrator
                    .register(
                        Migration::new("1", "create_users")
                            .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)"),
                    )
                    .expect("register");
                migrator
                    .register(
                        Migration::new("2", "slow_backfill")
                            .manual_checksum("slow-backfill-v1")
                            .up_fn(move |_ctx, tx| {
                                runs.fetch_add(1, Ordering::SeqCst);
                                tx.execute_batch("CREATE TABLE audit (id INTEGER PRIMARY KEY)")?;
                                // Hold the write transaction past the other side's busy timeout.
                                thread::sleep(busy_timeout * 4);
                                Ok(())
                            }),
                    )
                    .expect("register");
                migrator.up(&Context::background())
            })
        })
        .collect();

    let mut applied = 0;
    for worker in workers {
        match worker.join().expect("worker") {
            Ok(n) => applied += n,
            Err(MigrationError::Driver(DriverError::Sqlite(e))) => {
                panic!("migrator failed on a busy database: {e}")
            }
            Err(other) => panic!("migrator failed: {other:?}"),
        }
    }
    assert_eq!(applied, 2, "each migration runs in exactly one process");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let conn = Connection::open(&path).expect("inspect");
    let recorded: i64 = conn
        .query_row("SELECT count(*) FROM lockstep_migrations", [], |row| row.get(0))
        .expect("count");
    assert_eq!(recorded, 2);
    let lock_rows: i64 = conn
        .query_row("SELECT count(*) FROM lockstep_migrations_lock", [], |row| row.get(0))
        .expect("count");
    assert_eq!(lock_rows, 0);
}

#[test]
fn test_edited_checksum_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("drift.db");
    let mut migrator = migrator_for(&path, MigratorConfig::default());
    let ctx = Context::background();
    migrator.up(&ctx).expect("up");
    migrator.validate(&ctx).expect("clean before edit");

    let conn = Connection::open(&path).expect("inspect");
    conn.execute(
        "UPDATE lockstep_migrations SET checksum = 'edited' WHERE version IN ('1', '2')",
        [],
    )
    .expect("edit checksums");

    let status = migrator.status(&ctx).expect("status");
    assert_eq!(status[0].state, MigrationState::Modified);
    assert_eq!(status[1].state, MigrationState::Modified);
    assert_eq!(status[2].state, MigrationState::Applied);

    match migrator.validate(&ctx) {
        Err(MigrationError::ChecksumMismatch { version, stored, .. }) => {
            assert_eq!(version, "1");
            assert_eq!(stored, "edited");
        }
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }
}

#[test]
fn test_custom_table_name_from_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("custom.db");
    let config = MigratorConfig::default().table_name("schema_history");
    let mut migrator = migrator_for(&path, config);
    migrator.up_steps(&Context::background(), 1).expect("up 1");

    let conn = Connection::open(&path).expect("inspect");
    assert!(table_exists(&conn, "schema_history"));
    assert!(table_exists(&conn, "schema_history_lock"));
    assert!(!table_exists(&conn, "lockstep_migrations"));
}

#[test]
fn test_harness_against_sqlite() {
    let mut harness = TestHarness::new(SqliteDriver::open_in_memory().expect("open"));
    for m in schema() {
        harness.must_register(m);
    }
    harness.test_up_down();
    harness.must_validate();
}
