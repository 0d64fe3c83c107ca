//! SQLite driver backed by `rusqlite`
//!
//! The tracking table keeps one row per applied migration. Locking is
//! table-based: the holder inserts the single row of `<table>_lock` and other
//! connections poll until it is gone or their timeout runs out. A waiter
//! that finds the database busy (the holder is mid-transaction) keeps polling.

use crate::config::{MigratorConfig, DEFAULT_TABLE_NAME};
use crate::context::Context;
use crate::driver::{Driver, UnitOfWork};
use crate::executor::{DriverError, Executor, SqlParam};
use crate::migration::{parse_timestamp, AppliedMigration, Migration};
use chrono::Utc;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLITE_BUSY or SQLITE_LOCKED: another connection holds the write lock.
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Quote an identifier for SQLite, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Driver for a single `rusqlite::Connection`
///
/// # Example
///
/// ```
/// use lockstep::{Context, Migration, Migrator, SqliteDriver};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut migrator = Migrator::new(SqliteDriver::open_in_memory()?);
/// migrator.register(
///     Migration::new("001", "create_users")
///         .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)")
///         .down_sql("DROP TABLE users"),
/// )?;
/// migrator.up(&Context::background())?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteDriver {
    conn: Option<Connection>,
    table_name: String,
    table: String,
    lock_table: String,
    owner: String,
    holds_lock: bool,
    busy_timeout: Duration,
}

impl SqliteDriver {
    /// Wrap `conn`, tracking migrations in the default table
    pub fn new(conn: Connection) -> Self {
        Self::with_table(conn, DEFAULT_TABLE_NAME)
    }

    /// Wrap `conn`, tracking migrations in `table`
    ///
    /// The lock lives in `<table>_lock`. An empty name falls back to the default.
    pub fn with_table(conn: Connection, table: &str) -> Self {
        let table = if table.is_empty() {
            DEFAULT_TABLE_NAME
        } else {
            table
        };
        Self {
            conn: Some(conn),
            table_name: table.to_string(),
            table: quote_ident(table),
            lock_table: quote_ident(&format!("{table}_lock")),
            owner: uuid::Uuid::new_v4().to_string(),
            holds_lock: false,
            busy_timeout: BUSY_TIMEOUT,
        }
    }

    /// How long one statement waits on another connection's write lock
    ///
    /// Applied by `init`. Defaults to 5 seconds. Waiting for the migration
    /// lock is bounded by the lock timeout instead.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Wrap `conn` using the table name from `config`
    pub fn with_config(conn: Connection, config: &MigratorConfig) -> Self {
        Self::with_table(conn, &config.table_name)
    }

    /// Open (or create) the database file at `path`
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Sqlite` if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        Ok(Self::new(Connection::open(path)?))
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Sqlite` if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, DriverError> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// The underlying connection, `None` after `close()`
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn conn(&mut self, ctx: &Context) -> Result<&mut Connection, DriverError> {
        let conn = self.conn.as_mut().ok_or(DriverError::Closed)?;
        ctx.check()?;
        Ok(conn)
    }

    fn release(&mut self) -> Result<(), DriverError> {
        if !self.holds_lock {
            return Ok(());
        }
        if let Some(conn) = self.conn.as_ref() {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = 1 AND owner = ?1", self.lock_table),
                params![self.owner],
            )?;
        }
        self.holds_lock = false;
        Ok(())
    }
}

impl Driver for SqliteDriver {
    fn init(&mut self, ctx: &Context) -> Result<(), DriverError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                checksum TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {lock} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );",
            table = self.table,
            lock = self.lock_table,
        );

        let table_name = self.table_name.clone();
        let lock_name = format!("{table_name}_lock");
        let busy_timeout = self.busy_timeout;
        let conn = self.conn(ctx)?;
        conn.busy_timeout(busy_timeout)?;

        // Skip the DDL when both tables exist so a waiting process does not
        // need the write lock while another one migrates.
        let existing: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
            params![table_name, lock_name],
            |row| row.get(0),
        )?;
        if existing < 2 {
            conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    fn applied(&mut self, ctx: &Context) -> Result<Vec<AppliedMigration>, DriverError> {
        let sql = format!(
            "SELECT version, name, applied_at, checksum FROM {} ORDER BY applied_at",
            self.table
        );
        let conn = self.conn(ctx)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, name, raw_applied_at, checksum)| {
                let applied_at = parse_timestamp(&raw_applied_at).ok_or_else(|| {
                    DriverError::Query(format!(
                        "unreadable applied_at '{raw_applied_at}' for version {version}"
                    ))
                })?;
                Ok(AppliedMigration {
                    version,
                    name,
                    applied_at,
                    checksum,
                })
            })
            .collect()
    }

    fn record(&mut self, ctx: &Context, migration: &Migration) -> Result<(), DriverError> {
        let sql = format!(
            "INSERT INTO {} (version, name, applied_at, checksum) VALUES (?1, ?2, ?3, ?4)",
            self.table
        );
        let conn = self.conn(ctx)?;
        conn.execute(
            &sql,
            params![
                migration.version(),
                migration.name(),
                Utc::now().to_rfc3339(),
                migration.checksum(),
            ],
        )?;
        Ok(())
    }

    fn remove(&mut self, ctx: &Context, version: &str) -> Result<(), DriverError> {
        let sql = format!("DELETE FROM {} WHERE version = ?1", self.table);
        let conn = self.conn(ctx)?;
        conn.execute(&sql, params![version])?;
        Ok(())
    }

    fn lock(&mut self, ctx: &Context, timeout: Duration) -> Result<(), DriverError> {
        let insert = format!(
            "INSERT OR IGNORE INTO {} (id, owner, acquired_at) VALUES (1, ?1, ?2)",
            self.lock_table
        );
        let current = format!("SELECT owner FROM {} WHERE id = 1", self.lock_table);
        let owner = self.owner.clone();
        let busy_timeout = self.busy_timeout;
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            let conn = self.conn(ctx)?;
            conn.busy_timeout(LOCK_POLL_INTERVAL.min(remaining))?;
            let attempt = try_acquire(conn, &insert, &current, &owner);
            conn.busy_timeout(busy_timeout)?;

            match attempt {
                Ok(true) => {
                    self.holds_lock = true;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) if is_busy(&e) => log::debug!("Database busy while polling migration lock"),
                Err(e) => return Err(e.into()),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DriverError::LockTimeout(timeout));
            }
            std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    fn unlock(&mut self, _ctx: &Context) -> Result<(), DriverError> {
        self.release()
    }

    fn exec(&mut self, ctx: &Context, work: &mut UnitOfWork<'_>) -> Result<(), DriverError> {
        let conn = self.conn(ctx)?;
        let tx = conn.transaction()?;

        // Dropping `tx` on an early return rolls it back.
        work(&SqliteExecutor { conn: &tx })?;
        ctx.check()?;

        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if let Err(e) = self.release() {
            log::warn!("Failed to release migration lock on close: {e}");
        }
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| DriverError::Sqlite(e)),
            None => Ok(()),
        }
    }
}

/// One attempt at the lock row. `Ok(true)` when `owner` holds it afterwards.
fn try_acquire(
    conn: &Connection,
    insert: &str,
    current: &str,
    owner: &str,
) -> rusqlite::Result<bool> {
    if conn.execute(insert, params![owner, Utc::now().to_rfc3339()])? > 0 {
        return Ok(true);
    }
    let holder = conn
        .query_row(current, [], |row| row.get::<_, String>(0))
        .optional()?;
    Ok(holder.as_deref() == Some(owner))
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("table", &self.table)
            .field("owner", &self.owner)
            .field("holds_lock", &self.holds_lock)
            .field("closed", &self.conn.is_none())
            .finish()
    }
}

/// Executor over an open rusqlite transaction
struct SqliteExecutor<'a> {
    conn: &'a Connection,
}

impl Executor for SqliteExecutor<'_> {
    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[SqlParam<'_>]) -> Result<u64, DriverError> {
        let affected = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }
}

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match *self {
            SqlParam::Null => ToSqlOutput::Owned(Value::Null),
            SqlParam::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(b))),
            SqlParam::Int(i) => ToSqlOutput::Owned(Value::Integer(i)),
            SqlParam::Float(f) => ToSqlOutput::Owned(Value::Real(f)),
            SqlParam::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}
