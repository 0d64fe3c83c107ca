//! In-process driver
//!
//! `MemoryDriver` keeps the tracking table, the lock and a journal of executed
//! statements in shared memory. Clones share one store but lock as different
//! owners, so two clones behave like two processes pointed at one database.
//! Nothing is actually executed; statements are journaled on commit, which is
//! what tests and dry runs need.

use crate::context::Context;
use crate::driver::{Driver, UnitOfWork};
use crate::executor::{DriverError, Executor, SqlParam};
use crate::migration::{AppliedMigration, Migration};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Faults {
    init: Option<String>,
    lock: Option<String>,
    record: Option<String>,
    statement: Option<String>,
    close: Option<String>,
}

#[derive(Debug, Default)]
struct Store {
    initialized: bool,
    applied: BTreeMap<String, AppliedMigration>,
    lock_owner: Option<u64>,
    journal: Vec<String>,
    faults: Faults,
}

/// In-memory implementation of the driver contract
#[derive(Debug)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
    owner: u64,
    closed: bool,
}

impl MemoryDriver {
    /// Create a driver with an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::attach(Arc::new(Mutex::new(Store::default())))
    }

    fn attach(store: Arc<Mutex<Store>>) -> Self {
        Self {
            store,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            closed: false,
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self, ctx: &Context) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        ctx.check()
    }

    /// Number of applied records
    pub fn applied_count(&self) -> usize {
        self.store().applied.len()
    }

    /// Whether `version` has a tracking record
    pub fn has_version(&self, version: &str) -> bool {
        self.store().applied.contains_key(version)
    }

    /// The stored record for `version`
    pub fn record_for(&self, version: &str) -> Option<AppliedMigration> {
        self.store().applied.get(version).cloned()
    }

    /// Whether any owner holds the lock
    pub fn is_locked(&self) -> bool {
        self.store().lock_owner.is_some()
    }

    /// Statements committed so far, in order
    pub fn journal(&self) -> Vec<String> {
        self.store().journal.clone()
    }

    /// Whether `init` has run against this store
    pub fn is_initialized(&self) -> bool {
        self.store().initialized
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Overwrite the stored checksum of `version`, as if its source was edited.
    ///
    /// Returns false if the version has no record.
    pub fn set_checksum(&self, version: &str, checksum: &str) -> bool {
        match self.store().applied.get_mut(version) {
            Some(record) => {
                record.checksum = checksum.to_string();
                true
            }
            None => false,
        }
    }

    /// Seed a tracking record directly.
    pub fn insert_applied(&self, record: AppliedMigration) {
        self.store().applied.insert(record.version.clone(), record);
    }

    /// Take the lock as this instance without going through a migrator.
    ///
    /// Returns false if another owner holds it.
    pub fn hold_lock(&self) -> bool {
        let mut store = self.store();
        match store.lock_owner {
            None => {
                store.lock_owner = Some(self.owner);
                true
            }
            Some(owner) => owner == self.owner,
        }
    }

    /// Release the lock if this instance holds it.
    pub fn release_lock(&self) {
        let mut store = self.store();
        if store.lock_owner == Some(self.owner) {
            store.lock_owner = None;
        }
    }

    /// Make `init` fail with `message`.
    pub fn fail_init(&self, message: &str) {
        self.store().faults.init = Some(message.to_string());
    }

    /// Make `lock` fail with `message` (not a timeout).
    pub fn fail_lock(&self, message: &str) {
        self.store().faults.lock = Some(message.to_string());
    }

    /// Make `record` fail with `message`.
    pub fn fail_record(&self, message: &str) {
        self.store().faults.record = Some(message.to_string());
    }

    /// Make `close` report `message` after it has released the lock and closed.
    pub fn fail_close(&self, message: &str) {
        self.store().faults.close = Some(message.to_string());
    }

    /// Fail any statement containing `pattern`.
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.store().faults.statement = Some(pattern.to_string());
    }

    pub fn clear_faults(&self) {
        self.store().faults = Faults::default();
    }

    /// Drop every record, the journal, the lock and all faults.
    pub fn reset(&self) {
        *self.store() = Store::default();
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryDriver {
    /// Shares the store but locks as a new owner.
    fn clone(&self) -> Self {
        Self::attach(Arc::clone(&self.store))
    }
}

impl Driver for MemoryDriver {
    fn init(&mut self, ctx: &Context) -> Result<(), DriverError> {
        self.ensure_open(ctx)?;
        let mut store = self.store();
        if let Some(message) = &store.faults.init {
            return Err(DriverError::Other(message.clone()));
        }
        store.initialized = true;
        Ok(())
    }

    fn applied(&mut self, ctx: &Context) -> Result<Vec<AppliedMigration>, DriverError> {
        self.ensure_open(ctx)?;
        let mut applied: Vec<_> = self.store().applied.values().cloned().collect();
        applied.sort_by_key(|record| record.applied_at);
        Ok(applied)
    }

    fn record(&mut self, ctx: &Context, migration: &Migration) -> Result<(), DriverError> {
        self.ensure_open(ctx)?;
        let mut store = self.store();
        if let Some(message) = &store.faults.record {
            return Err(DriverError::Other(message.clone()));
        }
        store.applied.insert(
            migration.version().to_string(),
            AppliedMigration::new(
                migration.version(),
                migration.name(),
                Utc::now(),
                migration.checksum(),
            ),
        );
        Ok(())
    }

    fn remove(&mut self, ctx: &Context, version: &str) -> Result<(), DriverError> {
        self.ensure_open(ctx)?;
        self.store().applied.remove(version);
        Ok(())
    }

    fn lock(&mut self, ctx: &Context, timeout: Duration) -> Result<(), DriverError> {
        self.ensure_open(ctx)?;
        let start = Instant::now();

        loop {
            {
                let mut store = self.store();
                if let Some(message) = &store.faults.lock {
                    return Err(DriverError::Other(message.clone()));
                }
                match store.lock_owner {
                    None => {
                        store.lock_owner = Some(self.owner);
                        return Ok(());
                    }
                    Some(owner) if owner == self.owner => return Ok(()),
                    Some(_) => {}
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DriverError::LockTimeout(timeout));
            }
            ctx.check()?;
            std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    fn unlock(&mut self, _ctx: &Context) -> Result<(), DriverError> {
        self.release_lock();
        Ok(())
    }

    fn exec(&mut self, ctx: &Context, work: &mut UnitOfWork<'_>) -> Result<(), DriverError> {
        self.ensure_open(ctx)?;
        let fail_on = self.store().faults.statement.clone();
        let tx = MemoryTransaction {
            statements: RefCell::new(Vec::new()),
            fail_on,
        };

        work(&tx)?;
        ctx.check()?;

        self.store().journal.extend(tx.statements.into_inner());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.release_lock();
        self.closed = true;
        let fault = self.store().faults.close.clone();
        match fault {
            Some(message) => Err(DriverError::Other(message)),
            None => Ok(()),
        }
    }
}

/// Buffers statements until the unit of work commits
struct MemoryTransaction {
    statements: RefCell<Vec<String>>,
    fail_on: Option<String>,
}

impl MemoryTransaction {
    fn push(&self, sql: &str) -> Result<(), DriverError> {
        if let Some(pattern) = self.fail_on.as_deref() {
            if sql.contains(pattern) {
                return Err(DriverError::Query(format!("statement rejected: {sql}")));
            }
        }
        self.statements.borrow_mut().push(sql.to_string());
        Ok(())
    }
}

impl Executor for MemoryTransaction {
    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.push(sql)
    }

    fn execute(&self, sql: &str, _params: &[SqlParam<'_>]) -> Result<u64, DriverError> {
        self.push(sql)?;
        Ok(0)
    }
}
