//! Storage driver contract consumed by the [`Migrator`](crate::Migrator)

use crate::context::Context;
use crate::executor::{DriverError, Executor};
use crate::migration::{AppliedMigration, Migration};
use std::time::Duration;

/// Unit of work run inside a driver transaction
pub type UnitOfWork<'a> = dyn FnMut(&dyn Executor) -> Result<(), DriverError> + 'a;

/// Storage-specific persistence, locking and transaction primitives
///
/// A driver owns the tracking table and the connection it lives in. The
/// migrator calls these methods strictly sequentially from one operation at a
/// time; drivers do not need to be re-entrant.
///
/// Every method that touches storage receives the operation's [`Context`] and
/// should return [`DriverError::Cancelled`] if it is already done.
pub trait Driver {
    /// Ensure the tracking storage exists. Must be idempotent.
    fn init(&mut self, ctx: &Context) -> Result<(), DriverError>;

    /// All applied records, in any order.
    fn applied(&mut self, ctx: &Context) -> Result<Vec<AppliedMigration>, DriverError>;

    /// Persist version, name, current timestamp and `migration.checksum()`.
    fn record(&mut self, ctx: &Context, migration: &Migration) -> Result<(), DriverError>;

    /// Delete the tracking record for `version`.
    fn remove(&mut self, ctx: &Context, version: &str) -> Result<(), DriverError>;

    /// Acquire the exclusive, process-external migration lock
    ///
    /// Returns [`DriverError::LockTimeout`] if the lock is still held elsewhere
    /// after `timeout`.
    fn lock(&mut self, ctx: &Context, timeout: Duration) -> Result<(), DriverError>;

    /// Release the migration lock. Safe to call when no lock is held.
    fn unlock(&mut self, ctx: &Context) -> Result<(), DriverError>;

    /// Run `work` inside a transaction
    ///
    /// Commits when `work` returns `Ok`, rolls back and propagates the error otherwise.
    fn exec(&mut self, ctx: &Context, work: &mut UnitOfWork<'_>) -> Result<(), DriverError>;

    /// Release the underlying connection resources.
    fn close(&mut self) -> Result<(), DriverError>;
}
