//! Test harness for migration suites
//!
//! [`TestHarness`] wraps a [`Migrator`] with a background context and turns
//! every failure into a panic carrying the error, so migration tests read as a
//! list of steps.
//!
//! ```
//! use lockstep::{MemoryDriver, Migration, TestHarness};
//!
//! let mut harness = TestHarness::new(MemoryDriver::new());
//! harness.must_register(
//!     Migration::new("001", "create_users")
//!         .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)")
//!         .down_sql("DROP TABLE users"),
//! );
//! harness.test_up_down();
//! ```

use crate::config::MigratorConfig;
use crate::context::Context;
use crate::driver::Driver;
use crate::migration::{Migration, MigrationStatus, Migrator};

/// Panicking wrapper around a [`Migrator`]
pub struct TestHarness {
    migrator: Migrator,
    ctx: Context,
}

impl TestHarness {
    /// Wrap `driver` with the default configuration and initialize it
    ///
    /// # Panics
    ///
    /// Panics if the driver fails to initialize.
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self::with_config(driver, MigratorConfig::default())
    }

    /// Wrap `driver` with `config` and initialize it
    ///
    /// # Panics
    ///
    /// Panics if the driver fails to initialize.
    pub fn with_config<D: Driver + 'static>(mut driver: D, config: MigratorConfig) -> Self {
        let ctx = Context::background();
        if let Err(e) = driver.init(&ctx) {
            panic!("failed to initialize driver: {e}");
        }
        Self {
            migrator: Migrator::with_config(driver, config),
            ctx,
        }
    }

    pub fn migrator(&mut self) -> &mut Migrator {
        &mut self.migrator
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn must_register(&mut self, migration: Migration) {
        self.migrator.must_register(migration);
    }

    /// Apply all pending migrations, returning how many ran
    pub fn must_up(&mut self) -> usize {
        self.migrator
            .up(&self.ctx)
            .unwrap_or_else(|e| panic!("failed to apply migrations: {e}"))
    }

    /// Roll back `steps` migrations, returning how many ran
    pub fn must_down(&mut self, steps: usize) -> usize {
        self.migrator
            .down(&self.ctx, steps)
            .unwrap_or_else(|e| panic!("failed to roll back migrations: {e}"))
    }

    pub fn must_reset(&mut self) -> usize {
        self.migrator
            .reset(&self.ctx)
            .unwrap_or_else(|e| panic!("failed to reset migrations: {e}"))
    }

    pub fn must_validate(&mut self) {
        if let Err(e) = self.migrator.validate(&self.ctx) {
            panic!("migration validation failed: {e}");
        }
    }

    pub fn must_status(&mut self) -> Vec<MigrationStatus> {
        self.migrator
            .status(&self.ctx)
            .unwrap_or_else(|e| panic!("failed to read migration status: {e}"))
    }

    /// Number of records the driver currently reports as applied
    pub fn applied_count(&mut self) -> usize {
        let driver = self
            .migrator
            .driver_mut()
            .unwrap_or_else(|| panic!("test harness has no driver"));
        driver
            .applied(&self.ctx)
            .unwrap_or_else(|e| panic!("failed to read applied migrations: {e}"))
            .len()
    }

    /// Apply everything, then reset, checking the driver's records at each end
    ///
    /// # Panics
    ///
    /// Panics if either direction fails, if nothing was recorded after applying,
    /// or if any record is left after the reset.
    pub fn test_up_down(&mut self) {
        self.must_up();
        let applied = self.applied_count();
        assert!(applied > 0, "no migrations were recorded as applied");

        self.must_reset();
        let left = self.applied_count();
        assert_eq!(left, 0, "{left} migration record(s) left after reset");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Err(e) = self.migrator.close() {
            log::warn!("Failed to close test harness driver: {e}");
        }
    }
}
