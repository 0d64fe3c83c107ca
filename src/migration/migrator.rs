//! Migrator - Core migration execution engine

use crate::config::MigratorConfig;
use crate::context::Context;
use crate::driver::Driver;
use crate::executor::{DriverError, Executor};
use crate::migration::status::is_drifted;
use crate::migration::{
    sort_versions, AppliedMigration, Migration, MigrationError, MigrationLockGuard,
    MigrationStatus,
};
#[cfg(feature = "tracing")]
use crate::tracing_helpers;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Core migration execution engine
///
/// The `Migrator` owns the registered migrations, the driver and a cache of
/// what the driver reports as applied. Every mutating operation follows the
/// same sequence: initialize storage, take the lock (unless
/// [`skip_lock`](MigratorConfig::skip_lock) is set), reload the cache, then
/// run the work set one migration at a time in natural version order.
///
/// Operations stop at the first failure. Migrations committed before it stay
/// committed.
///
/// One operation at a time: the migrator is not meant to be shared between
/// threads while an operation runs. Cross-process exclusion comes from the
/// driver's lock.
pub struct Migrator {
    driver: Option<Box<dyn Driver>>,
    migrations: Vec<Migration>,
    config: MigratorConfig,
    applied: HashMap<String, AppliedMigration>,
}

impl Migrator {
    /// Create a migrator with the default configuration
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self::with_config(driver, MigratorConfig::default())
    }

    /// Create a migrator with `config` (normalized)
    pub fn with_config<D: Driver + 'static>(driver: D, config: MigratorConfig) -> Self {
        Self {
            driver: Some(Box::new(driver)),
            ..Self::detached(config)
        }
    }

    /// Create a migrator without a driver
    ///
    /// Only [`validate`](Self::validate) is useful on a detached migrator; the
    /// other operations fail with [`MigrationError::NoDriver`].
    pub fn detached(config: MigratorConfig) -> Self {
        Self {
            driver: None,
            migrations: Vec::new(),
            config: config.normalized(),
            applied: HashMap::new(),
        }
    }

    /// Add a migration to the registry
    ///
    /// Registration order does not matter; operations sort by version.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidMigration` if the migration is missing its
    /// version, name or up step, and `MigrationError::DuplicateVersion` if the
    /// version is already registered. The registry is unchanged on error.
    pub fn register(&mut self, migration: Migration) -> Result<(), MigrationError> {
        migration.validate()?;

        if self
            .migrations
            .iter()
            .any(|existing| existing.version() == migration.version())
        {
            return Err(MigrationError::DuplicateVersion {
                version: migration.version().to_string(),
            });
        }

        log::debug!(
            "Registered migration {} ({})",
            migration.version(),
            migration.name()
        );
        self.migrations.push(migration);
        Ok(())
    }

    /// Like [`register`](Self::register), but panics on error
    ///
    /// Meant for static registration at startup where a bad migration is a
    /// programming error.
    ///
    /// # Panics
    ///
    /// Panics if the migration is invalid or its version is already registered.
    pub fn must_register(&mut self, migration: Migration) {
        if let Err(e) = self.register(migration) {
            panic!("failed to register migration: {e}");
        }
    }

    /// Registered migrations in registration order
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Configuration in use, after normalization
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// The attached driver, if any
    pub fn driver_mut(&mut self) -> Option<&mut (dyn Driver + 'static)> {
        self.driver.as_deref_mut()
    }

    /// Apply every pending migration
    ///
    /// Returns the number of migrations applied.
    ///
    /// # Errors
    ///
    /// See [`up_steps`](Self::up_steps).
    pub fn up(&mut self, ctx: &Context) -> Result<usize, MigrationError> {
        self.up_steps(ctx, 0)
    }

    /// Apply up to `steps` pending migrations in ascending version order
    ///
    /// `steps == 0` applies all of them. Returns the number applied.
    ///
    /// # Errors
    ///
    /// - `NoDriver` / `NoMigrations` before anything is touched
    /// - `LockTimeout` if another process holds the lock
    /// - `Cancelled` if `ctx` is done before a migration starts
    /// - `ExecutionFailed` naming the first migration whose step or record failed
    pub fn up_steps(&mut self, ctx: &Context, steps: usize) -> Result<usize, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span("up", &self.config.table_name).entered();

        let driver = self.driver.as_deref_mut().ok_or(MigrationError::NoDriver)?;
        if self.migrations.is_empty() {
            return Err(MigrationError::NoMigrations);
        }

        let mut driver = prepare(driver, &self.config, ctx)?;
        reload(&mut *driver, ctx, &mut self.applied)?;

        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| !self.applied.contains_key(m.version()))
            .collect();
        sort_versions(&mut pending, |m| m.version());
        if steps > 0 {
            pending.truncate(steps);
        }

        if pending.is_empty() {
            log::info!("No pending migrations");
            return Ok(0);
        }

        let mut count = 0;
        for migration in pending {
            ctx.check()?;
            apply(&mut *driver, ctx, migration, &mut self.applied)?;
            count += 1;
        }

        log::info!("Applied {} migration(s)", count);
        Ok(count)
    }

    /// Roll back the `steps` most recent applied migrations, newest version first
    ///
    /// `steps == 0` rolls back one. Returns the number rolled back.
    ///
    /// # Errors
    ///
    /// - `NoDriver` before anything is touched
    /// - `NoRollback` if any migration in the work set has no down step; nothing
    ///   is rolled back in that case
    /// - `LockTimeout`, `Cancelled`, `ExecutionFailed` as for [`up_steps`](Self::up_steps)
    pub fn down(&mut self, ctx: &Context, steps: usize) -> Result<usize, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span("down", &self.config.table_name).entered();

        self.roll_back(ctx, Some(steps.max(1)))
    }

    /// Roll back every applied migration
    ///
    /// # Errors
    ///
    /// Same as [`down`](Self::down).
    pub fn reset(&mut self, ctx: &Context) -> Result<usize, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span("reset", &self.config.table_name).entered();

        self.roll_back(ctx, None)
    }

    /// Shared backward path, `None` meaning every applied migration.
    fn roll_back(&mut self, ctx: &Context, limit: Option<usize>) -> Result<usize, MigrationError> {
        let driver = self.driver.as_deref_mut().ok_or(MigrationError::NoDriver)?;

        let mut driver = prepare(driver, &self.config, ctx)?;
        reload(&mut *driver, ctx, &mut self.applied)?;

        let mut work: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| self.applied.contains_key(m.version()))
            .collect();
        sort_versions(&mut work, |m| m.version());
        work.reverse();
        if let Some(limit) = limit {
            work.truncate(limit);
        }

        if work.is_empty() {
            log::info!("No applied migrations to roll back");
            return Ok(0);
        }

        if let Some(missing) = work.iter().find(|m| !m.has_rollback()) {
            return Err(MigrationError::NoRollback {
                version: missing.version().to_string(),
                name: missing.name().to_string(),
            });
        }

        let mut count = 0;
        for migration in work {
            ctx.check()?;
            revert(&mut *driver, ctx, migration, &mut self.applied)?;
            count += 1;
        }

        log::info!("Rolled back {} migration(s)", count);
        Ok(count)
    }

    /// Report every registered migration, in registration order
    ///
    /// Reads live state through the driver without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `NoDriver` without a driver, or the driver's error.
    pub fn status(&mut self, ctx: &Context) -> Result<Vec<MigrationStatus>, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span("status", &self.config.table_name).entered();

        let driver = self.driver.as_deref_mut().ok_or(MigrationError::NoDriver)?;
        driver.init(ctx)?;
        reload(driver, ctx, &mut self.applied)?;

        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus::classify(m, self.applied.get(m.version())))
            .collect())
    }

    /// Check the registry, then (with a driver) the stored checksums
    ///
    /// The in-memory checks run without a driver. Nothing is written.
    ///
    /// # Errors
    ///
    /// - `NoMigrations` for an empty registry
    /// - `InvalidMigration` / `DuplicateVersion` for a malformed registry
    /// - `ChecksumMismatch` for the first applied migration whose content changed
    pub fn validate(&mut self, ctx: &Context) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span("validate", &self.config.table_name).entered();

        if self.migrations.is_empty() {
            return Err(MigrationError::NoMigrations);
        }

        let mut seen = HashSet::with_capacity(self.migrations.len());
        for migration in &self.migrations {
            migration.validate()?;
            if !seen.insert(migration.version()) {
                return Err(MigrationError::DuplicateVersion {
                    version: migration.version().to_string(),
                });
            }
        }

        let Some(driver) = self.driver.as_deref_mut() else {
            return Ok(());
        };
        driver.init(ctx)?;
        reload(driver, ctx, &mut self.applied)?;

        for migration in &self.migrations {
            if let Some(record) = self.applied.get(migration.version()) {
                if is_drifted(migration, record) {
                    return Err(MigrationError::ChecksumMismatch {
                        version: migration.version().to_string(),
                        stored: record.checksum.clone(),
                        current: migration.checksum().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Close the driver. A detached migrator has nothing to close.
    ///
    /// # Errors
    ///
    /// Returns the driver's close error.
    pub fn close(&mut self) -> Result<(), MigrationError> {
        match self.driver.as_deref_mut() {
            Some(driver) => driver.close().map_err(MigrationError::Driver),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("has_driver", &self.driver.is_some())
            .field("migrations", &self.migrations.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize storage and take the lock unless it is disabled.
fn prepare<'a>(
    driver: &'a mut dyn Driver,
    config: &MigratorConfig,
    ctx: &Context,
) -> Result<MigrationLockGuard<'a>, MigrationError> {
    driver.init(ctx)?;
    if config.skip_lock {
        log::debug!("Migration lock disabled by configuration");
        return Ok(MigrationLockGuard::unlocked(driver));
    }
    MigrationLockGuard::acquire(driver, ctx, config.lock_timeout)
}

/// Replace the cache with what the driver reports.
fn reload(
    driver: &mut dyn Driver,
    ctx: &Context,
    cache: &mut HashMap<String, AppliedMigration>,
) -> Result<(), MigrationError> {
    let applied = driver.applied(ctx)?;
    log::debug!("Loaded {} applied migration record(s)", applied.len());

    cache.clear();
    cache.extend(applied.into_iter().map(|a| (a.version.clone(), a)));
    Ok(())
}

fn failed(migration: &Migration, source: DriverError) -> MigrationError {
    MigrationError::ExecutionFailed {
        version: migration.version().to_string(),
        name: migration.name().to_string(),
        source,
    }
}

fn apply(
    driver: &mut dyn Driver,
    ctx: &Context,
    migration: &Migration,
    cache: &mut HashMap<String, AppliedMigration>,
) -> Result<(), MigrationError> {
    #[cfg(feature = "tracing")]
    let _span =
        tracing_helpers::migration_span("up", migration.version(), migration.name()).entered();

    let step = migration.up().ok_or_else(|| MigrationError::InvalidMigration {
        version: migration.version().to_string(),
        reason: "no up step defined",
    })?;

    let start = Instant::now();
    driver
        .exec(ctx, &mut |tx: &dyn Executor| step.run(ctx, tx))
        .map_err(|e| failed(migration, e))?;
    driver
        .record(ctx, migration)
        .map_err(|e| failed(migration, e))?;

    cache.insert(
        migration.version().to_string(),
        AppliedMigration::new(
            migration.version(),
            migration.name(),
            Utc::now(),
            migration.checksum(),
        ),
    );

    log::info!(
        "Applied migration {} ({}) in {:?}",
        migration.version(),
        migration.name(),
        start.elapsed()
    );
    Ok(())
}

fn revert(
    driver: &mut dyn Driver,
    ctx: &Context,
    migration: &Migration,
    cache: &mut HashMap<String, AppliedMigration>,
) -> Result<(), MigrationError> {
    #[cfg(feature = "tracing")]
    let _span =
        tracing_helpers::migration_span("down", migration.version(), migration.name()).entered();

    let step = migration.down().ok_or_else(|| MigrationError::NoRollback {
        version: migration.version().to_string(),
        name: migration.name().to_string(),
    })?;

    let start = Instant::now();
    driver
        .exec(ctx, &mut |tx: &dyn Executor| step.run(ctx, tx))
        .map_err(|e| failed(migration, e))?;
    driver
        .remove(ctx, migration.version())
        .map_err(|e| failed(migration, e))?;

    cache.remove(migration.version());

    log::info!(
        "Rolled back migration {} ({}) in {:?}",
        migration.version(),
        migration.name(),
        start.elapsed()
    );
    Ok(())
}
