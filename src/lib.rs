//! # Lockstep
//!
//! Code-defined database migrations with natural version ordering, content
//! checksums and a driver-held lock so only one process migrates at a time.
//!
//! Migrations are values built in Rust ([`Migration`]), registered with a
//! [`Migrator`], and executed through a [`Driver`]. Two drivers ship with the
//! crate: [`MemoryDriver`] and, behind the default `sqlite` feature,
//! [`SqliteDriver`].
//!
//! ```
//! use lockstep::{Context, MemoryDriver, Migration, MigrationState, Migrator};
//!
//! # fn main() -> Result<(), lockstep::MigrationError> {
//! let mut migrator = Migrator::new(MemoryDriver::new());
//! migrator.register(
//!     Migration::new("002", "add_email")
//!         .up_sql("ALTER TABLE users ADD COLUMN email TEXT")
//!         .down_sql("ALTER TABLE users DROP COLUMN email"),
//! )?;
//! migrator.register(
//!     Migration::new("001", "create_users")
//!         .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)")
//!         .down_sql("DROP TABLE users"),
//! )?;
//!
//! let ctx = Context::background();
//! migrator.up(&ctx)?;
//! assert!(migrator
//!     .status(&ctx)?
//!     .iter()
//!     .all(|s| s.state == MigrationState::Applied));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod drivers;
pub mod executor;
pub mod migration;
pub mod testing;
#[cfg(feature = "tracing")]
pub mod tracing_helpers;

pub use config::MigratorConfig;
pub use context::{CancelHandle, Context};
pub use driver::{Driver, UnitOfWork};
pub use drivers::MemoryDriver;
#[cfg(feature = "sqlite")]
pub use drivers::SqliteDriver;
pub use executor::{DriverError, Executor, SqlParam};
pub use migration::{
    AppliedMigration, Migration, MigrationError, MigrationState, MigrationStatus, Migrator,
};
pub use testing::TestHarness;
