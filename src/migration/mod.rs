//! Migration system for lockstep
//!
//! This module provides the infrastructure for code-defined migrations, including:
//! - The [`Migration`] entity and its checksum
//! - Natural ordering of version strings
//! - Migration state tracking and status reporting
//! - The [`Migrator`] that applies and rolls back migrations under a lock
//!
//! # Example
//!
//! ```rust
//! use lockstep::{Context, MemoryDriver, Migration, Migrator};
//!
//! # fn main() -> Result<(), lockstep::MigrationError> {
//! let mut migrator = Migrator::new(MemoryDriver::new());
//! migrator.register(
//!     Migration::new("001", "create_users")
//!         .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)")
//!         .down_sql("DROP TABLE users"),
//! )?;
//!
//! let ctx = Context::background();
//! assert_eq!(migrator.up(&ctx)?, 1);
//! assert_eq!(migrator.down(&ctx, 1)?, 1);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod error;
pub mod lock;
#[allow(clippy::module_inception)]
pub mod migration;
pub mod migrator;
pub mod natural;
pub mod record;
pub mod status;

pub use checksum::calculate_checksum;
pub use error::MigrationError;
pub use lock::MigrationLockGuard;
pub use migration::{Migration, MigrationFn, Step, UNCHECKED_CHECKSUM};
pub use migrator::Migrator;
pub use natural::{compare_versions, sort_versions};
pub use record::{parse_timestamp, AppliedMigration};
pub use status::{MigrationState, MigrationStatus};
