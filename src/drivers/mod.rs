//! Driver implementations shipped with lockstep
//!
//! - [`MemoryDriver`] keeps everything in process memory, for tests and dry runs.
//! - [`SqliteDriver`] (feature `sqlite`) persists to a SQLite database.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;
