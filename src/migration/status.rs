//! Migration status reporting

use crate::migration::{AppliedMigration, Migration};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Where a registered migration stands against the tracking table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Not applied yet
    Pending,
    /// Applied, and the stored checksum matches
    Applied,
    /// Applied, but the migration's content changed since
    Modified,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MigrationState::Pending => "pending",
            MigrationState::Applied => "applied",
            MigrationState::Modified => "modified",
        };
        f.write_str(label)
    }
}

/// Status of one registered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub state: MigrationState,

    /// When it was applied (`None` while pending)
    pub applied_at: Option<DateTime<Utc>>,

    /// The migration's current checksum
    pub checksum: String,

    pub has_rollback: bool,

    /// Whether the rollback SQL drops or truncates data
    pub destructive: bool,
}

impl MigrationStatus {
    /// Classify `migration` given its tracking record, if any
    ///
    /// A stored checksum that differs from the current one marks the migration
    /// [`MigrationState::Modified`], except for unchecked function migrations.
    #[must_use]
    pub fn classify(migration: &Migration, applied: Option<&AppliedMigration>) -> Self {
        let state = match applied {
            None => MigrationState::Pending,
            Some(record) if is_drifted(migration, record) => MigrationState::Modified,
            Some(_) => MigrationState::Applied,
        };

        Self {
            version: migration.version().to_string(),
            name: migration.name().to_string(),
            state,
            applied_at: applied.map(|record| record.applied_at),
            checksum: migration.checksum().to_string(),
            has_rollback: migration.has_rollback(),
            destructive: migration.is_destructive(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == MigrationState::Pending
    }
}

/// True when the stored checksum no longer matches a checksummed migration.
pub(crate) fn is_drifted(migration: &Migration, record: &AppliedMigration) -> bool {
    migration.checksum_is_checked() && record.checksum != migration.checksum()
}
