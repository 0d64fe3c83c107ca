//! Migration-specific error types

use crate::executor::DriverError;
use std::time::Duration;

/// Migration-specific errors
///
/// Every failure the migrator can report is its own variant, so callers (or a
/// CLI wrapping the migrator) can match on the kind instead of parsing messages.
#[derive(Debug)]
pub enum MigrationError {
    /// No driver attached to the migrator
    NoDriver,
    /// Nothing registered
    NoMigrations,
    /// Migration is missing its version, name or forward step
    InvalidMigration {
        version: String,
        reason: &'static str,
    },
    /// Another registered migration already uses this version
    DuplicateVersion { version: String },
    /// Migration lock timeout
    LockTimeout(Duration),
    /// The operation's context was cancelled before it finished
    Cancelled,
    /// Rollback requested for a migration without a down step
    NoRollback { version: String, name: String },
    /// Migration failed while executing or while updating its tracking record
    ExecutionFailed {
        version: String,
        name: String,
        source: DriverError,
    },
    /// Checksum mismatch
    ChecksumMismatch {
        version: String,
        stored: String,
        current: String,
    },
    /// Driver error outside any single migration
    Driver(DriverError),
}

impl MigrationError {
    /// Version of the migration the error is about, if any
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::InvalidMigration { version, .. }
            | MigrationError::DuplicateVersion { version }
            | MigrationError::NoRollback { version, .. }
            | MigrationError::ExecutionFailed { version, .. }
            | MigrationError::ChecksumMismatch { version, .. } => Some(version),
            _ => None,
        }
    }

    /// True for cancellation, whether raised between migrations or by the driver mid-step
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            MigrationError::Cancelled
                | MigrationError::ExecutionFailed {
                    source: DriverError::Cancelled,
                    ..
                }
        )
    }
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::NoDriver => write!(f, "No driver attached to the migrator"),
            MigrationError::NoMigrations => write!(f, "No migrations registered"),
            MigrationError::InvalidMigration { version, reason } => {
                write!(f, "Invalid migration '{}': {}", version, reason)
            }
            MigrationError::DuplicateVersion { version } => {
                write!(f, "Migration version {} is already registered", version)
            }
            MigrationError::LockTimeout(timeout) => {
                write!(
                    f,
                    "Migration lock timeout: not acquired within {:?}\n\
                     Another process may be running migrations. If this persists, check for:\n\
                     - Stuck migration process\n\
                     - Database connection issues\n\
                     - A stale row in the migration lock table",
                    timeout
                )
            }
            MigrationError::Cancelled => write!(f, "Migration run cancelled"),
            MigrationError::NoRollback { version, name } => {
                write!(
                    f,
                    "Migration '{}' (version {}) has no down step and cannot be rolled back",
                    name, version
                )
            }
            MigrationError::ExecutionFailed { version, name, source } => {
                write!(
                    f,
                    "Migration '{}' (version {}) failed during execution: {}",
                    name, version, source
                )
            }
            MigrationError::ChecksumMismatch {
                version,
                stored,
                current,
            } => {
                write!(
                    f,
                    "Migration version {} has been modified after being applied.\n\
                     Stored checksum: {}\n\
                     Current checksum: {}\n\
                     Bump the manual checksum or restore the original migration.",
                    version, stored, current
                )
            }
            MigrationError::Driver(e) => write!(f, "Driver error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::ExecutionFailed { source, .. } => Some(source),
            MigrationError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for MigrationError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::LockTimeout(timeout) => MigrationError::LockTimeout(timeout),
            DriverError::Cancelled => MigrationError::Cancelled,
            other => MigrationError::Driver(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_driver_errors_map_to_distinct_kinds() {
        assert!(matches!(
            MigrationError::from(DriverError::LockTimeout(Duration::from_secs(1))),
            MigrationError::LockTimeout(_)
        ));
        assert!(matches!(
            MigrationError::from(DriverError::Cancelled),
            MigrationError::Cancelled
        ));
        assert!(matches!(
            MigrationError::from(DriverError::Query("x".into())),
            MigrationError::Driver(DriverError::Query(_))
        ));
    }

    #[test]
    fn test_execution_failed_message_and_source() {
        let err = MigrationError::ExecutionFailed {
            version: "002".into(),
            name: "add_index".into(),
            source: DriverError::Query("syntax error".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("002"));
        assert!(msg.contains("add_index"));
        assert!(msg.contains("syntax error"));
        assert!(err.source().is_some());
        assert_eq!(err.version(), Some("002"));
    }

    #[test]
    fn test_checksum_mismatch_names_both_checksums() {
        let err = MigrationError::ChecksumMismatch {
            version: "001".into(),
            stored: "aaa".into(),
            current: "bbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("001") && msg.contains("aaa") && msg.contains("bbb"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(MigrationError::Cancelled.is_cancelled());
        assert!(MigrationError::ExecutionFailed {
            version: "1".into(),
            name: "n".into(),
            source: DriverError::Cancelled,
        }
        .is_cancelled());
        assert!(!MigrationError::NoDriver.is_cancelled());
    }
}
