//! `AppliedMigration` - Represents entries in the migration tracking table

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// A migration recorded as applied in the tracking table
///
/// The checksum is a snapshot of [`Migration::checksum`](crate::Migration::checksum)
/// taken when the migration was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Migration version
    pub version: String,

    /// Human-readable migration name
    pub name: String,

    /// When the migration was applied
    pub applied_at: DateTime<Utc>,

    /// Checksum of the migration content at apply time
    pub checksum: String,
}

impl AppliedMigration {
    /// Create a new `AppliedMigration`
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        applied_at: DateTime<Utc>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            applied_at,
            checksum: checksum.into(),
        }
    }
}

/// Parse a stored `applied_at` value
///
/// Drivers that keep timestamps as text write RFC 3339, but rows written by
/// hand or by a database default may use the plain `YYYY-MM-DD HH:MM:SS` form.
/// Naive values are taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-01-20T12:00:00.250+02:00").expect("parses");
        assert_eq!(ts.hour(), 10);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_sqlite_default_format() {
        let ts = parse_timestamp("2024-01-20 12:34:56").expect("parses");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 1, 20));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (12, 34, 56));

        assert!(parse_timestamp("2024-01-20 12:34:56.789").is_some());
        assert!(parse_timestamp("2024-01-20T12:34:56").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
