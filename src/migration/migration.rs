//! Migration entity definition

use crate::context::Context;
use crate::executor::{DriverError, Executor};
use crate::migration::checksum::calculate_checksum;
use crate::migration::MigrationError;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Checksum reported by function migrations that carry no manual checksum
///
/// Stored checksums are never compared against this value, so such migrations
/// can never be reported as modified.
pub const UNCHECKED_CHECKSUM: &str = "unchecked-executable";

/// Statements that make a rollback lose data.
static DESTRUCTIVE_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)DROP TABLE|DROP DATABASE|DROP SCHEMA|TRUNCATE")
        .unwrap_or_else(|e| unreachable!("destructive keyword pattern is valid: {e}"))
});

/// Executable migration step
pub type MigrationFn =
    Arc<dyn Fn(&Context, &dyn Executor) -> Result<(), DriverError> + Send + Sync>;

/// One direction of a migration
#[derive(Clone)]
pub enum Step {
    /// Literal SQL, executed as-is (may hold several statements)
    Sql(String),
    /// Arbitrary code run against the transactional executor
    Func(MigrationFn),
}

impl Step {
    /// The literal SQL text, empty for function steps.
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            Step::Sql(sql) => sql,
            Step::Func(_) => "",
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Step::Sql(sql) if sql.is_empty())
    }

    pub(crate) fn run(&self, ctx: &Context, tx: &dyn Executor) -> Result<(), DriverError> {
        ctx.check()?;
        match self {
            Step::Sql(sql) => tx.execute_batch(sql),
            Step::Func(f) => f(ctx, tx),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Step::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A single versioned schema change
///
/// Migrations are plain values built in code. The version orders migrations
/// (naturally, see [`compare_versions`](crate::migration::compare_versions)) and
/// must be unique; the name is only descriptive.
///
/// SQL steps are checksummed automatically. Function steps cannot be inspected,
/// so give them a [`manual_checksum`](Migration::manual_checksum) and bump it
/// whenever the function changes.
///
/// # Example
///
/// ```
/// use lockstep::Migration;
///
/// let create = Migration::new("001", "create_users")
///     .up_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)")
///     .down_sql("DROP TABLE users");
/// assert!(create.has_rollback());
/// assert!(create.is_destructive());
///
/// let backfill = Migration::new("002", "normalize_emails")
///     .manual_checksum("normalize-emails-v1")
///     .up_fn(|_ctx, tx| tx.execute_batch("UPDATE users SET id = id"));
/// assert_eq!(backfill.checksum(), "normalize-emails-v1");
/// ```
#[derive(Clone)]
pub struct Migration {
    version: String,
    name: String,
    up: Option<Step>,
    down: Option<Step>,
    manual_checksum: Option<String>,
    checksum: OnceCell<String>,
}

impl Migration {
    /// Start a migration with no steps
    pub fn new(version: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            up: None,
            down: None,
            manual_checksum: None,
            checksum: OnceCell::new(),
        }
    }

    /// Forward step as literal SQL
    #[must_use]
    pub fn up_sql(mut self, sql: impl Into<String>) -> Self {
        self.up = Some(Step::Sql(sql.into()));
        self
    }

    /// Rollback step as literal SQL
    #[must_use]
    pub fn down_sql(mut self, sql: impl Into<String>) -> Self {
        self.down = Some(Step::Sql(sql.into()));
        self
    }

    /// Forward step as code
    #[must_use]
    pub fn up_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &dyn Executor) -> Result<(), DriverError> + Send + Sync + 'static,
    {
        self.up = Some(Step::Func(Arc::new(f)));
        self
    }

    /// Rollback step as code
    #[must_use]
    pub fn down_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &dyn Executor) -> Result<(), DriverError> + Send + Sync + 'static,
    {
        self.down = Some(Step::Func(Arc::new(f)));
        self
    }

    /// Explicit content fingerprint, used instead of hashing the SQL
    #[must_use]
    pub fn manual_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.manual_checksum = Some(checksum.into());
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up(&self) -> Option<&Step> {
        self.up.as_ref().filter(|step| !step.is_empty())
    }

    pub fn down(&self) -> Option<&Step> {
        self.down.as_ref().filter(|step| !step.is_empty())
    }

    /// Content fingerprint, computed on first use and cached
    ///
    /// Resolution order: the manual checksum if set, then the SHA-256 of the
    /// up and down SQL if either is non-empty, otherwise [`UNCHECKED_CHECKSUM`].
    pub fn checksum(&self) -> &str {
        self.checksum.get_or_init(|| {
            if let Some(manual) = self.manual_checksum.as_deref().filter(|c| !c.is_empty()) {
                return manual.to_string();
            }

            let up = self.up.as_ref().map_or("", Step::sql);
            let down = self.down.as_ref().map_or("", Step::sql);
            if !up.is_empty() || !down.is_empty() {
                return calculate_checksum(&[up, down]);
            }

            UNCHECKED_CHECKSUM.to_string()
        })
    }

    /// True iff a rollback step exists.
    pub fn has_rollback(&self) -> bool {
        self.down().is_some()
    }

    /// True iff the rollback SQL drops or truncates data
    ///
    /// Only the down step is inspected; forward migrations are assumed additive.
    /// Function steps are opaque and never count as destructive.
    pub fn is_destructive(&self) -> bool {
        match self.down() {
            Some(Step::Sql(sql)) => DESTRUCTIVE_SQL.is_match(sql),
            _ => false,
        }
    }

    /// Check that version, name and a forward step are present.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidMigration` naming the missing piece.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let reason = if self.version.is_empty() {
            "version is empty"
        } else if self.name.is_empty() {
            "name is empty"
        } else if self.up().is_none() {
            "no up step defined"
        } else {
            return Ok(());
        };

        Err(MigrationError::InvalidMigration {
            version: self.version.clone(),
            reason,
        })
    }

    pub(crate) fn checksum_is_checked(&self) -> bool {
        self.checksum() != UNCHECKED_CHECKSUM
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("up", &self.up)
            .field("down", &self.down)
            .field("manual_checksum", &self.manual_checksum)
            .finish_non_exhaustive()
    }
}
