//! Executor Module
//!
//! Provides the [`Executor`] trait handed to migration steps while a driver holds
//! a transaction open, and the [`DriverError`] type every driver primitive returns.
//!
//! The executor is deliberately small: literal SQL steps only need
//! [`Executor::execute_batch`], and function steps that move data around can bind
//! parameters through [`Executor::execute`].

use std::fmt;
use std::time::Duration;

/// Driver-level error type
#[derive(Debug)]
pub enum DriverError {
    /// SQLite error from `rusqlite`
    #[cfg(feature = "sqlite")]
    Sqlite(rusqlite::Error),
    /// Statement execution error
    Query(String),
    /// The migration lock could not be acquired in time
    LockTimeout(Duration),
    /// The operation's context was cancelled or its deadline passed
    Cancelled,
    /// The driver was used after `close()`
    Closed,
    /// Other driver errors
    Other(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "sqlite")]
            DriverError::Sqlite(e) => {
                write!(f, "SQLite error: {e}")
            }
            DriverError::Query(s) => {
                write!(f, "Query error: {s}")
            }
            DriverError::LockTimeout(timeout) => {
                write!(f, "Lock not acquired within {timeout:?}")
            }
            DriverError::Cancelled => {
                write!(f, "Operation cancelled")
            }
            DriverError::Closed => {
                write!(f, "Driver is closed")
            }
            DriverError::Other(s) => {
                write!(f, "Driver error: {s}")
            }
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "sqlite")]
            DriverError::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        DriverError::Sqlite(err)
    }
}

/// A bound statement parameter
///
/// Drivers translate these into their native parameter types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlParam<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'a str),
}

impl<'a> From<&'a str> for SqlParam<'a> {
    fn from(value: &'a str) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam<'_> {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<bool> for SqlParam<'_> {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

impl From<f64> for SqlParam<'_> {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

/// Transactional handle passed to migration steps
///
/// Every statement issued through an `Executor` belongs to the unit of work the
/// driver opened in [`Driver::exec`](crate::Driver::exec): it commits if the step
/// returns `Ok` and rolls back otherwise.
///
/// # Examples
///
/// ```
/// use lockstep::{DriverError, Executor, SqlParam};
///
/// fn normalize_emails(tx: &dyn Executor) -> Result<(), DriverError> {
///     tx.execute(
///         "UPDATE users SET email = lower(email) WHERE email <> lower(email) AND id > ?1",
///         &[SqlParam::Int(0)],
///     )?;
///     Ok(())
/// }
/// ```
pub trait Executor {
    /// Execute one or more statements without parameters
    ///
    /// Literal SQL migration steps are run through this method, so a step may
    /// contain several `;`-separated statements.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if any statement fails.
    fn execute_batch(&self, sql: &str) -> Result<(), DriverError>;

    /// Execute a single statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if the statement fails.
    fn execute(&self, sql: &str, params: &[SqlParam<'_>]) -> Result<u64, DriverError>;
}
