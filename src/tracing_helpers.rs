//! Span constructors for migrator operations
//!
//! Only compiled with the `tracing` feature. Callers enter the span for the
//! duration of the work it describes.

use tracing::Span;

/// Span covering one migrator operation (`up`, `down`, `reset`, `status`, `validate`)
pub fn operation_span(operation: &'static str, table: &str) -> Span {
    tracing::info_span!("lockstep_operation", operation, table = %table)
}

/// Span covering one migration step in either direction
pub fn migration_span(direction: &'static str, version: &str, name: &str) -> Span {
    tracing::info_span!(
        "lockstep_migration",
        direction,
        version = %version,
        name = %name
    )
}
