//! Cancellation and deadline signal threaded through every driver call

use crate::executor::DriverError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation/deadline signal for one migrator operation
///
/// A `Context` is cheap to clone; clones share the same cancel flag. The
/// migrator checks it between migrations and drivers check it before each
/// primitive, so a cancelled run stops at the next safe point.
///
/// # Example
///
/// ```
/// use lockstep::Context;
/// use std::time::Duration;
///
/// let (ctx, cancel) = Context::with_cancel();
/// assert!(!ctx.is_done());
/// cancel.cancel();
/// assert!(ctx.is_done());
///
/// let bounded = Context::with_timeout(Duration::from_secs(60));
/// assert!(bounded.remaining().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

/// Handle that cancels every [`Context`] cloned from the one it was created with
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    ///
    /// Lock release always runs on a background context so a cancelled
    /// operation still frees the lock.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it
    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Self {
            cancelled: Some(Arc::clone(&flag)),
            deadline: None,
        };
        (ctx, CancelHandle { cancelled: flag })
    }

    /// A context that expires `timeout` from now
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: None,
            deadline: Some(deadline),
        }
    }

    /// Derive a context sharing this one's cancel flag with a (possibly) tighter deadline
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancelled: self.cancelled.clone(),
            deadline: Some(deadline),
        }
    }

    /// True once cancelled or past the deadline
    #[must_use]
    pub fn is_done(&self) -> bool {
        let cancelled = self
            .cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire));
        cancelled || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, `None` when there is no deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `Err(DriverError::Cancelled)` once the context is done.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Cancelled` if the context was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), DriverError> {
        if self.is_done() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }
}
