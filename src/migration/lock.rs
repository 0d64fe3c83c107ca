//! Scoped migration lock

use crate::context::Context;
use crate::driver::Driver;
use crate::migration::MigrationError;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Lock guard that automatically releases the lock when dropped
///
/// This ensures that locks are always released, even if an error occurs or the
/// operation's context is cancelled: release runs on [`Context::background`].
/// The guard hands out the driver it locked so the operation can keep using it.
pub struct MigrationLockGuard<'a> {
    driver: &'a mut dyn Driver,
    held: bool,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the driver's migration lock and create guard
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if the lock cannot be acquired within
    /// `timeout`, or whatever the driver reported otherwise. Nothing is released
    /// on failure since nothing was acquired.
    pub fn acquire(
        driver: &'a mut dyn Driver,
        ctx: &Context,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        driver.lock(ctx, timeout)?;
        log::debug!("Acquired migration lock");

        Ok(Self { driver, held: true })
    }

    /// Wrap a driver without locking (the `skip_lock` configuration)
    pub fn unlocked(driver: &'a mut dyn Driver) -> Self {
        Self {
            driver,
            held: false,
        }
    }

    /// Whether this guard holds the lock.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<'a> Deref for MigrationLockGuard<'a> {
    type Target = dyn Driver + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.driver
    }
}

impl<'a> DerefMut for MigrationLockGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.driver
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }

        // A failed release must not mask the operation's own result.
        match self.driver.unlock(&Context::background()) {
            Ok(()) => log::debug!("Released migration lock"),
            Err(e) => log::warn!("Failed to release migration lock: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryDriver;

    #[test]
    fn test_guard_releases_on_drop() {
        let mut driver = MemoryDriver::new();
        let observer = driver.clone();
        {
            let guard = MigrationLockGuard::acquire(
                &mut driver,
                &Context::background(),
                Duration::from_millis(10),
            )
            .expect("lock");
            assert!(guard.is_held());
            assert!(observer.is_locked());
        }
        assert!(!observer.is_locked());
    }

    #[test]
    fn test_guard_releases_even_when_operation_context_cancelled() {
        let mut driver = MemoryDriver::new();
        let observer = driver.clone();
        let (ctx, cancel) = Context::with_cancel();
        {
            let _guard =
                MigrationLockGuard::acquire(&mut driver, &ctx, Duration::from_millis(10)).expect("lock");
            cancel.cancel();
        }
        assert!(!observer.is_locked());
    }

    #[test]
    fn test_acquire_times_out_when_held_elsewhere() {
        let mut driver = MemoryDriver::new();
        let other = driver.clone();
        other.hold_lock();

        let result = MigrationLockGuard::acquire(
            &mut driver,
            &Context::background(),
            Duration::from_millis(20),
        );
        assert!(matches!(result, Err(MigrationError::LockTimeout(_))));
        assert!(other.is_locked(), "failed acquire must not release the other holder");
    }

    #[test]
    fn test_unlocked_guard_does_not_touch_lock() {
        let mut driver = MemoryDriver::new();
        let observer = driver.clone();
        observer.hold_lock();
        {
            let guard = MigrationLockGuard::unlocked(&mut driver);
            assert!(!guard.is_held());
        }
        assert!(observer.is_locked());
    }
}
