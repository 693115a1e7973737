//! Lock-protected values
//!
//! [`Synchronized`] pairs a value with a reader-writer lock so that access is
//! always guarded. [`Condition`] lets threads sleep on such a value until a
//! predicate over it holds.

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// A value that is only reachable through its lock
#[derive(Default)]
pub struct Synchronized<T> {
    inner: RwLock<T>,
}

impl<T> Synchronized<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Shared read access, blocking while a writer holds the lock
    pub fn lock(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Shared read access that may be taken again on a thread already
    /// holding a read lock, even while a writer is queued
    ///
    /// Only read locks are reentrant; a nested write lock would alias `&mut T`.
    pub fn lock_recursive(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read_recursive()
    }

    /// Exclusive write access
    pub fn lock_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Exclusive write access, giving up after `timeout`
    pub fn try_lock_for(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, T>> {
        self.inner.try_write_for(timeout)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Clone> Clone for Synchronized<T> {
    /// Copy the current contents into an independent lock
    fn clone(&self) -> Self {
        Self::new(self.lock().clone())
    }
}

impl<T> From<T> for Synchronized<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

/// Wake-up channel for threads waiting on a [`Synchronized`] value
///
/// Waiters check their predicate while holding the value's lock and register
/// for the next notification before releasing it, so a `notify` issued after
/// the value changed is never missed.
///
/// # Example
/// ```
/// use saam::{Condition, Synchronized};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let ready = Arc::new((Synchronized::new(false), Condition::new()));
/// let setter = ready.clone();
/// std::thread::spawn(move || {
///     *setter.0.lock_mut() = true;
///     setter.1.notify();
/// });
///
/// let mut guard = ready.0.lock();
/// assert!(ready.1.wait_for(&mut guard, |ready| *ready, Duration::from_secs(10)));
/// ```
#[derive(Default)]
pub struct Condition {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Condition {
    pub const fn new() -> Self {
        Self {
            generation: parking_lot::const_mutex(0),
            changed: Condvar::new(),
        }
    }

    /// Wake every waiter so it re-checks its predicate
    pub fn notify(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }

    /// Wait under a read lock until `pred` holds or `timeout` passes
    ///
    /// Returns whether `pred` held. The guard is released while sleeping and
    /// held again whenever `pred` runs.
    pub fn wait_for<T>(
        &self,
        guard: &mut RwLockReadGuard<'_, T>,
        mut pred: impl FnMut(&T) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&**guard) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let generation = self.generation.lock();
            RwLockReadGuard::unlocked(guard, || self.sleep(generation, deadline));
        }
    }

    /// Wait under a write lock until `pred` holds or `timeout` passes
    pub fn wait_for_mut<T>(
        &self,
        guard: &mut RwLockWriteGuard<'_, T>,
        mut pred: impl FnMut(&T) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&**guard) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let generation = self.generation.lock();
            RwLockWriteGuard::unlocked(guard, || self.sleep(generation, deadline));
        }
    }

    fn sleep(&self, mut generation: MutexGuard<'_, u64>, deadline: Instant) {
        let seen = *generation;
        while *generation == seen {
            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                break;
            }
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("generation", &*self.generation.lock())
            .finish()
    }
}
