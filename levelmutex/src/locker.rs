//! Scoped guards.
//!
//! A guard releases what it locked when it goes out of scope. Failures
//! during that implicit release are logged and swallowed; call
//! [`unlock`](MutexLocker::unlock) explicitly to observe them.

use crate::error::{ErrorKind, MutexError};
use crate::level::Level;
use crate::multi;
use crate::mutex::LevelLock;

use std::time::Duration;

const GUARD_LOCK_FAILED: &str = "guard already holds its lock";
const GUARD_UNLOCK_FAILED: &str = "guard does not hold its lock";

/// Holds one leveled mutex until dropped.
///
/// # Examples
///
/// ```rust
/// use levelmutex::{current_level, Level, MutexLocker, SpinLevelMutex};
///
/// let m: SpinLevelMutex<3> = SpinLevelMutex::new();
/// {
///     let _guard = MutexLocker::new(&m).unwrap();
///     assert_eq!(current_level(), Level::new(3));
/// }
/// assert_eq!(current_level(), Level::UNLOCKED);
/// ```
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexLocker<'a> {
    mutex: &'a dyn LevelLock,
    locked: bool,
}

impl<'a> MutexLocker<'a> {
    /// Locks `mutex`, blocking as needed.
    pub fn new(mutex: &'a dyn LevelLock) -> Result<Self, MutexError> {
        mutex.lock()?;
        Ok(Self {
            mutex,
            locked: true,
        })
    }

    /// Locks `mutex`, giving up after `timeout`.
    pub fn with_timeout(mutex: &'a dyn LevelLock, timeout: Duration) -> Result<Self, MutexError> {
        mutex.lock_timeout(timeout)?;
        Ok(Self {
            mutex,
            locked: true,
        })
    }

    /// Wraps `mutex` without locking it.
    pub fn deferred(mutex: &'a dyn LevelLock) -> Self {
        Self {
            mutex,
            locked: false,
        }
    }

    /// Locks the mutex again after an explicit [`unlock`](Self::unlock).
    ///
    /// Reports [`ErrorKind::AlreadyLocked`] if this guard already holds it.
    pub fn lock(&mut self) -> Result<(), MutexError> {
        if self.locked {
            return Err(self.mutex.fail(ErrorKind::AlreadyLocked, GUARD_LOCK_FAILED));
        }

        self.mutex.lock()?;
        self.locked = true;
        Ok(())
    }

    /// Releases the mutex before the guard goes out of scope.
    ///
    /// Reports [`ErrorKind::WasntLocked`] if this guard does not hold it.
    pub fn unlock(&mut self) -> Result<(), MutexError> {
        if !self.locked {
            return Err(self.mutex.fail(ErrorKind::WasntLocked, GUARD_UNLOCK_FAILED));
        }

        self.mutex.unlock()?;
        self.locked = false;
        Ok(())
    }

    /// Returns `true` while this guard holds its mutex.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns the guarded mutex.
    pub fn mutex(&self) -> &'a dyn LevelLock {
        self.mutex
    }
}

impl Drop for MutexLocker<'_> {
    fn drop(&mut self) {
        if !self.locked {
            return;
        }

        let result = if self.mutex.is_recent_lock() {
            self.mutex.unlock_this()
        } else {
            Err(ErrorKind::NotRecentLock)
        };

        if let Err(kind) = result {
            tracing::warn!(
                id = ?self.mutex.id(),
                level = %self.mutex.level(),
                %kind,
                "scoped guard failed to release its mutex"
            );
        }
    }
}

/// Holds a group of same-level mutexes until dropped.
///
/// The guard borrows the container for its whole lifetime; the container is
/// sorted by mutex identity when the group is locked.
#[must_use = "the mutexes are released as soon as the guard is dropped"]
pub struct MultiMutexLocker<'a, 'c> {
    mutexes: &'c mut [&'a dyn LevelLock],
    locked: bool,
}

impl<'a, 'c> MultiMutexLocker<'a, 'c> {
    /// Locks every mutex in `mutexes`, blocking as needed.
    pub fn new(mutexes: &'c mut [&'a dyn LevelLock]) -> Result<Self, MutexError> {
        multi::multi_lock(mutexes)?;
        Ok(Self {
            mutexes,
            locked: true,
        })
    }

    /// Locks every mutex in `mutexes`, giving up after `timeout`.
    pub fn with_timeout(
        mutexes: &'c mut [&'a dyn LevelLock],
        timeout: Duration,
    ) -> Result<Self, MutexError> {
        multi::multi_lock_timeout(mutexes, timeout)?;
        Ok(Self {
            mutexes,
            locked: true,
        })
    }

    /// Wraps `mutexes` without locking them.
    pub fn deferred(mutexes: &'c mut [&'a dyn LevelLock]) -> Self {
        Self {
            mutexes,
            locked: false,
        }
    }

    /// Locks the group again after an explicit [`unlock`](Self::unlock).
    pub fn lock(&mut self) -> Result<(), MutexError> {
        if self.locked {
            return Err(self.guard_error(ErrorKind::AlreadyLocked, GUARD_LOCK_FAILED));
        }

        multi::multi_lock(self.mutexes)?;
        self.locked = true;
        Ok(())
    }

    /// Releases the group before the guard goes out of scope.
    pub fn unlock(&mut self) -> Result<(), MutexError> {
        if !self.locked {
            return Err(self.guard_error(ErrorKind::WasntLocked, GUARD_UNLOCK_FAILED));
        }

        multi::multi_unlock(self.mutexes)?;
        self.locked = false;
        Ok(())
    }

    /// Returns `true` while this guard holds its group.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns the guarded container.
    pub fn mutexes(&self) -> &[&'a dyn LevelLock] {
        &self.mutexes[..]
    }

    fn guard_error(&self, kind: ErrorKind, message: &'static str) -> MutexError {
        match self.mutexes.first() {
            Some(first) => first.fail(kind, message),
            None => MutexError::new(kind, Level::UNLOCKED, message),
        }
    }
}

impl Drop for MultiMutexLocker<'_, '_> {
    fn drop(&mut self) {
        if !self.locked {
            return;
        }

        if let Err(kind) = multi::release(self.mutexes) {
            tracing::warn!(
                count = self.mutexes.len(),
                %kind,
                "scoped guard failed to release its mutexes"
            );
        }
    }
}
