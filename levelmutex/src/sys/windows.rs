//! Windows native mutex built on a slim reader/writer lock.
//!
//! Only the exclusive mode of the `SRWLOCK` is used. Slim locks cannot
//! fail to initialize and report no errors, so every operation here either
//! succeeds or, for the non-blocking attempt, reports contention.

use crate::error::ErrorKind;

use std::cell::UnsafeCell;

use windows_sys::Win32::System::Threading::{
    AcquireSRWLockExclusive, ReleaseSRWLockExclusive, SRWLOCK, SRWLOCK_INIT,
    TryAcquireSRWLockExclusive,
};

/// A heap-pinned slim reader/writer lock used in exclusive mode.
pub(crate) struct NativeMutex {
    inner: Box<UnsafeCell<SRWLOCK>>,
}

// Safety: SRW locks are designed to be shared between threads; all access
// goes through the Win32 API.
unsafe impl Send for NativeMutex {}
unsafe impl Sync for NativeMutex {}

impl NativeMutex {
    /// Creates an unlocked slim lock.
    pub(crate) fn new() -> Result<Self, ErrorKind> {
        Ok(Self {
            inner: Box::new(UnsafeCell::new(SRWLOCK_INIT)),
        })
    }

    /// Blocks until the lock is acquired.
    pub(crate) fn lock(&self) -> Result<(), ErrorKind> {
        unsafe { AcquireSRWLockExclusive(self.inner.get()) };
        Ok(())
    }

    /// Attempts to acquire the lock without blocking.
    pub(crate) fn try_lock(&self) -> Result<(), ErrorKind> {
        let acquired = unsafe { TryAcquireSRWLockExclusive(self.inner.get()) } as u8;

        if acquired != 0 {
            Ok(())
        } else {
            Err(ErrorKind::TryFailed)
        }
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    pub(crate) unsafe fn unlock(&self) -> Result<(), ErrorKind> {
        unsafe { ReleaseSRWLockExclusive(self.inner.get()) };
        Ok(())
    }
}
