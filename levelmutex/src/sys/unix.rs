//! Unix native mutex built on `pthread_mutex_t`.
//!
//! The mutex is created with the `PTHREAD_MUTEX_ERRORCHECK` type so that
//! relocking by the owner and unlocking by a non-owner are reported by the
//! platform instead of deadlocking or corrupting state.

use crate::error::ErrorKind;

use libc::{
    EAGAIN, EBUSY, EDEADLK, EFAULT, EINVAL, EPERM, PTHREAD_MUTEX_ERRORCHECK,
    PTHREAD_MUTEX_INITIALIZER, c_int, pthread_mutex_destroy, pthread_mutex_init,
    pthread_mutex_lock, pthread_mutex_t, pthread_mutex_trylock, pthread_mutex_unlock,
    pthread_mutexattr_destroy, pthread_mutexattr_init, pthread_mutexattr_settype,
    pthread_mutexattr_t,
};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// A heap-pinned pthread mutex.
///
/// pthread mutexes must not move after initialization, so the object lives
/// in a `Box` and only the box pointer moves with the owner.
pub(crate) struct NativeMutex {
    inner: Box<UnsafeCell<pthread_mutex_t>>,
}

// Safety: pthread mutexes are designed to be shared between threads; all
// access goes through the pthread API.
unsafe impl Send for NativeMutex {}
unsafe impl Sync for NativeMutex {}

impl NativeMutex {
    /// Initializes a new error-checking pthread mutex.
    pub(crate) fn new() -> Result<Self, ErrorKind> {
        let mut attr = MaybeUninit::<pthread_mutexattr_t>::uninit();

        let rc = unsafe { pthread_mutexattr_init(attr.as_mut_ptr()) };
        if rc != 0 {
            return Err(init_error(rc));
        }

        let rc = unsafe { pthread_mutexattr_settype(attr.as_mut_ptr(), PTHREAD_MUTEX_ERRORCHECK) };
        if rc != 0 {
            unsafe { pthread_mutexattr_destroy(attr.as_mut_ptr()) };
            return Err(init_error(rc));
        }

        let inner = Box::new(UnsafeCell::new(PTHREAD_MUTEX_INITIALIZER));

        let rc = unsafe { pthread_mutex_init(inner.get(), attr.as_ptr()) };
        unsafe { pthread_mutexattr_destroy(attr.as_mut_ptr()) };

        if rc != 0 {
            return Err(init_error(rc));
        }

        Ok(Self { inner })
    }

    /// Blocks until the mutex is acquired.
    pub(crate) fn lock(&self) -> Result<(), ErrorKind> {
        match unsafe { pthread_mutex_lock(self.inner.get()) } {
            0 => Ok(()),
            EDEADLK => Err(ErrorKind::MayDeadlock),
            EFAULT => Err(ErrorKind::InvalidHandle),
            EINVAL => Err(ErrorKind::NotInitialized),
            rc => Err(ErrorKind::Os(rc)),
        }
    }

    /// Attempts to acquire the mutex without blocking.
    ///
    /// Returns [`ErrorKind::TryFailed`] if another thread holds it.
    pub(crate) fn try_lock(&self) -> Result<(), ErrorKind> {
        match unsafe { pthread_mutex_trylock(self.inner.get()) } {
            0 => Ok(()),
            EBUSY => Err(ErrorKind::TryFailed),
            EAGAIN => Err(ErrorKind::TooMuchRecursion),
            EINVAL => Err(ErrorKind::NotInitialized),
            rc => Err(ErrorKind::Os(rc)),
        }
    }

    /// Releases the mutex.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the mutex.
    pub(crate) unsafe fn unlock(&self) -> Result<(), ErrorKind> {
        match unsafe { pthread_mutex_unlock(self.inner.get()) } {
            0 => Ok(()),
            EPERM => Err(ErrorKind::NotLockedByThread),
            EINVAL => Err(ErrorKind::NotInitialized),
            rc => Err(ErrorKind::Os(rc)),
        }
    }
}

impl Drop for NativeMutex {
    fn drop(&mut self) {
        unsafe { pthread_mutex_destroy(self.inner.get()) };
    }
}

/// Maps a `pthread_mutex_init` / attribute error code.
fn init_error(rc: c_int) -> ErrorKind {
    match rc {
        EBUSY => ErrorKind::AlreadyInitialized,
        EINVAL => ErrorKind::InvalidAttribute,
        EFAULT => ErrorKind::InvalidHandle,
        _ => ErrorKind::Os(rc),
    }
}
