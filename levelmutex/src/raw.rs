//! Native primitive strategies.
//!
//! A [`RawMutex`] is the unleveled mutual-exclusion object a
//! [`LevelMutex`](crate::LevelMutex) wraps. The leveled layer does all of
//! the ordering, ownership and re-entrancy bookkeeping, so a raw mutex only
//! needs three operations and never has to be re-entrant itself.
//!
//! Two stock strategies are provided:
//! - [`SpinRawMutex`]: wraps the platform primitive directly; waiting
//!   happens inside the platform's blocking acquire.
//! - [`SleepRawMutex`]: polls the same primitive with non-blocking attempts
//!   separated by a configurable sleep, so waiting threads give up the CPU.

use crate::error::ErrorKind;
use crate::sys::NativeMutex;

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// An unleveled mutex usable as the native primitive of a leveled mutex.
///
/// Implementations report failures with the shared [`ErrorKind`]
/// vocabulary. A non-blocking attempt that loses to another holder must
/// report [`ErrorKind::TryFailed`]; any other error is treated as a fault of
/// the primitive.
pub trait RawMutex: Send + Sync + Sized {
    /// Creates an unlocked primitive.
    fn try_new() -> Result<Self, ErrorKind>;

    /// Blocks until the primitive is acquired.
    fn lock(&self) -> Result<(), ErrorKind>;

    /// Attempts to acquire the primitive without blocking.
    fn try_lock(&self) -> Result<(), ErrorKind>;

    /// Releases the primitive.
    ///
    /// # Safety
    ///
    /// The calling thread must currently hold the primitive.
    unsafe fn unlock(&self) -> Result<(), ErrorKind>;
}

/// Native primitive that waits inside the platform's blocking acquire.
///
/// Best suited for low-level resources whose critical sections are short.
pub struct SpinRawMutex {
    native: NativeMutex,
}

impl RawMutex for SpinRawMutex {
    fn try_new() -> Result<Self, ErrorKind> {
        Ok(Self {
            native: NativeMutex::new()?,
        })
    }

    fn lock(&self) -> Result<(), ErrorKind> {
        self.native.lock()
    }

    fn try_lock(&self) -> Result<(), ErrorKind> {
        self.native.try_lock()
    }

    unsafe fn unlock(&self) -> Result<(), ErrorKind> {
        unsafe { self.native.unlock() }
    }
}

/// Native primitive that sleeps between non-blocking attempts.
///
/// Built on [`SpinRawMutex`]: it reuses the spin primitive's non-blocking
/// acquire and release, and replaces only the blocking acquire with a
/// try-then-sleep loop. Suited for high-level resources held for a long
/// time; sleeping mutexes should sit at higher levels than spinning ones.
pub struct SleepRawMutex {
    spin: SpinRawMutex,
    /// Sleep between attempts, in microseconds.
    sleep_micros: AtomicU64,
}

impl SleepRawMutex {
    /// Sleep interval used by [`RawMutex::try_new`].
    pub const DEFAULT_SLEEP: Duration = Duration::from_millis(1);

    /// Creates a sleeping primitive with a custom interval.
    ///
    /// A zero interval falls back to [`Self::DEFAULT_SLEEP`].
    pub fn with_sleep_time(sleep: Duration) -> Result<Self, ErrorKind> {
        let this = Self {
            spin: SpinRawMutex::try_new()?,
            sleep_micros: AtomicU64::new(as_micros(Self::DEFAULT_SLEEP)),
        };
        this.set_sleep_time(sleep);

        Ok(this)
    }

    /// Returns the interval slept between attempts.
    pub fn sleep_time(&self) -> Duration {
        Duration::from_micros(self.sleep_micros.load(Ordering::Relaxed))
    }

    /// Changes the interval slept between attempts.
    ///
    /// Intervals shorter than one microsecond are ignored.
    pub fn set_sleep_time(&self, sleep: Duration) {
        let micros = as_micros(sleep);
        if micros != 0 {
            self.sleep_micros.store(micros, Ordering::Relaxed);
        }
    }
}

impl RawMutex for SleepRawMutex {
    fn try_new() -> Result<Self, ErrorKind> {
        Self::with_sleep_time(Self::DEFAULT_SLEEP)
    }

    fn lock(&self) -> Result<(), ErrorKind> {
        loop {
            match self.spin.try_lock() {
                Err(ErrorKind::TryFailed) => thread::sleep(self.sleep_time()),
                other => return other,
            }
        }
    }

    fn try_lock(&self) -> Result<(), ErrorKind> {
        self.spin.try_lock()
    }

    unsafe fn unlock(&self) -> Result<(), ErrorKind> {
        unsafe { self.spin.unlock() }
    }
}

fn as_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
