//! Error and wait strategies.
//!
//! Both strategies are chosen when a concrete [`LevelMutex`](crate::LevelMutex)
//! type is assembled and cannot change afterwards. They are stateless: every
//! hook is an associated function.
//!
//! Error policies decide what a failure looks like to the caller:
//!
//! | Policy               | Level violations | Other errors |
//! |----------------------|------------------|--------------|
//! | [`JustReturn`]       | `Err`            | `Err`        |
//! | [`AssertBadDesign`]  | panic            | `Err`        |
//! | [`AssertAny`]        | panic            | panic        |
//! | [`PanicOnBadDesign`] | raise            | `Err`        |
//! | [`PanicOnAny`]       | raise            | raise        |
//!
//! The assert policies abort the operation with a diagnostic message and are
//! meant for debug builds. The raising policies ("raise" above) unwind with
//! the [`MutexError`] itself as the panic payload, so a caller can recover it
//! with [`std::panic::catch_unwind`] and `downcast`.

use crate::error::MutexError;

use std::panic;
use std::thread;
use std::time::Duration;

/// Decides the externally visible outcome of a failed operation.
pub trait ErrorPolicy {
    /// Inspects `error` and either hands it back or panics.
    ///
    /// The returned error is what the failed operation reports as `Err`, so
    /// a policy cannot turn a failure into success.
    fn check(error: MutexError) -> MutexError;
}

/// Passes every error through unchanged.
///
/// Intended for tests of the mutexes themselves and for callers that want to
/// branch on every status.
pub struct JustReturn;

impl ErrorPolicy for JustReturn {
    fn check(error: MutexError) -> MutexError {
        error
    }
}

/// Asserts that no level-order violation happened; returns other errors.
pub struct AssertBadDesign;

impl ErrorPolicy for AssertBadDesign {
    fn check(error: MutexError) -> MutexError {
        assert!(
            !error.kind().is_level_violation(),
            "leveled mutex design error: {error}"
        );
        error
    }
}

/// Asserts on any error.
pub struct AssertAny;

impl ErrorPolicy for AssertAny {
    fn check(error: MutexError) -> MutexError {
        panic!("leveled mutex error: {error}");
    }
}

/// Raises level-order violations; returns other errors.
pub struct PanicOnBadDesign;

impl ErrorPolicy for PanicOnBadDesign {
    fn check(error: MutexError) -> MutexError {
        if error.kind().is_level_violation() {
            raise(error);
        }
        error
    }
}

/// Raises every error.
pub struct PanicOnAny;

impl ErrorPolicy for PanicOnAny {
    fn check(error: MutexError) -> MutexError {
        raise(error);
    }
}

/// Unwinds with `error` as the panic payload.
fn raise(error: MutexError) -> ! {
    tracing::debug!(%error, "raising leveled mutex error");
    panic::panic_any(error)
}

/// One "tick" of waiting inside timed acquisition loops.
pub trait WaitPolicy {
    /// Waits once before the next non-blocking attempt.
    fn wait();
}

/// Does not wait, which turns timed loops into spin loops.
///
/// Useful for low-level mutexes.
pub struct NoWait;

impl WaitPolicy for NoWait {
    #[inline]
    fn wait() {}
}

/// Sleeps for `MILLIS` milliseconds per tick.
///
/// Useful for high-level mutexes so waiting threads do not burn CPU.
pub struct SleepWait<const MILLIS: u64 = 1>;

impl<const MILLIS: u64> WaitPolicy for SleepWait<MILLIS> {
    fn wait() {
        thread::sleep(Duration::from_millis(MILLIS));
    }
}
