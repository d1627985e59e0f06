use crate::level::Level;

use thiserror::Error;

/// Status kinds reported by leveled mutex operations.
///
/// Kinds fall into four groups:
/// - ordering violations ([`WrongLevel`](Self::WrongLevel),
///   [`LevelTooHigh`](Self::LevelTooHigh), [`LevelTooLow`](Self::LevelTooLow)),
/// - contention and ownership ([`AlreadyLocked`](Self::AlreadyLocked),
///   [`TryFailed`](Self::TryFailed), [`WasntLocked`](Self::WasntLocked),
///   [`NotLockedByThread`](Self::NotLockedByThread),
///   [`TimedOut`](Self::TimedOut)),
/// - container shape ([`NotRecentLock`](Self::NotRecentLock),
///   [`DuplicateMutex`](Self::DuplicateMutex),
///   [`EmptyContainer`](Self::EmptyContainer)),
/// - faults surfaced from the native primitive or caught during an
///   operation.
///
/// Shape and ordering errors are detected before any native primitive is
/// touched, so nothing is held when they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Mutexes in a container do not share one level.
    #[error("mutexes have different levels")]
    WrongLevel,

    /// The mutex's level is above what the thread may lock or release now.
    #[error("mutex level is too high for the current thread level")]
    LevelTooHigh,

    /// The mutex's level is below the thread's current level on release.
    #[error("mutex level is too low for the current thread level")]
    LevelTooLow,

    /// A non-blocking attempt found the mutex held by another thread.
    #[error("mutex is already locked by another thread")]
    AlreadyLocked,

    /// The native non-blocking attempt did not acquire the primitive.
    #[error("try-lock failed")]
    TryFailed,

    /// Release of a mutex that is not locked at all.
    #[error("mutex was not locked")]
    WasntLocked,

    /// Release of a mutex locked by a different thread.
    #[error("mutex is not locked by this thread")]
    NotLockedByThread,

    /// A container member is not among the thread's most recent locks.
    #[error("mutex was not recently locked by this thread")]
    NotRecentLock,

    /// A container lists the same mutex more than once.
    #[error("container holds the same mutex twice")]
    DuplicateMutex,

    /// A container has no mutexes.
    #[error("container is empty")]
    EmptyContainer,

    /// The deadline elapsed before the mutex could be locked.
    #[error("timed out waiting for mutex")]
    TimedOut,

    /// The native primitive detected that locking would deadlock.
    #[error("locking the native mutex may deadlock")]
    MayDeadlock,

    /// The native primitive reached its recursion limit.
    #[error("native mutex recursion limit reached")]
    TooMuchRecursion,

    /// The native primitive was not initialized.
    #[error("native mutex is not initialized")]
    NotInitialized,

    /// The native primitive was initialized twice.
    #[error("native mutex is already initialized")]
    AlreadyInitialized,

    /// The native primitive rejected its attributes.
    #[error("native mutex has an invalid attribute")]
    InvalidAttribute,

    /// The native primitive handle or address is invalid.
    #[error("native mutex handle is invalid")]
    InvalidHandle,

    /// A panic was caught while operating on a mutex and converted.
    #[error("fault during mutex operation")]
    FaultDuringOperation,

    /// At least one member of a batch release failed.
    #[error("failed to unlock at least one mutex in the container")]
    BatchPartialFailure,

    /// Any other native error code.
    #[error("native mutex error {0}")]
    Os(i32),
}

impl ErrorKind {
    /// Returns `true` for kinds that mean the caller broke the level order.
    pub const fn is_level_violation(self) -> bool {
        matches!(
            self,
            ErrorKind::WrongLevel | ErrorKind::LevelTooHigh | ErrorKind::LevelTooLow
        )
    }
}

/// Error value describing a failed leveled mutex operation.
///
/// Carries the status [`kind`](Self::kind), the [`level`](Self::level) of the
/// mutex (or container) involved, and a short message naming the operation.
/// Raising error policies unwind with this value as the panic payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{message} (level {level}): {kind}")]
pub struct MutexError {
    kind: ErrorKind,
    level: Level,
    message: &'static str,
}

impl MutexError {
    /// Creates an error.
    pub const fn new(kind: ErrorKind, level: Level, message: &'static str) -> Self {
        Self {
            kind,
            level,
            message,
        }
    }

    /// Returns the status kind.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the level of the mutex involved.
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns the message naming the failed operation.
    pub const fn message(&self) -> &'static str {
        self.message
    }
}
