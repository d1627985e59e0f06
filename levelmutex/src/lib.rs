//! # levelmutex
//!
//! **levelmutex** prevents lock-ordering deadlocks by construction. Every mutex carries an
//! immutable [`Level`], and every thread tracks the mutexes it holds in a private lock chain.
//! A thread may only lock a mutex whose level is below the level of the mutex it locked last,
//! and must release mutexes in the reverse order. A program that respects those two rules
//! cannot form a cycle of threads waiting on each other.
//!
//! The crate offers:
//!
//! - **Leveled mutexes** ([`LevelMutex`]) with blocking, non-blocking and timed acquisition
//! - **Re-entrancy** without relying on the native primitive being re-entrant
//! - **Batch locking** ([`multi_lock`]) of same-level peers in one global order, all or nothing
//! - **Scoped guards** ([`MutexLocker`], [`MultiMutexLocker`]) that release on drop
//! - **Pluggable strategies** for the native primitive, error reporting and waiting
//!
//! ## Quick Start
//!
//! ```rust
//! use levelmutex::{current_level, multi_lock, multi_unlock, Level, MutexContainer, SpinLevelMutex};
//!
//! let database: SpinLevelMutex<20> = SpinLevelMutex::new();
//! let left: SpinLevelMutex<10> = SpinLevelMutex::new();
//! let right: SpinLevelMutex<10> = SpinLevelMutex::new();
//!
//! database.lock().unwrap();
//!
//! // Peers at one level are locked together.
//! let mut accounts: MutexContainer<'_> = vec![&right, &left];
//! multi_lock(&mut accounts).unwrap();
//! assert_eq!(current_level(), Level::new(10));
//!
//! multi_unlock(&mut accounts).unwrap();
//! database.unlock().unwrap();
//! assert_eq!(current_level(), Level::UNLOCKED);
//! ```
//!
//! ## Strategies
//!
//! A concrete mutex type is assembled from:
//!
//! - a [`RawMutex`]: [`SpinRawMutex`] or [`SleepRawMutex`]
//! - an [`ErrorPolicy`]: [`JustReturn`], [`AssertBadDesign`], [`AssertAny`],
//!   [`PanicOnBadDesign`] (default) or [`PanicOnAny`]
//! - a [`WaitPolicy`]: [`NoWait`] (default) or [`SleepWait`]
//! - a default level used by [`LevelMutex::new`]
//!
//! ## Diagnostics
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events and never installs a subscriber.

mod chain;
mod error;
mod level;
mod locker;
mod multi;
mod mutex;
mod policy;
mod raw;
mod sys;

pub use chain::{
    MutexId, count_at_current_level, count_held, count_locks, current_level, current_mutex_id,
    validate,
};
pub use error::{ErrorKind, MutexError};
pub use level::Level;
pub use locker::{MultiMutexLocker, MutexLocker};
pub use multi::{
    MutexContainer, matches_recent_locks, multi_lock, multi_lock_timeout, multi_try_lock,
    multi_unlock,
};
pub use mutex::{LevelLock, LevelMutex, SleepLevelMutex, SpinLevelMutex};
pub use policy::{
    AssertAny, AssertBadDesign, ErrorPolicy, JustReturn, NoWait, PanicOnAny, PanicOnBadDesign,
    SleepWait, WaitPolicy,
};
pub use raw::{RawMutex, SleepRawMutex, SpinRawMutex};
