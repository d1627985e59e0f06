//! Locking several mutexes of one level as a unit.
//!
//! Mutexes that share a level are peers: a thread may not lock one of them
//! and then another, because two threads doing that in opposite orders
//! would deadlock. Peers are locked together instead, through a container
//! handed to [`multi_lock`] and later to [`multi_unlock`].
//!
//! Batch acquisition sorts the container by [`MutexId`](crate::MutexId)
//! first. Every thread therefore takes overlapping peers in the same global
//! order, whatever order its container listed them in. If any member
//! cannot be locked, the members already locked by the call are released
//! again before the error is reported, so a caller never observes a
//! partially held batch.

use crate::chain;
use crate::error::{ErrorKind, MutexError};
use crate::level::Level;
use crate::mutex::LevelLock;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// A caller-owned collection of mutexes handed to the batch operations.
pub type MutexContainer<'a> = Vec<&'a dyn LevelLock>;

const MULTI_LOCK_FAILED: &str = "unable to lock multiple mutexes";
const MULTI_UNLOCK_FAILED: &str = "unable to unlock multiple mutexes";

/// Locks every mutex in `mutexes`, blocking as needed.
///
/// The container must be non-empty, list each mutex once, and hold mutexes
/// of a single level that the calling thread may lock. If the thread's
/// current level already equals that level, the container must be exactly
/// the set of mutexes the thread locked most recently; each of them is then
/// re-locked without touching a native primitive.
///
/// The container is sorted by mutex identity in place.
pub fn multi_lock(mutexes: &mut [&dyn LevelLock]) -> Result<(), MutexError> {
    acquire(mutexes, Wait::Block)
}

/// Like [`multi_lock`], but never waits for a member held elsewhere.
///
/// Reports [`ErrorKind::TryFailed`] if any member is busy; every member
/// locked by the call has been released again by then.
pub fn multi_try_lock(mutexes: &mut [&dyn LevelLock]) -> Result<(), MutexError> {
    acquire(mutexes, Wait::No)
}

/// Like [`multi_lock`], but gives up once `timeout` has elapsed.
///
/// The timeout covers the whole call. On [`ErrorKind::TimedOut`] every
/// member locked by the call has been released again.
pub fn multi_lock_timeout(
    mutexes: &mut [&dyn LevelLock],
    timeout: Duration,
) -> Result<(), MutexError> {
    // A timeout too large for the clock never expires.
    let wait = match Instant::now().checked_add(timeout) {
        Some(deadline) => Wait::Until(deadline),
        None => Wait::Block,
    };

    acquire(mutexes, wait)
}

/// Unlocks every mutex in `mutexes`.
///
/// The container must match the calling thread's most recent locks exactly
/// (see [`matches_recent_locks`]); otherwise nothing is unlocked. Members
/// are released in reverse identity order. A failure releasing one member
/// does not stop the others from being released; the call then reports
/// [`ErrorKind::BatchPartialFailure`].
///
/// The container is sorted by mutex identity in place.
pub fn multi_unlock(mutexes: &mut [&dyn LevelLock]) -> Result<(), MutexError> {
    release(mutexes).map_err(|kind| match mutexes.first() {
        Some(first) => first.fail(kind, MULTI_UNLOCK_FAILED),
        None => MutexError::new(kind, Level::UNLOCKED, MULTI_UNLOCK_FAILED),
    })
}

/// The policy-free part of [`multi_unlock`], shared with the scoped guard.
pub(crate) fn release(mutexes: &mut [&dyn LevelLock]) -> Result<(), ErrorKind> {
    #[cfg(debug_assertions)]
    let _checker = chain::Checker::new();

    matches_recent_locks(mutexes)?;

    mutexes.sort_unstable_by_key(|m| m.id());

    let mut failed = 0;
    for mutex in mutexes.iter().rev() {
        if !release_quietly(*mutex) {
            failed += 1;
        }
    }

    if failed == 0 {
        return Ok(());
    }

    tracing::warn!(
        level = %mutexes[0].level(),
        failed,
        total = mutexes.len(),
        "batch unlock left members unreleased"
    );
    Err(ErrorKind::BatchPartialFailure)
}

/// Checks that `mutexes` is exactly the group the calling thread locked
/// most recently: every member at the current level, among the most recent
/// locks, listed once, and no other mutex at that level held.
pub fn matches_recent_locks(mutexes: &[&dyn LevelLock]) -> Result<(), ErrorKind> {
    if mutexes.is_empty() {
        return Err(ErrorKind::EmptyContainer);
    }

    chain::with(|chain| {
        let current = chain.current_level();

        for (i, mutex) in mutexes.iter().enumerate() {
            if mutex.level() != current {
                return Err(if current.is_unlocked() {
                    ErrorKind::NotRecentLock
                } else {
                    ErrorKind::WrongLevel
                });
            }
            if !chain.is_recent_within(mutex.id(), mutexes.len()) {
                return Err(ErrorKind::NotRecentLock);
            }
            if has_duplicate(mutexes, i) {
                return Err(ErrorKind::DuplicateMutex);
            }
        }

        if chain.count_at_current_level() != mutexes.len() {
            return Err(ErrorKind::LevelTooHigh);
        }

        Ok(())
    })
}

/// How long a batch acquisition may wait for each member.
#[derive(Clone, Copy)]
enum Wait {
    Block,
    No,
    Until(Instant),
}

fn acquire(mutexes: &mut [&dyn LevelLock], wait: Wait) -> Result<(), MutexError> {
    #[cfg(debug_assertions)]
    let _checker = chain::Checker::new();

    let Some(&first) = mutexes.first() else {
        return Err(MutexError::new(
            ErrorKind::EmptyContainer,
            Level::UNLOCKED,
            MULTI_LOCK_FAILED,
        ));
    };
    let level = first.level();

    for (i, mutex) in mutexes.iter().enumerate() {
        if mutex.level() != level {
            return Err(first.fail(ErrorKind::WrongLevel, MULTI_LOCK_FAILED));
        }
        if has_duplicate(mutexes, i) {
            return Err(first.fail(ErrorKind::DuplicateMutex, MULTI_LOCK_FAILED));
        }
    }

    let current = chain::current_level();
    if current < level {
        return Err(first.fail(ErrorKind::LevelTooHigh, MULTI_LOCK_FAILED));
    }

    if current == level {
        matches_recent_locks(mutexes).map_err(|kind| first.fail(kind, MULTI_LOCK_FAILED))?;

        for mutex in mutexes.iter() {
            mutex.relock_this();
        }
        return Ok(());
    }

    mutexes.sort_unstable_by_key(|m| m.id());
    let mutexes: &[&dyn LevelLock] = mutexes;

    let mut rollback = Rollback {
        mutexes,
        locked: 0,
    };

    for mutex in mutexes {
        let result = match wait {
            Wait::Block => mutex.lock_this(),
            Wait::No => mutex.try_lock_this(),
            Wait::Until(deadline) => mutex.lock_this_until(deadline),
        };

        if let Err(kind) = result {
            drop(rollback);
            return Err(first.fail(kind, MULTI_LOCK_FAILED));
        }

        rollback.locked += 1;
    }

    rollback.disarm();
    Ok(())
}

/// Returns `true` if the mutex at `index` appears again later on.
fn has_duplicate(mutexes: &[&dyn LevelLock], index: usize) -> bool {
    let id = mutexes[index].id();
    mutexes[index + 1..].iter().any(|m| m.id() == id)
}

/// Releases one lock held by a batch, converting panics into failure.
fn release_quietly(mutex: &dyn LevelLock) -> bool {
    matches!(
        panic::catch_unwind(AssertUnwindSafe(|| mutex.unlock_this())),
        Ok(Ok(()))
    )
}

/// Releases the members a batch acquisition has locked so far.
///
/// Runs on every exit that does not reach [`disarm`](Self::disarm),
/// including unwinding out of a native primitive or an error policy.
struct Rollback<'m, 'a> {
    mutexes: &'m [&'a dyn LevelLock],
    locked: usize,
}

impl Rollback<'_, '_> {
    fn disarm(mut self) {
        self.locked = 0;
    }
}

impl Drop for Rollback<'_, '_> {
    fn drop(&mut self) {
        if self.locked == 0 {
            return;
        }

        tracing::debug!(
            locked = self.locked,
            total = self.mutexes.len(),
            "rolling back partial batch lock"
        );

        for mutex in self.mutexes[..self.locked].iter().rev() {
            release_quietly(*mutex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::JustReturn;
    use crate::SpinLevelMutex;

    type Mutex = SpinLevelMutex<7, JustReturn>;

    #[test]
    fn shape_errors_touch_nothing() {
        let a = Mutex::new();
        let b = Mutex::with_level(Level::new(8));

        let mut empty: MutexContainer<'_> = Vec::new();
        assert_eq!(
            multi_lock(&mut empty).unwrap_err().kind(),
            ErrorKind::EmptyContainer
        );

        let mut dup: MutexContainer<'_> = vec![&a, &a];
        assert_eq!(
            multi_lock(&mut dup).unwrap_err().kind(),
            ErrorKind::DuplicateMutex
        );

        let mut mixed: MutexContainer<'_> = vec![&a, &b];
        assert_eq!(
            multi_lock(&mut mixed).unwrap_err().kind(),
            ErrorKind::WrongLevel
        );

        assert!(!a.is_locked());
        assert!(!b.is_locked());
        assert_eq!(chain::count_held(), 0);
    }

    #[test]
    fn container_is_sorted_by_identity() {
        let a = Mutex::new();
        let b = Mutex::new();
        let c = Mutex::new();

        let mut group: MutexContainer<'_> = vec![&c, &a, &b];
        multi_lock(&mut group).unwrap();

        assert!(group.windows(2).all(|w| w[0].id() < w[1].id()));
        assert_eq!(chain::current_mutex_id(), Some(group[2].id()));

        multi_unlock(&mut group).unwrap();
        assert_eq!(chain::count_held(), 0);
    }

    #[test]
    fn rollback_releases_what_was_locked() {
        let a = Mutex::new();
        let b = Mutex::new();
        let mutexes: [&dyn LevelLock; 2] = [&a, &b];

        a.lock().unwrap();
        drop(Rollback {
            mutexes: &mutexes,
            locked: 1,
        });

        assert!(!a.is_locked());
        assert_eq!(chain::count_held(), 0);
    }
}
