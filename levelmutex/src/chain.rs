//! Per-thread lock chain.
//!
//! Every thread owns one chain recording the leveled mutexes it currently
//! holds, in acquisition order. The chain lives in thread-local storage and
//! is never shared: only its own thread reads or writes it.
//!
//! The chain is a stack. Its top (the "head") is the most recently acquired
//! mutex still held; the thread's current level is the head's level, or
//! [`Level::UNLOCKED`] when the chain is empty. Entries refer to mutexes by
//! [`MutexId`] only, so the chain never owns or dereferences a mutex.
//!
//! Invariants, checked by [`validate`]:
//! - no mutex appears twice,
//! - levels never decrease walking from the head toward the tail,
//! - every entry has a lock count of at least one and a real level.

use crate::level::Level;

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a leveled mutex.
///
/// Identities are stable for the lifetime of the mutex (they do not change
/// when the mutex value is moved) and give all mutexes one total order,
/// which the batch protocol uses as its acquisition order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(usize);

impl MutexId {
    pub(crate) fn of<T>(state: &T) -> Self {
        MutexId(state as *const T as usize)
    }
}

impl fmt::Debug for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutexId({:#x})", self.0)
    }
}

/// One held mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Held {
    pub(crate) id: MutexId,
    pub(crate) level: Level,
    /// Re-entrancy depth, at least 1 while on the chain.
    pub(crate) count: u32,
}

/// The mutexes held by one thread; the last element is the head.
pub(crate) struct Chain {
    held: Vec<Held>,
}

thread_local! {
    static CHAIN: RefCell<Chain> = const { RefCell::new(Chain::new()) };

    /// Process-unique token for the current thread, assigned on first use.
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Returns a nonzero token identifying the calling thread.
///
/// Tokens are never reused, so `0` can mean "no owner".
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// Runs `f` with shared access to the calling thread's chain.
pub(crate) fn with<R>(f: impl FnOnce(&Chain) -> R) -> R {
    CHAIN.with(|chain| f(&chain.borrow()))
}

/// Runs `f` with exclusive access to the calling thread's chain.
pub(crate) fn with_mut<R>(f: impl FnOnce(&mut Chain) -> R) -> R {
    CHAIN.with(|chain| f(&mut chain.borrow_mut()))
}

/// Like [`with_mut`], but returns `None` once the thread's storage is gone.
pub(crate) fn try_with_mut<R>(f: impl FnOnce(&mut Chain) -> R) -> Option<R> {
    CHAIN.try_with(|chain| f(&mut chain.borrow_mut())).ok()
}

impl Chain {
    const fn new() -> Self {
        Self { held: Vec::new() }
    }

    /// Level of the head, or [`Level::UNLOCKED`].
    pub(crate) fn current_level(&self) -> Level {
        self.held.last().map_or(Level::UNLOCKED, |h| h.level)
    }

    pub(crate) fn head(&self) -> Option<MutexId> {
        self.held.last().map(|h| h.id)
    }

    pub(crate) fn count_held(&self) -> usize {
        self.held.len()
    }

    pub(crate) fn count_locks(&self) -> usize {
        self.held.iter().map(|h| h.count as usize).sum()
    }

    /// Number of entries sharing the head's level.
    pub(crate) fn count_at_current_level(&self) -> usize {
        self.top_run().len()
    }

    /// Returns the entry for `id`, if this thread holds it.
    pub(crate) fn find(&self, id: MutexId) -> Option<&Held> {
        self.held.iter().rev().find(|h| h.id == id)
    }

    pub(crate) fn owns(&self, id: MutexId) -> bool {
        self.find(id).is_some()
    }

    /// Returns `true` if `id` is among the `within` most recent entries.
    pub(crate) fn is_recent_within(&self, id: MutexId, within: usize) -> bool {
        self.held.iter().rev().take(within).any(|h| h.id == id)
    }

    /// Returns `true` if `id` is in the run of entries at the current level.
    pub(crate) fn is_recent(&self, id: MutexId) -> bool {
        self.top_run().iter().any(|h| h.id == id)
    }

    /// The entries at the head's level, oldest first.
    fn top_run(&self) -> &[Held] {
        let level = self.current_level();
        let start = self
            .held
            .iter()
            .rposition(|h| h.level != level)
            .map_or(0, |i| i + 1);

        &self.held[start..]
    }

    /// Records a fresh acquisition of `id` as the new head.
    pub(crate) fn push(&mut self, id: MutexId, level: Level) {
        self.push_held(Held {
            id,
            level,
            count: 1,
        });
    }

    /// Puts a previously removed entry back as the head.
    pub(crate) fn push_held(&mut self, held: Held) {
        debug_assert!(!self.owns(held.id), "{:?} pushed twice", held.id);
        debug_assert!(
            held.level <= self.current_level(),
            "{:?} at level {} pushed above level {}",
            held.id,
            held.level,
            self.current_level()
        );

        tracing::trace!(id = ?held.id, level = %held.level, "lock chain push");
        self.held.push(held);
    }

    /// Removes `id` from the run at the current level.
    ///
    /// Returns the removed entry, or `None` if `id` is not in that run.
    /// Removing from anywhere inside the run keeps the level order intact
    /// because every entry in it has the same level.
    pub(crate) fn remove(&mut self, id: MutexId) -> Option<Held> {
        let start = self.held.len() - self.top_run().len();
        let offset = self.held[start..].iter().rposition(|h| h.id == id)?;
        let held = self.held.remove(start + offset);

        tracing::trace!(id = ?held.id, level = %held.level, "lock chain pop");
        Some(held)
    }

    /// Removes `id` wherever it sits in the chain.
    ///
    /// Only for mutexes that are going away while held; removing any single
    /// entry keeps the level order intact.
    pub(crate) fn forget(&mut self, id: MutexId) -> Option<Held> {
        let index = self.held.iter().rposition(|h| h.id == id)?;
        Some(self.held.remove(index))
    }

    /// Adds one re-entrant lock to `id`; returns the new count.
    pub(crate) fn increment(&mut self, id: MutexId) -> Option<u32> {
        let held = self.held.iter_mut().rev().find(|h| h.id == id)?;
        held.count += 1;
        Some(held.count)
    }

    /// Removes one re-entrant lock from `id` without dropping below one.
    pub(crate) fn decrement(&mut self, id: MutexId) -> Option<u32> {
        let held = self.held.iter_mut().rev().find(|h| h.id == id)?;
        debug_assert!(held.count > 1, "{id:?} decremented to zero");
        held.count -= 1;
        Some(held.count)
    }

    /// Checks every chain invariant.
    pub(crate) fn validate(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.held.len());

        for held in &self.held {
            if held.count == 0 || held.level.is_unlocked() || !seen.insert(held.id) {
                return false;
            }
        }

        self.held.windows(2).all(|pair| pair[0].level >= pair[1].level)
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            tracing::error!(
                held = ?self.held,
                "thread exited while still holding leveled mutexes"
            );
        }
    }
}

/// Validates the calling thread's chain on creation and again on drop.
///
/// Only used in debug builds, where a broken chain is a fatal bug.
#[cfg(debug_assertions)]
pub(crate) struct Checker;

#[cfg(debug_assertions)]
impl Checker {
    pub(crate) fn new() -> Self {
        assert!(validate(), "lock chain invariant broken on entry");
        Checker
    }
}

#[cfg(debug_assertions)]
impl Drop for Checker {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(validate(), "lock chain invariant broken on exit");
        }
    }
}

/// Returns the calling thread's current level.
///
/// This is the level of the most recently locked mutex the thread still
/// holds, or [`Level::UNLOCKED`] if it holds none. Runs in constant time.
pub fn current_level() -> Level {
    with(Chain::current_level)
}

/// Returns the identity of the most recently locked mutex still held.
pub fn current_mutex_id() -> Option<MutexId> {
    with(Chain::head)
}

/// Returns how many distinct mutexes the calling thread holds.
pub fn count_held() -> usize {
    with(Chain::count_held)
}

/// Returns how many locks the calling thread holds, counting re-entrant
/// locks of one mutex separately.
pub fn count_locks() -> usize {
    with(Chain::count_locks)
}

/// Returns how many held mutexes share the calling thread's current level.
pub fn count_at_current_level() -> usize {
    with(Chain::count_at_current_level)
}

/// Checks the calling thread's chain invariants.
pub fn validate() -> bool {
    with(Chain::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> MutexId {
        MutexId(n)
    }

    fn chain(entries: &[(usize, u32)]) -> Chain {
        let mut chain = Chain::new();
        for &(n, level) in entries {
            chain.push(id(n), Level::new(level));
        }
        chain
    }

    #[test]
    fn empty_chain() {
        let chain = Chain::new();
        assert_eq!(chain.current_level(), Level::UNLOCKED);
        assert_eq!(chain.head(), None);
        assert_eq!(chain.count_held(), 0);
        assert_eq!(chain.count_at_current_level(), 0);
        assert!(chain.validate());
    }

    #[test]
    fn queries_follow_acquisition_order() {
        let mut chain = chain(&[(1, 10), (2, 5), (3, 5)]);
        chain.increment(id(2));

        assert_eq!(chain.current_level(), Level::new(5));
        assert_eq!(chain.head(), Some(id(3)));
        assert_eq!(chain.count_held(), 3);
        assert_eq!(chain.count_locks(), 4);
        assert_eq!(chain.count_at_current_level(), 2);

        assert!(chain.is_recent(id(2)));
        assert!(!chain.is_recent(id(1)));
        assert!(chain.is_recent_within(id(2), 2));
        assert!(!chain.is_recent_within(id(1), 2));
        assert!(chain.is_recent_within(id(1), 3));
        assert!(!chain.is_recent_within(id(3), 0));
        assert!(chain.validate());

        chain.held.clear();
    }

    #[test]
    fn remove_only_from_current_level() {
        let mut chain = chain(&[(1, 10), (2, 5), (3, 5)]);

        assert!(chain.remove(id(1)).is_none());
        assert_eq!(chain.remove(id(2)).map(|h| h.id), Some(id(2)));
        assert_eq!(chain.head(), Some(id(3)));
        assert_eq!(chain.remove(id(3)).map(|h| h.count), Some(1));
        assert_eq!(chain.current_level(), Level::new(10));
        assert!(chain.remove(id(1)).is_some());
        assert_eq!(chain.current_level(), Level::UNLOCKED);
    }

    #[test]
    fn validate_detects_broken_chains() {
        let mut chain = Chain::new();
        chain.held.push(Held {
            id: id(1),
            level: Level::new(3),
            count: 1,
        });
        chain.held.push(Held {
            id: id(2),
            level: Level::new(4),
            count: 1,
        });
        assert!(!chain.validate(), "levels increase toward the head");

        chain.held[1].level = Level::new(2);
        assert!(chain.validate());

        chain.held[1].id = id(1);
        assert!(!chain.validate(), "duplicate entry");

        chain.held[1].id = id(2);
        chain.held[1].count = 0;
        assert!(!chain.validate(), "zero count");

        chain.held.clear();
    }

    #[test]
    fn thread_tokens_are_unique() {
        let here = thread_token();
        assert_ne!(here, 0);
        assert_eq!(here, thread_token());

        let there = std::thread::spawn(thread_token).join().unwrap();
        assert_ne!(here, there);
    }
}
