use crate::chain::{self, MutexId};
use crate::error::{ErrorKind, MutexError};
use crate::level::Level;
use crate::policy::{ErrorPolicy, NoWait, PanicOnBadDesign, WaitPolicy};
use crate::raw::{RawMutex, SleepRawMutex, SpinRawMutex};

use self::sealed::Protocol;

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const LOCK_FAILED: &str = "unable to lock mutex";
const UNLOCK_FAILED: &str = "unable to unlock mutex";

/// The object-safe view of a leveled mutex.
///
/// Batches and scoped guards work through `&dyn LevelLock`, so mutexes
/// assembled from different strategies can be locked together as long as
/// they share a level. The trait is sealed; [`LevelMutex`] is its only
/// implementation.
pub trait LevelLock: sealed::Protocol + Sync {
    /// Returns the stable identity of this mutex.
    fn id(&self) -> MutexId;

    /// Returns the level given at construction.
    fn level(&self) -> Level;

    /// Returns the re-entrancy depth; zero when nobody holds the mutex.
    fn lock_count(&self) -> u32;

    /// Returns `true` if some thread holds the mutex.
    fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    /// Returns `true` if the calling thread holds the mutex.
    fn is_locked_by_current_thread(&self) -> bool {
        chain::with(|chain| chain.owns(self.id()))
    }

    /// Returns `true` if a thread other than the caller holds the mutex.
    fn is_locked_by_another_thread(&self) -> bool;

    /// Returns `true` if the calling thread holds this mutex at its current
    /// level, i.e. it was the most recent lock or was locked together with
    /// the most recent lock.
    fn is_recent_lock(&self) -> bool {
        chain::with(|chain| chain.is_recent(self.id()))
    }

    /// Returns `true` if this mutex is among the `within` most recent
    /// mutexes locked by the calling thread.
    fn is_recent_lock_within(&self, within: usize) -> bool {
        chain::with(|chain| chain.is_recent_within(self.id(), within))
    }

    /// Blocks until the mutex is locked, or reports why it cannot be.
    fn lock(&self) -> Result<(), MutexError>;

    /// Locks the mutex only if that is possible without waiting.
    fn try_lock(&self) -> Result<(), MutexError>;

    /// Retries locking until `timeout` elapses.
    fn lock_timeout(&self, timeout: Duration) -> Result<(), MutexError>;

    /// Releases one lock held by the calling thread.
    fn unlock(&self) -> Result<(), MutexError>;
}

pub(crate) mod sealed {
    use crate::error::{ErrorKind, MutexError};

    use std::time::Instant;

    /// Per-mutex hooks used by the batch protocol.
    ///
    /// None of these repeat the ordering checks; the batch protocol performs
    /// them once for the whole container.
    pub trait Protocol {
        /// Passes `kind` through the mutex's error policy.
        fn fail(&self, kind: ErrorKind, message: &'static str) -> MutexError;

        /// Acquires the native primitive and records a fresh lock.
        fn lock_this(&self) -> Result<(), ErrorKind>;

        /// Like [`lock_this`](Self::lock_this), without waiting.
        fn try_lock_this(&self) -> Result<(), ErrorKind>;

        /// Like [`lock_this`](Self::lock_this), giving up at `deadline`.
        fn lock_this_until(&self, deadline: Instant) -> Result<(), ErrorKind>;

        /// Adds one re-entrant lock to a mutex this thread holds.
        fn relock_this(&self);

        /// Drops one lock, releasing the native primitive on the last one.
        fn unlock_this(&self) -> Result<(), ErrorKind>;
    }
}

/// Outcome of the checks done before touching the native primitive.
enum PreLock {
    /// The caller must acquire the native primitive.
    Proceed,
    /// The calling thread already held the mutex; its count went up.
    Reentered,
}

/// Outcome of the checks done before releasing the native primitive.
enum PreUnlock {
    /// The caller must release the native primitive.
    Proceed,
    /// The mutex was held more than once; its count went down.
    Decremented,
}

/// Shared state of one mutex. Boxed so its address, the mutex identity,
/// survives moves of the owning [`LevelMutex`].
struct State<R> {
    raw: ManuallyDrop<R>,
    level: Level,
    /// Re-entrancy depth. Written only by the holder.
    lock_count: AtomicU32,
    /// Token of the holding thread, or 0. Written only by the holder.
    owner: AtomicU64,
}

/// A mutex tagged with an immutable [`Level`].
///
/// A thread may lock a leveled mutex only if the mutex's level is below the
/// thread's [current level](crate::current_level), or if it is re-locking a
/// mutex it already holds at that level. Mutexes must be released in the
/// reverse order. Several mutexes of one level are taken together with
/// [`multi_lock`](crate::multi_lock).
///
/// The type is assembled from four parts fixed at compile time:
/// - `R`: the native primitive ([`SpinRawMutex`], [`SleepRawMutex`] or a
///   custom [`RawMutex`]),
/// - `DEFAULT_LEVEL`: the level used by [`new`](Self::new) and
///   [`Default`],
/// - `E`: the [`ErrorPolicy`] deciding how failures surface,
/// - `W`: the [`WaitPolicy`] ticked inside timed acquisition loops.
///
/// The mutex is re-entrant even when `R` is not: re-locking only bumps a
/// counter, and the native primitive is touched once per outermost
/// lock/unlock pair.
///
/// # Examples
///
/// ```rust
/// use levelmutex::{SpinLevelMutex, current_level, Level};
///
/// let outer: SpinLevelMutex<10> = SpinLevelMutex::new();
/// let inner: SpinLevelMutex<10> = SpinLevelMutex::with_level(Level::new(5));
///
/// outer.lock().unwrap();
/// inner.lock().unwrap();
/// assert_eq!(current_level(), Level::new(5));
///
/// inner.unlock().unwrap();
/// outer.unlock().unwrap();
/// assert_eq!(current_level(), Level::UNLOCKED);
/// ```
pub struct LevelMutex<
    R: RawMutex,
    const DEFAULT_LEVEL: u32,
    E: ErrorPolicy = PanicOnBadDesign,
    W: WaitPolicy = NoWait,
> {
    state: Box<State<R>>,
    _policies: PhantomData<fn() -> (E, W)>,
}

/// Leveled mutex that waits inside the platform's blocking acquire.
pub type SpinLevelMutex<const DEFAULT_LEVEL: u32, E = PanicOnBadDesign, W = NoWait> =
    LevelMutex<SpinRawMutex, DEFAULT_LEVEL, E, W>;

/// Leveled mutex that sleeps between acquisition attempts.
pub type SleepLevelMutex<const DEFAULT_LEVEL: u32, E = PanicOnBadDesign, W = NoWait> =
    LevelMutex<SleepRawMutex, DEFAULT_LEVEL, E, W>;

impl<R, const DEFAULT_LEVEL: u32, E, W> LevelMutex<R, DEFAULT_LEVEL, E, W>
where
    R: RawMutex,
    E: ErrorPolicy,
    W: WaitPolicy,
{
    /// Creates a mutex at `DEFAULT_LEVEL`.
    ///
    /// # Panics
    ///
    /// Panics if `DEFAULT_LEVEL` is `u32::MAX` or the native primitive
    /// cannot be created.
    pub fn new() -> Self {
        Self::with_level(Level::new(DEFAULT_LEVEL))
    }

    /// Creates a mutex at an explicit level.
    ///
    /// # Panics
    ///
    /// Panics if the native primitive cannot be created.
    pub fn with_level(level: Level) -> Self {
        match Self::try_with_level(level) {
            Ok(mutex) => mutex,
            Err(error) => panic!("{error}"),
        }
    }

    /// Creates a mutex at an explicit level, reporting native failures.
    pub fn try_with_level(level: Level) -> Result<Self, MutexError> {
        let raw = R::try_new()
            .map_err(|kind| MutexError::new(kind, level, "unable to create native mutex"))?;

        Ok(Self {
            state: Box::new(State {
                raw: ManuallyDrop::new(raw),
                level,
                lock_count: AtomicU32::new(0),
                owner: AtomicU64::new(0),
            }),
            _policies: PhantomData,
        })
    }

    /// Gives access to the native primitive, e.g. to tune a
    /// [`SleepRawMutex`]'s sleep interval.
    pub fn raw(&self) -> &R {
        &self.state.raw
    }

    /// Returns the stable identity of this mutex.
    pub fn id(&self) -> MutexId {
        MutexId::of(&*self.state)
    }

    /// Returns the level given at construction.
    pub fn level(&self) -> Level {
        self.state.level
    }

    /// Returns the re-entrancy depth; zero when nobody holds the mutex.
    pub fn lock_count(&self) -> u32 {
        self.state.lock_count.load(Ordering::Acquire)
    }

    /// Returns `true` if some thread holds the mutex.
    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    /// Blocks until the mutex is locked.
    ///
    /// Fails without waiting if the calling thread's level does not allow
    /// locking this mutex. Re-locking a mutex the thread already holds at its
    /// current level succeeds immediately.
    pub fn lock(&self) -> Result<(), MutexError> {
        #[cfg(debug_assertions)]
        let _checker = chain::Checker::new();

        match self.pre_lock_check(false) {
            Ok(PreLock::Reentered) => return Ok(()),
            Ok(PreLock::Proceed) => {}
            Err(kind) => return Err(self.fail(kind, LOCK_FAILED)),
        }

        if let Err(kind) = self.state.raw.lock() {
            return Err(self.fail(kind, LOCK_FAILED));
        }

        self.post_lock();
        Ok(())
    }

    /// Locks the mutex only if no other thread holds it.
    ///
    /// Reports [`ErrorKind::AlreadyLocked`] when another thread is known to
    /// hold the mutex and [`ErrorKind::TryFailed`] when the native attempt
    /// loses a race.
    pub fn try_lock(&self) -> Result<(), MutexError> {
        #[cfg(debug_assertions)]
        let _checker = chain::Checker::new();

        match self.pre_lock_check(true) {
            Ok(PreLock::Reentered) => return Ok(()),
            Ok(PreLock::Proceed) => {}
            Err(kind) => return Err(self.fail(kind, LOCK_FAILED)),
        }

        if let Err(kind) = self.state.raw.try_lock() {
            return Err(self.fail(kind, LOCK_FAILED));
        }

        self.post_lock();
        Ok(())
    }

    /// Retries a non-blocking lock, ticking the wait policy before each
    /// attempt, until it succeeds or `timeout` elapses.
    ///
    /// At least one attempt is made. Reports [`ErrorKind::TimedOut`] when
    /// the deadline passes.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<(), MutexError> {
        #[cfg(debug_assertions)]
        let _checker = chain::Checker::new();

        match self.pre_lock_check(false) {
            Ok(PreLock::Reentered) => return Ok(()),
            Ok(PreLock::Proceed) => {}
            Err(kind) => return Err(self.fail(kind, LOCK_FAILED)),
        }

        // A timeout too large for the clock never expires.
        let result = match Instant::now().checked_add(timeout) {
            Some(deadline) => self.lock_until(deadline),
            None => self.state.raw.lock().map(|()| self.post_lock()),
        };

        result.map_err(|kind| self.fail(kind, LOCK_FAILED))
    }

    /// Releases one lock held by the calling thread.
    ///
    /// The native primitive is released only when the last re-entrant lock
    /// goes away. The mutex must be at the calling thread's current level.
    pub fn unlock(&self) -> Result<(), MutexError> {
        #[cfg(debug_assertions)]
        let _checker = chain::Checker::new();

        match self.pre_unlock_check() {
            Ok(PreUnlock::Decremented) => return Ok(()),
            Ok(PreUnlock::Proceed) => {}
            Err(kind) => return Err(self.fail(kind, UNLOCK_FAILED)),
        }

        self.release().map_err(|kind| self.fail(kind, UNLOCK_FAILED))
    }

    fn pre_lock_check(&self, non_blocking: bool) -> Result<PreLock, ErrorKind> {
        let id = self.id();
        let level = self.level();

        chain::with_mut(|chain| {
            let current = chain.current_level();
            if current < level {
                return Err(ErrorKind::LevelTooHigh);
            }

            // Only the exact mutex may be re-entered. Peers at the current
            // level have to be locked as a batch.
            let mine = chain.owns(id);
            if current == level && !mine {
                return Err(ErrorKind::LevelTooHigh);
            }

            if !mine && non_blocking && self.is_locked() {
                return Err(ErrorKind::AlreadyLocked);
            }

            if current == level {
                chain.increment(id);
                self.state.lock_count.fetch_add(1, Ordering::AcqRel);
                return Ok(PreLock::Reentered);
            }

            Ok(PreLock::Proceed)
        })
    }

    fn pre_unlock_check(&self) -> Result<PreUnlock, ErrorKind> {
        if !self.is_locked() {
            return Err(ErrorKind::WasntLocked);
        }

        let id = self.id();
        let level = self.level();

        chain::with_mut(|chain| {
            let current = chain.current_level();
            if current > level {
                return Err(ErrorKind::LevelTooLow);
            }
            if current < level {
                return Err(ErrorKind::LevelTooHigh);
            }

            let Some(held) = chain.find(id) else {
                return Err(ErrorKind::NotLockedByThread);
            };

            if held.count > 1 {
                chain.decrement(id);
                self.state.lock_count.fetch_sub(1, Ordering::AcqRel);
                return Ok(PreUnlock::Decremented);
            }

            Ok(PreUnlock::Proceed)
        })
    }

    /// Records a fresh acquisition. The native primitive is held.
    fn post_lock(&self) {
        self.state.lock_count.store(1, Ordering::Release);
        self.state
            .owner
            .store(chain::thread_token(), Ordering::Release);

        chain::with_mut(|chain| chain.push(self.id(), self.level()));
    }

    /// Removes the last lock from the chain and releases the native
    /// primitive. On failure the mutex is still held and the chain entry is
    /// restored.
    fn release(&self) -> Result<(), ErrorKind> {
        let Some(held) = chain::with_mut(|chain| chain.remove(self.id())) else {
            return Err(ErrorKind::NotRecentLock);
        };

        self.state.owner.store(0, Ordering::Release);
        self.state.lock_count.store(0, Ordering::Release);

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { self.state.raw.unlock() }))
            .unwrap_or(Err(ErrorKind::FaultDuringOperation));

        if result.is_err() {
            self.state.lock_count.store(held.count, Ordering::Release);
            self.state
                .owner
                .store(chain::thread_token(), Ordering::Release);

            chain::with_mut(|chain| chain.push_held(held));
        }

        result
    }

    fn lock_until(&self, deadline: Instant) -> Result<(), ErrorKind> {
        loop {
            W::wait();

            match self.state.raw.try_lock() {
                Ok(()) => {
                    self.post_lock();
                    return Ok(());
                }
                Err(ErrorKind::TryFailed) if Instant::now() >= deadline => {
                    return Err(ErrorKind::TimedOut);
                }
                Err(ErrorKind::TryFailed) => {}
                Err(kind) => return Err(kind),
            }
        }
    }
}

impl<R, const DEFAULT_LEVEL: u32, E, W> sealed::Protocol for LevelMutex<R, DEFAULT_LEVEL, E, W>
where
    R: RawMutex,
    E: ErrorPolicy,
    W: WaitPolicy,
{
    fn fail(&self, kind: ErrorKind, message: &'static str) -> MutexError {
        if kind.is_level_violation() {
            tracing::warn!(
                id = ?self.id(),
                level = %self.level(),
                current = %chain::current_level(),
                %kind,
                "leveled mutex order violation"
            );
        }

        E::check(MutexError::new(kind, self.level(), message))
    }

    fn lock_this(&self) -> Result<(), ErrorKind> {
        debug_assert!(!self.is_locked_by_current_thread());

        self.state.raw.lock()?;
        self.post_lock();
        Ok(())
    }

    fn try_lock_this(&self) -> Result<(), ErrorKind> {
        debug_assert!(!self.is_locked_by_current_thread());

        self.state.raw.try_lock()?;
        self.post_lock();
        Ok(())
    }

    fn lock_this_until(&self, deadline: Instant) -> Result<(), ErrorKind> {
        debug_assert!(!self.is_locked_by_current_thread());

        self.lock_until(deadline)
    }

    fn relock_this(&self) {
        chain::with_mut(|chain| chain.increment(self.id()));
        self.state.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unlock_this(&self) -> Result<(), ErrorKind> {
        let decremented = chain::with_mut(|chain| match chain.find(self.id()) {
            Some(held) if held.count > 1 => chain.decrement(self.id()).is_some(),
            _ => false,
        });

        if decremented {
            self.state.lock_count.fetch_sub(1, Ordering::AcqRel);
            return Ok(());
        }

        self.release()
    }
}

impl<R, const DEFAULT_LEVEL: u32, E, W> LevelLock for LevelMutex<R, DEFAULT_LEVEL, E, W>
where
    R: RawMutex,
    E: ErrorPolicy,
    W: WaitPolicy,
{
    fn id(&self) -> MutexId {
        LevelMutex::id(self)
    }

    fn level(&self) -> Level {
        LevelMutex::level(self)
    }

    fn lock_count(&self) -> u32 {
        LevelMutex::lock_count(self)
    }

    fn is_locked_by_another_thread(&self) -> bool {
        let owner = self.state.owner.load(Ordering::Acquire);
        owner != 0 && owner != chain::thread_token()
    }

    fn lock(&self) -> Result<(), MutexError> {
        LevelMutex::lock(self)
    }

    fn try_lock(&self) -> Result<(), MutexError> {
        LevelMutex::try_lock(self)
    }

    fn lock_timeout(&self, timeout: Duration) -> Result<(), MutexError> {
        LevelMutex::lock_timeout(self, timeout)
    }

    fn unlock(&self) -> Result<(), MutexError> {
        LevelMutex::unlock(self)
    }
}

impl<R, const DEFAULT_LEVEL: u32, E, W> Default for LevelMutex<R, DEFAULT_LEVEL, E, W>
where
    R: RawMutex,
    E: ErrorPolicy,
    W: WaitPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawMutex, const DEFAULT_LEVEL: u32, E: ErrorPolicy, W: WaitPolicy> Drop
    for LevelMutex<R, DEFAULT_LEVEL, E, W>
{
    /// Destroys the mutex.
    ///
    /// Dropping a held mutex is a usage error. If the calling thread holds
    /// it, the mutex is taken off the chain and released first. If another
    /// thread holds it, the native primitive is leaked rather than destroyed
    /// while locked.
    fn drop(&mut self) {
        if self.lock_count() == 0 {
            unsafe { ManuallyDrop::drop(&mut self.state.raw) };
            return;
        }

        let id = self.id();
        let held = chain::try_with_mut(|chain| chain.forget(id)).flatten();

        tracing::error!(
            id = ?id,
            level = %self.level(),
            held_here = held.is_some(),
            "leveled mutex dropped while locked"
        );

        if held.is_some() && unsafe { self.state.raw.unlock() }.is_ok() {
            unsafe { ManuallyDrop::drop(&mut self.state.raw) };
        }
    }
}
