use std::fmt;

/// The immutable ordering tag carried by every leveled mutex.
///
/// A thread may only lock a mutex whose level is less than or equal to the
/// level of the mutex it locked most recently and still holds. Larger
/// levels are therefore "outer" locks and smaller levels "inner" ones.
///
/// The maximum `u32` value is reserved as [`Level::UNLOCKED`], the level of
/// a thread that holds nothing. It can never be assigned to a mutex: the
/// constructors reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(u32);

impl Level {
    /// Level reported for a thread that holds no leveled mutex.
    pub const UNLOCKED: Level = Level(u32::MAX);

    /// Highest level a mutex may use.
    pub const MAX: Level = Level(u32::MAX - 1);

    /// Creates a mutex level.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is the reserved unlocked sentinel (`u32::MAX`).
    pub const fn new(raw: u32) -> Self {
        assert!(raw != u32::MAX, "u32::MAX is reserved for Level::UNLOCKED");
        Level(raw)
    }

    /// Creates a mutex level, or `None` if `raw` is the unlocked sentinel.
    pub const fn try_new(raw: u32) -> Option<Self> {
        if raw == u32::MAX {
            None
        } else {
            Some(Level(raw))
        }
    }

    /// Returns the numeric value of this level.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for the unlocked sentinel.
    pub const fn is_unlocked(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlocked() {
            f.write_str("unlocked")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> u32 {
        level.0
    }
}
