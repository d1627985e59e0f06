//! Platform-specific native mutex.
//!
//! This module provides one [`NativeMutex`] per target family behind the same
//! three operations:
//! - blocking acquire,
//! - non-blocking acquire,
//! - release.
//!
//! Platform error codes are mapped onto [`ErrorKind`](crate::ErrorKind) so
//! the leveled protocol can surface them verbatim.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) use windows as platform;

pub(crate) use platform::NativeMutex;
