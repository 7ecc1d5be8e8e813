// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error kinds shared by every primitive in the crate.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds returned by areas, semaphores, lockers and the token depot.
///
/// `TimedOut` and `WouldBlock` are routine and meant to be retried.
/// `Closed` is the shutdown signal: once a primitive is closed every further
/// use reports it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad value: {0}")]
    BadValue(&'static str),

    #[error("out of memory")]
    NoMemory,

    #[error("object already exists")]
    AlreadyExists,

    #[error("object not found")]
    NotFound,

    #[error("invalid object: {0}")]
    Invalid(&'static str),

    #[error("operation not supported on this platform")]
    Unsupported,

    #[error("timed out")]
    TimedOut,

    #[error("operation would block")]
    WouldBlock,

    #[error("wait interrupted by a signal")]
    Interrupted,

    #[error("object has been closed")]
    Closed,

    #[error("calling thread does not own the lock")]
    NotOwner,

    #[error("os error: {0}")]
    Os(#[source] io::Error),
}

impl Error {
    /// True for the kinds a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TimedOut | Error::WouldBlock)
    }

    /// The platform errno (or Win32 error code), if this came from an OS call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Os(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::AlreadyExists => Error::AlreadyExists,
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::OutOfMemory => Error::NoMemory,
            io::ErrorKind::TimedOut => Error::TimedOut,
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::Unsupported => Error::Unsupported,
            io::ErrorKind::Interrupted => Error::Interrupted,
            _ => Error::Os(e),
        }
    }
}
