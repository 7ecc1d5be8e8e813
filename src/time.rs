// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Microsecond clock and deadline arithmetic used by blocking calls.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::flags::SemFlags;
use crate::{Error, Result};

/// Microseconds. Relative timeouts and absolute deadlines share this unit.
pub type Bigtime = i64;

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT: Bigtime = i64::MAX;

/// Microseconds since the Unix epoch on the real-time clock.
pub fn real_time_clock_usecs() -> Bigtime {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_micros()).unwrap_or(i64::MAX)
}

/// When a blocking call must give up.
///
/// Computed once at call entry; every subsequent sleep asks for the time
/// remaining against the same real-time clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    /// Fail immediately with `WouldBlock` instead of sleeping.
    NoWait,
    Never,
    At(Bigtime),
}

impl Deadline {
    /// Interpret `timeout` according to the timeout bits of `flags`.
    ///
    /// Without `TIMEOUT` or `ABSOLUTE_TIMEOUT` the call waits forever. A
    /// relative timeout of zero requests a non-blocking attempt. Negative
    /// values are rejected whatever the flags.
    pub(crate) fn from_flags(flags: SemFlags, timeout: Bigtime) -> Result<Self> {
        if timeout < 0 {
            return Err(Error::BadValue("negative timeout"));
        }
        if flags.contains(SemFlags::ABSOLUTE_TIMEOUT) {
            if timeout == INFINITE_TIMEOUT {
                return Ok(Deadline::Never);
            }
            return Ok(Deadline::At(timeout));
        }
        if flags.contains(SemFlags::TIMEOUT) {
            if timeout == 0 {
                return Ok(Deadline::NoWait);
            }
            if timeout == INFINITE_TIMEOUT {
                return Ok(Deadline::Never);
            }
            let at = real_time_clock_usecs().saturating_add(timeout);
            if at == INFINITE_TIMEOUT {
                return Ok(Deadline::Never);
            }
            return Ok(Deadline::At(at));
        }
        Ok(Deadline::Never)
    }

    /// Time left before the deadline. `None` means unbounded, a zero duration
    /// means the deadline has passed.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        match *self {
            Deadline::NoWait => Some(Duration::ZERO),
            Deadline::Never => None,
            Deadline::At(at) => {
                let left = at.saturating_sub(real_time_clock_usecs());
                Some(Duration::from_micros(left.max(0) as u64))
            }
        }
    }

    pub(crate) fn is_no_wait(&self) -> bool {
        matches!(self, Deadline::NoWait)
    }
}
