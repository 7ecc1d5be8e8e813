// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The OS seam. Everything above this module is written once against the
// `Platform` trait and `PlatformShm`; each OS family supplies both.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::{Native, PlatformShm};

#[cfg(windows)]
pub use windows::{Native, PlatformShm};

/// Why an address wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken, or the word no longer held the expected value. Callers
    /// re-check their condition either way.
    Woken,
    TimedOut,
    /// A signal ended the wait early.
    Interrupted,
}

/// Primitives every OS backend provides.
pub trait Platform {
    /// Granularity of area allocations.
    fn page_size() -> usize;

    /// Sleep while `*word == expected`, for at most `timeout` (`None` means
    /// forever). `word` may live in memory shared with other processes.
    fn wait_on_address(
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> io::Result<WaitOutcome>;

    /// Wake up to `count` threads sleeping on `word`.
    fn wake_address(word: &AtomicU32, count: u32);
}

/// Round `size` up to a multiple of the platform page size.
pub fn round_to_page(size: usize) -> Option<usize> {
    let page = Native::page_size();
    size.checked_add(page - 1).map(|s| s / page * page)
}

/// Address wait by polling with adaptive backoff, for platforms without a
/// cross-process wait-on-address primitive. Wakes are implicit: the
/// waiter observes the changed word on its next poll.
#[allow(dead_code)]
pub(crate) fn poll_wait_on_address(
    word: &AtomicU32,
    expected: u32,
    timeout: Option<Duration>,
) -> WaitOutcome {
    let start = Instant::now();
    let mut k = 0u32;
    loop {
        if word.load(Ordering::Acquire) != expected {
            return WaitOutcome::Woken;
        }
        if let Some(t) = timeout {
            if start.elapsed() >= t {
                return WaitOutcome::TimedOut;
            }
        }
        crate::spin_lock::adaptive_yield(&mut k);
    }
}
