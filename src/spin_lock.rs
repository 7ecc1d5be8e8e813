// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Non-recursive fast lock guarding a semaphore descriptor.
// The lock word is plain memory, so it works inside a shared area.

use std::sync::atomic::{AtomicU32, Ordering};

/// Adaptive backoff: busy spin, then CPU pause hint, then yield, then sleep 1ms.
///
/// - k < 4:  busy spin
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// A spin lock with adaptive backoff.
///
/// `repr(transparent)` over an `AtomicU32` so it can be embedded in a
/// `repr(C)` structure living in shared memory; an all-zero word is the
/// unlocked state, which is what a fresh mapping contains.
#[repr(transparent)]
pub struct SpinLock {
    lc: AtomicU32,
}

impl SpinLock {
    /// Create a new unlocked spin lock.
    pub const fn new() -> Self {
        Self {
            lc: AtomicU32::new(0),
        }
    }

    /// Acquire the lock (spinning with adaptive backoff).
    pub fn lock(&self) {
        let mut k = 0u32;
        while self.lc.swap(1, Ordering::Acquire) != 0 {
            adaptive_yield(&mut k);
        }
    }

    /// Try once; true if the lock was taken.
    pub fn try_lock(&self) -> bool {
        self.lc.swap(1, Ordering::Acquire) == 0
    }

    /// Release the lock.
    pub fn unlock(&self) {
        self.lc.store(0, Ordering::Release);
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn guard(&self) -> SpinGuard<'_> {
        self.lock();
        SpinGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.lc.load(Ordering::Relaxed) != 0
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
