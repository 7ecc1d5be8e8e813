// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Recursive lock with owner tracking, built on a one-unit semaphore.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::flags::{AreaAccess, SemFlags};
use crate::ident::current_thread_id;
use crate::semaphore::Semaphore;
use crate::time::{Bigtime, INFINITE_TIMEOUT};
use crate::{Error, Result};

struct LockerInner {
    sem: Semaphore,
    /// Thread id of the holder, 0 when unheld.
    holder: AtomicU64,
    /// Nesting depth of the holder. Only the holder writes it.
    depth: AtomicI64,
    closed: AtomicBool,
}

/// A recursive mutual-exclusion lock.
///
/// The holding thread may call [`lock`](Locker::lock) again without
/// blocking; each call must be balanced by an [`unlock`](Locker::unlock).
/// Holder and depth are tracked in this process even when the lock sits on
/// a named semaphore shared with other processes.
///
/// Cloning shares the same lock.
#[derive(Clone)]
pub struct Locker {
    inner: Arc<LockerInner>,
}

impl Locker {
    /// A process-local locker.
    pub fn new() -> Self {
        Self::with_semaphore(Semaphore::local(1))
    }

    /// A locker on a new named semaphore other processes can share.
    pub fn named(name: &str) -> Result<Self> {
        let sem = Semaphore::create(1, Some(name), AreaAccess::OWNER)?;
        Ok(Self::with_semaphore(sem))
    }

    /// A locker on an existing named semaphore.
    pub fn clone_named(name: &str) -> Result<Self> {
        Ok(Self::with_semaphore(Semaphore::clone_named(name)?))
    }

    /// Wrap a semaphore. It should hold exactly one unit.
    pub fn with_semaphore(sem: Semaphore) -> Self {
        Self {
            inner: Arc::new(LockerInner {
                sem,
                holder: AtomicU64::new(0),
                depth: AtomicI64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquire the lock, waiting as long as needed.
    pub fn lock(&self) -> Result<()> {
        self.lock_etc(SemFlags::empty(), INFINITE_TIMEOUT)
    }

    /// Acquire the lock with the timeout conventions of
    /// [`Semaphore::acquire_etc`]. Re-entrant for the holder.
    pub fn lock_etc(&self, flags: SemFlags, timeout: Bigtime) -> Result<()> {
        let inner = &*self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let me = current_thread_id();
        if inner.holder.load(Ordering::Acquire) == me {
            let depth = inner.depth.load(Ordering::Relaxed);
            if depth == i64::MAX {
                return Err(Error::BadValue("lock count overflow"));
            }
            inner.depth.store(depth + 1, Ordering::Relaxed);
            return Ok(());
        }

        inner.sem.acquire_etc(1, flags, timeout)?;
        inner.depth.store(1, Ordering::Relaxed);
        inner.holder.store(me, Ordering::Release);
        Ok(())
    }

    /// Release one level. Fails with `NotOwner`, leaving the lock untouched,
    /// if the caller does not hold it.
    pub fn unlock(&self) -> Result<()> {
        let inner = &*self.inner;
        let me = current_thread_id();
        if inner.holder.load(Ordering::Acquire) != me {
            log::error!("unlock of a locker not held by thread {me}");
            return Err(Error::NotOwner);
        }
        let depth = inner.depth.load(Ordering::Relaxed) - 1;
        inner.depth.store(depth, Ordering::Relaxed);
        if depth > 0 {
            return Ok(());
        }
        inner.holder.store(0, Ordering::Release);
        match inner.sem.release() {
            Ok(()) | Err(Error::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Nesting depth as seen by the caller: positive if the caller holds the
    /// lock, negative (the holder's depth) if another thread does, 0 if free.
    pub fn count_locks(&self) -> i64 {
        let holder = self.inner.holder.load(Ordering::Acquire);
        if holder == 0 {
            return 0;
        }
        let depth = self.inner.depth.load(Ordering::Relaxed);
        if holder == current_thread_id() {
            depth
        } else {
            -depth
        }
    }

    /// True if the calling thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.holder.load(Ordering::Acquire) == current_thread_id()
    }

    /// Make every later `lock` fail with `Closed` and release blocked
    /// lockers with that error. The holder may still unwind with `unlock`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        match self.inner.sem.close() {
            Ok(()) | Err(Error::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Lock and return a guard that unlocks when dropped.
    pub fn guard(&self) -> Result<LockerGuard<'_>> {
        self.lock()?;
        Ok(LockerGuard { locker: self })
    }

    /// Fully release the caller's nesting and remember its depth.
    ///
    /// The returned [`SuspendedLock`] re-acquires the same depth on
    /// [`restore`](SuspendedLock::restore) or when dropped, stacked on any
    /// nesting the caller took in the meantime. If the caller does not hold
    /// the lock this is a no-op and nothing is restored.
    pub fn release_all_and_remember(&self) -> Result<SuspendedLock<'_>> {
        let inner = &*self.inner;
        let me = current_thread_id();
        if inner.holder.load(Ordering::Acquire) != me {
            return Ok(SuspendedLock {
                locker: self,
                depth: 0,
            });
        }
        let depth = inner.depth.swap(0, Ordering::Relaxed);
        inner.holder.store(0, Ordering::Release);
        match inner.sem.release() {
            Ok(()) | Err(Error::Closed) => {}
            Err(e) => return Err(e),
        }
        Ok(SuspendedLock {
            locker: self,
            depth,
        })
    }

    /// Take the lock and add `depth` nesting levels on top of whatever the
    /// caller already holds.
    fn relock_to(&self, depth: i64) -> Result<()> {
        self.lock()?;
        self.inner.depth.fetch_add(depth - 1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Locker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locker")
            .field("holder", &self.inner.holder.load(Ordering::Relaxed))
            .field("depth", &self.inner.depth.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// RAII lock on a [`Locker`].
pub struct LockerGuard<'a> {
    locker: &'a Locker,
}

impl Drop for LockerGuard<'_> {
    fn drop(&mut self) {
        let _ = self.locker.unlock();
    }
}

/// A lock temporarily given up by [`Locker::release_all_and_remember`].
#[must_use = "dropping immediately re-acquires the lock"]
pub struct SuspendedLock<'a> {
    locker: &'a Locker,
    depth: i64,
}

impl SuspendedLock<'_> {
    /// Depth that will be restored (0 if the caller held nothing).
    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// Re-acquire the lock to the remembered depth.
    pub fn restore(mut self) -> Result<()> {
        let depth = std::mem::take(&mut self.depth);
        if depth == 0 {
            return Ok(());
        }
        self.locker.relock_to(depth)
    }
}

impl Drop for SuspendedLock<'_> {
    fn drop(&mut self) {
        if self.depth == 0 {
            return;
        }
        if let Err(e) = self.locker.relock_to(self.depth) {
            log::warn!("could not restore lock depth {}: {e}", self.depth);
        }
    }
}
