// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting semaphore, process-local or named and shared between processes.
//
// Both flavours run the same counter logic (`Counters`). The local flavour
// keeps the counters behind a std mutex and sleeps on a condvar. The named
// flavour keeps them in a descriptor inside an area, guarded by a spin lock,
// and sleeps on a sequence word with the platform address wait.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::area::Area;
use crate::config::SEM_DOMAIN;
use crate::flags::{AreaAccess, AreaProtection, SemFlags};
use crate::ident::Holder;
use crate::platform::{Native, Platform, WaitOutcome};
use crate::spin_lock::SpinLock;
use crate::time::{Bigtime, Deadline, INFINITE_TIMEOUT};
use crate::{Error, Result};

const SEM_MAGIC: u32 = 0x4554_4b53; // "ETKS"

// ---------------------------------------------------------------------------
// Counter logic shared by both flavours
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Counters {
    count: i64,
    /// Sum of the amounts blocked waiters are asking for.
    acquiring: i64,
    /// Lower bound on the smallest amount any blocked waiter needs.
    /// May be stale-low after a waiter leaves, never stale-high.
    min_acquiring: i64,
    waiters: u32,
    closed: bool,
    latest: Option<Holder>,
}

enum Step {
    Acquired,
    Closed,
    Wait,
}

impl Counters {
    fn new(count: i64) -> Self {
        Self {
            count,
            acquiring: 0,
            min_acquiring: i64::MAX,
            waiters: 0,
            closed: false,
            latest: None,
        }
    }

    fn try_take(&mut self, req: i64, registered: bool) -> Step {
        if self.closed {
            if registered {
                self.unregister(req);
            }
            return Step::Closed;
        }
        if self.count - req >= 0 {
            self.count -= req;
            if registered {
                self.unregister(req);
            }
            self.latest = Some(Holder::current());
            return Step::Acquired;
        }
        Step::Wait
    }

    fn register(&mut self, req: i64) {
        self.acquiring = self.acquiring.saturating_add(req);
        self.waiters += 1;
        self.min_acquiring = self.min_acquiring.min(req);
    }

    fn unregister(&mut self, req: i64) {
        self.acquiring -= req;
        self.waiters -= 1;
        if self.waiters == 0 {
            self.min_acquiring = i64::MAX;
        }
    }

    /// Add `n`; returns whether some waiter might now succeed.
    fn give(&mut self, n: i64) -> Result<bool> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.count = self
            .count
            .checked_add(n)
            .ok_or(Error::BadValue("semaphore count overflow"))?;
        Ok(self.waiters > 0 && self.count >= self.min_acquiring)
    }

    fn visible_count(&self) -> i64 {
        if self.acquiring > 0 {
            -self.acquiring
        } else {
            self.count
        }
    }
}

fn check_acquire_count(count: i64) -> Result<()> {
    if count < 1 {
        return Err(Error::BadValue("acquire count must be at least 1"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Local flavour
// ---------------------------------------------------------------------------

struct LocalSem {
    state: Mutex<Counters>,
    cond: Condvar,
}

impl LocalSem {
    fn new(count: i64) -> Self {
        Self {
            state: Mutex::new(Counters::new(count)),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, req: i64, deadline: Deadline) -> Result<()> {
        let mut st = self.lock();
        let mut registered = false;
        loop {
            match st.try_take(req, registered) {
                Step::Acquired => return Ok(()),
                Step::Closed => return Err(Error::Closed),
                Step::Wait => {}
            }
            if deadline.is_no_wait() {
                return Err(Error::WouldBlock);
            }
            let remaining = deadline.remaining();
            if remaining == Some(Duration::ZERO) {
                if registered {
                    st.unregister(req);
                }
                return Err(Error::TimedOut);
            }
            if !registered {
                st.register(req);
                registered = true;
            }
            st = match remaining {
                None => self.cond.wait(st).unwrap_or_else(PoisonError::into_inner),
                Some(d) => {
                    self.cond
                        .wait_timeout(st, d)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn release(&self, n: i64, reschedule: bool) -> Result<()> {
        let wake = self.lock().give(n)?;
        if wake && reschedule {
            self.cond.notify_all();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        {
            let mut st = self.lock();
            if st.closed {
                return Err(Error::Closed);
            }
            st.closed = true;
        }
        self.cond.notify_all();
        Ok(())
    }

    fn snapshot(&self) -> Counters {
        *self.lock()
    }
}

// ---------------------------------------------------------------------------
// Named flavour
// ---------------------------------------------------------------------------

/// Lives at the start of the semaphore's area. Counter fields are only
/// touched with `lock` held; they are atomics so that the descriptor can be
/// shared by reference across threads and processes.
#[repr(C)]
struct SemDescriptor {
    magic: AtomicU32,
    lock: SpinLock,
    /// Bumped on every waking release and on close; waiters sleep on it.
    seq: AtomicU32,
    refcount: AtomicU32,
    closed: AtomicU32,
    waiters: AtomicU32,
    latest_pid: AtomicU32,
    _pad: u32,
    latest_tid: AtomicU64,
    count: AtomicI64,
    acquiring: AtomicI64,
    min_acquiring: AtomicI64,
}

impl SemDescriptor {
    fn load(&self) -> Counters {
        let tid = self.latest_tid.load(Ordering::Relaxed);
        Counters {
            count: self.count.load(Ordering::Relaxed),
            acquiring: self.acquiring.load(Ordering::Relaxed),
            min_acquiring: self.min_acquiring.load(Ordering::Relaxed),
            waiters: self.waiters.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed) != 0,
            latest: (tid != 0).then(|| Holder {
                pid: self.latest_pid.load(Ordering::Relaxed),
                tid,
            }),
        }
    }

    fn store(&self, c: &Counters) {
        self.count.store(c.count, Ordering::Relaxed);
        self.acquiring.store(c.acquiring, Ordering::Relaxed);
        self.min_acquiring.store(c.min_acquiring, Ordering::Relaxed);
        self.waiters.store(c.waiters, Ordering::Relaxed);
        self.closed.store(c.closed as u32, Ordering::Relaxed);
        if let Some(h) = c.latest {
            self.latest_pid.store(h.pid, Ordering::Relaxed);
            self.latest_tid.store(h.tid, Ordering::Relaxed);
        }
    }

    /// Apply `f` to the counters under the descriptor lock.
    fn with<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let _g = self.lock.guard();
        let mut c = self.load();
        let r = f(&mut c);
        self.store(&c);
        r
    }

    fn wake_all(&self) {
        Native::wake_address(&self.seq, u32::MAX);
    }
}

fn descriptor_of(area: &Area) -> &SemDescriptor {
    // Safety: callers only pass areas of at least one descriptor; the usable
    // region starts 64-byte aligned and lives as long as `area`.
    unsafe { &*(area.as_ptr() as *const SemDescriptor) }
}

struct IpcSem {
    area: Area,
}

impl IpcSem {
    fn create(name: &str, count: i64, access: AreaAccess) -> Result<Self> {
        let area = Area::create(
            Some(name),
            std::mem::size_of::<SemDescriptor>(),
            AreaProtection::ReadWrite,
            SEM_DOMAIN,
            access,
        )?;
        let sem = Self { area };
        let d = sem.desc();
        d.store(&Counters::new(count));
        d.refcount.store(1, Ordering::Relaxed);
        d.magic.store(SEM_MAGIC, Ordering::Release);
        log::debug!("created named semaphore {name} (count {count})");
        Ok(sem)
    }

    fn attach(name: &str) -> Result<Self> {
        let area = Area::attach(name, SEM_DOMAIN, AreaProtection::ReadWrite)?;
        if area.len() < std::mem::size_of::<SemDescriptor>() {
            return Err(Error::Invalid("area too small for a semaphore"));
        }
        {
            let d = descriptor_of(&area);
            if d.magic.load(Ordering::Acquire) != SEM_MAGIC {
                return Err(Error::Invalid("not a semaphore area"));
            }
            let _g = d.lock.guard();
            if d.closed.load(Ordering::Relaxed) != 0 {
                return Err(Error::Closed);
            }
            let refs = d.refcount.load(Ordering::Relaxed);
            if refs == 0 || refs == u32::MAX {
                return Err(Error::BadValue("semaphore reference count exhausted"));
            }
            d.refcount.store(refs + 1, Ordering::Relaxed);
        }
        let sem = Self { area };
        log::debug!("cloned named semaphore {name}");
        Ok(sem)
    }

    fn desc(&self) -> &SemDescriptor {
        descriptor_of(&self.area)
    }

    fn acquire(&self, req: i64, deadline: Deadline, interruptible: bool) -> Result<()> {
        let d = self.desc();
        let mut registered = false;
        loop {
            let seq = {
                let _g = d.lock.guard();
                let mut c = d.load();
                let step = c.try_take(req, registered);
                match step {
                    Step::Acquired => {
                        d.store(&c);
                        return Ok(());
                    }
                    Step::Closed => {
                        d.store(&c);
                        return Err(Error::Closed);
                    }
                    Step::Wait => {}
                }
                if deadline.is_no_wait() {
                    return Err(Error::WouldBlock);
                }
                if deadline.remaining() == Some(Duration::ZERO) {
                    if registered {
                        c.unregister(req);
                        d.store(&c);
                    }
                    return Err(Error::TimedOut);
                }
                if !registered {
                    c.register(req);
                    d.store(&c);
                    registered = true;
                }
                // Read under the lock: any release after this point bumps it
                // and the wait below returns immediately.
                d.seq.load(Ordering::Acquire)
            };

            let outcome = Native::wait_on_address(&d.seq, seq, deadline.remaining(), interruptible);
            match outcome {
                Ok(WaitOutcome::Woken) | Ok(WaitOutcome::TimedOut) => {}
                Ok(WaitOutcome::Interrupted) => {
                    d.with(|c| c.unregister(req));
                    return Err(Error::Interrupted);
                }
                Err(e) => {
                    d.with(|c| c.unregister(req));
                    return Err(e.into());
                }
            }
        }
    }

    fn release(&self, n: i64, reschedule: bool) -> Result<()> {
        let d = self.desc();
        let wake = {
            let _g = d.lock.guard();
            let mut c = d.load();
            let wake = c.give(n)? && reschedule;
            d.store(&c);
            if wake {
                d.seq.fetch_add(1, Ordering::Release);
            }
            wake
        };
        if wake {
            d.wake_all();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let d = self.desc();
        {
            let _g = d.lock.guard();
            if d.closed.load(Ordering::Relaxed) != 0 {
                return Err(Error::Closed);
            }
            d.closed.store(1, Ordering::Relaxed);
            d.seq.fetch_add(1, Ordering::Release);
        }
        d.wake_all();
        Ok(())
    }

    fn snapshot(&self) -> Counters {
        let d = self.desc();
        let _g = d.lock.guard();
        d.load()
    }
}

impl Drop for IpcSem {
    fn drop(&mut self) {
        let d = self.desc();
        if d.magic.load(Ordering::Acquire) != SEM_MAGIC {
            return;
        }
        let last = {
            let _g = d.lock.guard();
            let refs = d.refcount.load(Ordering::Relaxed).saturating_sub(1);
            d.refcount.store(refs, Ordering::Relaxed);
            if refs == 0 {
                d.closed.store(1, Ordering::Relaxed);
                d.seq.fetch_add(1, Ordering::Release);
            }
            refs == 0
        };
        if last {
            d.wake_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

enum Backend {
    Local(LocalSem),
    Ipc(IpcSem),
}

struct SemInner {
    backend: Backend,
    name: Option<String>,
}

/// Snapshot returned by [`Semaphore::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemInfo {
    pub name: Option<String>,
    /// Same convention as [`Semaphore::count`].
    pub count: i64,
    pub waiters: u32,
    pub latest_holder: Option<Holder>,
    pub closed: bool,
}

/// A counting semaphore.
///
/// Unnamed semaphores are private to the process. Named ones live in an
/// area and can be cloned by other processes with [`Semaphore::clone_named`].
/// `Clone` shares the handle within the process; the underlying semaphore
/// goes away with the last handle.
///
/// Waiters are not served in FIFO order.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemInner>,
}

impl Semaphore {
    /// Create a semaphore holding `count` units.
    pub fn create(count: i64, name: Option<&str>, access: AreaAccess) -> Result<Self> {
        if count < 0 {
            return Err(Error::BadValue("initial count is negative"));
        }
        let backend = match name {
            None => Backend::Local(LocalSem::new(count)),
            Some(n) => Backend::Ipc(IpcSem::create(n, count, access)?),
        };
        Ok(Self::wrap(backend, name))
    }

    /// Process-local semaphore; shorthand for `create(count, None, ..)`.
    pub fn new(count: i64) -> Result<Self> {
        Self::create(count, None, AreaAccess::OWNER)
    }

    /// Local semaphore for callers that already know `count >= 0`.
    pub(crate) fn local(count: u32) -> Self {
        Self::wrap(Backend::Local(LocalSem::new(count as i64)), None)
    }

    /// Attach to a named semaphore created elsewhere.
    pub fn clone_named(name: &str) -> Result<Self> {
        Ok(Self::wrap(Backend::Ipc(IpcSem::attach(name)?), Some(name)))
    }

    fn wrap(backend: Backend, name: Option<&str>) -> Self {
        Self {
            inner: Arc::new(SemInner {
                backend,
                name: name.map(str::to_string),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Take `count` units.
    ///
    /// `flags` selects how `timeout` (microseconds) is read: relative with
    /// `TIMEOUT`, an absolute real-time deadline with `ABSOLUTE_TIMEOUT`,
    /// ignored (wait forever) otherwise. A relative timeout of zero never
    /// blocks and fails with `WouldBlock`.
    pub fn acquire_etc(&self, count: i64, flags: SemFlags, timeout: Bigtime) -> Result<()> {
        check_acquire_count(count)?;
        let deadline = Deadline::from_flags(flags, timeout)?;
        match &self.inner.backend {
            Backend::Local(s) => s.acquire(count, deadline),
            Backend::Ipc(s) => {
                s.acquire(count, deadline, flags.contains(SemFlags::CAN_INTERRUPT))
            }
        }
    }

    /// Take one unit, waiting as long as needed.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_etc(1, SemFlags::empty(), INFINITE_TIMEOUT)
    }

    /// Take one unit if immediately available.
    pub fn try_acquire(&self) -> Result<()> {
        self.acquire_etc(1, SemFlags::TIMEOUT, 0)
    }

    /// Take one unit, waiting at most `timeout` microseconds.
    pub fn acquire_timeout(&self, timeout: Bigtime) -> Result<()> {
        self.acquire_etc(1, SemFlags::TIMEOUT, timeout)
    }

    /// Return `count` units. With `DO_NOT_RESCHEDULE` blocked waiters are
    /// not woken; they see the units on their next wake-up.
    pub fn release_etc(&self, count: i64, flags: SemFlags) -> Result<()> {
        if count < 0 {
            return Err(Error::BadValue("release count is negative"));
        }
        let reschedule = !flags.contains(SemFlags::DO_NOT_RESCHEDULE);
        match &self.inner.backend {
            Backend::Local(s) => s.release(count, reschedule),
            Backend::Ipc(s) => s.release(count, reschedule),
        }
    }

    pub fn release(&self) -> Result<()> {
        self.release_etc(1, SemFlags::empty())
    }

    /// Mark the semaphore closed and wake every waiter; they and all later
    /// callers get `Closed`. Fails with `Closed` if already closed.
    pub fn close(&self) -> Result<()> {
        match &self.inner.backend {
            Backend::Local(s) => s.close(),
            Backend::Ipc(s) => s.close(),
        }
    }

    fn snapshot(&self) -> Counters {
        match &self.inner.backend {
            Backend::Local(s) => s.snapshot(),
            Backend::Ipc(s) => s.snapshot(),
        }
    }

    /// Available units, or minus the total units waiters are blocked on.
    pub fn count(&self) -> i64 {
        self.snapshot().visible_count()
    }

    pub fn is_closed(&self) -> bool {
        self.snapshot().closed
    }

    pub fn info(&self) -> SemInfo {
        let c = self.snapshot();
        SemInfo {
            name: self.inner.name.clone(),
            count: c.visible_count(),
            waiters: c.waiters,
            latest_holder: c.latest,
            closed: c.closed,
        }
    }

    /// Drop this handle; the last handle tears the semaphore down.
    pub fn delete(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Remove the backing storage of a named semaphore left behind by a
    /// crashed process.
    pub fn clear_storage(name: &str) {
        Area::clear_storage(name, SEM_DOMAIN);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").field("info", &self.info()).finish()
    }
}
