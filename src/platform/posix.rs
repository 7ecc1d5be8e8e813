// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX backend: shm_open/mmap mappings, futex address waits on Linux and
// polled waits on the other Unix flavours.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use super::{Platform, WaitOutcome};

// ---------------------------------------------------------------------------
// Native: page size and address waits
// ---------------------------------------------------------------------------

pub struct Native;

impl Platform for Native {
    fn page_size() -> usize {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn wait_on_address(
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> io::Result<WaitOutcome> {
        // FUTEX_WAIT takes a relative timeout measured on CLOCK_MONOTONIC.
        // Shared (non-private) futex: waiters may be in other processes.
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |t| t as *const libc::timespec);
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                ts_ptr,
                ptr::null::<u32>(),
                0u32,
            )
        };
        if ret == 0 {
            return Ok(WaitOutcome::Woken);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(WaitOutcome::Woken),
            Some(libc::ETIMEDOUT) => Ok(WaitOutcome::TimedOut),
            Some(libc::EINTR) if interruptible => Ok(WaitOutcome::Interrupted),
            // Restarting with the full timeout would overshoot; let the
            // caller recompute against its deadline.
            Some(libc::EINTR) => Ok(WaitOutcome::Woken),
            _ => Err(err),
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn wait_on_address(
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
        _interruptible: bool,
    ) -> io::Result<WaitOutcome> {
        Ok(super::poll_wait_on_address(word, expected, timeout))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn wake_address(word: &AtomicU32, count: u32) {
        let n = count.min(i32::MAX as u32) as libc::c_int;
        unsafe {
            libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, n);
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn wake_address(_word: &AtomicU32, _count: u32) {}
}

// ---------------------------------------------------------------------------
// PlatformShm: one mapping, named (shm_open) or anonymous
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    /// POSIX name (with leading '/'); `None` for anonymous mappings.
    name: Option<String>,
}

// Safety: the mapping is plain memory; synchronisation is the caller's job.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn prot_bits(writable: bool) -> libc::c_int {
    if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    }
}

impl PlatformShm {
    /// Create a new named object of exactly `size` bytes; `AlreadyExists`
    /// if the name is taken.
    pub fn create(name: &str, size: usize, mode: u32) -> io::Result<Self> {
        let c = c_name(name)?;
        let fd = unsafe {
            libc::shm_open(
                c.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                mode as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // Ensure permissions regardless of umask.
        unsafe { libc::fchmod(fd, mode as libc::mode_t) };

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c.as_ptr());
            }
            return Err(err);
        }

        match Self::map_fd(fd, size, true, name) {
            Ok(shm) => Ok(shm),
            Err(e) => {
                unsafe { libc::shm_unlink(c.as_ptr()) };
                Err(e)
            }
        }
    }

    /// Open an existing named object and map all of it.
    pub fn open(name: &str, writable: bool) -> io::Result<Self> {
        let c = c_name(name)?;
        let oflag = if writable { libc::O_RDWR } else { libc::O_RDONLY };
        let fd = unsafe { libc::shm_open(c.as_ptr(), oflag, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = st.st_size as usize;
        if size == 0 {
            // Creator has not sized it yet.
            unsafe { libc::close(fd) };
            return Err(io::Error::new(io::ErrorKind::NotFound, "object not initialised"));
        }

        Self::map_fd(fd, size, writable, name)
    }

    /// Process-private anonymous mapping.
    pub fn anonymous(size: usize) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: None,
        })
    }

    fn map_fd(fd: i32, size: usize, writable: bool, name: &str) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                prot_bits(writable),
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: Some(name.to_string()),
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Total mapped size.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn protect(&self, writable: bool) -> io::Result<()> {
        let ret = unsafe {
            libc::mprotect(self.mem as *mut libc::c_void, self.size, prot_bits(writable))
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Grow or shrink the mapping (and its backing object), possibly moving it.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn resize(&mut self, new_size: usize) -> io::Result<()> {
        if let Some(name) = &self.name {
            let c = c_name(name)?;
            let fd = unsafe { libc::shm_open(c.as_ptr(), libc::O_RDWR, 0) };
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            let ret = unsafe { libc::ftruncate(fd, new_size as libc::off_t) };
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            if ret != 0 {
                return Err(err);
            }
        }
        let mem = unsafe {
            libc::mremap(
                self.mem as *mut libc::c_void,
                self.size,
                new_size,
                libc::MREMAP_MAYMOVE,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        self.mem = mem as *mut u8;
        self.size = new_size;
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn resize(&mut self, _new_size: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    /// Remove the name; existing mappings stay valid.
    pub fn unlink(&self) {
        if let Some(name) = &self.name {
            Self::unlink_by_name(name);
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c) = c_name(name) {
            unsafe { libc::shm_unlink(c.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}
