// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows backend: pagefile-backed file mappings. WaitOnAddress does not
// reach across processes, so address waits are polled.

use std::io;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, FALSE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualProtect,
    VirtualQuery, FILE_MAP_ALL_ACCESS, FILE_MAP_READ, MEMORY_BASIC_INFORMATION,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE, SEC_COMMIT,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use super::{Platform, WaitOutcome};

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.trim_start_matches('/')
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

// ---------------------------------------------------------------------------
// Native: page size and address waits
// ---------------------------------------------------------------------------

pub struct Native;

impl Platform for Native {
    fn page_size() -> usize {
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        if info.dwPageSize == 0 {
            4096
        } else {
            info.dwPageSize as usize
        }
    }

    fn wait_on_address(
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
        _interruptible: bool,
    ) -> io::Result<WaitOutcome> {
        Ok(super::poll_wait_on_address(word, expected, timeout))
    }

    fn wake_address(_word: &AtomicU32, _count: u32) {}
}

// ---------------------------------------------------------------------------
// PlatformShm: file mapping, named or anonymous
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
}

unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

fn page_flags(writable: bool) -> PAGE_PROTECTION_FLAGS {
    if writable {
        PAGE_READWRITE
    } else {
        PAGE_READONLY
    }
}

impl PlatformShm {
    /// Create a new mapping; `AlreadyExists` if the name is taken.
    /// Access bits have no Win32 counterpart here and are ignored.
    pub fn create(name: &str, size: usize, _mode: u32) -> io::Result<Self> {
        let wide = to_wide(name);
        Self::create_mapping(wide.as_ptr(), size)
    }

    pub fn anonymous(size: usize) -> io::Result<Self> {
        Self::create_mapping(ptr::null(), size)
    }

    fn create_mapping(wide_name: *const u16, size: usize) -> io::Result<Self> {
        let size64 = size as u64;
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE | SEC_COMMIT,
                (size64 >> 32) as u32,
                size64 as u32,
                wide_name,
            )
        };
        let err = unsafe { GetLastError() };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        if !wide_name.is_null() && err == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "mapping already exists",
            ));
        }
        Self::map_view(handle, size, true)
    }

    pub fn open(name: &str, writable: bool) -> io::Result<Self> {
        let wide = to_wide(name);
        let access = if writable {
            FILE_MAP_ALL_ACCESS
        } else {
            FILE_MAP_READ
        };
        let handle = unsafe { OpenFileMappingW(access, FALSE, wide.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Self::map_view(handle, 0, writable)
    }

    /// Map the whole object; `size == 0` means discover it.
    fn map_view(handle: HANDLE, size: usize, writable: bool) -> io::Result<Self> {
        let access = if writable {
            FILE_MAP_ALL_ACCESS
        } else {
            FILE_MAP_READ
        };
        let view = unsafe { MapViewOfFile(handle, access, 0, 0, 0) };
        if view.Value.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }

        let size = if size == 0 {
            let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
            let ret = unsafe {
                VirtualQuery(
                    view.Value,
                    &mut info,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if ret == 0 {
                let e = io::Error::last_os_error();
                unsafe {
                    UnmapViewOfFile(view);
                    CloseHandle(handle);
                }
                return Err(e);
            }
            info.RegionSize
        } else {
            size
        };

        Ok(Self {
            handle,
            mem: view.Value as *mut u8,
            size,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn protect(&self, writable: bool) -> io::Result<()> {
        let mut old: PAGE_PROTECTION_FLAGS = 0;
        let ok = unsafe {
            VirtualProtect(
                self.mem as *const core::ffi::c_void,
                self.size,
                page_flags(writable),
                &mut old,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// File mappings cannot change size once created.
    pub fn resize(&mut self, _new_size: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    /// Mappings disappear with their last handle; nothing to unlink.
    pub fn unlink(&self) {}

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe {
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.mem as *mut core::ffi::c_void,
                })
            };
        }
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}
