// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Areas: page-granular memory blocks, process-private or named and shared
// between processes. Every area starts with a small self-describing header
// so late attachers can tell a live area from a torn-down one.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::config::{AREA_HEADER_SIZE, AREA_MAGIC};
use crate::flags::{AreaAccess, AreaProtection};
use crate::platform::{self, PlatformShm};
use crate::shm_name;
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[repr(C)]
struct AreaHeader {
    magic: AtomicU32,
    closed: AtomicU32,
    length: AtomicU64,
    _reserved: [u8; AREA_HEADER_SIZE - 16],
}

const _: () = assert!(std::mem::size_of::<AreaHeader>() == AREA_HEADER_SIZE);

// ---------------------------------------------------------------------------
// Process-wide registry of named areas
// ---------------------------------------------------------------------------

/// What this process currently has open under one `(name, domain)` key.
#[derive(Default)]
struct Record {
    created_here: bool,
    handles: usize,
}

/// Serialises named create / attach / teardown within this address space.
///
/// Initialised on first use; it does not span processes. Exclusion between
/// processes comes from the exclusive-create call of the backing object.
fn registry() -> &'static Mutex<HashMap<String, Record>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Record>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashMap<String, Record>> {
    registry().lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Area
// ---------------------------------------------------------------------------

struct Named {
    name: String,
    domain: String,
    key: String,
}

struct AreaInner {
    shm: PlatformShm,
    named: Option<Named>,
    /// This handle created the backing object and is responsible for
    /// marking it closed. Independent of how many local clones exist.
    is_creator: bool,
    writable: AtomicBool,
}

/// Snapshot of an area's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaInfo {
    pub name: Option<String>,
    pub domain: Option<String>,
    /// Logical size in bytes (as recorded in the header).
    pub size: usize,
    /// Bytes actually mapped, header included.
    pub mapped_size: usize,
    pub protection: AreaProtection,
    pub is_creator: bool,
    /// Handles sharing this mapping in this process.
    pub local_refs: usize,
}

/// A block of memory, optionally named and visible to other processes.
///
/// Cloning an `Area` shares the same mapping; the mapping is released when
/// the last clone is dropped or deleted. When that last clone belongs to the
/// creator of a named area, the header is marked closed first so that later
/// [`Area::attach`] calls fail cleanly.
#[derive(Clone)]
pub struct Area {
    inner: Arc<AreaInner>,
}

impl Area {
    /// Create an area of `size` usable bytes.
    ///
    /// With a `name`, the area is visible to other processes under
    /// `(name, domain)` and creation fails with `AlreadyExists` if that pair
    /// is already present. Without a name it is process-private and
    /// `domain` is only validated.
    pub fn create(
        name: Option<&str>,
        size: usize,
        protection: AreaProtection,
        domain: &str,
        access: AreaAccess,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::BadValue("size is 0"));
        }
        shm_name::validate_domain(domain)?;
        let total = size
            .checked_add(AREA_HEADER_SIZE)
            .and_then(platform::round_to_page)
            .ok_or(Error::BadValue("size too large"))?;

        let Some(name) = name else {
            let shm = PlatformShm::anonymous(total)?;
            let area = Self::finish_create(shm, None, size, protection)?;
            return Ok(area);
        };

        let os_name = shm_name::make_area_name(domain, name)?;
        let key = shm_name::area_key(domain, name);

        let mut reg = lock_registry();
        if reg.get(&key).is_some_and(|r| r.created_here) {
            return Err(Error::AlreadyExists);
        }
        let shm = PlatformShm::create(&os_name, total, access.mode_bits())?;
        let named = Named {
            name: name.to_string(),
            domain: domain.to_string(),
            key: key.clone(),
        };
        let area = match Self::finish_create(shm, Some(named), size, protection) {
            Ok(a) => a,
            Err(e) => {
                PlatformShm::unlink_by_name(&os_name);
                return Err(e);
            }
        };
        let rec = reg.entry(key).or_default();
        rec.created_here = true;
        rec.handles += 1;
        log::debug!("created area {os_name} ({size} bytes, {total} mapped)");
        Ok(area)
    }

    fn finish_create(
        shm: PlatformShm,
        named: Option<Named>,
        size: usize,
        protection: AreaProtection,
    ) -> Result<Self> {
        let base = shm.as_mut_ptr();
        // Safety: fresh read-write mapping of at least AREA_HEADER_SIZE bytes.
        unsafe {
            let hdr = &*(base as *const AreaHeader);
            hdr.length.store(size as u64, Ordering::Relaxed);
            hdr.closed.store(0, Ordering::Relaxed);
            hdr.magic.store(AREA_MAGIC, Ordering::Release);
        }
        if !protection.is_writable() {
            shm.protect(false)?;
        }
        Ok(Self {
            inner: Arc::new(AreaInner {
                shm,
                is_creator: named.is_some(),
                named,
                writable: AtomicBool::new(protection.is_writable()),
            }),
        })
    }

    /// Attach to a named area created by this or another process.
    ///
    /// `NotFound` if nothing exists under `(name, domain)`; `Invalid` if the
    /// object was not made by this crate or its creator already deleted it.
    pub fn attach(name: &str, domain: &str, protection: AreaProtection) -> Result<Self> {
        let os_name = shm_name::make_area_name(domain, name)?;
        let key = shm_name::area_key(domain, name);

        let mut reg = lock_registry();
        let shm = PlatformShm::open(&os_name, protection.is_writable())?;
        if shm.len() < AREA_HEADER_SIZE {
            return Err(Error::Invalid("area too small for header"));
        }
        // Safety: mapping is at least one header long.
        let hdr = unsafe { &*(shm.as_mut_ptr() as *const AreaHeader) };
        if hdr.magic.load(Ordering::Acquire) != AREA_MAGIC {
            return Err(Error::Invalid("bad area magic"));
        }
        if hdr.closed.load(Ordering::Acquire) != 0 {
            log::debug!("refusing to attach closed area {os_name}");
            return Err(Error::Invalid("area has been closed"));
        }

        reg.entry(key.clone()).or_default().handles += 1;
        log::debug!("attached area {os_name}");
        Ok(Self {
            inner: Arc::new(AreaInner {
                shm,
                named: Some(Named {
                    name: name.to_string(),
                    domain: domain.to_string(),
                    key,
                }),
                is_creator: false,
                writable: AtomicBool::new(protection.is_writable()),
            }),
        })
    }

    fn header(&self) -> &AreaHeader {
        // Safety: every area is mapped with a header at its base.
        unsafe { &*(self.inner.shm.as_mut_ptr() as *const AreaHeader) }
    }

    /// Start of the usable region (just past the header).
    pub fn as_ptr(&self) -> *mut u8 {
        // Safety: header lies within the mapping.
        unsafe { self.inner.shm.as_mut_ptr().add(AREA_HEADER_SIZE) }
    }

    /// Usable size in bytes.
    pub fn len(&self) -> usize {
        let logical = self.header().length.load(Ordering::Acquire) as usize;
        logical.min(self.inner.shm.len() - AREA_HEADER_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        self.inner.named.is_some()
    }

    pub fn is_creator(&self) -> bool {
        self.inner.is_creator
    }

    /// True once the creator has torn the area down.
    pub fn is_closed(&self) -> bool {
        self.header().closed.load(Ordering::Acquire) != 0
    }

    pub fn protection(&self) -> AreaProtection {
        if self.inner.writable.load(Ordering::Acquire) {
            AreaProtection::ReadWrite
        } else {
            AreaProtection::Read
        }
    }

    /// Copy `buf` into the area at `offset`.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<()> {
        if !self.protection().is_writable() {
            return Err(Error::Invalid("area is read-only"));
        }
        self.check_range(offset, buf.len())?;
        // Safety: range checked against the mapping.
        unsafe { ptr::copy_nonoverlapping(buf.as_ptr(), self.as_ptr().add(offset), buf.len()) };
        Ok(())
    }

    /// Copy `buf.len()` bytes out of the area starting at `offset`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // Safety: range checked against the mapping.
        unsafe { ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(Error::BadValue("range outside area")),
        }
    }

    /// Change the usable size.
    ///
    /// Only the creating handle may resize, and only while it is the sole
    /// local handle (the mapping may move). Attached peers keep their old
    /// mapping size. Not available on every platform.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size == 0 {
            return Err(Error::BadValue("size is 0"));
        }
        if self.inner.named.is_some() && !self.inner.is_creator {
            return Err(Error::Invalid("only the creator can resize an area"));
        }
        if !self.protection().is_writable() {
            return Err(Error::Invalid("area is read-only"));
        }
        let total = new_size
            .checked_add(AREA_HEADER_SIZE)
            .and_then(platform::round_to_page)
            .ok_or(Error::BadValue("size too large"))?;
        let inner = Arc::get_mut(&mut self.inner)
            .ok_or(Error::Invalid("area has other local handles"))?;
        if total != inner.shm.len() {
            inner.shm.resize(total)?;
        }
        self.header().length.store(new_size as u64, Ordering::Release);
        Ok(())
    }

    pub fn set_protection(&self, protection: AreaProtection) -> Result<()> {
        self.inner.shm.protect(protection.is_writable())?;
        self.inner
            .writable
            .store(protection.is_writable(), Ordering::Release);
        Ok(())
    }

    pub fn info(&self) -> AreaInfo {
        AreaInfo {
            name: self.inner.named.as_ref().map(|n| n.name.clone()),
            domain: self.inner.named.as_ref().map(|n| n.domain.clone()),
            size: self.len(),
            mapped_size: self.inner.shm.len(),
            protection: self.protection(),
            is_creator: self.inner.is_creator,
            local_refs: Arc::strong_count(&self.inner),
        }
    }

    /// Release this handle. The last handle unmaps; the creator's last
    /// handle also closes and unlinks a named area.
    pub fn delete(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Remove a named backing object left behind by a crashed process.
    pub fn clear_storage(name: &str, domain: &str) {
        if let Ok(os_name) = shm_name::make_area_name(domain, name) {
            PlatformShm::unlink_by_name(&os_name);
        }
    }
}

impl Drop for AreaInner {
    fn drop(&mut self) {
        let Some(named) = &self.named else {
            return;
        };
        let mut reg = lock_registry();
        if self.is_creator {
            let writable = self.writable.load(Ordering::Acquire)
                || match self.shm.protect(true) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("cannot mark area {} closed: {e}", named.key);
                        false
                    }
                };
            if writable {
                // Safety: header lies at the mapping base, which is writable.
                let hdr = unsafe { &*(self.shm.as_mut_ptr() as *const AreaHeader) };
                hdr.closed.store(1, Ordering::Release);
            }
            self.shm.unlink();
            log::debug!("closed area {}", named.key);
        }
        if let Some(rec) = reg.get_mut(&named.key) {
            rec.handles = rec.handles.saturating_sub(1);
            if self.is_creator {
                rec.created_here = false;
            }
            if rec.handles == 0 && !rec.created_here {
                reg.remove(&named.key);
            }
        }
    }
}

impl std::fmt::Debug for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Area")
            .field("info", &self.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_area_rounds_to_pages() {
        let area = Area::create(None, 100, AreaProtection::ReadWrite, "test", AreaAccess::OWNER)
            .unwrap();
        assert_eq!(area.len(), 100);
        assert!(!area.is_named());
        assert!(!area.is_creator());
        assert_eq!(area.info().mapped_size % crate::platform::round_to_page(1).unwrap(), 0);
    }

    #[test]
    fn header_is_stamped() {
        let area = Area::create(None, 8, AreaProtection::ReadWrite, "test", AreaAccess::OWNER)
            .unwrap();
        assert_eq!(area.header().magic.load(Ordering::Relaxed), AREA_MAGIC);
        assert!(!area.is_closed());
    }

    #[test]
    fn rejects_zero_size() {
        let err = Area::create(None, 0, AreaProtection::ReadWrite, "test", AreaAccess::OWNER)
            .err()
            .unwrap();
        assert!(matches!(err, Error::BadValue(_)));
    }
}
