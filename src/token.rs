// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Token depot: a paged slot table handing out revocable, reference-counted
// 64-bit handles to shared payloads.
//
// Every slot carries a generation stamp that advances each time the slot is
// handed out, so a token issued for an earlier occupant never validates
// against a later one. All depot state is touched only while the depot's
// Locker is held; each public operation takes it itself.

use std::cell::RefCell;
use std::ops::{AddAssign, SubAssign};
use std::sync::Arc;

use crate::config::TOKEN_PAGE_SLOTS;
use crate::locker::{Locker, LockerGuard};
use crate::time::{real_time_clock_usecs, Bigtime};
use crate::{Error, Result};

struct Slot<T> {
    live: bool,
    vitalities: u64,
    stamp: u64,
    created_at: Bigtime,
    data: Option<Arc<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            live: false,
            vitalities: 0,
            stamp: 0,
            created_at: 0,
            data: None,
        }
    }
}

struct DepotState<T> {
    pages: Vec<Vec<Slot<T>>>,
    /// Ids of vacated slots, reused before the table grows.
    free: Vec<u64>,
    live: usize,
}

impl<T> DepotState<T> {
    fn slot(&self, id: u64) -> Option<&Slot<T>> {
        let (page, idx) = split_id(id)?;
        self.pages.get(page)?.get(idx)
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut Slot<T>> {
        let (page, idx) = split_id(id)?;
        self.pages.get_mut(page)?.get_mut(idx)
    }

    /// The live slot `id`, if it still carries `stamp`.
    fn matching(&mut self, id: u64, stamp: u64) -> Option<&mut Slot<T>> {
        self.slot_mut(id).filter(|s| s.live && s.stamp == stamp)
    }

    fn next_free_id(&mut self) -> u64 {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let need_page = self
            .pages
            .last()
            .map_or(true, |p| p.len() == TOKEN_PAGE_SLOTS);
        if need_page {
            self.pages.push(Vec::with_capacity(TOKEN_PAGE_SLOTS));
        }
        let page_no = self.pages.len() - 1;
        let page = &mut self.pages[page_no];
        page.push(Slot::vacant());
        (page_no * TOKEN_PAGE_SLOTS + page.len() - 1) as u64
    }

    /// Vacate `id`, handing back its payload so the caller can drop it
    /// outside the state borrow.
    fn vacate(&mut self, id: u64) -> Option<Arc<T>> {
        let slot = self.slot_mut(id)?;
        slot.live = false;
        slot.vitalities = 0;
        let data = slot.data.take();
        self.free.push(id);
        self.live -= 1;
        data
    }
}

fn split_id(id: u64) -> Option<(usize, usize)> {
    let id = usize::try_from(id).ok()?;
    Some((id / TOKEN_PAGE_SLOTS, id % TOKEN_PAGE_SLOTS))
}

struct DepotInner<T> {
    locker: Locker,
    state: RefCell<DepotState<T>>,
}

// Safety: `state` is only borrowed while `locker` is held, which admits one
// thread at a time; the locker's release/acquire orders those accesses.
unsafe impl<T: Send + Sync> Sync for DepotInner<T> {}

impl<T> DepotInner<T> {
    fn guard(&self) -> Result<LockerGuard<'_>> {
        self.locker.guard()
    }
}

/// A table of reference-counted slots addressed by 64-bit ids.
///
/// Cloning shares the same depot.
pub struct TokenDepot<T> {
    inner: Arc<DepotInner<T>>,
}

impl<T> Clone for TokenDepot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for TokenDepot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TokenDepot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepotInner {
                locker: Locker::new(),
                state: RefCell::new(DepotState {
                    pages: Vec::new(),
                    free: Vec::new(),
                    live: 0,
                }),
            }),
        }
    }

    /// Put `data` in a fresh slot with one vitality, owned by the returned
    /// (original) token.
    pub fn create_token(&self, data: T) -> Result<Token<T>> {
        let _g = self.inner.guard()?;
        let mut st = self.inner.state.borrow_mut();
        let id = st.next_free_id();
        st.live += 1;
        let slot = st
            .slot_mut(id)
            .ok_or(Error::Invalid("token slot missing"))?;
        slot.stamp = slot.stamp.wrapping_add(1);
        slot.live = true;
        slot.vitalities = 1;
        slot.created_at = real_time_clock_usecs();
        slot.data = Some(Arc::new(data));
        let stamp = slot.stamp;
        log::trace!("token {id} created (stamp {stamp})");
        Ok(Token {
            id,
            stamp,
            depot: Some(Arc::clone(&self.inner)),
            original: true,
        })
    }

    /// Take another share of an existing slot.
    pub fn open_token(&self, id: u64) -> Result<Token<T>> {
        let _g = self.inner.guard()?;
        let mut st = self.inner.state.borrow_mut();
        let slot = st
            .slot_mut(id)
            .filter(|s| s.live)
            .ok_or(Error::NotFound)?;
        if slot.vitalities == u64::MAX {
            return Err(Error::BadValue("token vitalities saturated"));
        }
        slot.vitalities += 1;
        Ok(Token {
            id,
            stamp: slot.stamp,
            depot: Some(Arc::clone(&self.inner)),
            original: false,
        })
    }

    /// Hold the depot lock across several calls; the only way to
    /// [`fetch_token`](DepotLock::fetch_token).
    pub fn lock(&self) -> Result<DepotLock<'_, T>> {
        Ok(DepotLock {
            depot: self,
            _guard: self.inner.guard()?,
        })
    }

    /// Number of live slots.
    pub fn len(&self) -> Result<usize> {
        let _g = self.inner.guard()?;
        Ok(self.inner.state.borrow().live)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// The depot lock, held. Other depot and token calls may still be made
/// from the same thread while it is alive.
pub struct DepotLock<'a, T> {
    depot: &'a TokenDepot<T>,
    _guard: LockerGuard<'a>,
}

impl<T> DepotLock<'_, T> {
    /// Peek at slot `id` without taking a share.
    pub fn fetch_token(&self, id: u64) -> Option<TokenView<T>> {
        let st = self.depot.inner.state.borrow();
        let slot = st.slot(id).filter(|s| s.live)?;
        Some(TokenView {
            id,
            stamp: slot.stamp,
            vitalities: slot.vitalities,
            created_at: slot.created_at,
            data: slot.data.clone(),
        })
    }
}

/// Copy of a slot's state taken under the depot lock.
#[derive(Debug, Clone)]
pub struct TokenView<T> {
    pub id: u64,
    pub stamp: u64,
    pub vitalities: u64,
    pub created_at: Bigtime,
    pub data: Option<Arc<T>>,
}

/// A share of a depot slot.
///
/// Valid while the slot still holds the occupant this token was issued
/// for. Dropping the token gives its share back (see
/// [`make_empty`](Token::make_empty)).
pub struct Token<T> {
    id: u64,
    stamp: u64,
    depot: Option<Arc<DepotInner<T>>>,
    original: bool,
}

impl<T> Token<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Generation of the slot occupant this token refers to.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// True for the token returned by `create_token`.
    pub fn is_original(&self) -> bool {
        self.original
    }

    /// Run `f` on the slot under the depot lock, if this token still
    /// matches it.
    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot<T>) -> R) -> Option<R> {
        let depot = self.depot.as_ref()?;
        let _g = depot.guard().ok()?;
        let mut st = depot.state.borrow_mut();
        st.matching(self.id, self.stamp).map(f)
    }

    pub fn is_valid(&self) -> bool {
        self.with_slot(|_| ()).is_some()
    }

    pub fn vitalities(&self) -> Option<u64> {
        self.with_slot(|s| s.vitalities)
    }

    pub fn created_at(&self) -> Option<Bigtime> {
        self.with_slot(|s| s.created_at)
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.with_slot(|s| s.data.clone()).flatten()
    }

    /// Replace the payload of a still-valid slot.
    pub fn set_data(&self, data: T) -> Result<()> {
        let old = self
            .with_slot(|s| s.data.replace(Arc::new(data)))
            .ok_or(Error::Invalid("stale token"))?;
        drop(old);
        Ok(())
    }

    /// Add `n` vitalities. Returns the new count.
    pub fn increase(&self, n: u64) -> Result<u64> {
        self.with_slot(|s| {
            s.vitalities = s
                .vitalities
                .checked_add(n)
                .ok_or(Error::BadValue("token vitalities saturated"))?;
            Ok::<u64, Error>(s.vitalities)
        })
        .ok_or(Error::Invalid("stale token"))?
    }

    /// Remove `n` vitalities; at zero the slot is vacated and every token
    /// referring to it becomes invalid. Returns the new count.
    pub fn decrease(&self, n: u64) -> Result<u64> {
        let depot = self.depot.as_ref().ok_or(Error::Invalid("empty token"))?;
        let _g = depot.guard()?;
        let freed = {
            let mut st = depot.state.borrow_mut();
            let slot = st
                .matching(self.id, self.stamp)
                .ok_or(Error::Invalid("stale token"))?;
            if n > slot.vitalities {
                return Err(Error::BadValue("token vitalities underflow"));
            }
            slot.vitalities -= n;
            if slot.vitalities > 0 {
                return Ok(slot.vitalities);
            }
            log::trace!("token {} vacated", self.id);
            st.vacate(self.id)
        };
        drop(freed);
        Ok(0)
    }

    /// Give back this token's share and detach it from the depot. A stale
    /// token just detaches.
    pub fn make_empty(&mut self) {
        if self.depot.is_none() {
            return;
        }
        if self.is_valid() {
            let _ = self.decrease(1);
        }
        self.depot = None;
    }
}

impl<T> AddAssign<u64> for Token<T> {
    fn add_assign(&mut self, n: u64) {
        if let Err(e) = self.increase(n) {
            log::warn!("token {} += {n}: {e}", self.id);
        }
    }
}

impl<T> SubAssign<u64> for Token<T> {
    fn sub_assign(&mut self, n: u64) {
        if let Err(e) = self.decrease(n) {
            log::warn!("token {} -= {n}: {e}", self.id);
        }
    }
}

impl<T> Drop for Token<T> {
    fn drop(&mut self) {
        self.make_empty();
    }
}

impl<T> std::fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("stamp", &self.stamp)
            .field("original", &self.original)
            .finish()
    }
}
