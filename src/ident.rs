// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Numeric identities for the calling thread and process.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Process-unique, never-zero identifier of the calling thread.
///
/// Zero is reserved to mean "no thread" in holder fields.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| {
        let mut v = id.get();
        if v == 0 {
            v = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            id.set(v);
        }
        v
    })
}

pub fn current_process_id() -> u32 {
    std::process::id()
}

/// Last thread that successfully acquired a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub pid: u32,
    pub tid: u64,
}

impl Holder {
    pub(crate) fn current() -> Self {
        Self {
            pid: current_process_id(),
            tid: current_thread_id(),
        }
    }
}
