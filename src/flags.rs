// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Option bits for semaphore calls and area creation.

use bitflags::bitflags;

bitflags! {
    /// Options accepted by `Semaphore::acquire_etc` / `release_etc` and
    /// `Locker::lock_etc`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SemFlags: u32 {
        /// Allow a signal to end the wait early (POSIX only, best effort).
        const CAN_INTERRUPT = 1 << 0;
        /// Release without waking blocked waiters.
        const DO_NOT_RESCHEDULE = 1 << 1;
        /// `timeout` is relative to the call.
        const TIMEOUT = 1 << 2;
        /// `timeout` is an absolute real-time deadline.
        const ABSOLUTE_TIMEOUT = 1 << 3;
    }
}

bitflags! {
    /// Who besides the owner may open a named area. Applied once, when the
    /// backing object is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AreaAccess: u32 {
        const OWNER = 0;
        const GROUP_READ = 1 << 0;
        const GROUP_WRITE = 1 << 1;
        const OTHERS_READ = 1 << 2;
        const OTHERS_WRITE = 1 << 3;
    }
}

impl Default for AreaAccess {
    fn default() -> Self {
        AreaAccess::OWNER
    }
}

impl AreaAccess {
    /// Everyone may read and write.
    pub fn all_users() -> Self {
        AreaAccess::GROUP_READ
            | AreaAccess::GROUP_WRITE
            | AreaAccess::OTHERS_READ
            | AreaAccess::OTHERS_WRITE
    }

    /// Permission bits for the backing object (owner always read-write).
    pub fn mode_bits(self) -> u32 {
        let mut mode = 0o600;
        if self.contains(AreaAccess::GROUP_READ) {
            mode |= 0o040;
        }
        if self.contains(AreaAccess::GROUP_WRITE) {
            mode |= 0o020;
        }
        if self.contains(AreaAccess::OTHERS_READ) {
            mode |= 0o004;
        }
        if self.contains(AreaAccess::OTHERS_WRITE) {
            mode |= 0o002;
        }
        mode
    }
}

/// Page protection of an area mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AreaProtection {
    Read,
    #[default]
    ReadWrite,
}

impl AreaProtection {
    pub fn is_writable(self) -> bool {
        self == AreaProtection::ReadWrite
    }
}
