// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Kernel-style synchronization and sharing primitives: named shared memory
// areas, counting semaphores usable across processes, a recursive locker
// and a table of revocable reference-counted tokens.

pub mod config;
pub mod shm_name;
pub mod spin_lock;

mod platform;

mod error;
pub use error::{Error, Result};

mod time;
pub use time::{real_time_clock_usecs, Bigtime, INFINITE_TIMEOUT};

mod flags;
pub use flags::{AreaAccess, AreaProtection, SemFlags};

mod ident;
pub use ident::{current_process_id, current_thread_id, Holder};

mod area;
pub use area::{Area, AreaInfo};

mod semaphore;
pub use semaphore::{SemInfo, Semaphore};

mod locker;
pub use locker::{Locker, LockerGuard, SuspendedLock};

mod token;
pub use token::{DepotLock, Token, TokenDepot, TokenView};
