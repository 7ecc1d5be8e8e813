// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Randomised properties of semaphores, lockers and tokens.

use std::time::{Duration, Instant};

use libetk::{Error, Locker, SemFlags, Semaphore, TokenDepot};
use proptest::prelude::*;

/// Acquire/release amounts that never exceed what a semaphore of `n` holds.
fn arb_balanced_ops() -> impl Strategy<Value = (i64, Vec<i64>)> {
    (1i64..64).prop_flat_map(|n| (Just(n), prop::collection::vec(1..=n, 0..40)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A new semaphore reports exactly its initial count.
    #[test]
    fn created_count_is_reported(count in 0i64..1_000_000) {
        let sem = Semaphore::new(count).expect("create");
        prop_assert_eq!(sem.count(), count);
    }

    /// Balanced acquire/release sequences leave the count where it started.
    #[test]
    fn balanced_use_restores_count((n, ops) in arb_balanced_ops()) {
        let sem = Semaphore::new(n).expect("create");
        for k in ops {
            sem.acquire_etc(k, SemFlags::TIMEOUT, 0).expect("acquire");
            prop_assert_eq!(sem.count(), n - k);
            sem.release_etc(k, SemFlags::empty()).expect("release");
        }
        prop_assert_eq!(sem.count(), n);
    }

    /// Asking for more than is available with a zero timeout never blocks.
    #[test]
    fn short_semaphore_would_block(have in 0i64..16, extra in 1i64..16) {
        let sem = Semaphore::new(have).expect("create");
        let start = Instant::now();
        let r = sem.acquire_etc(have + extra, SemFlags::TIMEOUT, 0);
        prop_assert!(matches!(r, Err(Error::WouldBlock)));
        prop_assert!(start.elapsed() < Duration::from_millis(100));
        prop_assert_eq!(sem.count(), have);
    }

    /// count_locks tracks nesting exactly and returns to zero.
    #[test]
    fn locker_depth_is_exact(depth in 1i64..64) {
        let l = Locker::new();
        for d in 1..=depth {
            l.lock().expect("lock");
            prop_assert_eq!(l.count_locks(), d);
        }
        for d in (0..depth).rev() {
            l.unlock().expect("unlock");
            prop_assert_eq!(l.count_locks(), d);
        }
    }

    /// Once every share of a slot is gone, no token issued for it validates,
    /// including after the id is handed out again.
    #[test]
    fn tokens_die_with_their_slot(opens in 0usize..20, bumps in 0u64..8) {
        let depot = TokenDepot::new();
        let original = depot.create_token(0u32).expect("create");
        let shares: Vec<_> = (0..opens)
            .map(|_| depot.open_token(original.id()).expect("open"))
            .collect();
        original.increase(bumps).expect("increase");
        prop_assert_eq!(original.vitalities(), Some(1 + opens as u64 + bumps));

        original.decrease(bumps).expect("decrease");
        for mut t in shares.iter().map(|t| depot.open_token(t.id()).expect("reopen")) {
            t.make_empty();
        }
        prop_assert!(original.is_valid());
        drop(shares);
        prop_assert!(original.is_valid());

        let id = original.id();
        let stale = depot.open_token(id).expect("last open");
        drop(original);
        stale.decrease(1).expect("final share");
        prop_assert!(!stale.is_valid());

        let fresh = depot.create_token(1u32).expect("reuse");
        prop_assert_eq!(fresh.id(), id);
        prop_assert!(!stale.is_valid());
        prop_assert!(fresh.is_valid());
    }
}
