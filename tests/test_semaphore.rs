// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting semaphores, local and named.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libetk::{
    current_process_id, current_thread_id, real_time_clock_usecs, AreaAccess, Error, SemFlags,
    Semaphore,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

fn named(prefix: &str, count: i64) -> (String, Semaphore) {
    let name = unique_name(prefix);
    Semaphore::clear_storage(&name);
    let sem = Semaphore::create(count, Some(&name), AreaAccess::OWNER).expect("create");
    (name, sem)
}

/// Poll until `f` holds or a generous budget runs out.
fn wait_until(f: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn create_reports_count() {
    for n in [0, 1, 7, 1000] {
        let sem = Semaphore::new(n).expect("create");
        assert_eq!(sem.count(), n);
    }
    let (_name, sem) = named("cnt", 3);
    assert_eq!(sem.count(), 3);
}

#[test]
fn negative_count_rejected() {
    assert!(matches!(Semaphore::new(-1), Err(Error::BadValue(_))));
}

#[test]
fn bad_acquire_arguments() {
    let sem = Semaphore::new(1).expect("create");
    assert!(matches!(
        sem.acquire_etc(0, SemFlags::empty(), 0),
        Err(Error::BadValue(_))
    ));
    assert!(matches!(
        sem.acquire_etc(1, SemFlags::TIMEOUT, -5),
        Err(Error::BadValue(_))
    ));
    assert!(matches!(
        sem.acquire_etc(1, SemFlags::empty(), -5),
        Err(Error::BadValue(_))
    ));
    assert!(matches!(
        sem.release_etc(-1, SemFlags::empty()),
        Err(Error::BadValue(_))
    ));
    assert_eq!(sem.count(), 1);
}

#[test]
fn try_acquire_on_empty_would_block() {
    for sem in [Semaphore::new(0).expect("local"), named("wb", 0).1] {
        let start = Instant::now();
        assert!(matches!(sem.try_acquire(), Err(Error::WouldBlock)));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(sem.count(), 0);
    }
}

#[test]
fn timeout_expires() {
    for sem in [Semaphore::new(0).expect("local"), named("to", 0).1] {
        for timeout_us in [1_000i64, 50_000, 200_000] {
            let start = Instant::now();
            let r = sem.acquire_timeout(timeout_us);
            let elapsed = start.elapsed();
            assert!(matches!(r, Err(Error::TimedOut)), "{r:?}");
            assert!(elapsed >= Duration::from_micros(timeout_us as u64 - 500));
            assert!(elapsed < Duration::from_micros(timeout_us as u64) + Duration::from_secs(1));
            assert_eq!(sem.count(), 0);
        }
    }
}

#[test]
fn absolute_deadline_in_the_past() {
    let sem = Semaphore::new(0).expect("create");
    let past = real_time_clock_usecs() - 1_000_000;
    assert!(matches!(
        sem.acquire_etc(1, SemFlags::ABSOLUTE_TIMEOUT, past),
        Err(Error::TimedOut)
    ));

    // Available units are taken even when the deadline has passed.
    sem.release().expect("release");
    sem.acquire_etc(1, SemFlags::ABSOLUTE_TIMEOUT, past)
        .expect("fast path");
}

#[test]
fn multi_unit_acquire() {
    let sem = Semaphore::new(5).expect("create");
    sem.acquire_etc(3, SemFlags::empty(), 0).expect("take 3");
    assert_eq!(sem.count(), 2);
    assert!(matches!(
        sem.acquire_etc(3, SemFlags::TIMEOUT, 0),
        Err(Error::WouldBlock)
    ));
    sem.release_etc(3, SemFlags::empty()).expect("give 3");
    assert_eq!(sem.count(), 5);
}

#[test]
fn count_goes_negative_while_waiting() {
    for sem in [Semaphore::new(0).expect("local"), named("neg", 0).1] {
        let s2 = sem.clone();
        let t = thread::spawn(move || s2.acquire_etc(2, SemFlags::empty(), 0));

        assert!(wait_until(|| sem.count() == -2));
        assert_eq!(sem.info().waiters, 1);

        sem.release().expect("release 1");
        assert_eq!(sem.count(), -2);
        sem.release().expect("release 2");

        t.join().unwrap().expect("waiter");
        assert_eq!(sem.count(), 0);
    }
}

#[test]
fn release_wakes_waiter() {
    for sem in [Semaphore::new(0).expect("local"), named("wake", 0).1] {
        let s2 = sem.clone();
        let t = thread::spawn(move || s2.acquire_timeout(5_000_000));
        assert!(wait_until(|| sem.count() < 0));
        sem.release().expect("release");
        t.join().unwrap().expect("woken");
    }
}

#[test]
fn do_not_reschedule_still_counts() {
    let sem = Semaphore::new(0).expect("create");
    sem.release_etc(2, SemFlags::DO_NOT_RESCHEDULE)
        .expect("release");
    assert_eq!(sem.count(), 2);
    sem.try_acquire().expect("take");
}

// The unit is banked but the sleeper stays asleep until the next waking
// release.
#[test]
fn do_not_reschedule_leaves_waiter_asleep() {
    for sem in [Semaphore::new(0).expect("local"), named("norsched", 0).1] {
        let done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let s = sem.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let r = s.acquire();
                done.store(true, Ordering::Release);
                r
            })
        };
        assert!(wait_until(|| sem.info().waiters == 1));

        sem.release_etc(1, SemFlags::DO_NOT_RESCHEDULE)
            .expect("quiet release");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sem.info().waiters, 1);
        assert!(!done.load(Ordering::Acquire));

        sem.release_etc(0, SemFlags::empty()).expect("waking release");
        assert!(waiter.join().unwrap().is_ok());
        assert!(done.load(Ordering::Acquire));
        assert_eq!(sem.count(), 0);
        assert_eq!(sem.info().waiters, 0);
    }
}

#[test]
fn close_wakes_every_waiter() {
    for sem in [Semaphore::new(0).expect("local"), named("close", 0).1] {
        const K: usize = 4;
        let handles: Vec<_> = (0..K)
            .map(|_| {
                let s = sem.clone();
                thread::spawn(move || s.acquire())
            })
            .collect();

        assert!(wait_until(|| sem.info().waiters as usize == K));
        sem.close().expect("close");

        let start = Instant::now();
        for h in handles {
            assert!(matches!(h.join().unwrap(), Err(Error::Closed)));
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

#[test]
fn closed_semaphore_refuses_everything() {
    let sem = Semaphore::new(3).expect("create");
    sem.close().expect("close");
    assert!(sem.is_closed());
    assert!(matches!(sem.close(), Err(Error::Closed)));
    assert!(matches!(sem.acquire(), Err(Error::Closed)));
    assert!(matches!(sem.try_acquire(), Err(Error::Closed)));
    assert!(matches!(sem.release(), Err(Error::Closed)));
}

#[test]
fn clone_named_missing() {
    let name = unique_name("none");
    Semaphore::clear_storage(&name);
    assert!(matches!(Semaphore::clone_named(&name), Err(Error::NotFound)));
}

#[test]
fn clone_named_after_close() {
    let (name, sem) = named("clsd", 1);
    sem.close().expect("close");
    assert!(matches!(Semaphore::clone_named(&name), Err(Error::Closed)));
}

#[test]
fn clone_named_shares_count() {
    let (name, a) = named("share", 2);
    let b = Semaphore::clone_named(&name).expect("clone");
    assert_eq!(b.name(), Some(name.as_str()));

    a.acquire().expect("a");
    assert_eq!(b.count(), 1);
    b.release_etc(4, SemFlags::empty()).expect("b");
    assert_eq!(a.count(), 5);
}

#[test]
fn info_tracks_latest_holder() {
    let sem = Semaphore::new(1).expect("create");
    assert_eq!(sem.info().latest_holder, None);
    sem.acquire().expect("acquire");

    let info = sem.info();
    let holder = info.latest_holder.expect("holder");
    assert_eq!(holder.pid, current_process_id());
    assert_eq!(holder.tid, current_thread_id());
    assert_eq!(info.count, 0);
    assert!(!info.closed);
}

#[test]
fn waiters_contend_for_units() {
    let (_name, sem) = named("herd", 0);
    let done = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let s = sem.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                s.acquire().expect("acquire");
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    assert!(wait_until(|| sem.info().waiters == 4));
    sem.release_etc(2, SemFlags::empty()).expect("release 2");
    assert!(wait_until(|| done.load(Ordering::SeqCst) == 2));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(done.load(Ordering::SeqCst), 2);

    sem.release_etc(2, SemFlags::empty()).expect("release 2 more");
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sem.count(), 0);
}

// Create "S" with one unit, clone it, and pass the unit between handles.
#[test]
fn named_handoff_between_handles() {
    let (name, a) = named("S", 1);
    let b = Semaphore::clone_named(&name).expect("clone");

    a.acquire_etc(1, SemFlags::empty(), 0).expect("a acquires");
    assert_eq!(a.count(), 0);

    let start = Instant::now();
    let r = b.acquire_etc(1, SemFlags::TIMEOUT, 100_000);
    let elapsed = start.elapsed();
    assert!(matches!(r, Err(Error::TimedOut)));
    assert!(elapsed >= Duration::from_millis(99));
    assert!(elapsed < Duration::from_secs(1));

    a.release_etc(1, SemFlags::empty()).expect("a releases");
    let start = Instant::now();
    b.acquire_etc(1, SemFlags::TIMEOUT, 100_000)
        .expect("b acquires");
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn last_handle_tears_down_named() {
    let (name, a) = named("last", 1);
    let b = Semaphore::clone_named(&name).expect("clone");
    a.delete().expect("delete a");
    b.try_acquire().expect("b still works");
    b.delete().expect("delete b");
    assert!(Semaphore::clone_named(&name).is_err());
}
