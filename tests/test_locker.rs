// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Recursive locker: nesting, ownership, exclusion and shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use libetk::{Error, Locker, SemFlags, Semaphore};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

#[test]
fn nested_lock_counts_depth() {
    let l = Locker::new();
    assert_eq!(l.count_locks(), 0);
    for depth in 1..=5 {
        l.lock().expect("lock");
        assert_eq!(l.count_locks(), depth);
        assert!(l.is_locked());
    }
    for depth in (0..5).rev() {
        l.unlock().expect("unlock");
        assert_eq!(l.count_locks(), depth);
    }
    assert!(!l.is_locked());
}

// Depth three on one thread holds off a second thread until fully unwound.
#[test]
fn second_thread_waits_for_full_unwind() {
    let l = Locker::new();
    for _ in 0..3 {
        l.lock().expect("lock");
    }
    assert_eq!(l.count_locks(), 3);

    let acquired = Arc::new(AtomicBool::new(false));
    let (seen_tx, seen_rx) = mpsc::channel();
    let t = {
        let l = l.clone();
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            seen_tx.send(l.count_locks()).unwrap();
            l.lock().expect("lock in thread");
            acquired.store(true, Ordering::SeqCst);
            let depth = l.count_locks();
            l.unlock().expect("unlock in thread");
            depth
        })
    };

    assert_eq!(seen_rx.recv().unwrap(), -3);
    for _ in 0..2 {
        l.unlock().expect("unlock");
        thread::sleep(Duration::from_millis(30));
        assert!(!acquired.load(Ordering::SeqCst));
    }
    assert_eq!(l.count_locks(), 1);
    l.unlock().expect("last unlock");

    assert_eq!(t.join().unwrap(), 1);
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(l.count_locks(), 0);
}

#[test]
fn unlock_by_other_thread_is_refused() {
    let l = Locker::new();
    l.lock().expect("lock");

    let l2 = l.clone();
    let r = thread::spawn(move || l2.unlock()).join().unwrap();
    assert!(matches!(r, Err(Error::NotOwner)));

    assert_eq!(l.count_locks(), 1);
    l.unlock().expect("unlock");
}

#[test]
fn mutual_exclusion_under_stress() {
    const THREADS: usize = 4;
    const ITERS: usize = 2000;

    let l = Locker::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let l = l.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    let _g = l.guard().expect("guard");
                    // Split read-modify-write; only exclusion keeps it exact.
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), THREADS * ITERS);
}

#[test]
fn lock_with_timeout_while_held() {
    let l = Locker::new();
    l.lock().expect("lock");

    let l2 = l.clone();
    let (would_block, timed_out) = thread::spawn(move || {
        let wb = l2.lock_etc(SemFlags::TIMEOUT, 0);
        let start = Instant::now();
        let to = l2.lock_etc(SemFlags::TIMEOUT, 20_000);
        assert!(start.elapsed() >= Duration::from_millis(19));
        (wb, to)
    })
    .join()
    .unwrap();

    assert!(matches!(would_block, Err(Error::WouldBlock)));
    assert!(matches!(timed_out, Err(Error::TimedOut)));
    assert_eq!(l.count_locks(), 1);
    l.unlock().expect("unlock");
}

#[test]
fn close_releases_blocked_lockers() {
    let l = Locker::new();
    l.lock().expect("lock");

    let l2 = l.clone();
    let t = thread::spawn(move || l2.lock());
    thread::sleep(Duration::from_millis(30));

    l.close().expect("close");
    assert!(matches!(t.join().unwrap(), Err(Error::Closed)));
    assert!(l.is_closed());
    assert!(matches!(l.lock(), Err(Error::Closed)));
    assert!(matches!(l.close(), Err(Error::Closed)));

    // The holder can still unwind.
    l.unlock().expect("unlock after close");
    assert_eq!(l.count_locks(), 0);
}

#[test]
fn guard_unlocks_on_drop() {
    let l = Locker::new();
    {
        let _a = l.guard().expect("outer");
        let _b = l.guard().expect("inner");
        assert_eq!(l.count_locks(), 2);
    }
    assert_eq!(l.count_locks(), 0);
}

#[test]
fn suspended_lock_lets_others_in() {
    let l = Locker::new();
    l.lock().expect("lock");
    l.lock().expect("lock");

    {
        let suspended = l.release_all_and_remember().expect("suspend");
        assert_eq!(suspended.depth(), 2);
        assert_eq!(l.count_locks(), 0);

        let l2 = l.clone();
        let depth_there = thread::spawn(move || {
            let _g = l2.guard().expect("other thread");
            l2.count_locks()
        })
        .join()
        .unwrap();
        assert_eq!(depth_there, 1);
    }
    // Dropping the suspension restored the nesting.
    assert_eq!(l.count_locks(), 2);
    l.unlock().expect("unlock");
    l.unlock().expect("unlock");
}

// Nesting taken while suspended survives the restore.
#[test]
fn lock_taken_while_suspended_is_kept() {
    let l = Locker::new();
    l.lock().expect("lock");
    l.lock().expect("lock");

    let suspended = l.release_all_and_remember().expect("suspend");
    l.lock().expect("relock while suspended");
    assert_eq!(l.count_locks(), 1);
    drop(suspended);
    assert_eq!(l.count_locks(), 3);

    let suspended = l.release_all_and_remember().expect("suspend again");
    assert_eq!(suspended.depth(), 3);
    l.lock().expect("relock");
    suspended.restore().expect("restore");
    assert_eq!(l.count_locks(), 4);

    for depth in (0..4).rev() {
        l.unlock().expect("unlock");
        assert_eq!(l.count_locks(), depth);
    }
    let l2 = l.clone();
    let taken = thread::spawn(move || {
        let r = l2.lock_etc(SemFlags::TIMEOUT, 0);
        if r.is_ok() {
            l2.unlock().expect("unlock");
        }
        r
    })
    .join()
    .unwrap();
    assert!(taken.is_ok());
}

#[test]
fn named_locker_excludes_across_handles() {
    let name = unique_name("lk");
    Semaphore::clear_storage(&name);

    let a = Locker::named(&name).expect("named");
    let b = Locker::clone_named(&name).expect("clone");

    a.lock().expect("a locks");
    assert!(matches!(
        b.lock_etc(SemFlags::TIMEOUT, 0),
        Err(Error::WouldBlock)
    ));
    a.unlock().expect("a unlocks");
    b.lock_etc(SemFlags::TIMEOUT, 0).expect("b locks");
    b.unlock().expect("b unlocks");
}

#[test]
fn wraps_existing_semaphore() {
    let sem = Semaphore::new(1).expect("sem");
    let l = Locker::with_semaphore(sem.clone());
    l.lock().expect("lock");
    assert_eq!(sem.count(), 0);
    l.unlock().expect("unlock");
    assert_eq!(sem.count(), 1);
}
