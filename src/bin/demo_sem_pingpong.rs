// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_sem_pingpong ping <rounds>
//   demo_sem_pingpong pong
//
// Two processes bounce a unit between a pair of named semaphores. `ping`
// creates both and measures the round trip; `pong` clones them and answers
// every ping. Start `ping` first.

use std::thread;
use std::time::{Duration, Instant};

use libetk::{AreaAccess, Error, Semaphore};

const PING: &str = "pingpong_ping";
const PONG: &str = "pingpong_pong";

/// Relative timeout for a single hop, in microseconds.
const HOP_TIMEOUT_US: i64 = 5_000_000;

fn do_ping(rounds: usize) {
    Semaphore::clear_storage(PING);
    Semaphore::clear_storage(PONG);
    let ping = Semaphore::create(0, Some(PING), AreaAccess::OWNER).expect("create ping");
    let pong = Semaphore::create(0, Some(PONG), AreaAccess::OWNER).expect("create pong");

    println!("ping: waiting for pong...");
    let mut samples = Vec::with_capacity(rounds);
    for i in 0..rounds {
        let start = Instant::now();
        ping.release().expect("release ping");
        let answer = if i == 0 {
            pong.acquire()
        } else {
            pong.acquire_timeout(HOP_TIMEOUT_US)
        };
        match answer {
            Ok(()) => samples.push(start.elapsed()),
            Err(Error::TimedOut) => {
                eprintln!("ping: no answer after round {i}");
                break;
            }
            Err(e) => panic!("acquire pong: {e}"),
        }
    }
    ping.close().expect("close ping");

    if samples.is_empty() {
        return;
    }
    // The first hop includes pong's start-up.
    let steady = if samples.len() > 1 { &samples[1..] } else { &samples[..] };
    let total: Duration = steady.iter().sum();
    let min = steady.iter().min().copied().unwrap_or_default();
    let max = steady.iter().max().copied().unwrap_or_default();
    println!(
        "ping: {} rounds, avg {:?}, min {:?}, max {:?}",
        samples.len(),
        total / steady.len() as u32,
        min,
        max
    );
}

fn clone_retrying(name: &str) -> Semaphore {
    loop {
        match Semaphore::clone_named(name) {
            Ok(s) => return s,
            Err(Error::NotFound) => thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("clone {name}: {e}"),
        }
    }
}

fn do_pong() {
    let ping = clone_retrying(PING);
    let pong = clone_retrying(PONG);
    println!("pong: connected");

    let mut answered = 0usize;
    loop {
        match ping.acquire() {
            Ok(()) => {}
            Err(Error::Closed) => break,
            Err(e) => panic!("acquire ping: {e}"),
        }
        if pong.release().is_err() {
            break;
        }
        answered += 1;
    }
    println!("pong: answered {answered} pings");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_sem_pingpong ping <rounds>");
        eprintln!("       demo_sem_pingpong pong");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "ping" => {
            let rounds: usize = args
                .get(2)
                .map(|s| s.parse().expect("rounds"))
                .unwrap_or(10_000);
            do_ping(rounds);
        }
        "pong" => do_pong(),
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}
