#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jsamp::RunOutcome;

#[inline(never)]
fn spin_until(running: &AtomicBool) -> u64 {
    let mut n: u64 = 0;
    while running.load(Ordering::Relaxed) {
        n = n.wrapping_mul(31).wrapping_add(7);
        std::hint::black_box(n);
    }
    n
}

#[test]
fn test_profile_self_and_stop_over_loopback() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.txt");

    let running = Arc::new(AtomicBool::new(true));
    let worker = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("busy-worker".to_owned())
            .spawn(move || spin_until(&running))
            .unwrap()
    };

    let session = jsamp::start(&format!("50;0;{}", output.display()))
        .unwrap()
        .expect("profiling should not be disabled in tests");

    // >= 5 samples at 50ms
    thread::sleep(Duration::from_millis(400));
    assert!(!output.exists(), "report must not be written while sampling");

    let started = Instant::now();
    jsamp::trigger_stop(session.local_addr()).unwrap();
    let stop_latency = started.elapsed();

    let report = std::fs::read_to_string(&output).unwrap();
    running.store(false, Ordering::Relaxed);
    worker.join().unwrap();

    let RunOutcome::Completed(summary) = session.wait().unwrap() else {
        panic!("session did not complete");
    };
    assert!(summary.samples >= 5, "only {} samples", summary.samples);
    // Includes symbolizing the whole report
    assert!(stop_latency < Duration::from_secs(30), "{:?}", stop_latency);

    assert!(!report.is_empty());
    assert!(report.ends_with("\n\n"));
    assert!(report.contains("spin_until"), "worker frames missing");
    assert!(!report.contains("jsamp::sampler::Sampler"));
    // No stack block is empty
    assert!(!report.starts_with('\n'));
    assert!(!report.contains("\n\n\n"));
}
