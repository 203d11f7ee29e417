//! Stress tests for fan-out/join waves

use fanjoin::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn runtime() -> Runtime {
    let config = Config::builder()
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    Runtime::new(config).unwrap()
}

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_units() {
    let rt = runtime();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let units = (0..1000)
            .map(|i| {
                let counter = counter.clone();
                WorkUnit::from_fn(i, UnitKind::Compute, move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
            })
            .collect();
        assert!(rt.run(units).is_success());
    }

    assert_eq!(counter.load(Ordering::Relaxed), 100_000);
}

#[test]
#[ignore]
fn stress_test_many_parked_units() {
    let rt = runtime();
    let units = (0..5_000)
        .map(|i| fanjoin::workload::blocking(i, Duration::from_millis(50)))
        .collect();

    let report = rt.run(units);
    assert!(report.is_success());
    // 5000 parked units on a handful of workers still overlap.
    assert!(report.elapsed < Duration::from_secs(5));
}

#[test]
#[ignore]
fn stress_test_high_contention() {
    let rt = runtime();
    let data = Arc::new(Mutex::new(vec![0i32; 100]));

    let units = (0..1000)
        .map(|i| {
            let data = data.clone();
            WorkUnit::new(i, UnitKind::Compute, move |cx| async move {
                cx.preempt().await;
                let mut guard = data.lock();
                for item in guard.iter_mut() {
                    *item += 1;
                }
                Ok(())
            })
        })
        .collect();
    assert!(rt.run(units).is_success());

    let guard = data.lock();
    assert!(guard.iter().all(|&x| x == 1000));
}

#[test]
#[ignore]
fn stress_test_panic_recovery() {
    let rt = runtime();

    for _ in 0..10 {
        let units = (0..100)
            .map(|i| {
                WorkUnit::from_fn(i, UnitKind::Compute, move |_| {
                    if i % 10 == 0 {
                        panic!("Intentional panic");
                    }
                    Ok(())
                })
            })
            .collect();
        let report = rt.run(units);
        assert_eq!(report.failed(), 10);
    }

    assert_eq!(rt.panic_count(), 100);
    assert!(rt
        .run(vec![WorkUnit::from_fn(0, UnitKind::Compute, |_| Ok(()))])
        .is_success());
}

#[test]
#[ignore]
fn stress_test_concurrent_waiters() {
    let rt = runtime();
    let barrier = CompletionBarrier::new();

    let units = (0..64)
        .map(|i| fanjoin::workload::blocking(i, Duration::from_millis(20)))
        .collect();
    let wave = rt.launcher().launch(units, &barrier);

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.wait())
        })
        .collect();
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert!(wave.wait().is_success());
}

#[test]
#[ignore]
fn stress_test_repeated_trace_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime();

    for round in 0..50 {
        let path = dir.path().join(format!("trace-{}.out", round));
        let guard = rt.recorder().start(&path).unwrap();
        let units = (0..20)
            .map(|i| fanjoin::workload::compute_bound(i, 10_000))
            .collect();
        assert!(rt.run(units).is_success(), "round {}", round);
        let stats = guard.finish().unwrap();
        assert!(stats.events >= 40);
    }
}
