use fanjoin::prelude::*;
use fanjoin::trace::{read_artifact, ExitOutcome};
use fanjoin::workload;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runtime(threads: usize) -> Runtime {
    init_logging();
    let config = Config::builder()
        .num_threads(threads)
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    Runtime::new(config).unwrap()
}

#[test]
fn test_eleven_units_each_processed_once() {
    let rt = runtime(4);
    let barrier = CompletionBarrier::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let units = (0..=10)
        .map(|i| {
            let seen = seen.clone();
            WorkUnit::from_fn(i, UnitKind::Compute, move |cx| {
                seen.lock().push(cx.id());
                Ok(())
            })
        })
        .collect();

    let report = rt.launcher().launch(units, &barrier).wait();

    assert_eq!(barrier.pending(), 0);
    assert_eq!(report.launched, 11);
    assert_eq!(report.completed, 11);
    assert!(report.is_success());

    let seen = seen.lock();
    assert_eq!(seen.len(), 11);
    let unique: HashSet<_> = seen.iter().map(|id| id.0).collect();
    assert_eq!(unique, (0..=10).collect::<HashSet<_>>());
}

#[test]
fn test_wait_returns_only_after_every_done() {
    let rt = runtime(2);
    for n in [0usize, 1, 5, 32] {
        let barrier = CompletionBarrier::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let units = (0..n)
            .map(|i| {
                let finished = finished.clone();
                WorkUnit::new(i, UnitKind::Blocking, move |cx| async move {
                    cx.park(Duration::from_millis(5)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        rt.launcher().launch(units, &barrier).wait();
        assert_eq!(finished.load(Ordering::SeqCst), n, "wave of {}", n);
    }
}

#[test]
fn test_empty_barrier_does_not_block() {
    let barrier = CompletionBarrier::new();
    let start = Instant::now();
    barrier.wait();
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_failing_unit_does_not_hang_wave() {
    let rt = runtime(2);
    let ran = Arc::new(AtomicUsize::new(0));

    let units = (0..6)
        .map(|i| {
            let ran = ran.clone();
            WorkUnit::new(i, UnitKind::Blocking, move |cx| async move {
                if i == 0 {
                    panic!("unit zero gave up");
                }
                cx.park(Duration::from_millis(10)).await;
                ran.fetch_add(1, Ordering::SeqCst);
                if i == 5 {
                    return Err(UnitError::failed("late failure"));
                }
                Ok(())
            })
        })
        .collect();

    let report = rt.run(units);

    assert_eq!(ran.load(Ordering::SeqCst), 5);
    assert_eq!(report.failed(), 2);
    assert!(matches!(report.into_result(), Err(Error::UnitsFailed(2))));
}

#[test]
fn test_mixed_wave_traced_runs_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.out");
    let delay = Duration::from_millis(300);

    let config = Config::builder()
        .num_threads(4)
        .preempt_every(50_000)
        .build()
        .unwrap();
    let rt = Runtime::new(config).unwrap();

    let mut rng = Pcg64::seed_from_u64(42);
    let mut units = Vec::new();
    for id in 0..6 {
        let iterations = 200_000 + workload::iteration_count(&mut rng) / 100;
        units.push(workload::compute_bound(id, iterations));
    }
    for id in 6..10 {
        units.push(workload::blocking(id, delay));
    }

    let guard = rt.recorder().start(&path).unwrap();
    let barrier = CompletionBarrier::new();
    let start = Instant::now();
    let report = rt.launcher().launch(units, &barrier).wait();
    let elapsed = start.elapsed();
    let stats = guard.finish().unwrap();

    assert!(report.is_success());
    assert_eq!(report.completed, 10);
    assert!(elapsed >= delay);
    assert!(elapsed < delay * 4, "wave took {:?}", elapsed);

    let log = read_artifact(&path).unwrap();
    assert_eq!(log.events.len() as u64, stats.events);

    let summary = log.summary();
    assert_eq!(summary.units.len(), 10);
    assert_eq!(summary.count(EventKind::Spawn), 10);
    assert_eq!(summary.count(EventKind::Exit), 10);
    assert_eq!(summary.count(EventKind::Block), 4);
    assert_eq!(summary.count(EventKind::Unblock), 4);
    assert!(summary.count(EventKind::Preempt) >= 6);
    assert!(summary
        .units
        .values()
        .all(|u| u.outcome == Some(ExitOutcome::Ok)));

    let parked = summary.parked.unwrap();
    assert_eq!(parked.count, 4);
    assert!(parked.p50_ns >= delay.as_nanos() as u64 * 9 / 10);
}

#[test]
fn test_trace_records_failures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.out");
    let rt = runtime(2);

    let guard = rt.recorder().start(&path).unwrap();
    rt.run(vec![
        WorkUnit::from_fn(0, UnitKind::Compute, |_| Ok(())),
        WorkUnit::from_fn(1, UnitKind::Compute, |_| Err(UnitError::failed("no"))),
        WorkUnit::from_fn(2, UnitKind::Compute, |_| panic!("never")),
    ]);
    guard.finish().unwrap();

    let summary = read_artifact(&path).unwrap().summary();
    let outcome = |id| summary.units[&UnitId(id)].outcome;
    assert_eq!(outcome(0), Some(ExitOutcome::Ok));
    assert_eq!(outcome(1), Some(ExitOutcome::Error));
    assert_eq!(outcome(2), Some(ExitOutcome::Panic));
}

#[test]
fn test_units_launched_outside_session_are_not_traced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.out");
    let rt = runtime(2);

    rt.run(vec![WorkUnit::from_fn(0, UnitKind::Compute, |_| Ok(()))]);
    let guard = rt.recorder().start(&path).unwrap();
    rt.run(vec![WorkUnit::from_fn(1, UnitKind::Compute, |_| Ok(()))]);
    guard.finish().unwrap();
    rt.run(vec![WorkUnit::from_fn(2, UnitKind::Compute, |_| Ok(()))]);

    let log = read_artifact(&path).unwrap();
    assert!(log.events.iter().all(|e| e.unit == UnitId(1)));
    assert_eq!(log.events.len(), 2);
}

#[test]
fn test_separate_recorders_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let rt_a = runtime(1);
    let rt_b = runtime(1);

    let guard_a = rt_a.recorder().start(dir.path().join("a.out")).unwrap();
    let guard_b = rt_b.recorder().start(dir.path().join("b.out")).unwrap();
    rt_a.run(vec![WorkUnit::from_fn(0, UnitKind::Compute, |_| Ok(()))]);
    rt_b.run(vec![
        WorkUnit::from_fn(0, UnitKind::Compute, |_| Ok(())),
        WorkUnit::from_fn(1, UnitKind::Compute, |_| Ok(())),
    ]);

    assert_eq!(guard_a.finish().unwrap().events, 2);
    assert_eq!(guard_b.finish().unwrap().events, 4);
}

#[test]
fn test_shared_barrier_across_launches() {
    let rt = runtime(2);
    let barrier = CompletionBarrier::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let make = |range: std::ops::Range<usize>| -> Vec<WorkUnit> {
        range
            .map(|i| {
                let counter = counter.clone();
                WorkUnit::from_fn(i, UnitKind::Compute, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect()
    };

    let first = rt.launcher().launch(make(0..4), &barrier);
    let second = rt.launcher().launch(make(4..10), &barrier);
    barrier.wait();

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert!(first.failures().is_empty());
    assert!(second.failures().is_empty());
}
