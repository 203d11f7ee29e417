//! Illustrative unit bodies: a compute-bound spin with periodic preemption
//! points, and a blocking wait that parks the unit.

use crate::unit::{UnitContext, UnitKind, WorkUnit};
use rand::Rng;
use std::time::Duration;

/// Base iteration count for demo compute units.
pub const BASE_ITERATIONS: u64 = 3_000_000;
/// Upper bound (exclusive) of the random extra iterations added to the base.
pub const ITERATION_JITTER: u64 = 1_000_000;

#[inline]
fn step(sum: u64, i: u64) -> u64 {
    sum.wrapping_add(i ^ (i >> 3))
}

/// The checksum a compute unit produces, computed without yielding.
pub fn checksum(seed: u64, iterations: u64) -> u64 {
    (0..iterations).fold(seed, step)
}

/// Run the compute loop, reaching a preemption point every
/// `cx.preempt_every()` iterations (iteration 0 included).
pub async fn crunch(cx: &UnitContext, seed: u64, iterations: u64) -> u64 {
    let every = cx.preempt_every();
    let mut sum = seed;
    for i in 0..iterations {
        sum = step(sum, i);
        if i % every == 0 {
            cx.preempt().await;
        }
    }
    sum
}

/// A CPU-bound unit running `iterations` of arithmetic.
pub fn compute_bound(id: usize, iterations: u64) -> WorkUnit {
    WorkUnit::new(id, UnitKind::Compute, move |cx| async move {
        let sum = crunch(&cx, id as u64, iterations).await;
        std::hint::black_box(sum);
        Ok(())
    })
}

/// A unit that waits on a simulated external resource for `delay`.
pub fn blocking(id: usize, delay: Duration) -> WorkUnit {
    WorkUnit::new(id, UnitKind::Blocking, move |cx| async move {
        cx.park(delay).await;
        Ok(())
    })
}

/// A blocking unit that parks for the runtime's configured `block_delay`.
pub fn blocking_default(id: usize) -> WorkUnit {
    WorkUnit::new(id, UnitKind::Blocking, move |cx| async move {
        cx.park(cx.block_delay()).await;
        Ok(())
    })
}

/// Demo iteration count: `BASE_ITERATIONS` plus up to `ITERATION_JITTER`.
pub fn iteration_count<R: Rng>(rng: &mut R) -> u64 {
    BASE_ITERATIONS + rng.gen_range(0..ITERATION_JITTER)
}

/// A wave of `compute` CPU-bound units followed by `blocking` parked units.
/// Identifiers run `0..compute + blocking` without gaps. Blocking units park
/// for `delay`, or for the runtime's `block_delay` when it is `None`.
pub fn mixed_wave<R: Rng>(
    compute: usize,
    blocking_units: usize,
    delay: Option<Duration>,
    rng: &mut R,
) -> Vec<WorkUnit> {
    let mut units = Vec::with_capacity(compute + blocking_units);
    for id in 0..compute {
        units.push(compute_bound(id, iteration_count(rng)));
    }
    for id in compute..compute + blocking_units {
        units.push(match delay {
            Some(delay) => blocking(id, delay),
            None => blocking_default(id),
        });
    }
    units
}
