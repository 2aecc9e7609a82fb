//! Clock synchronization against real time.
//!
//! Ranks read one shared monotonic clock shifted by a known offset each, so
//! the estimated offsets can be checked against the injected ones. The
//! tolerance is generous: thread hand-offs on a loaded machine add jitter.

use std::sync::Arc;

use collbench::{Clock, Communicator, MonotonicClock, OffsetClock, SyncAlgorithm, SyncContext, ThreadGroup};

const TOLERANCE: f64 = 2e-3;

/// Injected shift of each rank's clock, in seconds.
const SHIFTS: [f64; 4] = [0.0, 0.5, -0.25, 3.0];

fn synchronize_all(algorithm: SyncAlgorithm, root: usize) -> Vec<SyncContext> {
    let base: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    ThreadGroup::new(SHIFTS.len())
        .run(|comm| {
            let clock = OffsetClock::new(Arc::clone(&base), SHIFTS[comm.rank()]);
            SyncContext::synchronize(&comm, &clock, root, algorithm).unwrap()
        })
        .unwrap()
}

fn assert_offsets(contexts: &[SyncContext], root: usize) {
    for (rank, ctx) in contexts.iter().enumerate() {
        // local + offset = root time
        let expected = SHIFTS[root] - SHIFTS[rank];
        assert!(
            (ctx.offset() - expected).abs() < TOLERANCE,
            "rank {}: expected offset {}, got {}",
            rank,
            expected,
            ctx.offset()
        );
        assert_eq!(ctx.root(), root);
    }
    assert_eq!(contexts[root].offset(), 0.0);
}

#[test]
fn linear_sync_recovers_offsets() {
    let contexts = synchronize_all(SyncAlgorithm::Linear, 0);
    assert_offsets(&contexts, 0);
    assert!(contexts[1].rtt_min() >= 0.0);
}

#[test]
fn ring_sync_recovers_offsets() {
    let contexts = synchronize_all(SyncAlgorithm::Ring, 0);
    assert_offsets(&contexts, 0);
}

#[test]
fn linear_sync_from_nonzero_root() {
    let contexts = synchronize_all(SyncAlgorithm::Linear, 2);
    assert_offsets(&contexts, 2);
}

#[test]
fn ring_sync_from_nonzero_root() {
    let contexts = synchronize_all(SyncAlgorithm::Ring, 3);
    assert_offsets(&contexts, 3);
}

#[test]
fn translated_deadlines_agree_across_ranks() {
    let contexts = synchronize_all(SyncAlgorithm::Linear, 0);
    let deadline = 10.0;
    for (rank, ctx) in contexts.iter().enumerate() {
        // Every rank's local deadline maps to the same instant of the base clock
        let base_instant = ctx.to_local(deadline) - SHIFTS[rank];
        assert!((base_instant - deadline).abs() < TOLERANCE);
    }
}
