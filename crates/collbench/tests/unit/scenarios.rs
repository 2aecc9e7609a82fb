//! End-to-end behaviour of the staged measurement.
//!
//! Each rank owns a `VirtualClock` that only moves when something spins on
//! it, so fixed-cost operations produce exact, reproducible times.

use std::sync::Arc;

use rand::Rng;

use collbench::engine::run_pipelined;
use collbench::operation::FixedCost;
use collbench::transport::TAG_USER;
use collbench::{
    lookup, BenchError, Clock, Communicator, Config, ExitPolicy, MeasurementEngine, Operation,
    OperationKind, RunContext, RunStatus, SyncContext, SyncMode, TestOutcome, TestParams,
    ThreadGroup, TimeSlotCoordinator, TransportError, VirtualClock,
};

/// Run one synchronized test on every rank of an `nprocs` group.
///
/// `make_op` builds each rank's operation instance.
fn run_group<F>(nprocs: usize, config: &Config, make_op: F) -> Vec<TestOutcome>
where
    F: Fn() -> Box<dyn Operation> + Sync,
{
    ThreadGroup::new(nprocs)
        .run(|comm| {
            let clock: Arc<dyn Clock> = Arc::new(VirtualClock::new(1.0));
            let sync = SyncContext::unsynchronized(config.master_rank);
            let slots = TimeSlotCoordinator::with_sync(Arc::clone(&clock), sync, 0.0);
            let mut op = make_op();
            op.init(&comm, &TestParams::new(4, nprocs)).unwrap();
            let mut engine = MeasurementEngine::with_coordinator(&comm, clock, config, slots);
            engine.run_test(op.as_mut()).unwrap()
        })
        .unwrap()
}

/// What rank 1 does on one chosen invocation of [`Handoff`].
#[derive(Debug, Clone, Copy)]
enum Mishap {
    /// Return an error before sending.
    Fail,
    /// Send, then keep spinning for this long in total.
    Stall(f64),
}

/// Rank 1 hands one message to rank 0 per run; both then spin for 1 ms.
#[derive(Debug)]
struct Handoff {
    at: usize,
    mishap: Mishap,
    invocations: usize,
}

impl Handoff {
    fn new(at: usize, mishap: Mishap) -> Self {
        Self {
            at,
            mishap,
            invocations: 0,
        }
    }
}

impl Operation for Handoff {
    fn name(&self) -> &'static str {
        "handoff"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Collective
    }

    fn describe(&self) -> &'static str {
        "rank 1 sends one message to rank 0"
    }

    fn init(&mut self, _comm: &dyn Communicator, _params: &TestParams) -> Result<(), BenchError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let invocation = self.invocations;
        self.invocations += 1;
        let mishap = (ctx.comm.rank() == 1 && invocation == self.at).then_some(self.mishap);
        let mut cost = 1e-3;
        match (ctx.comm.rank(), mishap) {
            (1, Some(Mishap::Fail)) => return Err(TransportError::Disconnected { peer: 0 }),
            (1, Some(Mishap::Stall(total))) => {
                ctx.comm.send(0, TAG_USER, &[1])?;
                cost = total;
            }
            (1, None) => ctx.comm.send(0, TAG_USER, &[1])?,
            _ => {
                ctx.comm.recv(1, TAG_USER)?;
            }
        }
        ctx.clock.spin_for(cost);
        Ok(())
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

// =============================================================================
// FIXED RUNS
// =============================================================================

#[test]
fn fixed_cost_converges_under_fixed_runs() {
    let config = Config::default();
    let outcomes = run_group(4, &config, || Box::new(FixedCost::new(1e-3)));

    for outcome in &outcomes {
        assert!(outcome.correct_runs >= config.runs_min);
        assert!(outcome.correct_runs <= config.runs_max);
        // 30 measurements are reached after four stages of eight
        assert_eq!(outcome.total_runs, 32);
        assert_eq!(outcome.correct_runs, 32);
        assert_close(outcome.sample.mean(), 1e-3);
        assert_close(outcome.warmup_slot, 1.1e-3);
    }

    let row = outcomes[0].report_row(4, 4, &config).unwrap();
    assert_eq!(row.total_runs, 32);
    assert_eq!(row.correct_runs, 32);
    assert_eq!(row.filtered_runs, 16, "25% trimmed from each tail");
    assert!((row.stats.mean - 1000.0).abs() < 1e-6, "mean = {} usec", row.stats.mean);
}

#[test]
fn every_rank_sees_the_same_reduced_times() {
    let config = Config::quick();
    // Rank-dependent cost: the reduced time is the slowest rank's. The master
    // is the slowest so no rank's clock runs ahead of the stage start it sends.
    let outcomes = ThreadGroup::new(3)
        .run(|comm| {
            let clock: Arc<dyn Clock> = Arc::new(VirtualClock::new(0.0));
            let slots =
                TimeSlotCoordinator::with_sync(Arc::clone(&clock), SyncContext::unsynchronized(0), 0.0);
            let cost = 1e-3 * (3 - comm.rank()) as f64;
            let mut op = FixedCost::new(cost);
            let mut engine = MeasurementEngine::with_coordinator(&comm, clock, &config, slots);
            engine.run_test(&mut op).unwrap()
        })
        .unwrap();

    for outcome in &outcomes {
        assert_eq!(outcome.times, outcomes[0].times);
        assert_close(outcome.sample.mean(), 3e-3);
    }
    assert_close(outcomes[0].local.mean(), 3e-3);
    assert_close(outcomes[2].local.mean(), 1e-3);
}

// =============================================================================
// SLOT CORRECTION
// =============================================================================

#[test]
fn straggler_doubles_slot_length() {
    // Warm-up uses invocations 0..4, so the straggler is the first steady run
    // and costs more than five warm-up slots.
    let config = Config::default().measurements_max(10).runs_min(10);
    let outcomes = run_group(1, &config, || {
        Box::new(FixedCost::with_schedule(|i| if i == 4 { 6e-3 } else { 1e-3 }))
    });
    let outcome = &outcomes[0];

    assert_close(outcome.warmup_slot, 1.1e-3);
    assert_eq!(outcome.stages.len(), 2);

    let first = &outcome.stages[0];
    assert_close(first.slot_len, 1.1e-3);
    assert_eq!(first.statuses[0], RunStatus::Overran);
    // The overrun pushed the next five slots into the past
    for status in &first.statuses[1..6] {
        assert_eq!(*status, RunStatus::StartedLate);
    }
    assert_eq!(first.statuses[6..], [RunStatus::Valid, RunStatus::Valid]);
    assert_eq!(first.invalid, 6);

    let second = &outcome.stages[1];
    assert_close(second.slot_len, 2.0 * first.slot_len);
    assert_eq!(second.invalid, 0);

    assert_eq!(outcome.total_runs, 16);
    assert_eq!(outcome.correct_runs, 10);
    assert_close(outcome.sample.max(), 1e-3);
}

#[test]
fn failed_run_is_excluded_without_retry() {
    // Invocations 0..4 are the warm-up; 5 is the second steady run
    let config = Config::quick();
    let outcomes = run_group(2, &config, || Box::new(Handoff::new(5, Mishap::Fail)));

    for (rank, outcome) in outcomes.iter().enumerate() {
        let first = &outcome.stages[0];
        assert_eq!(first.runs, 8);
        assert_eq!(first.statuses[0], RunStatus::Valid, "rank {rank}");
        assert_eq!(first.statuses[1], RunStatus::TransportFailure, "rank {rank}");
        assert!(first.statuses[2..].iter().all(|s| s.is_valid()), "rank {rank}");
        // Rank 0 was blocked on the message and released by the abort
        assert_eq!(first.local_statuses[1], RunStatus::TransportFailure, "rank {rank}");

        assert_eq!(outcome.total_runs, 16);
        assert_eq!(outcome.correct_runs, 15);
        assert_eq!(outcome.times.len(), 15);
    }
}

#[test]
fn late_rank_aborts_the_run_for_its_peers() {
    // The first steady run on rank 1 lasts six slots, so its next five
    // scheduled starts are already in the past.
    let config = Config::default().measurements_max(10).runs_min(10);
    let outcomes = run_group(2, &config, || Box::new(Handoff::new(4, Mishap::Stall(6e-3))));
    let (master, late) = (&outcomes[0].stages[0], &outcomes[1].stages[0]);

    assert_eq!(late.local_statuses[0], RunStatus::Overran);
    assert!(late.local_statuses[1..6].iter().all(|&s| s == RunStatus::StartedLate));
    assert!(late.local_statuses[6..].iter().all(|s| s.is_valid()));

    assert!(master.local_statuses[0].is_valid());
    assert!(master.local_statuses[1..6]
        .iter()
        .all(|&s| s == RunStatus::TransportFailure));
    assert!(master.local_statuses[6..].iter().all(|s| s.is_valid()));

    for outcome in &outcomes {
        let first = &outcome.stages[0];
        assert_eq!(first.statuses[0], RunStatus::Overran);
        assert!(first.statuses[1..6].iter().all(|&s| s == RunStatus::TransportFailure));
        assert_eq!(first.invalid, 6);
        assert_close(outcome.stages[1].slot_len, 2.0 * first.slot_len);
        assert_eq!(outcome.total_runs, 16);
        assert_eq!(outcome.correct_runs, 10);
    }
}

#[test]
fn clean_stages_keep_slot_length() {
    let config = Config::default();
    let outcomes = run_group(2, &config, || Box::new(FixedCost::new(5e-4)));
    for stage in &outcomes[0].stages {
        assert_eq!(stage.invalid, 0);
        assert_close(stage.slot_len, outcomes[0].warmup_slot);
    }
}

#[test]
fn jittery_costs_keep_run_accounting() {
    let mut rng = rand::rng();
    let costs: Vec<f64> = (0..64).map(|_| rng.random_range(2e-4..3e-3)).collect();
    let config = Config::default().runs_max(64);
    let outcomes = run_group(1, &config, move || {
        let costs = costs.clone();
        Box::new(FixedCost::with_schedule(move |i| costs[i % costs.len()]))
    });
    let outcome = &outcomes[0];

    assert!(outcome.correct_runs <= outcome.total_runs);
    assert_eq!(outcome.times.len(), outcome.correct_runs);
    let invalid: usize = outcome.stages.iter().map(|s| s.invalid).sum();
    assert_eq!(outcome.correct_runs + invalid, outcome.total_runs);
    for pair in outcome.stages.windows(2) {
        assert!(pair[1].slot_len >= pair[0].slot_len, "slots never shrink");
    }
}

// =============================================================================
// RSE EXIT
// =============================================================================

#[test]
fn rse_policy_stops_after_minimum_runs() {
    let config = Config::default()
        .exit_policy(ExitPolicy::RelativeStdError)
        .rse_max(0.05)
        .runs_min(10)
        .runs_max(100);
    let outcomes = run_group(2, &config, || Box::new(FixedCost::new(1e-3)));

    for outcome in &outcomes {
        // Stage of 8 is below the minimum, the second stage converges
        assert_eq!(outcome.total_runs, 16);
        assert!(outcome.total_runs < config.runs_max);
        assert!(outcome.sample.rse() < 1e-6, "rse = {}", outcome.sample.rse());
        assert_close(outcome.sample.mean(), 1e-3);
    }
}

#[test]
fn rse_policy_gives_up_at_maximum() {
    // Alternating costs never reach an RSE of 0.1%
    let config = Config::default()
        .exit_policy(ExitPolicy::RelativeStdError)
        .rse_max(0.001)
        .runs_min(8)
        .runs_max(24);
    let outcomes = run_group(1, &config, || {
        Box::new(FixedCost::with_schedule(|i| if i % 2 == 0 { 1e-3 } else { 2e-4 }))
    });
    assert_eq!(outcomes[0].total_runs, 24);
}

// =============================================================================
// POINT-TO-POINT
// =============================================================================

#[test]
fn point_to_point_ranks_agree_on_exit() {
    let config = Config::quick();
    let outcomes = run_group(3, &config, || lookup("sendrecv").unwrap());
    let total = outcomes[0].total_runs;
    assert!(total >= config.runs_min);
    for outcome in &outcomes {
        assert_eq!(outcome.total_runs, total);
        assert_eq!(outcome.correct_runs, outcomes[0].correct_runs);
    }
}

// =============================================================================
// PIPELINED
// =============================================================================

#[test]
fn pipelined_mean_matches_scheduled_mean() {
    let config = Config::default().sync_mode(SyncMode::NoSync);
    let scheduled = run_group(4, &config, || Box::new(FixedCost::new(1e-3)));

    let pipelined = ThreadGroup::new(4)
        .run(|comm| {
            let clock = VirtualClock::new(1.0);
            let mut op = FixedCost::new(1e-3);
            run_pipelined(&comm, &clock, &config, &mut op).unwrap()
        })
        .unwrap();

    for outcome in &pipelined {
        assert_eq!(outcome.runs, config.runs_max);
        assert_close(outcome.mean, scheduled[0].sample.mean());
    }
    let row = pipelined[0].report_row(4, 4, &config);
    assert!((row.mean - 1000.0).abs() < 1e-6);
}
