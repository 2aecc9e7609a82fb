//! Tests for configuration validation.
//!
//! Builder methods panic on nonsensical values; `validate` catches values
//! that bypass the builders (command line, deserialized configs).

use collbench::{Config, ConfigError, ExitPolicy, ParamSequence, Step};

// =============================================================================
// BUILDER PANICS
// =============================================================================

#[test]
#[should_panic(expected = "measurements_max must be > 0")]
fn measurements_max_zero_panics() {
    let _ = Config::new().measurements_max(0);
}

#[test]
#[should_panic(expected = "runs_min must be > 0")]
fn runs_min_zero_panics() {
    let _ = Config::new().runs_min(0);
}

#[test]
#[should_panic(expected = "runs_max must be > 0")]
fn runs_max_zero_panics() {
    let _ = Config::new().runs_max(0);
}

#[test]
#[should_panic(expected = "rse_max must be in (0, 1]")]
fn rse_max_zero_panics() {
    let _ = Config::new().rse_max(0.0);
}

#[test]
#[should_panic(expected = "rse_max must be in (0, 1]")]
fn rse_max_above_one_panics() {
    let _ = Config::new().rse_max(1.5);
}

#[test]
fn rse_max_one_valid() {
    assert_eq!(Config::new().rse_max(1.0).rse_max, 1.0);
}

#[test]
#[should_panic(expected = "nprocs must start at 1 or more")]
fn nprocs_from_zero_panics() {
    let _ = Config::new().nprocs(ParamSequence::new(0, 4, Step::Add(1)));
}

// =============================================================================
// VALIDATE
// =============================================================================

#[test]
fn defaults_are_valid() {
    assert!(Config::default().validate().is_ok());
    assert!(Config::quick().validate().is_ok());
    assert!(Config::thorough().validate().is_ok());
}

#[test]
fn inverted_run_bounds_rejected() {
    let config = Config {
        runs_min: 50,
        runs_max: 10,
        ..Config::default()
    };
    assert_eq!(
        config.validate(),
        Err(ConfigError::RunBounds { min: 50, max: 10 })
    );
}

#[test]
fn out_of_range_rse_rejected() {
    let config = Config {
        rse_max: -0.1,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::Rse(_))));
}

#[test]
fn non_progressive_count_step_rejected() {
    let config = Config {
        counts: ParamSequence::new(1, 64, Step::Mul(1)),
        ..Config::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Range { what: "count", .. })
    ));
}

#[test]
fn empty_count_range_rejected() {
    let config = Config {
        counts: ParamSequence::new(64, 1, Step::Mul(2)),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

// =============================================================================
// EXIT POLICIES
// =============================================================================

#[test]
fn fixed_runs_waits_for_minimum() {
    let config = Config::default().measurements_max(4).runs_min(16);
    assert!(!config.should_stop(8, 8, 0.0));
    assert!(config.should_stop(8, 16, 0.5));
}

#[test]
fn fixed_runs_stops_at_maximum_even_without_correct_runs() {
    let config = Config::default().runs_max(24);
    assert!(config.should_stop(0, 24, f64::INFINITY));
}

#[test]
fn rse_policy_needs_minimum_correct_runs() {
    let config = Config::default()
        .exit_policy(ExitPolicy::RelativeStdError)
        .rse_max(0.05)
        .runs_min(10);
    assert!(!config.should_stop(8, 8, 0.0));
    assert!(config.should_stop(16, 16, 0.01));
    assert!(!config.should_stop(16, 16, 0.2));
}
