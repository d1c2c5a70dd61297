//! Engine Tests - Do grid, controller, log and model work together?
//!
//! Every test builds its own in-memory engine with auto spikes off.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use thermal_grid::config::{GridConfig, SimulationConfig, Thresholds};
use thermal_grid::controller::{ControlMode, CoolingState, TriggerReason};
use thermal_grid::engine::Engine;
use thermal_grid::error::{GridError, ValidationError};
use thermal_grid::model::TrainOutcome;
use thermal_grid::thermal::ThermalGrid;
use thermal_grid::topology::GridTopology;

fn small_config() -> GridConfig {
    let mut config = GridConfig::default();
    config.runtime.auto_spikes = false;
    config.simulation.rng_seed = Some(21);
    config.seed.steps = 40;
    config.model.regressor.n_estimators = 15;
    config.model.classifier.n_estimators = 15;
    config
}

fn engine() -> Engine {
    Engine::new(small_config()).unwrap()
}

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Out-of-grid unit is rejected and nothing is written
#[test]
fn record_event_out_of_range_leaves_log_untouched() {
    let engine = engine();
    let version = engine.log_version();

    let err = engine.record_event(30, 88.0, None).unwrap_err();
    assert!(matches!(
        err,
        GridError::Validation(ValidationError::UnitOutOfRange { unit_id: 30, .. })
    ));
    assert_eq!(engine.log_version(), version);
    assert!(engine.history(100).is_empty());
}

/// train(false) twice on an unchanged log does the work once
#[test]
fn train_is_idempotent_until_log_changes() {
    let engine = engine();

    let first = engine.train(false).unwrap();
    assert_eq!(first.outcome, TrainOutcome::Trained);
    assert_eq!(first.seeded, 40 * 24);

    let second = engine.train(false).unwrap();
    assert_eq!(second.outcome, TrainOutcome::Skipped);
    assert_eq!(second.seeded, 0);
    assert_eq!(second.metrics, first.metrics);

    engine.record_event(3, 74.0, None).unwrap();
    assert_eq!(engine.train(false).unwrap().outcome, TrainOutcome::Trained);
}

/// Before any train, predict answers with zero confidence
#[test]
fn untrained_predict_has_zero_confidence() {
    let engine = engine();
    for unit in 0..24 {
        let p = engine.predict(unit, None).unwrap();
        assert_eq!(p.confidence, 0.0);
    }
    assert!(!engine.status().model.is_trained);
}

/// A recorded sample is the next prediction's lag-1
#[test]
fn recorded_event_becomes_lag_one() {
    let engine = engine();
    engine.record_event(5, 80.0, Some(at(10, 0))).unwrap();
    engine.record_event(5, 91.5, Some(at(10, 5))).unwrap();

    let features = engine.online_features(5, Some(at(10, 10))).unwrap();
    assert_eq!(features.get("temp_lag_1"), Some(91.5));
    assert_eq!(features.get("temp_lag_2"), Some(80.0));
    assert_eq!(features.get("spikes_last_10"), Some(1.0));
    let hours = features.get("time_since_spike").unwrap();
    assert!((hours - 5.0 / 60.0).abs() < 1e-9);
}

/// Trained predictions stay inside their documented ranges
#[test]
fn trained_predict_is_bounded() {
    let engine = engine();
    engine.train(false).unwrap();
    assert!(engine.is_trained());

    let metrics = engine.metrics();
    assert!(metrics.mae.unwrap() >= 0.0);
    assert!(metrics.trained_on_version.is_some());

    for unit in [0, 4, 9, 23] {
        let p = engine.predict(unit, None).unwrap();
        assert!((0.0..=1.0).contains(&p.spike_probability));
        assert!((0.5..=0.95).contains(&p.confidence));
        assert!(p.predicted_temperature.is_finite());
    }
}

/// Predictive mode still cools an over-threshold unit
#[test]
fn predictive_mode_keeps_failsafe() {
    let engine = engine();
    engine.train(false).unwrap();
    engine.set_mode(ControlMode::Predictive);

    engine.record_event(4, 96.0, None).unwrap();
    let report = engine.tick();
    let activation = report
        .activations
        .iter()
        .find(|a| a.unit_id == 4)
        .expect("unit 4 must start cooling");
    assert!(matches!(
        activation.reason,
        TriggerReason::Failsafe | TriggerReason::Predictive
    ));
    assert!(engine.status().units[4].state.is_cooling());
}

/// Reactive trigger at 86 °F, release at 67 °F within the same tick
#[test]
fn reactive_cycle() {
    let engine = engine();
    engine.record_event(12, 86.0, None).unwrap();
    let report = engine.tick();
    assert!(report
        .activations
        .iter()
        .any(|a| a.unit_id == 12 && a.reason == TriggerReason::Reactive));

    engine.record_event(12, 67.0, None).unwrap();
    let report = engine.tick();
    assert!(report.released.contains(&12));
    // released units are not re-evaluated on the same tick
    assert!(report.activations.iter().all(|a| a.unit_id != 12));
    assert_eq!(engine.status().units[12].state, CoolingState::Idle);
}

/// Reference 4×6 scenario: unit 4 at 95 °F, everything else at 72 °F
#[test]
fn hot_unit_warms_its_neighbors() {
    let mut temps = vec![72.0; 24];
    temps[4] = 95.0;
    let mut grid = ThermalGrid::with_temperatures(
        GridTopology::default(),
        SimulationConfig::default(),
        Thresholds::default(),
        temps,
    );
    grid.diffuse();

    for n in [3, 5, 10] {
        let t = grid.unit(n).unwrap().temperature;
        assert!((t - 73.15).abs() < 1e-9, "unit {} at {}", n, t);
    }
    assert_eq!(grid.unit(4).unwrap().temperature, 95.0);
    assert_eq!(grid.unit(16).unwrap().temperature, 72.0);
}

/// Explicit seeding bumps the version once per batch
#[test]
fn seed_appends_one_batch() {
    let engine = engine();
    let added = engine.seed(5).unwrap();
    assert_eq!(added, 120);
    assert_eq!(engine.log_version(), 1);
    let history = engine.history(24);
    assert_eq!(history.len(), 24);
    assert!(history.windows(2).all(|w| w[0].timestamp == w[1].timestamp));
    assert!(history[0].timestamp < chrono::Local::now().naive_local() - Duration::days(6));
}
