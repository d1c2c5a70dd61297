//! ═══════════════════════════════════════════════════════════════════════════════
//! ENGINE — Grid, Controller, Event Log and Model Behind One Handle
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! ```text
//!   world: Mutex<World>        units, controller, auto-spike flag, tick count
//!   log:   RwLock<EventLog>    durable history
//!   predictor                  Arc<ModelState> swapped after each train
//! ```
//!
//! Lock order is always world → log. A tick holds the world lock for its full
//! duration so manual commands never observe half a tick. Training copies the
//! log under a short read lock and fits without holding anything.
//!
//! Tick order:
//!   1. maybe auto-spike (recorded to the log)
//!   2. diffuse
//!   3. controller decides IDLE → COOLING for every idle unit
//!   4. cooling / drift; units reaching T_lo release
//! ═══════════════════════════════════════════════════════════════════════════════

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::GridConfig;
use crate::controller::{ControlMode, CoolingController, CoolingState, TriggerReason};
use crate::error::{GridError, GridResult, ValidationError};
use crate::events::{local_now, EventLog, HeatEvent};
use crate::features::{FeatureVector, HISTORY_WINDOW};
use crate::model::{ModelMetrics, Prediction, Predictor, TrainReport};
use crate::seed;
use crate::thermal::ThermalGrid;
use crate::topology::GridTopology;

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpikeEvent {
    pub unit_id: usize,
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Activation {
    pub unit_id: usize,
    pub temperature: f64,
    pub reason: TriggerReason,
    pub spike_probability: Option<f64>,
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub spike: Option<SpikeEvent>,
    pub activations: Vec<Activation>,
    pub released: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub id: usize,
    pub temperature: f64,
    pub state: CoolingState,
    pub prediction: Prediction,
}

/// Live view of the whole grid
#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    pub topology: GridTopology,
    pub mode: ControlMode,
    pub auto_spikes: bool,
    pub ticks: u64,
    pub units: Vec<UnitStatus>,
    pub cooling_units: usize,
    pub events_recorded: usize,
    pub log_version: u64,
    pub model: ModelMetrics,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

struct World {
    grid: ThermalGrid,
    controller: CoolingController,
    auto_spikes: bool,
    ticks: u64,
}

pub struct Engine {
    config: GridConfig,
    topology: GridTopology,
    world: Mutex<World>,
    log: RwLock<EventLog>,
    predictor: Predictor,
}

impl Engine {
    /// Engine with the configured event log (file-backed when a path is set)
    pub fn new(config: GridConfig) -> GridResult<Self> {
        config.validate()?;
        let topology = GridTopology::from_config(&config.topology);
        let log = match &config.runtime.event_log_path {
            Some(path) => EventLog::open(topology, path)?,
            None => EventLog::new(topology),
        };
        Self::with_log(config, log)
    }

    pub fn with_log(config: GridConfig, log: EventLog) -> GridResult<Self> {
        config.validate()?;
        let topology = GridTopology::from_config(&config.topology);
        if log.topology() != topology {
            return Err(GridError::TopologyMismatch(format!(
                "log is {} but config is {}",
                log.topology().signature(),
                topology.signature()
            )));
        }
        let grid = ThermalGrid::new(topology, config.simulation.clone(), config.thresholds);
        let controller = CoolingController::new(config.runtime.initial_mode, config.thresholds);
        let predictor = Predictor::new(topology, config.thresholds, config.model.clone());

        info!(
            grid = %topology.signature(),
            mode = %controller.mode(),
            events = log.len(),
            "Engine ready"
        );
        Ok(Self {
            world: Mutex::new(World {
                grid,
                controller,
                auto_spikes: config.runtime.auto_spikes,
                ticks: 0,
            }),
            log: RwLock::new(log),
            predictor,
            topology,
            config,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn topology(&self) -> GridTopology {
        self.topology
    }

    fn unit_index(&self, unit_id: i64) -> Result<usize, ValidationError> {
        if unit_id >= 0 && self.topology.contains(unit_id as usize) {
            Ok(unit_id as usize)
        } else {
            Err(ValidationError::UnitOutOfRange {
                unit_id,
                max: self.topology.unit_count().saturating_sub(1),
            })
        }
    }

    fn check_temperature(&self, temperature: f64) -> Result<(), ValidationError> {
        let (min, max) = self.config.runtime.record_bounds;
        if temperature.is_finite() && temperature >= min && temperature <= max {
            Ok(())
        } else {
            Err(ValidationError::TemperatureOutOfRange {
                value: temperature,
                min,
                max,
            })
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record an observed reading. The live unit takes the recorded temperature.
    pub fn record_event(
        &self,
        unit_id: i64,
        temperature: f64,
        timestamp: Option<NaiveDateTime>,
    ) -> GridResult<HeatEvent> {
        let unit = self.unit_index(unit_id)?;
        self.check_temperature(temperature)?;
        let event = HeatEvent::new(unit, temperature, timestamp.unwrap_or_else(local_now));

        let mut world = self.world.lock();
        self.log.write().append(event.clone())?;
        world.grid.inject_spike(unit, temperature);
        debug!(unit, temperature, "Event recorded");
        Ok(event)
    }

    /// Last `limit` recorded events, append order
    pub fn history(&self, limit: usize) -> Vec<HeatEvent> {
        self.log.read().tail(limit)
    }

    pub fn log_version(&self) -> u64 {
        self.log.read().version()
    }

    pub fn event_count(&self) -> usize {
        self.log.read().len()
    }

    /// Append `steps` of synthetic history ending now
    pub fn seed(&self, steps: usize) -> GridResult<usize> {
        let events = seed::generate(
            &self.topology,
            &self.config.seed,
            &self.config.simulation,
            steps,
            local_now(),
        );
        let added = self.log.write().merge(events)?;
        info!(added, steps, "Synthetic history seeded");
        Ok(added)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MODEL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Retrain unless the log is unchanged. Seeds first when the log is nearly empty.
    pub fn train(&self, force: bool) -> GridResult<TrainReport> {
        let mut seeded = 0;
        if self.event_count() < self.config.model.seed_floor {
            warn!(
                events = self.event_count(),
                floor = self.config.model.seed_floor,
                "Event log below seed floor, bootstrapping synthetic history"
            );
            seeded = self.seed(self.config.seed.steps)?;
        }

        let (events, version) = {
            let log = self.log.read();
            (log.deduplicated(), log.version())
        };
        let mut report = self.predictor.train(&events, version, force);
        report.seeded = seeded;
        Ok(report)
    }

    pub fn metrics(&self) -> ModelMetrics {
        self.predictor.metrics()
    }

    pub fn is_trained(&self) -> bool {
        self.predictor.is_trained()
    }

    /// Predict a unit's reading at `at` (default now)
    pub fn predict(&self, unit_id: i64, at: Option<NaiveDateTime>) -> GridResult<Prediction> {
        let unit = self.unit_index(unit_id)?;
        let at = at.unwrap_or_else(local_now);
        let world = self.world.lock();
        Ok(self.predict_locked(&world, unit, at))
    }

    /// The online feature row predict would use
    pub fn online_features(
        &self,
        unit_id: i64,
        at: Option<NaiveDateTime>,
    ) -> GridResult<FeatureVector> {
        let unit = self.unit_index(unit_id)?;
        let at = at.unwrap_or_else(local_now);
        let neighbors = self.world.lock().grid.neighbor_temperatures(unit);
        let history = self
            .log
            .read()
            .recent_for_unit_until(unit, at, HISTORY_WINDOW);
        Ok(self.predictor.pipeline().online(&history, at, &neighbors))
    }

    fn predict_locked(&self, world: &World, unit: usize, at: NaiveDateTime) -> Prediction {
        let neighbors = world.grid.neighbor_temperatures(unit);
        let history = self
            .log
            .read()
            .recent_for_unit_until(unit, at, HISTORY_WINDOW);
        self.predictor.predict(&history, at, &neighbors)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SIMULATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance the grid by one tick
    pub fn tick(&self) -> TickReport {
        let mut world = self.world.lock();
        let mut report = TickReport::default();

        if world.auto_spikes {
            let p = self.config.simulation.auto_spike_probability;
            if world.grid.roll(p) {
                let (unit, temperature) = world.grid.random_spike();
                let cooling = world.grid.unit(unit).map_or(false, |u| u.cooling_active);
                if !cooling {
                    world.grid.inject_spike(unit, temperature);
                    let event = HeatEvent::new(unit, temperature, local_now());
                    if let Err(err) = self.log.write().append(event) {
                        error!(%err, unit, "Failed to record auto spike");
                    }
                    info!(unit, temperature = %format!("{:.1}", temperature), "Auto heat spike");
                    report.spike = Some(SpikeEvent {
                        unit_id: unit,
                        temperature,
                    });
                }
            }
        }

        world.grid.diffuse();

        let now = local_now();
        let controller = world.controller;
        let predictive = controller.needs_prediction();
        for id in 0..self.topology.unit_count() {
            let Some(unit) = world.grid.unit(id) else {
                continue;
            };
            let state = CoolingState::from_active(unit.cooling_active);
            if state.is_cooling() {
                continue;
            }
            let temperature = unit.temperature;
            let probability = if predictive {
                let history = self
                    .log
                    .read()
                    .recent_for_unit_until(id, now, HISTORY_WINDOW);
                let neighbors = world.grid.neighbor_temperatures(id);
                self.predictor.spike_probability(&history, now, &neighbors)
            } else {
                None
            };

            if let Some(reason) = controller.evaluate(state, temperature, probability) {
                world.grid.set_cooling(id, true);
                match reason {
                    TriggerReason::Predictive => info!(
                        unit = id,
                        probability = %format!("{:.2}", probability.unwrap_or(0.0)),
                        "Predictive cooling activated"
                    ),
                    TriggerReason::Failsafe => info!(
                        unit = id,
                        temperature = %format!("{:.1}", temperature),
                        "Failsafe cooling activated"
                    ),
                    _ => info!(
                        unit = id,
                        temperature = %format!("{:.1}", temperature),
                        "Reactive cooling activated"
                    ),
                }
                report.activations.push(Activation {
                    unit_id: id,
                    temperature,
                    reason,
                    spike_probability: probability,
                });
            }
        }

        report.released = world.grid.settle();
        for id in &report.released {
            debug!(unit = id, "Cooling released");
        }

        world.ticks += 1;
        report.tick = world.ticks;
        report
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATOR CONTROLS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn mode(&self) -> ControlMode {
        self.world.lock().controller.mode()
    }

    pub fn set_mode(&self, mode: ControlMode) {
        let mut world = self.world.lock();
        if world.controller.mode() != mode {
            info!(from = %world.controller.mode(), to = %mode, "Control mode changed");
        }
        world.controller.set_mode(mode);
    }

    pub fn auto_spikes(&self) -> bool {
        self.world.lock().auto_spikes
    }

    pub fn set_auto_spikes(&self, enabled: bool) {
        self.world.lock().auto_spikes = enabled;
        info!(enabled, "Auto spikes toggled");
    }

    /// Inject a random spike now. Always applied, even to a cooling unit.
    pub fn trigger_manual_spike(&self) -> GridResult<(usize, f64)> {
        let mut world = self.world.lock();
        let (unit, temperature) = world.grid.random_spike();
        self.log.write().append(HeatEvent::new(unit, temperature, local_now()))?;
        world.grid.inject_spike(unit, temperature);
        info!(unit, temperature = %format!("{:.1}", temperature), "Manual heat spike");
        Ok((unit, temperature))
    }

    /// Force a unit into COOLING. The next tick may release it.
    pub fn activate(&self, unit_id: i64) -> GridResult<()> {
        let unit = self.unit_index(unit_id)?;
        self.world.lock().grid.set_cooling(unit, true);
        info!(unit, reason = ?TriggerReason::Manual, "Cooling activated");
        Ok(())
    }

    /// Force a unit to IDLE. The next tick may re-trigger it.
    pub fn deactivate(&self, unit_id: i64) -> GridResult<()> {
        let unit = self.unit_index(unit_id)?;
        self.world.lock().grid.set_cooling(unit, false);
        info!(unit, "Cooling deactivated");
        Ok(())
    }

    pub fn status(&self) -> GridStatus {
        let world = self.world.lock();
        let now = local_now();
        let units: Vec<UnitStatus> = world
            .grid
            .units()
            .iter()
            .map(|u| UnitStatus {
                id: u.id,
                temperature: u.temperature,
                state: CoolingState::from_active(u.cooling_active),
                prediction: self.predict_locked(&world, u.id, now),
            })
            .collect();
        let log = self.log.read();
        GridStatus {
            topology: self.topology,
            mode: world.controller.mode(),
            auto_spikes: world.auto_spikes,
            ticks: world.ticks,
            cooling_units: units.iter().filter(|u| u.state.is_cooling()).count(),
            units,
            events_recorded: log.len(),
            log_version: log.version(),
            model: self.predictor.metrics(),
        }
    }
}
