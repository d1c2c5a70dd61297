//! ═══════════════════════════════════════════════════════════════════════════════
//! CONFIG — Grid Layout, Thresholds, Physics and Model Settings
//! ═══════════════════════════════════════════════════════════════════════════════
//! Defaults reproduce the 4×6 reference grid. A JSON file (path from
//! `THERMAL_GRID_CONFIG`) overrides defaults; environment overrides the file.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::controller::ControlMode;
use crate::error::{ConfigError, GridResult};

/// Environment variable naming the JSON config file
pub const CONFIG_ENV: &str = "THERMAL_GRID_CONFIG";
/// Environment variable overriding the event log path
pub const LOG_PATH_ENV: &str = "THERMAL_GRID_LOG";
/// Environment variable overriding the initial control mode
pub const MODE_ENV: &str = "THERMAL_GRID_MODE";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub topology: TopologyConfig,
    pub thresholds: Thresholds,
    pub simulation: SimulationConfig,
    pub model: ModelConfig,
    pub seed: SeedConfig,
    pub runtime: RuntimeConfig,
}

/// Rack/slot decomposition of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub racks: usize,
    pub slots_per_rack: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            racks: 4,
            slots_per_rack: 6,
        }
    }
}

/// Cooling hysteresis band and predictive trigger.
///
/// `high` is both the reactive trigger and the spike label used for training.
/// Changing it changes what the classifier learns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// T_hi: reactive trigger and spike label (°F)
    pub high: f64,
    /// T_lo: cooling releases at or below this (°F)
    pub low: f64,
    /// P_hi: predictive trigger on classifier probability
    pub spike_probability: f64,
}

impl Thresholds {
    /// Is this reading a spike?
    pub fn is_spike(&self, temperature: f64) -> bool {
        temperature > self.high
    }

    /// Has a cooling cycle finished?
    pub fn is_cooled(&self, temperature: f64) -> bool {
        temperature <= self.low
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 85.0,
            low: 68.0,
            spike_probability: 0.7,
        }
    }
}

/// Diffusion, cooling and drift parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Drift target (°F)
    pub baseline: f64,
    /// Initial temperatures are baseline ± this
    pub initial_jitter: f64,
    /// Fraction of a hotter neighbor's excess absorbed per tick
    pub transfer_rate: f64,
    /// Per-tick cooling drop range (°F)
    pub cool_step: (f64, f64),
    /// Lowest physically plausible temperature (°F)
    pub floor: f64,
    /// Highest physically plausible temperature (°F)
    pub ceiling: f64,
    /// Drift target noise (± °F)
    pub drift_noise: f64,
    /// Per-tick drift step range (°F)
    pub drift_step: (f64, f64),
    /// Chance of an automatic spike per tick
    pub auto_spike_probability: f64,
    /// Spike temperature range for auto/manual spikes (°F)
    pub spike_temperature: (f64, f64),
    /// Units that receive most spikes
    pub vulnerable_units: Vec<usize>,
    /// Chance a spike lands on a vulnerable unit
    pub vulnerable_bias: f64,
    /// Reproducible runs when set
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            baseline: 72.0,
            initial_jitter: 2.0,
            transfer_rate: 0.05,
            cool_step: (2.0, 4.0),
            floor: 65.0,
            ceiling: 200.0,
            drift_noise: 1.0,
            drift_step: (0.1, 0.3),
            auto_spike_probability: 0.15,
            spike_temperature: (88.0, 98.0),
            vulnerable_units: vec![4, 9, 14, 19],
            vulnerable_bias: 0.8,
            rng_seed: None,
        }
    }
}

/// Gradient boosting hyperparameters for one estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub l2_regularization: f64,
    pub max_bins: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 120,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_split: 10,
            min_samples_leaf: 4,
            subsample: 0.8,
            l2_regularization: 1.0,
            max_bins: 32,
        }
    }
}

/// Training pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub regressor: BoostingParams,
    pub classifier: BoostingParams,
    /// Below this many events, `train` seeds bootstrap data first
    pub seed_floor: usize,
    /// Below this many cleaned events, the model stays untrained
    pub min_samples: usize,
    /// Held-out evaluation only above this many feature rows
    pub holdout_min_rows: usize,
    /// Fraction of rows held out for evaluation
    pub test_fraction: f64,
    /// Accepted temperature range for training rows (°F)
    pub temperature_range: (f64, f64),
    /// Histories above this size are downsampled
    pub downsample_above: usize,
    /// Rows within this many days of the newest event are always kept
    pub recent_window_days: i64,
    /// Older rows are sampled down to this count
    pub older_sample_size: usize,
    /// Neighbor value when a neighbor has no readings yet (°F)
    pub neighbor_fallback: f64,
    /// Temperature reported by the untrained default (°F)
    pub default_temperature: f64,
    pub random_state: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            regressor: BoostingParams::default(),
            classifier: BoostingParams {
                n_estimators: 80,
                max_depth: 4,
                ..BoostingParams::default()
            },
            seed_floor: 50,
            min_samples: 100,
            holdout_min_rows: 200,
            test_fraction: 0.2,
            temperature_range: (50.0, 120.0),
            downsample_above: 100_000,
            recent_window_days: 30,
            older_sample_size: 50_000,
            neighbor_fallback: 70.0,
            default_temperature: 70.0,
            random_state: 42,
        }
    }
}

/// Synthetic bootstrap history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Time steps generated (one reading per unit per step)
    pub steps: usize,
    /// Minutes between steps
    pub step_minutes: i64,
    /// History ends now and starts this many days back
    pub lookback_days: i64,
    pub spike_chance: f64,
    pub spike_temperature: (f64, f64),
    pub start_temperature: f64,
    pub start_jitter: f64,
    pub transfer_rate: f64,
    /// Units above `cool_above` lose this much per step
    pub cool_rate: f64,
    pub cool_above: f64,
    pub noise: f64,
    pub rng_seed: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            steps: 600,
            step_minutes: 5,
            lookback_days: 7,
            spike_chance: 0.1,
            spike_temperature: (92.0, 102.0),
            start_temperature: 70.0,
            start_jitter: 2.0,
            transfer_rate: 0.1,
            cool_rate: 0.8,
            cool_above: 72.0,
            noise: 0.1,
            rng_seed: 7,
        }
    }
}

/// Loop and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_period_ms: u64,
    pub event_log_path: Option<PathBuf>,
    pub initial_mode: ControlMode,
    pub auto_spikes: bool,
    /// Accepted bounds for recorded temperatures (°F)
    pub record_bounds: (f64, f64),
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1000,
            event_log_path: None,
            initial_mode: ControlMode::Reactive,
            auto_spikes: true,
            record_bounds: (0.0, 200.0),
        }
    }
}

impl GridConfig {
    /// Load config from optional file and environment
    pub fn load() -> GridResult<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file
    pub fn from_file(path: &Path) -> GridResult<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: GridConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Environment overrides file values
    pub fn apply_env(&mut self) -> GridResult<()> {
        if let Ok(path) = std::env::var(LOG_PATH_ENV) {
            if !path.trim().is_empty() {
                self.runtime.event_log_path = Some(PathBuf::from(path.trim()));
            }
        }
        if let Ok(mode) = std::env::var(MODE_ENV) {
            self.runtime.initial_mode = mode.parse()?;
        }
        Ok(())
    }

    /// Reject configurations that would collapse the hysteresis band or break physics
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topology.racks == 0 || self.topology.slots_per_rack == 0 {
            return Err(ConfigError::invalid("topology", "racks and slots must be > 0"));
        }
        if self.thresholds.low >= self.thresholds.high {
            return Err(ConfigError::invalid(
                "thresholds",
                format!(
                    "low ({}) must be below high ({})",
                    self.thresholds.low, self.thresholds.high
                ),
            ));
        }
        let p = self.thresholds.spike_probability;
        if !(p > 0.0 && p < 1.0) {
            return Err(ConfigError::invalid("thresholds.spike_probability", "must be in (0, 1)"));
        }
        let rate = self.simulation.transfer_rate;
        if !(rate > 0.0 && rate <= 0.25) {
            // four neighbors at 0.25 each already move a unit all the way to their mean
            return Err(ConfigError::invalid("simulation.transfer_rate", "must be in (0, 0.25]"));
        }
        if self.simulation.floor >= self.simulation.ceiling {
            return Err(ConfigError::invalid("simulation.floor", "must be below ceiling"));
        }
        if self.simulation.floor > self.thresholds.low {
            // cooling stops at the floor; a floor above T_lo never releases
            return Err(ConfigError::invalid("simulation.floor", "must not exceed thresholds.low"));
        }
        let (lo, hi) = self.simulation.cool_step;
        if lo < 0.0 || lo > hi {
            return Err(ConfigError::invalid("simulation.cool_step", "expected 0 <= min <= max"));
        }
        let (lo, hi) = self.simulation.drift_step;
        if lo < 0.0 || lo > hi {
            return Err(ConfigError::invalid("simulation.drift_step", "expected 0 <= min <= max"));
        }
        for (field, (lo, hi)) in [
            ("simulation.spike_temperature", self.simulation.spike_temperature),
            ("seed.spike_temperature", self.seed.spike_temperature),
        ] {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(ConfigError::invalid(field, "expected finite min <= max"));
            }
        }
        let units = self.topology.racks * self.topology.slots_per_rack;
        if let Some(bad) = self.simulation.vulnerable_units.iter().find(|&&u| u >= units) {
            return Err(ConfigError::invalid(
                "simulation.vulnerable_units",
                format!("unit {} outside grid of {}", bad, units),
            ));
        }
        if !(self.model.test_fraction > 0.0 && self.model.test_fraction < 1.0) {
            return Err(ConfigError::invalid("model.test_fraction", "must be in (0, 1)"));
        }
        let boosters = [
            ("model.regressor", &self.model.regressor),
            ("model.classifier", &self.model.classifier),
        ];
        for (name, params) in boosters {
            if params.n_estimators == 0 || params.max_depth == 0 || params.max_bins < 2 {
                return Err(ConfigError::invalid(
                    name,
                    "estimators, depth and bins must be positive",
                ));
            }
            if !(params.subsample > 0.0 && params.subsample <= 1.0) {
                return Err(ConfigError::invalid(name, "subsample must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GridConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.racks * config.topology.slots_per_rack, 24);
    }

    #[test]
    fn test_collapsed_hysteresis_rejected() {
        let mut config = GridConfig::default();
        config.thresholds.low = 85.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vulnerable_units_must_fit_grid() {
        let mut config = GridConfig::default();
        config.simulation.vulnerable_units = vec![4, 30];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: GridConfig =
            serde_json::from_str(r#"{"thresholds": {"high": 90.0}}"#).unwrap();
        assert_eq!(config.thresholds.high, 90.0);
        assert_eq!(config.thresholds.low, 68.0);
        assert_eq!(config.topology.slots_per_rack, 6);
    }

    #[test]
    fn test_thresholds_band() {
        let t = Thresholds::default();
        assert!(t.is_spike(85.1));
        assert!(!t.is_spike(85.0));
        assert!(t.is_cooled(68.0));
        assert!(!t.is_cooled(68.1));
    }
}
