//! ═══════════════════════════════════════════════════════════════════════════════
//! THERMAL — Nearest-Neighbor Diffusion Simulator
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! One tick, split in two so the controller can run between them:
//!
//! 1. `diffuse()`: each unit absorbs `(hotter_neighbor − own) × rate` from every
//!    strictly hotter neighbor. Deltas come from one snapshot of the previous
//!    temperatures. Units that are cooling ignore inflow.
//! 2. `settle()`: cooling units drop 2-4 °F (floored) and release at T_lo;
//!    everything else drifts toward a noisy baseline, except units that took
//!    an external spike this tick.
//!
//! Not a PDE solver. Every temperature written is clamped to `[floor, ceiling]`.
//! ═══════════════════════════════════════════════════════════════════════════════

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{SimulationConfig, Thresholds};
use crate::topology::GridTopology;

/// One cooled compute area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: usize,
    /// °F
    pub temperature: f64,
    pub cooling_active: bool,
}

/// Diffusion delta per unit. Pure: only strictly hotter neighbors contribute.
pub fn diffusion_deltas(
    temperatures: &[f64],
    topology: &GridTopology,
    transfer_rate: f64,
) -> Vec<f64> {
    (0..temperatures.len())
        .map(|id| {
            let own = temperatures[id];
            topology
                .neighbors(id)
                .into_iter()
                .filter_map(|n| temperatures.get(n).copied())
                .filter(|&t| t > own)
                .map(|t| (t - own) * transfer_rate)
                .sum()
        })
        .collect()
}

/// Simulated grid of units
#[derive(Debug, Clone)]
pub struct ThermalGrid {
    topology: GridTopology,
    config: SimulationConfig,
    thresholds: Thresholds,
    units: Vec<Unit>,
    /// Set by `inject_spike`, cleared at the end of `settle`
    fresh_spike: Vec<bool>,
    rng: StdRng,
}

impl ThermalGrid {
    /// Units start at baseline ± initial jitter
    pub fn new(topology: GridTopology, config: SimulationConfig, thresholds: Thresholds) -> Self {
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let jitter = config.initial_jitter.abs();
        let temps = (0..topology.unit_count())
            .map(|_| config.baseline + rng.gen_range(-jitter..=jitter))
            .collect();
        Self::assemble(topology, config, thresholds, temps, rng)
    }

    /// Grid with explicit starting temperatures. Missing units start at baseline.
    pub fn with_temperatures(
        topology: GridTopology,
        config: SimulationConfig,
        thresholds: Thresholds,
        mut temperatures: Vec<f64>,
    ) -> Self {
        temperatures.resize(topology.unit_count(), config.baseline);
        let rng = StdRng::seed_from_u64(config.rng_seed.unwrap_or(0));
        Self::assemble(topology, config, thresholds, temperatures, rng)
    }

    fn assemble(
        topology: GridTopology,
        config: SimulationConfig,
        thresholds: Thresholds,
        temperatures: Vec<f64>,
        rng: StdRng,
    ) -> Self {
        let mut grid = Self {
            topology,
            thresholds,
            units: Vec::with_capacity(temperatures.len()),
            fresh_spike: vec![false; temperatures.len()],
            config,
            rng,
        };
        grid.units = temperatures
            .into_iter()
            .enumerate()
            .map(|(id, t)| Unit {
                id,
                temperature: grid.clamp(t),
                cooling_active: false,
            })
            .collect();
        grid
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, id: usize) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.units.iter().map(|u| u.temperature).collect()
    }

    /// Current temperatures of a unit's neighbors
    pub fn neighbor_temperatures(&self, id: usize) -> Vec<f64> {
        self.topology
            .neighbors(id)
            .into_iter()
            .filter_map(|n| self.units.get(n).map(|u| u.temperature))
            .collect()
    }

    /// Physically plausible range; non-finite collapses to baseline
    fn clamp(&self, t: f64) -> f64 {
        if t.is_finite() {
            t.clamp(self.config.floor, self.config.ceiling)
        } else {
            self.config.baseline
        }
    }

    pub fn set_temperature(&mut self, id: usize, temperature: f64) {
        let t = self.clamp(temperature);
        if let Some(unit) = self.units.get_mut(id) {
            unit.temperature = t;
        }
    }

    pub fn set_cooling(&mut self, id: usize, active: bool) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.cooling_active = active;
        }
    }

    /// External heat event: overrides temperature and skips drift this tick
    pub fn inject_spike(&mut self, id: usize, temperature: f64) {
        self.set_temperature(id, temperature);
        if let Some(flag) = self.fresh_spike.get_mut(id) {
            *flag = true;
        }
    }

    /// Bernoulli draw on the grid's RNG
    pub fn roll(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    /// Pick a spike target and temperature. Vulnerable units are favoured.
    pub fn random_spike(&mut self) -> (usize, f64) {
        let vulnerable = &self.config.vulnerable_units;
        let id = if !vulnerable.is_empty() && self.rng.gen::<f64>() < self.config.vulnerable_bias {
            vulnerable[self.rng.gen_range(0..vulnerable.len())]
        } else {
            self.rng.gen_range(0..self.units.len().max(1))
        };
        let (lo, hi) = self.config.spike_temperature;
        (id, self.rng.gen_range(lo..=hi))
    }

    /// Diffusion deltas for the current snapshot
    pub fn diffusion_deltas(&self) -> Vec<f64> {
        diffusion_deltas(&self.temperatures(), &self.topology, self.config.transfer_rate)
    }

    /// Apply inbound diffusion to units that are not cooling
    pub fn diffuse(&mut self) {
        let deltas = self.diffusion_deltas();
        for (id, delta) in deltas.into_iter().enumerate() {
            if self.units[id].cooling_active {
                continue;
            }
            let t = self.clamp(self.units[id].temperature + delta);
            self.units[id].temperature = t;
        }
    }

    /// Cooling and drift. Returns ids that left COOLING this tick.
    pub fn settle(&mut self) -> Vec<usize> {
        let mut released = Vec::new();
        let (cool_lo, cool_hi) = self.config.cool_step;
        let (drift_lo, drift_hi) = self.config.drift_step;
        let noise = self.config.drift_noise.abs();

        for id in 0..self.units.len() {
            let t = self.units[id].temperature;
            if self.units[id].cooling_active {
                let cooled = (t - self.rng.gen_range(cool_lo..=cool_hi)).max(self.config.floor);
                self.units[id].temperature = self.clamp(cooled);
                if self.thresholds.is_cooled(self.units[id].temperature) {
                    self.units[id].cooling_active = false;
                    released.push(id);
                }
            } else if !self.fresh_spike[id] {
                let target = self.config.baseline + self.rng.gen_range(-noise..=noise);
                let step = self.rng.gen_range(drift_lo..=drift_hi);
                let next = if t > target {
                    t - step
                } else if t < target {
                    t + step
                } else {
                    t
                };
                self.units[id].temperature = self.clamp(next);
            }
        }

        self.fresh_spike.iter_mut().for_each(|f| *f = false);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(temps: Vec<f64>) -> ThermalGrid {
        let config = SimulationConfig {
            rng_seed: Some(11),
            ..SimulationConfig::default()
        };
        let thresholds = Thresholds::default();
        ThermalGrid::with_temperatures(GridTopology::default(), config, thresholds, temps)
    }

    #[test]
    fn test_hot_unit_heats_neighbors() {
        let mut temps = vec![72.0; 24];
        temps[4] = 95.0;
        let grid = grid_with(temps);
        let deltas = grid.diffusion_deltas();

        for n in [3, 5, 10] {
            assert!((deltas[n] - 1.15).abs() < 1e-9, "neighbor {} got {}", n, deltas[n]);
        }
        assert_eq!(deltas[4], 0.0);
        // not adjacent to 4
        assert_eq!(deltas[0], 0.0);
        assert_eq!(deltas[11], 0.0);
    }

    #[test]
    fn test_no_inflow_without_hotter_neighbor() {
        let topo = GridTopology::default();
        let temps: Vec<f64> = (0..24).map(|i| 60.0 + i as f64).collect();
        let deltas = diffusion_deltas(&temps, &topo, 0.05);
        // unit 23 is hotter than all its neighbors
        assert_eq!(deltas[23], 0.0);

        // parity exchanges nothing
        let flat = vec![72.0; 24];
        assert!(diffusion_deltas(&flat, &topo, 0.05).iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_synchronous_update() {
        // chain 0-1-2 in one rack: 1 must not see 0's updated value
        let topo = GridTopology::new(1, 3);
        let deltas = diffusion_deltas(&[100.0, 70.0, 70.0], &topo, 0.1);
        assert!((deltas[1] - 3.0).abs() < 1e-9);
        assert_eq!(deltas[2], 0.0);
    }

    #[test]
    fn test_cooling_units_ignore_inflow() {
        let mut temps = vec![72.0; 24];
        temps[4] = 95.0;
        let mut grid = grid_with(temps);
        grid.set_cooling(5, true);
        grid.diffuse();
        assert_eq!(grid.unit(5).unwrap().temperature, 72.0);
        assert!((grid.unit(3).unwrap().temperature - 73.15).abs() < 1e-9);
    }

    #[test]
    fn test_cooling_releases_at_low_threshold() {
        let mut temps = vec![72.0; 24];
        temps[0] = 70.0;
        let mut grid = grid_with(temps);
        grid.set_cooling(0, true);
        let released = grid.settle();
        // 70 - (2..=4) <= 68
        assert_eq!(released, vec![0]);
        assert!(!grid.unit(0).unwrap().cooling_active);
        assert!(grid.unit(0).unwrap().temperature >= 65.0);
    }

    #[test]
    fn test_cooling_is_monotone_and_floored() {
        let mut temps = vec![72.0; 24];
        temps[7] = 98.0;
        let mut grid = grid_with(temps);
        grid.set_cooling(7, true);
        let mut last = 98.0;
        while grid.unit(7).unwrap().cooling_active {
            grid.settle();
            let t = grid.unit(7).unwrap().temperature;
            assert!(t < last);
            assert!(t >= 65.0);
            last = t;
        }
        assert!(last <= 68.0);
    }

    #[test]
    fn test_fresh_spike_skips_drift() {
        let mut grid = grid_with(vec![72.0; 24]);
        grid.inject_spike(9, 93.0);
        grid.settle();
        assert_eq!(grid.unit(9).unwrap().temperature, 93.0);
        // next tick drifts normally
        grid.settle();
        assert!(grid.unit(9).unwrap().temperature < 93.0);
    }

    #[test]
    fn test_drift_moves_toward_baseline() {
        let mut temps = vec![72.0; 24];
        temps[2] = 80.0;
        temps[3] = 66.0;
        let mut grid = grid_with(temps);
        grid.settle();
        assert!(grid.unit(2).unwrap().temperature < 80.0);
        assert!(grid.unit(3).unwrap().temperature > 66.0);
    }

    #[test]
    fn test_clamped_to_plausible_range() {
        let mut grid = grid_with(vec![72.0; 24]);
        grid.set_temperature(1, f64::NAN);
        assert_eq!(grid.unit(1).unwrap().temperature, 72.0);
        grid.set_temperature(2, 500.0);
        assert_eq!(grid.unit(2).unwrap().temperature, 200.0);
        grid.set_temperature(3, -40.0);
        assert_eq!(grid.unit(3).unwrap().temperature, 65.0);
    }

    #[test]
    fn test_random_spike_in_range() {
        let mut grid = grid_with(vec![72.0; 24]);
        for _ in 0..200 {
            let (id, t) = grid.random_spike();
            assert!(id < 24);
            assert!((88.0..=98.0).contains(&t));
        }
    }
}
