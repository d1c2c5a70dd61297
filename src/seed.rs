//! ═══════════════════════════════════════════════════════════════════════════════
//! SEED — Synthetic Bootstrap History
//! ═══════════════════════════════════════════════════════════════════════════════
//! A cold log cannot train. This generates a plausible history with a learnable
//! pattern: a handful of vulnerable units take most of the spikes, heat spreads
//! to neighbors, and hot units bleed off slowly.
//!
//! Deterministic for a given `SeedConfig::rng_seed` and end time.
//! ═══════════════════════════════════════════════════════════════════════════════

use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{SeedConfig, SimulationConfig};
use crate::events::HeatEvent;
use crate::thermal::diffusion_deltas;
use crate::topology::GridTopology;

/// Generate `steps` readings per unit, ending at `end`.
///
/// Spike targets follow the simulator's vulnerable units and bias so the
/// bootstrap pattern matches what the live grid produces.
pub fn generate(
    topology: &GridTopology,
    config: &SeedConfig,
    simulation: &SimulationConfig,
    steps: usize,
    end: NaiveDateTime,
) -> Vec<HeatEvent> {
    let n = topology.unit_count();
    if n == 0 || steps == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(config.rng_seed);
    let jitter = config.start_jitter.abs();
    let noise = config.noise.abs();
    let (spike_lo, spike_hi) = config.spike_temperature;
    let vulnerable: Vec<usize> = simulation
        .vulnerable_units
        .iter()
        .copied()
        .filter(|&u| topology.contains(u))
        .collect();

    let mut temps: Vec<f64> = (0..n)
        .map(|_| config.start_temperature + rng.gen_range(-jitter..=jitter))
        .collect();

    let step = Duration::minutes(config.step_minutes.max(1));
    let mut timestamp = end - Duration::days(config.lookback_days.max(0));
    let mut out = Vec::with_capacity(steps * n);

    for _ in 0..steps {
        if rng.gen::<f64>() < config.spike_chance {
            let biased = !vulnerable.is_empty() && rng.gen::<f64>() < simulation.vulnerable_bias;
            let target = if biased {
                vulnerable[rng.gen_range(0..vulnerable.len())]
            } else {
                rng.gen_range(0..n)
            };
            temps[target] = rng.gen_range(spike_lo..=spike_hi);
        }

        let deltas = diffusion_deltas(&temps, topology, config.transfer_rate);
        for (t, d) in temps.iter_mut().zip(deltas) {
            *t += d;
        }

        for t in temps.iter_mut() {
            if *t > config.cool_above {
                *t -= config.cool_rate;
            } else {
                *t += rng.gen_range(-noise..=noise);
            }
        }

        out.extend(
            temps
                .iter()
                .enumerate()
                .map(|(id, &t)| HeatEvent::new(id, t, timestamp)),
        );
        timestamp += step;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn end() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn seeded(steps: usize) -> Vec<HeatEvent> {
        let topo = GridTopology::default();
        generate(&topo, &SeedConfig::default(), &SimulationConfig::default(), steps, end())
    }

    #[test]
    fn test_shape_and_spacing() {
        let events = seeded(10);
        assert_eq!(events.len(), 240);
        assert_eq!(events[0].timestamp, end() - Duration::days(7));
        assert_eq!(events[24].timestamp - events[0].timestamp, Duration::minutes(5));
        assert!(events.iter().all(|e| e.unit_id < 24));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(seeded(50), seeded(50));
    }

    #[test]
    fn test_contains_spikes() {
        let events = seeded(600);
        let spikes = events.iter().filter(|e| e.temperature > 85.0).count();
        assert!(spikes > 0);
        assert!(spikes < events.len() / 2);
    }

    #[test]
    fn test_empty_requests() {
        assert!(seeded(0).is_empty());
    }
}
