//! ═══════════════════════════════════════════════════════════════════════════════
//! CONTROLLER — Per-Unit Cooling State Machine
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! ```text
//!            temp > T_hi                (reactive)
//!            p > P_hi  OR  temp > T_hi  (predictive)
//!   ┌──────┐ ──────────────────────────▶ ┌─────────┐
//!   │ IDLE │                             │ COOLING │
//!   └──────┘ ◀────────────────────────── └─────────┘
//!                   temp <= T_lo
//! ```
//!
//! The release edge is applied by the simulator's cooling step. The trigger
//! edge is decided here, once per tick, before physics runs.
//!
//! Predictive mode keeps the reactive threshold as a failsafe. A missing or
//! non-finite probability only disables the predictive edge.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Thresholds;
use crate::error::ValidationError;

/// Control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Cooling triggered purely by current temperature
    #[default]
    Reactive,
    /// Classifier-driven, with reactive failsafe
    Predictive,
}

impl ControlMode {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMode::Reactive => "standard",
            ControlMode::Predictive => "ai",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControlMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "reactive" => Ok(ControlMode::Reactive),
            "ai" | "predictive" => Ok(ControlMode::Predictive),
            other => Err(ValidationError::UnknownMode(other.to_string())),
        }
    }
}

/// Per-unit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolingState {
    Idle,
    Cooling,
}

impl CoolingState {
    pub fn from_active(active: bool) -> Self {
        if active {
            CoolingState::Cooling
        } else {
            CoolingState::Idle
        }
    }

    pub fn is_cooling(&self) -> bool {
        matches!(self, CoolingState::Cooling)
    }
}

/// Why a unit entered COOLING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    /// Temperature above T_hi in reactive mode
    Reactive,
    /// Classifier probability above P_hi
    Predictive,
    /// Temperature above T_hi in predictive mode
    Failsafe,
    /// Operator override
    Manual,
}

/// Trigger decisions for one control mode
#[derive(Debug, Clone, Copy)]
pub struct CoolingController {
    mode: ControlMode,
    thresholds: Thresholds,
}

impl CoolingController {
    pub fn new(mode: ControlMode, thresholds: Thresholds) -> Self {
        Self { mode, thresholds }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Whether this mode consumes classifier output
    pub fn needs_prediction(&self) -> bool {
        self.mode == ControlMode::Predictive
    }

    /// Decide the IDLE → COOLING edge.
    ///
    /// `spike_probability` is `None` when the model is untrained or prediction
    /// failed. Units already cooling never re-trigger.
    pub fn evaluate(
        &self,
        state: CoolingState,
        temperature: f64,
        spike_probability: Option<f64>,
    ) -> Option<TriggerReason> {
        if state.is_cooling() {
            return None;
        }
        let over_threshold = self.thresholds.is_spike(temperature);

        match self.mode {
            ControlMode::Reactive => over_threshold.then_some(TriggerReason::Reactive),
            ControlMode::Predictive => {
                let predictive = spike_probability
                    .filter(|p| p.is_finite())
                    .map(|p| p > self.thresholds.spike_probability)
                    .unwrap_or(false);
                if predictive {
                    Some(TriggerReason::Predictive)
                } else if over_threshold {
                    Some(TriggerReason::Failsafe)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(mode: ControlMode) -> CoolingController {
        CoolingController::new(mode, Thresholds::default())
    }

    #[test]
    fn test_reactive_trigger() {
        let c = controller(ControlMode::Reactive);
        assert_eq!(
            c.evaluate(CoolingState::Idle, 86.0, None),
            Some(TriggerReason::Reactive)
        );
        assert_eq!(c.evaluate(CoolingState::Idle, 85.0, None), None);
        // reactive mode ignores the classifier
        assert_eq!(c.evaluate(CoolingState::Idle, 75.0, Some(0.99)), None);
    }

    #[test]
    fn test_predictive_trigger() {
        let c = controller(ControlMode::Predictive);
        assert_eq!(
            c.evaluate(CoolingState::Idle, 75.0, Some(0.71)),
            Some(TriggerReason::Predictive)
        );
        assert_eq!(c.evaluate(CoolingState::Idle, 75.0, Some(0.7)), None);
    }

    #[test]
    fn test_failsafe_precedence() {
        let c = controller(ControlMode::Predictive);
        // low probability, failed prediction, NaN probability: failsafe still fires
        for p in [Some(0.0), None, Some(f64::NAN)] {
            assert_eq!(
                c.evaluate(CoolingState::Idle, 90.0, p),
                Some(TriggerReason::Failsafe)
            );
        }
    }

    #[test]
    fn test_cooling_units_do_not_retrigger() {
        let c = controller(ControlMode::Predictive);
        assert_eq!(c.evaluate(CoolingState::Cooling, 99.0, Some(1.0)), None);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("standard".parse::<ControlMode>().unwrap(), ControlMode::Reactive);
        assert_eq!("AI".parse::<ControlMode>().unwrap(), ControlMode::Predictive);
        assert_eq!("predictive".parse::<ControlMode>().unwrap(), ControlMode::Predictive);
        assert!(matches!(
            "turbo".parse::<ControlMode>(),
            Err(ValidationError::UnknownMode(_))
        ));
    }
}
