//! ═══════════════════════════════════════════════════════════════════════════════
//! THERMAL GRID — Diffusion Simulator with Predictive Cooling
//! ═══════════════════════════════════════════════════════════════════════════════
//! A rack/slot grid of compute units exchanges heat with its neighbors. A
//! hysteresis controller switches cooling on and off, either reactively or
//! from a gradient-boosted spike classifier trained on the recorded history.
//! ═══════════════════════════════════════════════════════════════════════════════

#![allow(clippy::new_without_default)]
#![allow(clippy::needless_range_loop)] // Indexed loops clearer for grid math

// ═══════════════════════════════════════════════════════════════════════════════
// FOUNDATION — configuration and errors
// ═══════════════════════════════════════════════════════════════════════════════

pub mod config;
pub mod error;
pub mod stats;
pub mod telemetry;

pub use error::{GridError, GridResult};

// ═══════════════════════════════════════════════════════════════════════════════
// GRID — physics and control
// ═══════════════════════════════════════════════════════════════════════════════

pub mod controller;
pub mod thermal;
pub mod topology;

// ═══════════════════════════════════════════════════════════════════════════════
// HISTORY & LEARNING
// ═══════════════════════════════════════════════════════════════════════════════

pub mod events;
pub mod features;
pub mod model;
pub mod seed;

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATION
// ═══════════════════════════════════════════════════════════════════════════════

pub mod engine;
pub mod runtime;

pub use config::GridConfig;
pub use controller::{ControlMode, CoolingState, TriggerReason};
pub use engine::{Engine, GridStatus, TickReport};
pub use events::{EventLog, HeatEvent};
pub use model::{ModelMetrics, Prediction, TrainOutcome, TrainReport};
pub use runtime::{SimulationRuntime, TrainingStatus};
pub use topology::GridTopology;
