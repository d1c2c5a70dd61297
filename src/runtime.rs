//! ═══════════════════════════════════════════════════════════════════════════════
//! RUNTIME — Periodic Tick Loop and Background Training
//! ═══════════════════════════════════════════════════════════════════════════════
//! One tokio task drives `Engine::tick` every `tick_period_ms`. Each start bumps
//! a generation counter; a loop whose generation is stale exits at its next
//! wake, so stop → start never leaves two loops ticking.
//!
//! Pause is a gate inside the loop. `step()` ticks once regardless.
//! Training runs on the blocking pool and reports through `TrainingStatus`.
//! ═══════════════════════════════════════════════════════════════════════════════

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use crate::engine::{Engine, TickReport};
use crate::error::{GridError, GridResult};
use crate::model::TrainReport;

/// Progress of the most recent background train
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TrainingStatus {
    Idle,
    Running,
    Finished(TrainReport),
    Failed(String),
}

#[derive(Debug, Default)]
struct LoopState {
    running: bool,
    paused: bool,
    generation: u64,
}

pub struct SimulationRuntime {
    engine: Arc<Engine>,
    period: Duration,
    state: Arc<Mutex<LoopState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    training: Arc<Mutex<TrainingStatus>>,
}

impl SimulationRuntime {
    pub fn new(engine: Arc<Engine>) -> Self {
        let period = Duration::from_millis(engine.config().runtime.tick_period_ms.max(1));
        Self {
            engine,
            period,
            state: Arc::new(Mutex::new(LoopState::default())),
            handle: Mutex::new(None),
            training: Arc::new(Mutex::new(TrainingStatus::Idle)),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Spawn the tick loop. Returns false if it is already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let generation = {
            let mut state = self.state.lock();
            if state.running {
                return false;
            }
            state.running = true;
            state.paused = false;
            state.generation += 1;
            state.generation
        };

        let engine = self.engine.clone();
        let state = self.state.clone();
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                {
                    let s = state.lock();
                    if !s.running || s.generation != generation {
                        break;
                    }
                    if s.paused {
                        continue;
                    }
                }
                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.tick()).await {
                    Ok(report) => trace!(
                        tick = report.tick,
                        activations = report.activations.len(),
                        "tick"
                    ),
                    Err(err) => error!(%err, "Tick task failed"),
                }
            }
            debug!(generation, "Tick loop exited");
        });

        *self.handle.lock() = Some(handle);
        info!(period_ms = self.period.as_millis() as u64, "Simulation started");
        true
    }

    /// Signal the loop to exit at its next wake. Clears pause.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.running {
            info!("Simulation stopped");
        }
        state.running = false;
        state.paused = false;
    }

    /// Stop and wait for the loop task to finish
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(%err, "Tick loop panicked");
            }
        }
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// One tick now, whether or not the loop is running or paused
    pub fn step(&self) -> TickReport {
        self.engine.tick()
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.training.lock().clone()
    }

    /// Train on the blocking pool and wait for the result
    pub async fn train(&self, force: bool) -> GridResult<TrainReport> {
        let engine = self.engine.clone();
        *self.training.lock() = TrainingStatus::Running;
        let result = tokio::task::spawn_blocking(move || engine.train(force))
            .await
            .map_err(|err| GridError::Internal(format!("training task failed: {}", err)))
            .and_then(|r| r);
        *self.training.lock() = match &result {
            Ok(report) => TrainingStatus::Finished(report.clone()),
            Err(err) => {
                error!(%err, "Training failed");
                TrainingStatus::Failed(err.public_message())
            }
        };
        result
    }

    /// Fire-and-forget train. None if a train is already running.
    pub fn train_in_background(&self, force: bool) -> Option<JoinHandle<()>> {
        {
            let mut status = self.training.lock();
            if *status == TrainingStatus::Running {
                return None;
            }
            *status = TrainingStatus::Running;
        }
        let engine = self.engine.clone();
        let training = self.training.clone();
        Some(tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || engine.train(force)).await;
            let status = match result {
                Ok(Ok(report)) => {
                    info!(outcome = %report.outcome, "Background training finished");
                    TrainingStatus::Finished(report)
                }
                Ok(Err(err)) => {
                    error!(%err, "Background training failed");
                    TrainingStatus::Failed(err.public_message())
                }
                Err(err) => {
                    error!(%err, "Background training task failed");
                    TrainingStatus::Failed("internal error".into())
                }
            };
            *training.lock() = status;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::model::TrainOutcome;

    fn runtime() -> SimulationRuntime {
        let mut config = GridConfig::default();
        config.runtime.auto_spikes = false;
        config.runtime.tick_period_ms = 10;
        config.seed.steps = 20;
        config.model.regressor.n_estimators = 10;
        config.model.classifier.n_estimators = 10;
        SimulationRuntime::new(Arc::new(Engine::new(config).unwrap()))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let rt = runtime();
        assert!(rt.start());
        assert!(!rt.start());
        assert!(rt.is_running());
        rt.shutdown().await;
        assert!(!rt.is_running());
    }

    #[tokio::test]
    async fn test_loop_ticks() {
        let rt = runtime();
        rt.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        rt.shutdown().await;
        assert!(rt.engine().status().ticks > 0);
    }

    #[tokio::test]
    async fn test_stop_clears_pause() {
        let rt = runtime();
        rt.start();
        rt.pause();
        assert!(rt.is_paused());
        rt.stop();
        assert!(!rt.is_paused());
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_halts_loop_and_step_advances_once() {
        let rt = runtime();
        rt.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        rt.pause();
        // let any tick already in flight land
        tokio::time::sleep(Duration::from_millis(30)).await;

        let before = rt.engine().status().ticks;
        assert!(before > 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rt.engine().status().ticks, before);

        let report = rt.step();
        assert_eq!(report.tick, before + 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rt.engine().status().ticks, before + 1);

        rt.resume();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rt.engine().status().ticks > before + 1);
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let rt = runtime();
        rt.start();
        rt.stop();
        assert!(rt.start());
        rt.shutdown().await;
        assert!(!rt.is_running());
    }

    #[tokio::test]
    async fn test_background_training() {
        let rt = runtime();
        assert_eq!(rt.training_status(), TrainingStatus::Idle);
        let handle = rt.train_in_background(false).unwrap();
        assert!(rt.train_in_background(false).is_none());
        handle.await.unwrap();

        match rt.training_status() {
            TrainingStatus::Finished(report) => {
                assert_eq!(report.outcome, TrainOutcome::Trained);
                assert_eq!(report.seeded, 480);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(rt.engine().is_trained());
    }
}
