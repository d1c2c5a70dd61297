//! ═══════════════════════════════════════════════════════════════════════════════
//! THERMAL GRID — Command-Line Driver
//! ═══════════════════════════════════════════════════════════════════════════════
//! Single binary, subcommand dispatch over one engine.
//! ═══════════════════════════════════════════════════════════════════════════════

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thermal_grid::config::GridConfig;
use thermal_grid::controller::ControlMode;
use thermal_grid::engine::Engine;
use thermal_grid::events::parse_timestamp;
use thermal_grid::runtime::SimulationRuntime;
use thermal_grid::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "thermal-grid")]
#[command(about = "Thermal grid simulator with predictive cooling", long_about = None)]
struct Cli {
    /// JSON config file (overrides THERMAL_GRID_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Event log file (overrides config and THERMAL_GRID_LOG)
    #[arg(short, long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append synthetic bootstrap history to the event log
    Seed {
        /// Time steps to generate (one reading per unit per step)
        #[arg(short, long)]
        steps: Option<usize>,
    },

    /// Train the temperature and spike models
    Train {
        /// Retrain even if the log is unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Record an observed reading
    Record {
        unit: i64,
        temperature: f64,
        /// ISO-8601 timestamp (default now)
        #[arg(short, long)]
        timestamp: Option<String>,
    },

    /// Predict next readings (trains first)
    Predict {
        /// Single unit; all units when omitted
        #[arg(short, long)]
        unit: Option<i64>,
        /// ISO-8601 query time (default now)
        #[arg(short, long)]
        at: Option<String>,
    },

    /// Run the tick loop for a while
    Simulate {
        /// Wall-clock run time
        #[arg(short, long, default_value = "30")]
        seconds: u64,
        /// Control mode: standard | ai
        #[arg(short, long)]
        mode: Option<String>,
        /// Disable automatic heat spikes
        #[arg(long)]
        no_spikes: bool,
    },

    /// Print grid and model status as JSON
    Status,

    /// Print recent events as JSON lines
    History {
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },
}

fn load_config(cli: &Cli) -> Result<GridConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = GridConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => GridConfig::load()?,
    };
    if let Some(log) = &cli.log {
        config.runtime.event_log_path = Some(log.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let engine = Arc::new(Engine::new(config).context("starting engine")?);

    match cli.command {
        Commands::Seed { steps } => {
            let steps = steps.unwrap_or(engine.config().seed.steps);
            let added = engine.seed(steps)?;
            println!("Seeded {} events ({} total)", added, engine.event_count());
        }
        Commands::Train { force } => {
            let runtime = SimulationRuntime::new(engine.clone());
            let report = runtime.train(force).await?;
            println!("Training {}", report.outcome);
            if report.seeded > 0 {
                println!("  bootstrapped {} synthetic events", report.seeded);
            }
            println!("{}", serde_json::to_string_pretty(&report.metrics)?);
        }
        Commands::Record {
            unit,
            temperature,
            timestamp,
        } => {
            let timestamp = timestamp.as_deref().map(parse_timestamp).transpose()?;
            let event = engine.record_event(unit, temperature, timestamp)?;
            println!("{}", serde_json::to_string(&event)?);
        }
        Commands::Predict { unit, at } => {
            let at = at.as_deref().map(parse_timestamp).transpose()?;
            let report = engine.train(false)?;
            tracing::info!(outcome = %report.outcome, "Model ready");
            let units: Vec<i64> = match unit {
                Some(u) => vec![u],
                None => (0..engine.topology().unit_count() as i64).collect(),
            };
            for u in units {
                let p = engine.predict(u, at)?;
                println!(
                    "unit {:>3}  temp {:>6.1}°F  p(spike) {:.2}  confidence {:.2}",
                    u, p.predicted_temperature, p.spike_probability, p.confidence
                );
            }
        }
        Commands::Simulate {
            seconds,
            mode,
            no_spikes,
        } => {
            if let Some(mode) = mode {
                let mode: ControlMode = mode.parse()?;
                engine.set_mode(mode);
            }
            if no_spikes {
                engine.set_auto_spikes(false);
            }
            let runtime = SimulationRuntime::new(engine.clone());
            if engine.mode() == ControlMode::Predictive {
                runtime.train_in_background(false);
            }
            runtime.start();
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            runtime.shutdown().await;

            let status = engine.status();
            println!(
                "{} ticks, {} units cooling, {} events recorded",
                status.ticks, status.cooling_units, status.events_recorded
            );
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }
        Commands::History { limit } => {
            for event in engine.history(limit) {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}
