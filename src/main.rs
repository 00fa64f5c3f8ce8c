// src/main.rs - servo-tune CLI: drive sine/step/chirp tests and analyze captures

use clap::{Args, Parser, Subcommand};
use servo_tune::config::ConfigError;
use servo_tune::{
    Artifact, DirectionPolicy, MetricsConfig, SimActuator, TestConfig, TestMetrics, TestMode,
    TestRunner, TrajectoryConfig, metrics,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "servo-tune", version, about = "Actuator tuning and response measurement")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML config file used as the base configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Actuator ID to test
    #[arg(long, global = true)]
    actuator_id: Option<u32>,
    /// Proportional gain
    #[arg(long, global = true)]
    kp: Option<f64>,
    /// Derivative gain
    #[arg(long, global = true)]
    kd: Option<f64>,
    /// Integral gain (recorded in the artifact, not pushed to the actuator)
    #[arg(long, global = true)]
    ki: Option<f64>,
    /// Max torque
    #[arg(long, global = true)]
    max_torque: Option<f64>,
    /// Disable torque for the test
    #[arg(long, global = true)]
    torque_off: bool,
    /// Start position (degrees)
    #[arg(long, global = true)]
    start_pos: Option<f64>,
    /// Lower position limit (degrees)
    #[arg(long, global = true)]
    min_pos: Option<f64>,
    /// Upper position limit (degrees)
    #[arg(long, global = true)]
    max_pos: Option<f64>,
    /// Data collection rate (Hz)
    #[arg(long, global = true)]
    sample_rate: Option<f64>,
    /// Pad (seconds) after motion ends to keep logging
    #[arg(long, global = true)]
    log_duration_pad: Option<f64>,
    /// Directory for capture artifacts
    #[arg(long, global = true, default_value = "captures")]
    out_dir: PathBuf,
    /// Do not write a capture artifact
    #[arg(long, global = true)]
    no_log: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a sine wave test
    Sine {
        /// Sine frequency (Hz)
        #[arg(long, default_value_t = 1.0)]
        freq: f64,
        /// Sine amplitude (degrees)
        #[arg(long, default_value_t = 5.0)]
        amp: f64,
        /// Duration (seconds)
        #[arg(long, default_value_t = 5.0)]
        duration: f64,
    },
    /// Run a step response test
    Step {
        /// Step size (degrees)
        #[arg(long, default_value_t = 10.0)]
        size: f64,
        /// Hold time per step (seconds)
        #[arg(long, default_value_t = 3.0)]
        hold_time: f64,
        /// Number of steps
        #[arg(long, default_value_t = 2)]
        count: u32,
        /// Walk random in-bounds directions instead of up/return pairs
        #[arg(long)]
        random: bool,
        /// Seed for --random direction draws
        #[arg(long, default_value_t = 43)]
        seed: u64,
    },
    /// Run a chirp test
    Chirp {
        /// Chirp amplitude (degrees)
        #[arg(long, default_value_t = 5.0)]
        amp: f64,
        /// Sweep start frequency (Hz)
        #[arg(long, default_value_t = 0.2)]
        start_freq: f64,
        /// Sweep end frequency (Hz)
        #[arg(long, default_value_t = 2.0)]
        end_freq: f64,
        /// Duration (seconds)
        #[arg(long, default_value_t = 6.0)]
        duration: f64,
    },
    /// Recompute metrics from a saved capture artifact
    Analyze {
        /// Path to a {config, data} JSON artifact
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    if let Command::Analyze { file } = &cli.command {
        let artifact = Artifact::load(file)?;
        tracing::info!(
            "loaded {} samples from {}",
            artifact.data.len(),
            file.display()
        );
        let results = metrics::analyze(&artifact.data, &artifact.config, &MetricsConfig::default())?;
        report_metrics(&results);
        return Ok(());
    }

    let config = build_config(&cli)?;
    config.validate()?;

    if config.mode == TestMode::Real {
        return Err(
            "no real-actuator transport is linked into this binary; implement ActuatorInterface \
             for your transport and drive TestRunner from your own host"
                .into(),
        );
    }

    tracing::info!(
        "running {} test on actuator {} (kp={:.2}, kd={:.2})",
        trajectory_name(&config.trajectory),
        config.actuator_id,
        config.gains.kp,
        config.gains.kd
    );

    let actuator = Arc::new(SimActuator::new(config.sim_model.clone()));
    let mut runner = TestRunner::new(actuator, config.clone());
    let outcome = runner.run().await?;
    if outcome.clamp_warnings > 0 {
        tracing::warn!(
            "{} command ticks were clamped to the position limits",
            outcome.clamp_warnings
        );
    }

    let results = metrics::analyze(&outcome.series, &config, &MetricsConfig::default())?;
    report_metrics(&results);

    if !cli.common.no_log {
        let path = Artifact::new(config, outcome.series).save(&cli.common.out_dir)?;
        tracing::info!("capture saved to {}", path.display());
    }
    Ok(())
}

fn trajectory_name(trajectory: &TrajectoryConfig) -> &'static str {
    match trajectory {
        TrajectoryConfig::Sine { .. } => "sine",
        TrajectoryConfig::Step { .. } => "step",
        TrajectoryConfig::Chirp { .. } => "chirp",
    }
}

fn build_config(cli: &Cli) -> Result<TestConfig, ConfigError> {
    let trajectory = match &cli.command {
        Command::Sine {
            freq,
            amp,
            duration,
        } => TrajectoryConfig::Sine {
            amplitude: *amp,
            frequency: *freq,
            duration: *duration,
        },
        Command::Step {
            size,
            hold_time,
            count,
            random,
            seed,
        } => TrajectoryConfig::Step {
            size: *size,
            hold_time: *hold_time,
            count: *count,
            direction: if *random {
                DirectionPolicy::Random { seed: *seed }
            } else {
                DirectionPolicy::Fixed
            },
        },
        Command::Chirp {
            amp,
            start_freq,
            end_freq,
            duration,
        } => TrajectoryConfig::Chirp {
            amplitude: *amp,
            start_freq: *start_freq,
            end_freq: *end_freq,
            duration: *duration,
        },
        Command::Analyze { .. } => {
            return Err(ConfigError::Invalid(
                "analyze does not take a test configuration".into(),
            ));
        }
    };

    let mut config = match &cli.common.config {
        Some(path) => {
            let mut loaded = TestConfig::load(path)?;
            loaded.trajectory = trajectory;
            loaded
        }
        None => TestConfig::with_trajectory(trajectory),
    };

    let common = &cli.common;
    if let Some(id) = common.actuator_id {
        config.actuator_id = id;
    }
    if let Some(kp) = common.kp {
        config.gains.kp = kp;
    }
    if let Some(kd) = common.kd {
        config.gains.kd = kd;
    }
    if let Some(ki) = common.ki {
        config.gains.ki = ki;
    }
    if let Some(max_torque) = common.max_torque {
        config.gains.max_torque = max_torque;
    }
    if common.torque_off {
        config.gains.torque_enabled = false;
    }
    if let Some(start_pos) = common.start_pos {
        config.start_pos = start_pos;
    }
    if let Some(min_pos) = common.min_pos {
        config.limits.min_pos = min_pos;
    }
    if let Some(max_pos) = common.max_pos {
        config.limits.max_pos = max_pos;
    }
    if let Some(rate) = common.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(pad) = common.log_duration_pad {
        config.log_duration_pad = pad;
    }
    Ok(config)
}

fn report_metrics(results: &TestMetrics) {
    if let Some(step) = &results.step {
        tracing::info!(
            "step metrics over {} steps: overshoot {:.1}%, rise {}, settling {}",
            step.steps.len(),
            step.overshoot_pct,
            step.rise_time
                .map_or("n/a".to_string(), |v| format!("{v:.3}s")),
            step.settling_time
                .map_or("n/a".to_string(), |v| format!("{v:.3}s")),
        );
    }
    if let Some(response) = &results.frequency_response {
        let mean_coherence =
            response.coherence.iter().sum::<f64>() / response.coherence.len().max(1) as f64;
        tracing::info!(
            "frequency response over {} bins, mean coherence {:.2}, bandwidth {}",
            response.freq.len(),
            mean_coherence,
            response
                .bandwidth
                .map_or("n/a".to_string(), |v| format!("{v:.2} Hz")),
        );
    }
    if results.step.is_none() && results.frequency_response.is_none() {
        tracing::info!("no derived metrics for this capture; time history only");
    }
}
