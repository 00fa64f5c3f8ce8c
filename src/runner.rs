// src/runner.rs - the concurrent command/sample core

use crate::actuator::{ActuatorCommand, ActuatorError, ActuatorInterface};
use crate::capture::{CapturedSeries, SampleRecord};
use crate::config::TestConfig;
use crate::trajectory::{Setpoint, TrajectoryError, TrajectoryGenerator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
    #[error("sampler task died: {0}")]
    SamplerDied(String),
}

/// Lifecycle of one test run. `Failed` and `Complete` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Homing,
    Running,
    Draining,
    Complete,
    Failed,
}

/// Single-writer/single-reader guarded cell holding the last value the
/// command loop sent to the actuator. The sampler may observe a value one
/// tick stale, never a torn one.
#[derive(Clone)]
pub struct SharedSetpoint {
    cell: Arc<RwLock<Setpoint>>,
}

impl SharedSetpoint {
    pub fn new(initial: Setpoint) -> Self {
        Self {
            cell: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn store(&self, setpoint: Setpoint) {
        *self.cell.write().await = setpoint;
    }

    pub async fn load(&self) -> Setpoint {
        *self.cell.read().await
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub series: CapturedSeries,
    /// Number of command ticks whose setpoint had to be clamped to the
    /// position limits.
    pub clamp_warnings: u32,
}

/// Orchestrates one test: configure, home, then drive the command loop and
/// the sampler concurrently against a shared epoch, and join.
pub struct TestRunner<A> {
    actuator: Arc<A>,
    config: TestConfig,
    phase: TestPhase,
}

impl<A: ActuatorInterface + 'static> TestRunner<A> {
    pub fn new(actuator: Arc<A>, config: TestConfig) -> Self {
        Self {
            actuator,
            config,
            phase: TestPhase::Idle,
        }
    }

    pub fn phase(&self) -> TestPhase {
        self.phase
    }

    fn set_phase(&mut self, next: TestPhase) {
        tracing::debug!("test phase: {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    pub async fn run(&mut self) -> Result<RunOutcome, RunError> {
        let generator = TrajectoryGenerator::new(
            &self.config.trajectory,
            self.config.start_pos,
            self.config.limits.min_pos,
            self.config.limits.max_pos,
        )?;

        self.actuator
            .configure(
                self.config.actuator_id,
                self.config.gains.kp,
                self.config.gains.kd,
                self.config.gains.max_torque,
                self.config.gains.torque_enabled,
            )
            .await?;

        self.set_phase(TestPhase::Homing);
        tracing::info!("moving to start position: {:.2}°", self.config.start_pos);
        self.actuator
            .command(&[ActuatorCommand {
                actuator_id: self.config.actuator_id,
                position: self.config.start_pos,
                velocity: None,
            }])
            .await?;
        sleep(Duration::from_secs_f64(self.config.settle_time)).await;

        let epoch = Instant::now();
        let setpoint = SharedSetpoint::new(Setpoint::hold(self.config.start_pos));
        let abort = Arc::new(AtomicBool::new(false));
        let motion_duration = generator.duration();
        let sample_duration = motion_duration + self.config.log_duration_pad;

        let sampler: JoinHandle<Result<CapturedSeries, ActuatorError>> = tokio::spawn(sample_loop(
            Arc::clone(&self.actuator),
            self.config.actuator_id,
            self.config.sample_rate,
            sample_duration,
            epoch,
            setpoint.clone(),
            Arc::clone(&abort),
        ));

        self.set_phase(TestPhase::Running);
        tracing::info!(
            "running for {:.2}s motion + {:.2}s pad",
            motion_duration,
            self.config.log_duration_pad
        );
        let clamp_warnings = match self.command_loop(&generator, epoch, &setpoint, &abort).await {
            Ok(count) => count,
            Err(err) => {
                self.set_phase(TestPhase::Failed);
                abort.store(true, Ordering::Relaxed);
                let _ = sampler.await;
                return Err(err.into());
            }
        };

        // If the sampler raised the abort flag the run is already failing;
        // only a clean command loop enters the draining pad.
        if !abort.load(Ordering::Relaxed) {
            self.set_phase(TestPhase::Draining);
        }
        let series = match sampler.await {
            Ok(Ok(series)) => series,
            Ok(Err(err)) => {
                self.set_phase(TestPhase::Failed);
                return Err(err.into());
            }
            Err(join_err) => {
                self.set_phase(TestPhase::Failed);
                return Err(RunError::SamplerDied(join_err.to_string()));
            }
        };

        self.set_phase(TestPhase::Complete);
        tracing::info!("captured {} samples", series.len());
        Ok(RunOutcome {
            series,
            clamp_warnings,
        })
    }

    async fn command_loop(
        &self,
        generator: &TrajectoryGenerator,
        epoch: Instant,
        setpoint: &SharedSetpoint,
        abort: &AtomicBool,
    ) -> Result<u32, ActuatorError> {
        let tick = 1.0 / self.config.command_rate;
        let mut clamp_warnings = 0u32;
        loop {
            // The sampler sets the flag on a fatal poll failure; its join
            // result carries the cause.
            if abort.load(Ordering::Relaxed) {
                break;
            }
            let iter_start = Instant::now();
            let t = (iter_start - epoch).as_secs_f64();
            let eval = generator.evaluate(t);
            if eval.finished {
                break;
            }
            if eval.clamped {
                clamp_warnings += 1;
                tracing::warn!(
                    "commanded position clamped to {:.2}° at t={:.2}s",
                    eval.setpoint.position,
                    t
                );
            }
            // Publish before sending, so the sampler never pairs a sent
            // command with an older setpoint.
            setpoint.store(eval.setpoint).await;
            let command = ActuatorCommand {
                actuator_id: self.config.actuator_id,
                position: eval.setpoint.position,
                velocity: eval.setpoint.velocity,
            };
            if let Err(err) = self.actuator.command(&[command]).await {
                abort.store(true, Ordering::Relaxed);
                return Err(err);
            }
            let spent = iter_start.elapsed().as_secs_f64();
            sleep(Duration::from_secs_f64((tick - spent).max(0.0))).await;
        }
        Ok(clamp_warnings)
    }
}

/// Fixed-rate poll loop. No catch-up on overrun: an iteration that takes
/// longer than one interval is followed immediately by the next sample.
async fn sample_loop<A: ActuatorInterface>(
    actuator: Arc<A>,
    actuator_id: u32,
    sample_rate: f64,
    duration: f64,
    epoch: Instant,
    setpoint: SharedSetpoint,
    abort: Arc<AtomicBool>,
) -> Result<CapturedSeries, ActuatorError> {
    let interval = 1.0 / sample_rate;
    let mut series = CapturedSeries::new();
    while (Instant::now() - epoch).as_secs_f64() < duration {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let iter_start = Instant::now();
        let state = match actuator.get_state(&[actuator_id]).await {
            Ok(states) => match states.into_iter().next() {
                Some(state) => state,
                None => {
                    abort.store(true, Ordering::Relaxed);
                    return Err(ActuatorError::Transport("empty state response".into()));
                }
            },
            Err(err) => {
                abort.store(true, Ordering::Relaxed);
                return Err(err);
            }
        };
        let commanded = setpoint.load().await;
        series.push(SampleRecord {
            time_since_start: (iter_start - epoch).as_secs_f64(),
            position: state.position,
            commanded_position: commanded.position,
            torque: Some(state.torque),
            velocity: state.velocity,
            commanded_frequency: commanded.frequency,
        });
        let spent = iter_start.elapsed().as_secs_f64();
        sleep(Duration::from_secs_f64((interval - spent).max(0.0))).await;
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_setpoint_returns_latest_store() {
        let cell = SharedSetpoint::new(Setpoint::hold(1.0));
        assert!((cell.load().await.position - 1.0).abs() < f64::EPSILON);
        cell.store(Setpoint {
            position: 2.5,
            velocity: Some(0.1),
            frequency: Some(0.4),
        })
        .await;
        let read = cell.load().await;
        assert!((read.position - 2.5).abs() < f64::EPSILON);
        assert_eq!(read.velocity, Some(0.1));
        assert_eq!(read.frequency, Some(0.4));
    }
}
