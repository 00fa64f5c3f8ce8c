// src/trajectory.rs - setpoint generation for sine, step, and chirp profiles

use crate::config::{DirectionPolicy, TrajectoryConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("no step from {position}° stays within [{min_pos}°, {max_pos}°] in either direction")]
    InfeasibleStep {
        position: f64,
        min_pos: f64,
        max_pos: f64,
    },
    #[error("invalid trajectory parameters: {0}")]
    InvalidParameters(String),
}

/// One commanded value, as published to the sampler and sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub position: f64,
    pub velocity: Option<f64>,
    /// Instantaneous excitation frequency, present for chirp profiles.
    pub frequency: Option<f64>,
}

impl Setpoint {
    pub fn hold(position: f64) -> Self {
        Self {
            position,
            velocity: None,
            frequency: None,
        }
    }
}

/// Result of evaluating the generator at one instant.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub setpoint: Setpoint,
    /// The raw position fell outside the limits and was pulled back.
    pub clamped: bool,
    /// `t` has reached the profile duration.
    pub finished: bool,
}

/// One hold window of a step profile, also consumed by the metrics engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPhase {
    /// Seconds from the test epoch at which this target takes effect.
    pub onset: f64,
    pub hold: f64,
    /// Commanded position before the step.
    pub from: f64,
    pub target: f64,
}

impl StepPhase {
    pub fn size(&self) -> f64 {
        self.target - self.from
    }
}

#[derive(Debug, Clone)]
enum Profile {
    Sine {
        amplitude: f64,
        frequency: f64,
    },
    Step {
        phases: Vec<StepPhase>,
    },
    Chirp {
        amplitude: f64,
        start_freq: f64,
        sweep_rate: f64,
    },
}

/// Pure function of elapsed time. All randomness (step direction draws) is
/// resolved at construction so `evaluate` is deterministic and side-effect
/// free.
#[derive(Debug, Clone)]
pub struct TrajectoryGenerator {
    profile: Profile,
    center: f64,
    duration: f64,
    min_pos: f64,
    max_pos: f64,
}

impl TrajectoryGenerator {
    pub fn new(
        config: &TrajectoryConfig,
        start_pos: f64,
        min_pos: f64,
        max_pos: f64,
    ) -> Result<Self, TrajectoryError> {
        let (profile, duration) = match config {
            TrajectoryConfig::Sine {
                amplitude,
                frequency,
                duration,
            } => (
                Profile::Sine {
                    amplitude: *amplitude,
                    frequency: *frequency,
                },
                *duration,
            ),
            TrajectoryConfig::Chirp {
                amplitude,
                start_freq,
                end_freq,
                duration,
            } => {
                if !(*duration > 0.0) {
                    return Err(TrajectoryError::InvalidParameters(
                        "chirp duration must be positive".into(),
                    ));
                }
                (
                    Profile::Chirp {
                        amplitude: *amplitude,
                        start_freq: *start_freq,
                        sweep_rate: (end_freq - start_freq) / duration,
                    },
                    *duration,
                )
            }
            TrajectoryConfig::Step {
                size,
                hold_time,
                count,
                direction,
            } => {
                if !(*hold_time > 0.0) {
                    return Err(TrajectoryError::InvalidParameters(
                        "step hold time must be positive".into(),
                    ));
                }
                let phases = match direction {
                    DirectionPolicy::Fixed => {
                        fixed_schedule(start_pos, *size, *hold_time, *count)
                    }
                    DirectionPolicy::Random { seed } => random_schedule(
                        start_pos, *size, *hold_time, *count, *seed, min_pos, max_pos,
                    )?,
                };
                let duration = phases.len() as f64 * hold_time;
                (Profile::Step { phases }, duration)
            }
        };
        Ok(Self {
            profile,
            center: start_pos,
            duration,
            min_pos,
            max_pos,
        })
    }

    /// Total commanded-motion duration in seconds (the sampler pad is on top).
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// The precomputed hold windows of a step profile.
    pub fn step_phases(&self) -> Option<&[StepPhase]> {
        match &self.profile {
            Profile::Step { phases } => Some(phases),
            _ => None,
        }
    }

    pub fn evaluate(&self, t: f64) -> Evaluation {
        let finished = t >= self.duration;
        let raw = match &self.profile {
            Profile::Sine {
                amplitude,
                frequency,
            } => {
                let omega = 2.0 * PI * frequency;
                Setpoint {
                    position: self.center + amplitude * (omega * t).sin(),
                    velocity: Some(amplitude * omega * (omega * t).cos()),
                    frequency: None,
                }
            }
            Profile::Chirp {
                amplitude,
                start_freq,
                sweep_rate,
            } => {
                let freq = start_freq + sweep_rate * t;
                let phase = 2.0 * PI * (start_freq * t + 0.5 * sweep_rate * t * t);
                let half = amplitude / 2.0;
                Setpoint {
                    position: self.center + half * phase.sin(),
                    velocity: Some(half * 2.0 * PI * freq * phase.cos()),
                    frequency: Some(freq),
                }
            }
            Profile::Step { phases } => {
                let target = phases
                    .iter()
                    .find(|p| t >= p.onset && t < p.onset + p.hold)
                    .or(phases.last())
                    .map_or(self.center, |p| p.target);
                Setpoint::hold(target)
            }
        };
        let position = raw.position.clamp(self.min_pos, self.max_pos);
        Evaluation {
            clamped: position != raw.position,
            setpoint: Setpoint { position, ..raw },
            finished,
        }
    }
}

fn fixed_schedule(start_pos: f64, size: f64, hold_time: f64, count: u32) -> Vec<StepPhase> {
    let mut phases = Vec::with_capacity(count as usize * 2);
    let target = start_pos + size;
    for i in 0..count as usize {
        let onset = (i * 2) as f64 * hold_time;
        phases.push(StepPhase {
            onset,
            hold: hold_time,
            from: start_pos,
            target,
        });
        phases.push(StepPhase {
            onset: onset + hold_time,
            hold: hold_time,
            from: target,
            target: start_pos,
        });
    }
    phases
}

fn random_schedule(
    start_pos: f64,
    size: f64,
    hold_time: f64,
    count: u32,
    seed: u64,
    min_pos: f64,
    max_pos: f64,
) -> Result<Vec<StepPhase>, TrajectoryError> {
    let magnitude = size.abs();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut phases = Vec::with_capacity(count as usize);
    let mut current = start_pos;
    for i in 0..count as usize {
        let mut feasible = Vec::with_capacity(2);
        if current + magnitude <= max_pos {
            feasible.push(1.0);
        }
        if current - magnitude >= min_pos {
            feasible.push(-1.0);
        }
        if feasible.is_empty() {
            return Err(TrajectoryError::InfeasibleStep {
                position: current,
                min_pos,
                max_pos,
            });
        }
        let direction = feasible[rng.random_range(0..feasible.len())];
        let target = current + magnitude * direction;
        phases.push(StepPhase {
            onset: i as f64 * hold_time,
            hold: hold_time,
            from: current,
            target,
        });
        current = target;
    }
    Ok(phases)
}
