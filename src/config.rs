//! Test configuration shared by the CLI, the runner, and saved artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Whether the test runs against the in-tree simulator or a linked transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    #[default]
    Sim,
    Real,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Sim => write!(f, "sim"),
            TestMode::Real => write!(f, "real"),
        }
    }
}

/// Gains pushed to the actuator's local position controller. `ki` is carried
/// for record-keeping; the configure call takes only kp/kd/max_torque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default = "default_max_torque")]
    pub max_torque: f64,
    #[serde(default = "default_torque_enabled")]
    pub torque_enabled: bool,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            kd: default_kd(),
            ki: 0.0,
            max_torque: default_max_torque(),
            torque_enabled: default_torque_enabled(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default = "default_min_pos")]
    pub min_pos: f64,
    #[serde(default = "default_max_pos")]
    pub max_pos: f64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            min_pos: default_min_pos(),
            max_pos: default_max_pos(),
        }
    }
}

/// Passive joint parameters for the simulated actuator, in the units used by
/// the rest of the crate (degrees, N·m, seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimModelConfig {
    /// Reflected rotor inertia.
    #[serde(default = "default_armature")]
    pub armature: f64,
    /// Viscous damping coefficient.
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Coulomb friction torque magnitude.
    #[serde(default = "default_frictionloss")]
    pub frictionloss: f64,
    /// Hard torque range of the drive, `[min, max]`.
    #[serde(default = "default_frc_range")]
    pub actuatorfrcrange: [f64; 2],
}

impl Default for SimModelConfig {
    fn default() -> Self {
        Self {
            armature: default_armature(),
            damping: default_damping(),
            frictionloss: default_frictionloss(),
            actuatorfrcrange: default_frc_range(),
        }
    }
}

/// Direction selection for multi-step tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum DirectionPolicy {
    /// Every step applies the configured signed size, then returns to the
    /// ante-step position.
    #[default]
    Fixed,
    /// Each step walks the configured magnitude in a direction drawn
    /// uniformly from those that stay inside the position limits.
    Random {
        #[serde(default)]
        seed: u64,
    },
}

/// Motion profile of one test, tagged for the artifact header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrajectoryConfig {
    Sine {
        amplitude: f64,
        frequency: f64,
        duration: f64,
    },
    Step {
        size: f64,
        hold_time: f64,
        count: u32,
        #[serde(default)]
        direction: DirectionPolicy,
    },
    Chirp {
        amplitude: f64,
        start_freq: f64,
        end_freq: f64,
        duration: f64,
    },
}

/// Everything one test run needs, immutable once the run starts. Serialized
/// verbatim as the `config` header of a capture artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_actuator_id")]
    pub actuator_id: u32,
    #[serde(default)]
    pub mode: TestMode,
    #[serde(default)]
    pub gains: GainConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    /// Center/start position in degrees.
    #[serde(default)]
    pub start_pos: f64,
    /// Sampler poll rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Command loop rate in Hz.
    #[serde(default = "default_command_rate")]
    pub command_rate: f64,
    /// Seconds of sampling kept after the motion ends, for settling capture.
    #[serde(default = "default_log_duration_pad")]
    pub log_duration_pad: f64,
    /// Settle wait after the homing move, before the epoch is taken.
    #[serde(default = "default_settle_time")]
    pub settle_time: f64,
    #[serde(default)]
    pub sim_model: SimModelConfig,
    #[serde(default = "default_trajectory")]
    pub trajectory: TrajectoryConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            actuator_id: default_actuator_id(),
            mode: TestMode::Sim,
            gains: GainConfig::default(),
            limits: LimitConfig::default(),
            start_pos: 0.0,
            sample_rate: default_sample_rate(),
            command_rate: default_command_rate(),
            log_duration_pad: default_log_duration_pad(),
            settle_time: default_settle_time(),
            sim_model: SimModelConfig::default(),
            trajectory: default_trajectory(),
        }
    }
}

impl TestConfig {
    pub fn with_trajectory(trajectory: TrajectoryConfig) -> Self {
        Self {
            trajectory,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.command_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "command_rate must be positive, got {}",
                self.command_rate
            )));
        }
        if self.log_duration_pad < 0.0 || self.settle_time < 0.0 {
            return Err(ConfigError::Invalid(
                "log_duration_pad and settle_time must be non-negative".into(),
            ));
        }
        if self.limits.min_pos >= self.limits.max_pos {
            return Err(ConfigError::Invalid(format!(
                "position limits are empty: [{}, {}]",
                self.limits.min_pos, self.limits.max_pos
            )));
        }
        if self.start_pos < self.limits.min_pos || self.start_pos > self.limits.max_pos {
            return Err(ConfigError::Invalid(format!(
                "start position {}° is outside [{}, {}]",
                self.start_pos, self.limits.min_pos, self.limits.max_pos
            )));
        }
        match &self.trajectory {
            TrajectoryConfig::Sine {
                amplitude,
                frequency,
                duration,
            } => {
                if *frequency < 0.0 {
                    return Err(ConfigError::Invalid("sine frequency must be >= 0".into()));
                }
                if !(*duration > 0.0) || !amplitude.is_finite() {
                    return Err(ConfigError::Invalid(
                        "sine amplitude must be finite and duration positive".into(),
                    ));
                }
            }
            TrajectoryConfig::Step {
                size,
                hold_time,
                count,
                ..
            } => {
                if *size == 0.0 {
                    return Err(ConfigError::Invalid("step size must be non-zero".into()));
                }
                if !(*hold_time > 0.0) {
                    return Err(ConfigError::Invalid("step hold time must be positive".into()));
                }
                if *count == 0 {
                    return Err(ConfigError::Invalid("step count must be at least 1".into()));
                }
            }
            TrajectoryConfig::Chirp {
                amplitude,
                start_freq,
                end_freq,
                duration,
            } => {
                if *start_freq < 0.0 || *end_freq < 0.0 {
                    return Err(ConfigError::Invalid(
                        "chirp frequencies must be >= 0".into(),
                    ));
                }
                if !(*duration > 0.0) || !amplitude.is_finite() {
                    return Err(ConfigError::Invalid(
                        "chirp amplitude must be finite and duration positive".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_actuator_id() -> u32 {
    11
}
fn default_kp() -> f64 {
    85.0
}
fn default_kd() -> f64 {
    5.0
}
fn default_max_torque() -> f64 {
    60.0
}
fn default_torque_enabled() -> bool {
    true
}
fn default_min_pos() -> f64 {
    -30.0
}
fn default_max_pos() -> f64 {
    30.0
}
fn default_sample_rate() -> f64 {
    100.0
}
fn default_command_rate() -> f64 {
    100.0
}
fn default_log_duration_pad() -> f64 {
    2.0
}
fn default_settle_time() -> f64 {
    2.0
}
fn default_armature() -> f64 {
    0.05
}
fn default_damping() -> f64 {
    0.1
}
fn default_frictionloss() -> f64 {
    0.05
}
fn default_frc_range() -> [f64; 2] {
    [-60.0, 60.0]
}
fn default_trajectory() -> TrajectoryConfig {
    TrajectoryConfig::Sine {
        amplitude: 5.0,
        frequency: 1.0,
        duration: 5.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: TestConfig = toml::from_str(
            r#"
            [trajectory]
            type = "step"
            size = 12.0
            hold_time = 2.0
            count = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.actuator_id, 11);
        assert_eq!(config.mode, TestMode::Sim);
        assert!((config.sample_rate - 100.0).abs() < f64::EPSILON);
        match config.trajectory {
            TrajectoryConfig::Step {
                size,
                count,
                direction,
                ..
            } => {
                assert!((size - 12.0).abs() < f64::EPSILON);
                assert_eq!(count, 3);
                assert_eq!(direction, DirectionPolicy::Fixed);
            }
            other => panic!("unexpected trajectory: {other:?}"),
        }
        config.validate().unwrap();
    }

    #[test]
    fn random_policy_round_trips_through_toml() {
        let config: TestConfig = toml::from_str(
            r#"
            [trajectory]
            type = "step"
            size = 5.0
            hold_time = 1.0
            count = 4
            direction = { policy = "random", seed = 7 }
            "#,
        )
        .unwrap();
        match config.trajectory {
            TrajectoryConfig::Step { direction, .. } => {
                assert_eq!(direction, DirectionPolicy::Random { seed: 7 });
            }
            other => panic!("unexpected trajectory: {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_bad_limits_and_rates() {
        let mut config = TestConfig::default();
        config.limits.min_pos = 10.0;
        config.limits.max_pos = -10.0;
        assert!(config.validate().is_err());

        let mut config = TestConfig::default();
        config.sample_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = TestConfig::default();
        config.start_pos = 99.0;
        assert!(config.validate().is_err());

        let mut config = TestConfig::default();
        config.trajectory = TrajectoryConfig::Step {
            size: 0.0,
            hold_time: 1.0,
            count: 1,
            direction: DirectionPolicy::Fixed,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_names_match_artifact_convention() {
        assert_eq!(TestMode::Sim.to_string(), "sim");
        assert_eq!(TestMode::Real.to_string(), "real");
    }
}
