// servo-tune: shared library surface for the CLI binary, integration tests,
// and out-of-tree actuator transports.

pub mod actuator;
pub mod capture;
pub mod config;
pub mod metrics;
pub mod runner;
pub mod trajectory;

pub use actuator::sim::SimActuator;
pub use actuator::{ActuatorCommand, ActuatorError, ActuatorInterface, ActuatorState};
pub use capture::{Artifact, ArtifactError, CapturedSeries, SampleRecord};
pub use config::{ConfigError, DirectionPolicy, TestConfig, TestMode, TrajectoryConfig};
pub use metrics::{
    FrequencyResponse, MetricsConfig, MetricsError, StepMetrics, TestMetrics, TestStepMetrics,
};
pub use runner::{RunError, RunOutcome, SharedSetpoint, TestPhase, TestRunner};
pub use trajectory::{Evaluation, Setpoint, StepPhase, TrajectoryError, TrajectoryGenerator};
