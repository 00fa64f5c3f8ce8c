// src/actuator/mod.rs - the actuator control boundary, transport-agnostic

use async_trait::async_trait;
use thiserror::Error;

pub mod sim;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator transport failure: {0}")]
    Transport(String),
    #[error("actuator {0} is not known to the backend")]
    UnknownActuator(u32),
    #[error("actuator {0} rejected the request: {1}")]
    Rejected(u32, String),
}

/// One entry of a `command` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommand {
    pub actuator_id: u32,
    pub position: f64,
    pub velocity: Option<f64>,
}

/// Measured joint state as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorState {
    pub position: f64,
    pub velocity: Option<f64>,
    pub torque: f64,
}

/// RPC-shaped control surface of a servo backend. The in-tree `SimActuator`
/// implements it; network transports implement it out of tree and plug into
/// the same runner.
#[async_trait]
pub trait ActuatorInterface: Send + Sync {
    async fn configure(
        &self,
        actuator_id: u32,
        kp: f64,
        kd: f64,
        max_torque: f64,
        torque_enabled: bool,
    ) -> Result<(), ActuatorError>;

    async fn command(&self, entries: &[ActuatorCommand]) -> Result<(), ActuatorError>;

    /// States are returned in the same order as the requested ids.
    async fn get_state(&self, actuator_ids: &[u32]) -> Result<Vec<ActuatorState>, ActuatorError>;
}
