// src/actuator/sim.rs - physics-backed simulated servo joints

use super::{ActuatorCommand, ActuatorError, ActuatorInterface, ActuatorState};
use crate::config::SimModelConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Integration substep cap. Keeps the explicit integrator stable even when
/// the caller polls slowly.
const MAX_STEP_S: f64 = 1e-3;

#[derive(Debug, Clone)]
struct ServoJoint {
    kp: f64,
    kd: f64,
    max_torque: f64,
    torque_enabled: bool,
    armature: f64,
    damping: f64,
    frictionloss: f64,
    frc_min: f64,
    frc_max: f64,
    position: f64,
    velocity: f64,
    torque: f64,
    cmd_position: f64,
    cmd_velocity: f64,
}

impl ServoJoint {
    fn new(model: &SimModelConfig, kp: f64, kd: f64, max_torque: f64, torque_enabled: bool) -> Self {
        Self {
            kp,
            kd,
            max_torque,
            torque_enabled,
            armature: model.armature.max(1e-6),
            damping: model.damping,
            frictionloss: model.frictionloss,
            frc_min: model.actuatorfrcrange[0],
            frc_max: model.actuatorfrcrange[1],
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
            cmd_position: 0.0,
            cmd_velocity: 0.0,
        }
    }

    /// PD drive torque with saturation, against inertia, viscous damping,
    /// and Coulomb friction. Semi-implicit Euler.
    fn integrate(&mut self, dt: f64) {
        let mut remaining = dt;
        while remaining > 0.0 {
            let h = remaining.min(MAX_STEP_S);
            let torque = if self.torque_enabled {
                let pd = self.kp * (self.cmd_position - self.position)
                    + self.kd * (self.cmd_velocity - self.velocity);
                pd.clamp(-self.max_torque, self.max_torque)
                    .clamp(self.frc_min, self.frc_max)
            } else {
                0.0
            };
            let friction = if self.velocity.abs() > 1e-9 {
                self.frictionloss * self.velocity.signum()
            } else {
                0.0
            };
            let accel = (torque - self.damping * self.velocity - friction) / self.armature;
            self.velocity += accel * h;
            self.position += self.velocity * h;
            self.torque = torque;
            remaining -= h;
        }
    }

    fn state(&self) -> ActuatorState {
        ActuatorState {
            position: self.position,
            velocity: Some(self.velocity),
            torque: self.torque,
        }
    }
}

struct SimInner {
    joints: HashMap<u32, ServoJoint>,
    last_update: Instant,
}

/// In-process servo simulation behind the same interface as a network
/// backend. Physics advance lazily on each call, against the tokio clock, so
/// paused-time tests stay deterministic.
pub struct SimActuator {
    model: SimModelConfig,
    inner: Mutex<SimInner>,
}

impl SimActuator {
    pub fn new(model: SimModelConfig) -> Self {
        Self {
            model,
            inner: Mutex::new(SimInner {
                joints: HashMap::new(),
                last_update: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimInner>, ActuatorError> {
        self.inner
            .lock()
            .map_err(|_| ActuatorError::Transport("simulator state poisoned".into()))
    }

    fn advance(inner: &mut SimInner) {
        let now = Instant::now();
        let dt = (now - inner.last_update).as_secs_f64();
        if dt > 0.0 {
            for joint in inner.joints.values_mut() {
                joint.integrate(dt);
            }
        }
        inner.last_update = now;
    }
}

#[async_trait]
impl ActuatorInterface for SimActuator {
    async fn configure(
        &self,
        actuator_id: u32,
        kp: f64,
        kd: f64,
        max_torque: f64,
        torque_enabled: bool,
    ) -> Result<(), ActuatorError> {
        let mut inner = self.lock()?;
        Self::advance(&mut inner);
        let joint = inner
            .joints
            .entry(actuator_id)
            .or_insert_with(|| ServoJoint::new(&self.model, kp, kd, max_torque, torque_enabled));
        joint.kp = kp;
        joint.kd = kd;
        joint.max_torque = max_torque;
        joint.torque_enabled = torque_enabled;
        tracing::debug!(
            "configured sim actuator {actuator_id}: kp={kp}, kd={kd}, max_torque={max_torque}"
        );
        Ok(())
    }

    async fn command(&self, entries: &[ActuatorCommand]) -> Result<(), ActuatorError> {
        let mut inner = self.lock()?;
        Self::advance(&mut inner);
        for entry in entries {
            let joint = inner
                .joints
                .get_mut(&entry.actuator_id)
                .ok_or(ActuatorError::UnknownActuator(entry.actuator_id))?;
            joint.cmd_position = entry.position;
            joint.cmd_velocity = entry.velocity.unwrap_or(0.0);
        }
        Ok(())
    }

    async fn get_state(&self, actuator_ids: &[u32]) -> Result<Vec<ActuatorState>, ActuatorError> {
        let mut inner = self.lock()?;
        Self::advance(&mut inner);
        actuator_ids
            .iter()
            .map(|id| {
                inner
                    .joints
                    .get(id)
                    .map(ServoJoint::state)
                    .ok_or(ActuatorError::UnknownActuator(*id))
            })
            .collect()
    }
}
