//! Rigid-body dynamics for one vehicle.
//!
//! Integration is semi-implicit Euler: position advances with the velocity of
//! the previous tick before velocity picks up this tick's acceleration, and
//! the angular state follows the same order.
//!
//! Forces do not persist between ticks. `acceleration` and
//! `angular_acceleration` are accumulators that [`RigidBody::integrate`]
//! resets; the standing engine force is re-applied at the start of each step.
//!
//! The drive (`engine_force`, `force_point`) is expressed in world
//! coordinates but is rotated with the body every tick, so it stays fixed in
//! the body's own frame.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    math::{MathError, Vec2},
    net::{Signal, Snapshot, Throttle},
};

/// Multiplicative throttle step applied by [`RigidBody::accelerate`] and
/// [`RigidBody::decelerate`].
pub const THROTTLE_STEP: f64 = 0.1;

/// Half-width of the band the angle is kept in: `[-ANGLE_LIMIT, ANGLE_LIMIT]`.
pub const ANGLE_LIMIT: f64 = TAU;

/// Invalid parameters or a step that would leave the body non-finite.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PhysicsError {
    #[error("mass must be positive and finite, got {0}")]
    NonPositiveMass(f64),
    #[error("{name} must be positive and finite, got {value}")]
    InvalidDimension { name: &'static str, value: f64 },
    #[error("timestep must be non-negative and finite, got {0}")]
    InvalidTimestep(f64),
    #[error("non-finite {0}")]
    NonFinite(&'static str),
}

/// Construction parameters of a body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyParams {
    pub mass: f64,
    pub height: f64,
    pub width: f64,
    /// Standing drive force, re-applied every tick.
    pub engine_force: Vec2,
    /// Where the drive force acts, relative to the center of mass.
    pub force_point: Vec2,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass: 4500.0,
            height: 8.0,
            width: 4.0,
            engine_force: Vec2::new(0.0, 1000.0),
            force_point: Vec2::new(0.0, 4.0),
        }
    }
}

impl BodyParams {
    pub fn validate(&self) -> Result<(), PhysicsError> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(PhysicsError::NonPositiveMass(self.mass));
        }
        for (name, value) in [("height", self.height), ("width", self.width)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PhysicsError::InvalidDimension { name, value });
            }
        }
        if !self.engine_force.is_finite() {
            return Err(PhysicsError::NonFinite("engine force"));
        }
        if !self.force_point.is_finite() {
            return Err(PhysicsError::NonFinite("force point"));
        }
        Ok(())
    }

    /// `mass * (height^2 + width^2) / 12`, a solid rectangle about its center.
    pub fn moment_of_inertia(&self) -> f64 {
        self.mass * (self.height * self.height + self.width * self.width) / 12.0
    }
}

/// What one [`RigidBody::integrate`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Linear acceleration accumulated for the tick, before the reset.
    pub acceleration: Vec2,
    /// Angular acceleration accumulated for the tick, before the reset.
    pub angular_acceleration: f64,
    /// Change of `angle` during the tick (before wrapping).
    pub delta_angle: f64,
}

/// One simulated vehicle.
#[derive(Debug, Clone)]
pub struct RigidBody {
    position: Vec2,
    velocity: Vec2,
    acceleration: Vec2,

    angle: f64,
    angular_velocity: f64,
    angular_acceleration: f64,

    mass: f64,
    height: f64,
    width: f64,
    moment_of_inertia: f64,

    engine_force: Vec2,
    force_point: Vec2,
}

impl RigidBody {
    /// Creates a body at rest at `position`.
    pub fn new(position: Vec2, params: BodyParams) -> Result<Self, PhysicsError> {
        params.validate()?;
        if !position.is_finite() {
            return Err(PhysicsError::NonFinite("position"));
        }
        Ok(Self {
            position,
            velocity: Vec2::ZERO,
            acceleration: Vec2::ZERO,
            angle: 0.0,
            angular_velocity: 0.0,
            angular_acceleration: 0.0,
            mass: params.mass,
            height: params.height,
            width: params.width,
            moment_of_inertia: params.moment_of_inertia(),
            engine_force: params.engine_force,
            force_point: params.force_point,
        })
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn acceleration(&self) -> Vec2 {
        self.acceleration
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }

    pub fn angular_acceleration(&self) -> f64 {
        self.angular_acceleration
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn moment_of_inertia(&self) -> f64 {
        self.moment_of_inertia
    }

    pub fn engine_force(&self) -> Vec2 {
        self.engine_force
    }

    pub fn force_point(&self) -> Vec2 {
        self.force_point
    }

    /// Unit direction of the drive force.
    pub fn heading(&self) -> Result<Vec2, MathError> {
        self.engine_force.normalize()
    }

    /// Accumulates `force` applied at `point` (offset from the center of mass)
    /// for the current tick.
    pub fn apply_force(&mut self, force: Vec2, point: Vec2) {
        let torque = point.cross(force);
        self.acceleration = self.acceleration + force.scale(1.0 / self.mass);
        self.angular_acceleration += torque / self.moment_of_inertia;
    }

    /// Advances the body by `dt` seconds.
    ///
    /// On error the body is left exactly as it was.
    pub fn integrate(&mut self, dt: f64) -> Result<StepReport, PhysicsError> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(PhysicsError::InvalidTimestep(dt));
        }

        let mut next = self.clone();
        next.apply_force(next.engine_force, next.force_point);

        next.position = next.position + next.velocity.scale(dt);
        next.velocity = next.velocity + next.acceleration.scale(dt);

        let delta_angle = next.angular_velocity * dt;
        next.angle += delta_angle;
        next.angular_velocity += next.angular_acceleration * dt;

        if next.angle.abs() > ANGLE_LIMIT {
            // Whole turns only; the remainder keeps the sign of the angle.
            next.angle %= TAU;
        }
        next.engine_force = next.engine_force.rotate(delta_angle);
        next.force_point = next.force_point.rotate(delta_angle);

        let report = StepReport {
            acceleration: next.acceleration,
            angular_acceleration: next.angular_acceleration,
            delta_angle,
        };
        next.acceleration = Vec2::ZERO;
        next.angular_acceleration = 0.0;

        next.check_finite()?;
        *self = next;
        Ok(report)
    }

    fn check_finite(&self) -> Result<(), PhysicsError> {
        if !self.position.is_finite() {
            return Err(PhysicsError::NonFinite("position"));
        }
        if !self.velocity.is_finite() {
            return Err(PhysicsError::NonFinite("velocity"));
        }
        if !(self.angle.is_finite() && self.angular_velocity.is_finite()) {
            return Err(PhysicsError::NonFinite("angular state"));
        }
        if !(self.engine_force.is_finite() && self.force_point.is_finite()) {
            return Err(PhysicsError::NonFinite("drive"));
        }
        Ok(())
    }

    /// Scales the drive force up by [`THROTTLE_STEP`].
    pub fn accelerate(&mut self) {
        self.engine_force = self.engine_force.scale(1.0 + THROTTLE_STEP);
    }

    /// Scales the drive force down by [`THROTTLE_STEP`].
    pub fn decelerate(&mut self) {
        self.engine_force = self.engine_force.scale(1.0 - THROTTLE_STEP);
    }

    /// Turns the drive force by `radians` relative to the body.
    pub fn steer(&mut self, radians: f64) -> Result<(), PhysicsError> {
        if !radians.is_finite() {
            return Err(PhysicsError::NonFinite("steering angle"));
        }
        self.engine_force = self.engine_force.rotate(radians);
        Ok(())
    }

    /// Applies an inbound control signal; takes effect on the next step.
    pub fn apply_signal(&mut self, signal: &Signal) -> Result<(), PhysicsError> {
        self.steer(signal.angle)?;
        match signal.throttle {
            Some(Throttle::Accelerate) => self.accelerate(),
            Some(Throttle::Decelerate) => self.decelerate(),
            None => {}
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            x: self.position.x,
            y: self.position.y,
            angle: self.angle,
            engine_force: Some(self.engine_force),
            force_point: Some(self.force_point),
        }
    }
}
