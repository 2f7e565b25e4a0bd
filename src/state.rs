//! Plant state, its time derivative, and angle wrapping.
//!
//! The pole angle is measured from the upright position: θ = 0 is balanced,
//! θ = ±π hangs straight down. The bob sits at `(p − l·sinθ, l·cosθ)`.

use std::f64::consts::PI;
use std::fmt;

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

/// Map an angle onto (−π, π].
///
/// Uses the Euclidean remainder so negative inputs never produce a jump at
/// ±π. The lower boundary −π is sent to +π, which keeps the map idempotent.
/// Angles already inside the interval are returned bit-for-bit.
#[must_use]
pub fn wrap_angle(theta: f64) -> f64 {
    if theta > -PI && theta <= PI {
        return theta;
    }
    let wrapped = (theta + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Cart-pole state `(p, θ, ṗ, θ̇)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    /// Cart position (m).
    pub position: f64,
    /// Pole angle from upright (rad).
    pub angle: f64,
    /// Cart velocity (m/s).
    pub velocity: f64,
    /// Pole angular velocity (rad/s).
    pub angular_velocity: f64,
}

impl State {
    /// Creates a state from its four components.
    #[must_use]
    pub const fn new(position: f64, angle: f64, velocity: f64, angular_velocity: f64) -> Self {
        Self {
            position,
            angle,
            velocity,
            angular_velocity,
        }
    }

    /// Cart at rest at `position` with the pole balanced upright.
    #[must_use]
    pub const fn upright_at(position: f64) -> Self {
        Self::new(position, 0.0, 0.0, 0.0)
    }

    /// Stacked column vector in `(p, θ, ṗ, θ̇)` order.
    #[must_use]
    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.position, self.angle, self.velocity, self.angular_velocity)
    }

    /// Inverse of [`State::to_vector`].
    #[must_use]
    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// Same state with the angle wrapped onto (−π, π].
    #[must_use]
    pub fn wrapped(mut self) -> Self {
        self.angle = wrap_angle(self.angle);
        self
    }

    /// Component-wise difference, used as the tracking error `self − desired`.
    #[must_use]
    pub fn error_from(&self, desired: &Self) -> Self {
        Self::new(
            self.position - desired.position,
            self.angle - desired.angle,
            self.velocity - desired.velocity,
            self.angular_velocity - desired.angular_velocity,
        )
    }

    /// True if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.angle.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
    }

    /// Position of the pendulum bob for a pole of length `length`.
    #[must_use]
    pub fn bob_position(&self, length: f64) -> (f64, f64) {
        (
            self.position - length * self.angle.sin(),
            length * self.angle.cos(),
        )
    }
}

impl From<Vector4<f64>> for State {
    fn from(v: Vector4<f64>) -> Self {
        Self::from_vector(&v)
    }
}

impl From<State> for Vector4<f64> {
    fn from(s: State) -> Self {
        s.to_vector()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x={:.4}, theta={:.4}, x_dot={:.4}, theta_dot={:.4})",
            self.position, self.angle, self.velocity, self.angular_velocity
        )
    }
}

/// Time derivative `(ṗ, θ̇, p̈, θ̈)` of a [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateDerivative {
    pub velocity: f64,
    pub angular_velocity: f64,
    pub acceleration: f64,
    pub angular_acceleration: f64,
}

impl StateDerivative {
    #[must_use]
    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(
            self.velocity,
            self.angular_velocity,
            self.acceleration,
            self.angular_acceleration,
        )
    }
}
