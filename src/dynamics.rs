//! Nonlinear equations of motion of the damped cart-pole.
//!
//! Closed form obtained from the Euler-Lagrange equations with generalized
//! coordinates `(p, θ)`, cart force `u`, cart friction `b1·ṗ` and pivot
//! friction `b2·θ̇`. With `D = M + m·sin²θ`:
//!
//! ```text
//! p̈ = ( −b1·l·ṗ − b2·θ̇·cosθ + ½·g·l·m·sin2θ − l²·m·θ̇²·sinθ + l·u ) / ( l·D )
//! θ̈ = ( −(M + m)·b2·θ̇ + (M + m)·g·l·m·sinθ − b1·l·m·ṗ·cosθ
//!       − ½·l²·m²·θ̇²·sin2θ + l·m·u·cosθ ) / ( l²·m·D )
//! ```
//!
//! Both denominators are strictly positive whenever `M, m, l > 0`, which
//! [`CartPoleDynamics::new`] enforces.

use nalgebra::Vector4;

use crate::error::Result;
use crate::params::PhysicalParameters;
use crate::state::{State, StateDerivative};

/// Pure evaluator of `ẋ = f(x, u)` for a fixed, validated plant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartPoleDynamics {
    params: PhysicalParameters,
}

impl CartPoleDynamics {
    /// Wraps validated parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the parameters would make a
    /// denominator vanish (non-positive mass or length) or are otherwise invalid.
    pub fn new(params: PhysicalParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    #[must_use]
    pub const fn params(&self) -> &PhysicalParameters {
        &self.params
    }

    /// State derivative under cart force `force`.
    #[must_use]
    pub fn derivative(&self, s: &State, force: f64) -> StateDerivative {
        let PhysicalParameters {
            cart_mass: big_m,
            pole_mass: m,
            pole_length: l,
            gravity: g,
            cart_damping: b1,
            pivot_damping: b2,
        } = self.params;

        let (sin_t, cos_t) = s.angle.sin_cos();
        let sin_2t = (2.0 * s.angle).sin();
        let xd = s.velocity;
        let td = s.angular_velocity;
        let td2 = td * td;

        // Shared by both accelerations; positive for M, m > 0.
        let d = big_m + m * sin_t * sin_t;

        let x_ddot = (-b1 * l * xd - b2 * td * cos_t + 0.5 * g * l * m * sin_2t
            - l * l * m * td2 * sin_t
            + l * force)
            / (l * d);

        let theta_ddot = (-(big_m + m) * b2 * td + (big_m + m) * g * l * m * sin_t
            - b1 * l * m * xd * cos_t
            - 0.5 * l * l * m * m * td2 * sin_2t
            + l * m * force * cos_t)
            / (l * l * m * d);

        StateDerivative {
            velocity: xd,
            angular_velocity: td,
            acceleration: x_ddot,
            angular_acceleration: theta_ddot,
        }
    }

    /// [`CartPoleDynamics::derivative`] on stacked vectors, for the integrator.
    #[must_use]
    pub fn derivative_vector(&self, x: &Vector4<f64>, force: f64) -> Vector4<f64> {
        self.derivative(&State::from_vector(x), force).to_vector()
    }
}
