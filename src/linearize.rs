//! Closed-form linearization about the upright, resting equilibrium.

use nalgebra::{Matrix4, Vector4};

use crate::error::Result;
use crate::params::PhysicalParameters;

/// `ẋ ≈ A·x + B·u` about `x = (p, 0, 0, 0)`, `u = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearModel {
    pub a: Matrix4<f64>,
    pub b: Vector4<f64>,
}

impl LinearModel {
    /// Jacobians of the equations of motion at the upright equilibrium.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid parameters.
    pub fn upright(params: &PhysicalParameters) -> Result<Self> {
        params.validate()?;
        let PhysicalParameters {
            cart_mass: big_m,
            pole_mass: m,
            pole_length: l,
            gravity: g,
            cart_damping: b1,
            pivot_damping: b2,
        } = *params;

        #[rustfmt::skip]
        let a = Matrix4::new(
            0.0, 0.0,                        1.0,               0.0,
            0.0, 0.0,                        0.0,               1.0,
            0.0, g * m / big_m,              -b1 / big_m,       -b2 / (big_m * l),
            0.0, g * (big_m + m) / (big_m * l), -b1 / (big_m * l), -b2 * (big_m + m) / (big_m * l * l * m),
        );
        let b = Vector4::new(0.0, 0.0, 1.0 / big_m, 1.0 / (big_m * l));

        Ok(Self { a, b })
    }
}
