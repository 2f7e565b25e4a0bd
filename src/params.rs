//! Physical parameters of the plant and LQR cost weights.

use nalgebra::{Matrix1, Matrix4, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::{CartPoleError, Result};

/// Immutable physical description of the cart-pole.
///
/// Construct with [`PhysicalParameters::new`] to get validation; the struct
/// derives `Deserialize` for configuration files, so anything loaded that way
/// should go through [`PhysicalParameters::validate`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParameters {
    /// Cart mass `M` (kg).
    pub cart_mass: f64,
    /// Pendulum bob mass `m` (kg).
    pub pole_mass: f64,
    /// Pendulum length `l` (m).
    pub pole_length: f64,
    /// Gravitational acceleration `g` (m/s²).
    pub gravity: f64,
    /// Viscous friction on the cart `b1` (N·s/m).
    pub cart_damping: f64,
    /// Viscous friction at the pivot `b2` (N·m·s/rad).
    pub pivot_damping: f64,
}

impl Default for PhysicalParameters {
    fn default() -> Self {
        Self {
            cart_mass: 1.0,
            pole_mass: 1.0,
            pole_length: 1.0,
            gravity: 9.8,
            cart_damping: 0.1,
            pivot_damping: 0.1,
        }
    }
}

impl PhysicalParameters {
    /// Creates validated parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a mass, the length or gravity is not
    /// strictly positive, or a damping coefficient is negative.
    pub fn new(
        cart_mass: f64,
        pole_mass: f64,
        pole_length: f64,
        gravity: f64,
        cart_damping: f64,
        pivot_damping: f64,
    ) -> Result<Self> {
        let params = Self {
            cart_mass,
            pole_mass,
            pole_length,
            gravity,
            cart_damping,
            pivot_damping,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the invariants that keep the equations of motion well defined.
    ///
    /// # Errors
    ///
    /// Names the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cart_mass", self.cart_mass),
            ("pole_mass", self.pole_mass),
            ("pole_length", self.pole_length),
            ("gravity", self.gravity),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CartPoleError::configuration(
                    name,
                    format!("must be finite and positive, got {value}"),
                ));
            }
        }
        let non_negative = [
            ("cart_damping", self.cart_damping),
            ("pivot_damping", self.pivot_damping),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CartPoleError::configuration(
                    name,
                    format!("must be finite and non-negative, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

/// LQR design weights: state cost `Q` (4×4) and control cost `R` (1×1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    pub q: Matrix4<f64>,
    pub r: Matrix1<f64>,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self::diagonal(Vector4::repeat(10.0), 1.0)
    }
}

impl CostWeights {
    #[must_use]
    pub fn new(q: Matrix4<f64>, r: f64) -> Self {
        Self {
            q,
            r: Matrix1::new(r),
        }
    }

    /// `Q = diag(q_diagonal)`, `R = r`.
    #[must_use]
    pub fn diagonal(q_diagonal: Vector4<f64>, r: f64) -> Self {
        Self::new(Matrix4::from_diagonal(&q_diagonal), r)
    }

    /// Same `Q` with the control cost replaced.
    #[must_use]
    pub fn with_control_cost(mut self, r: f64) -> Self {
        self.r = Matrix1::new(r);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_reference_plant() {
        let p = PhysicalParameters::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.gravity, 9.8);
        assert_eq!(p.cart_damping, 0.1);
    }

    #[test]
    fn rejects_non_positive_mass() {
        let err = PhysicalParameters::new(0.0, 1.0, 1.0, 9.8, 0.1, 0.1).unwrap_err();
        assert!(matches!(
            err,
            CartPoleError::Configuration { ref parameter, .. } if parameter == "cart_mass"
        ));

        let err = PhysicalParameters::new(1.0, -1.0, 1.0, 9.8, 0.1, 0.1).unwrap_err();
        assert!(err.to_string().contains("pole_mass"));
    }

    #[test]
    fn rejects_zero_length_and_gravity() {
        assert!(PhysicalParameters::new(1.0, 1.0, 0.0, 9.8, 0.0, 0.0).is_err());
        assert!(PhysicalParameters::new(1.0, 1.0, 1.0, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn rejects_negative_or_nan_damping() {
        let err = PhysicalParameters::new(1.0, 1.0, 1.0, 9.8, -0.1, 0.0).unwrap_err();
        assert!(err.to_string().contains("cart_damping"));
        assert!(PhysicalParameters::new(1.0, 1.0, 1.0, 9.8, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn zero_damping_is_allowed() {
        assert!(PhysicalParameters::new(2.0, 0.5, 0.7, 9.81, 0.0, 0.0).is_ok());
    }

    #[test]
    fn diagonal_weights() {
        let w = CostWeights::diagonal(Vector4::new(1.0, 2.0, 3.0, 4.0), 0.5);
        assert_eq!(w.q[(2, 2)], 3.0);
        assert_eq!(w.q[(0, 1)], 0.0);
        assert_eq!(w.r[(0, 0)], 0.5);
        assert_eq!(w.with_control_cost(100.0).r[(0, 0)], 100.0);
    }
}
