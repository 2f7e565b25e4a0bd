//! State-feedback control laws.
//!
//! [`LqrController`] solves the Riccati equation once at synthesis and then
//! evaluates `u = −R⁻¹·Bᵗ·S·e` for every tracking error `e`. The gain is only
//! locally valid around the linearization point; nothing re-linearizes it as
//! the nonlinear state moves away.

use log::info;
use nalgebra::{Complex, DMatrix, Matrix1, Matrix4, RowVector4, Schur};

use crate::error::{CartPoleError, Result};
use crate::linearize::LinearModel;
use crate::params::CostWeights;
use crate::riccati::{solve_continuous_are_with, RiccatiSettings};
use crate::state::State;

/// Maps a tracking error `current − desired` to a cart force.
pub trait Controller {
    fn control(&self, error: &State) -> f64;
}

/// Zero force regardless of error: the plant's natural behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenLoop;

impl Controller for OpenLoop {
    fn control(&self, _error: &State) -> f64 {
        0.0
    }
}

/// Fixed-gain linear-quadratic regulator.
#[derive(Debug, Clone, PartialEq)]
pub struct LqrController {
    model: LinearModel,
    weights: CostWeights,
    s: Matrix4<f64>,
    // K = R⁻¹·Bᵗ·S, cached so evaluation is a dot product.
    gain: RowVector4<f64>,
}

impl LqrController {
    /// Solve the Riccati equation for `(A, B, Q, R)` and cache the result.
    ///
    /// # Errors
    ///
    /// Returns a Riccati error if no stabilizing solution exists or the
    /// weights are not positive (semi-)definite.
    pub fn synthesize(model: &LinearModel, weights: &CostWeights) -> Result<Self> {
        Self::synthesize_with(model, weights, &RiccatiSettings::default())
    }

    /// [`LqrController::synthesize`] with explicit solver settings.
    ///
    /// # Errors
    ///
    /// See [`LqrController::synthesize`].
    pub fn synthesize_with(
        model: &LinearModel,
        weights: &CostWeights,
        settings: &RiccatiSettings,
    ) -> Result<Self> {
        let a = DMatrix::from_iterator(4, 4, model.a.iter().copied());
        let b = DMatrix::from_iterator(4, 1, model.b.iter().copied());
        let q = DMatrix::from_iterator(4, 4, weights.q.iter().copied());
        let r = DMatrix::from_iterator(1, 1, weights.r.iter().copied());

        let solution = solve_continuous_are_with(&a, &b, &q, &r, settings)?;
        let s = Matrix4::from_iterator(solution.s.iter().copied());

        let r_inv: Matrix1<f64> = weights
            .r
            .try_inverse()
            .ok_or_else(|| CartPoleError::riccati("R is singular"))?;
        let gain: RowVector4<f64> = r_inv * model.b.transpose() * s;

        info!(
            "LQR synthesized in {} iterations, gain K = [{:.4}, {:.4}, {:.4}, {:.4}]",
            solution.iterations, gain[0], gain[1], gain[2], gain[3]
        );

        Ok(Self {
            model: *model,
            weights: *weights,
            s,
            gain,
        })
    }

    /// Riccati solution `S`.
    #[must_use]
    pub const fn riccati_solution(&self) -> &Matrix4<f64> {
        &self.s
    }

    /// Feedback gain `K`, so that `u = −K·e`.
    #[must_use]
    pub const fn gain(&self) -> &RowVector4<f64> {
        &self.gain
    }

    #[must_use]
    pub const fn model(&self) -> &LinearModel {
        &self.model
    }

    #[must_use]
    pub const fn weights(&self) -> &CostWeights {
        &self.weights
    }

    /// `u = −R⁻¹·Bᵗ·S·e`.
    #[must_use]
    pub fn evaluate(&self, error: &State) -> f64 {
        -(self.gain * error.to_vector())[0]
    }

    /// Eigenvalues of `A − B·K`, the linearized closed loop.
    ///
    /// `None` if the Schur decomposition does not converge.
    #[must_use]
    pub fn closed_loop_eigenvalues(&self) -> Option<Vec<Complex<f64>>> {
        let closed_loop = self.model.a - self.model.b * self.gain;
        Schur::try_new(closed_loop, f64::EPSILON, 10_000)
            .map(|schur| schur.complex_eigenvalues().iter().copied().collect())
    }
}

impl Controller for LqrController {
    fn control(&self, error: &State) -> f64 {
        self.evaluate(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PhysicalParameters;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn synthesize_diagonal(model: &LinearModel, q_diagonal: Vector4<f64>, r: f64) -> Result<LqrController> {
        LqrController::synthesize(model, &CostWeights::diagonal(q_diagonal, r))
    }

    fn reference_controller(r: f64) -> LqrController {
        let model = LinearModel::upright(&PhysicalParameters::default()).unwrap();
        synthesize_diagonal(&model, Vector4::repeat(10.0), r).unwrap()
    }

    #[test]
    fn reference_gain() {
        let lqr = reference_controller(1.0);
        let k = lqr.gain();
        // The cart-position entry is fixed by Q and R alone: K₀ = −√(q₀/r).
        assert_relative_eq!(k[0], -10.0_f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(k[1], 69.120_07, epsilon = 1e-3);
        assert_relative_eq!(k[2], -6.578_30, epsilon = 1e-3);
        assert_relative_eq!(k[3], 18.553_89, epsilon = 1e-3);
    }

    #[test]
    fn riccati_solution_is_symmetric() {
        let lqr = reference_controller(1.0);
        let s = lqr.riccati_solution();
        assert!((s - s.transpose()).norm() < 1e-10);
        assert!(s.symmetric_eigenvalues().min() > 0.0);
    }

    #[test]
    fn closed_loop_is_hurwitz() {
        let lqr = reference_controller(1.0);
        let eigenvalues = lqr.closed_loop_eigenvalues().unwrap();
        assert_eq!(eigenvalues.len(), 4);
        assert!(eigenvalues.iter().all(|ev| ev.re < 0.0));
    }

    #[test]
    fn zero_error_gives_zero_force() {
        let lqr = reference_controller(1.0);
        assert_eq!(lqr.evaluate(&State::default()), 0.0);
    }

    #[test]
    fn evaluate_is_linear_in_error() {
        let lqr = reference_controller(1.0);
        let e = State::new(0.3, -0.1, 0.2, 0.05);
        let doubled = State::new(0.6, -0.2, 0.4, 0.1);
        assert_relative_eq!(lqr.evaluate(&doubled), 2.0 * lqr.evaluate(&e), epsilon = 1e-12);
        assert_eq!(lqr.control(&e), lqr.evaluate(&e));
    }

    #[test]
    fn positive_tilt_pushes_cart_under_pole() {
        let lqr = reference_controller(1.0);
        let u = lqr.evaluate(&State::new(0.0, 0.1, 0.0, 0.0));
        assert!(u < 0.0);
    }

    #[test]
    fn larger_control_cost_reduces_effort() {
        let cheap = reference_controller(1.0);
        let expensive = reference_controller(1000.0);
        for e in [
            State::new(1.0, 0.0, 0.0, 0.0),
            State::new(0.0, 0.1, 0.0, 0.0),
            State::new(-1.5, 0.2, 0.0, 0.0),
        ] {
            assert!(
                expensive.evaluate(&e).abs() < cheap.evaluate(&e).abs(),
                "error {e}"
            );
        }
    }

    #[test]
    fn invalid_weights_fail_synthesis() {
        let model = LinearModel::upright(&PhysicalParameters::default()).unwrap();
        assert!(synthesize_diagonal(&model, Vector4::repeat(10.0), 0.0).is_err());
        assert!(synthesize_diagonal(&model, Vector4::new(1.0, -1.0, 1.0, 1.0), 1.0).is_err());
    }

    #[test]
    fn uncontrollable_model_fails_synthesis() {
        let mut model = LinearModel::upright(&PhysicalParameters::default()).unwrap();
        model.b = Vector4::zeros();
        let err = LqrController::synthesize(&model, &CostWeights::default()).unwrap_err();
        assert!(matches!(err, CartPoleError::RiccatiSolve { .. }));
    }

    #[test]
    fn open_loop_is_always_zero() {
        assert_eq!(OpenLoop.control(&State::new(5.0, 1.0, -2.0, 3.0)), 0.0);
    }
}
