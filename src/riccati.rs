//! Continuous algebraic Riccati equation
//!
//! ```text
//! AᵗS + SA − S·B·R⁻¹·Bᵗ·S + Q = 0
//! ```
//!
//! solved for its unique stabilizing solution through the matrix sign
//! function of the Hamiltonian
//!
//! ```text
//! H = [  A   −B·R⁻¹·Bᵗ ]
//!     [ −Q      −Aᵗ    ]
//! ```
//!
//! `sign(H)` is computed with the determinant-scaled Newton iteration
//! `Z ← ½(Z/c + c·Z⁻¹)`, `c = |det Z|^(1/2n)`. Writing `W = sign(H)` in
//! n×n blocks, the stable invariant subspace is spanned by `[I; S]`, so
//! `S` solves the overdetermined system `[W12; W22 + I]·S = −[W11 + I; W21]`
//! in the least-squares sense.
//!
//! A candidate is only returned if the Hamiltonian has no imaginary-axis
//! eigenvalues (every iterate invertible), the stable subspace has graph
//! form, the residual is small, and `A − B·R⁻¹·Bᵗ·S` is Hurwitz.

use log::debug;
use nalgebra::{DMatrix, Schur};

use crate::error::{CartPoleError, Result};

/// Iteration limits and acceptance tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiccatiSettings {
    /// Newton iterations allowed for the sign function.
    pub max_iterations: usize,
    /// Relative Frobenius change that ends the sign iteration.
    pub tolerance: f64,
    /// Largest accepted relative residual of the Riccati equation.
    pub residual_tolerance: f64,
}

impl Default for RiccatiSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-13,
            residual_tolerance: 1e-8,
        }
    }
}

/// Stabilizing solution with solver diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RiccatiSolution {
    /// Symmetric positive semi-definite solution `S`.
    pub s: DMatrix<f64>,
    /// Sign-function iterations used.
    pub iterations: usize,
    /// Relative residual `‖AᵗS + SA − SGS + Q‖ / scale`.
    pub residual: f64,
}

/// Solves the CARE with default settings.
///
/// # Errors
///
/// Returns a Riccati error if the inputs violate the LQR regularity
/// conditions or no stabilizing solution exists.
pub fn solve_continuous_are(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
) -> Result<RiccatiSolution> {
    solve_continuous_are_with(a, b, q, r, &RiccatiSettings::default())
}

/// Solves the CARE with explicit settings.
///
/// # Errors
///
/// See [`solve_continuous_are`].
pub fn solve_continuous_are_with(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
    settings: &RiccatiSettings,
) -> Result<RiccatiSolution> {
    let n = a.nrows();
    let m = b.ncols();
    check_shapes(a, b, q, r)?;
    check_finite("A", a)?;
    check_finite("B", b)?;
    check_finite("Q", q)?;
    check_finite("R", r)?;
    check_symmetric("Q", q)?;
    check_symmetric("R", r)?;

    let q_min = min_symmetric_eigenvalue(q);
    if q_min < -1e-10 * (1.0 + q.norm()) {
        return Err(CartPoleError::riccati(format!(
            "Q is not positive semi-definite (smallest eigenvalue {q_min:e})"
        )));
    }
    let r_min = min_symmetric_eigenvalue(r);
    if r_min <= 0.0 {
        return Err(CartPoleError::riccati(format!(
            "R is not positive definite (smallest eigenvalue {r_min:e})"
        )));
    }
    let r_inv = r
        .clone()
        .try_inverse()
        .ok_or_else(|| CartPoleError::riccati("R is singular"))?;

    let g = b * &r_inv * b.transpose();

    let mut h = DMatrix::zeros(2 * n, 2 * n);
    h.view_mut((0, 0), (n, n)).copy_from(a);
    h.view_mut((0, n), (n, n)).copy_from(&(-&g));
    h.view_mut((n, 0), (n, n)).copy_from(&(-q));
    h.view_mut((n, n), (n, n)).copy_from(&(-a.transpose()));

    let (w, iterations) = matrix_sign(h, settings)?;
    debug!("sign iteration converged after {iterations} iterations (n = {n}, m = {m})");

    let identity = DMatrix::<f64>::identity(n, n);
    let w11 = w.view((0, 0), (n, n)).into_owned();
    let w12 = w.view((0, n), (n, n)).into_owned();
    let w21 = w.view((n, 0), (n, n)).into_owned();
    let w22 = w.view((n, n), (n, n)).into_owned();

    let mut lhs = DMatrix::zeros(2 * n, n);
    lhs.view_mut((0, 0), (n, n)).copy_from(&w12);
    lhs.view_mut((n, 0), (n, n)).copy_from(&(w22 + &identity));
    let mut rhs = DMatrix::zeros(2 * n, n);
    rhs.view_mut((0, 0), (n, n)).copy_from(&(-(w11 + &identity)));
    rhs.view_mut((n, 0), (n, n)).copy_from(&(-w21));

    let svd = lhs.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    if !(sigma_max > 0.0 && sigma_min > 1e-10 * sigma_max) {
        return Err(CartPoleError::riccati(
            "stable invariant subspace is not a graph; (A, B) is not stabilizable",
        ));
    }
    let s = svd
        .solve(&rhs, f64::EPSILON)
        .map_err(|e| CartPoleError::riccati(format!("least-squares solve failed: {e}")))?;
    let s = (&s + s.transpose()) * 0.5;

    let residual_matrix = a.transpose() * &s + &s * a - &s * &g * &s + q;
    let scale = 1.0 + q.norm() + 2.0 * a.norm() * s.norm() + g.norm() * s.norm_squared();
    let residual = residual_matrix.norm() / scale;
    if !(residual.is_finite() && residual <= settings.residual_tolerance) {
        return Err(CartPoleError::riccati(format!(
            "residual {residual:e} exceeds tolerance {:e}",
            settings.residual_tolerance
        )));
    }

    let closed_loop = a - &g * &s;
    let schur = Schur::try_new(closed_loop, f64::EPSILON, 10_000).ok_or_else(|| {
        CartPoleError::riccati("closed-loop eigenvalue computation did not converge")
    })?;
    let max_real = schur
        .complex_eigenvalues()
        .iter()
        .map(|ev| ev.re)
        .fold(f64::NEG_INFINITY, f64::max);
    if max_real >= 0.0 {
        return Err(CartPoleError::riccati(format!(
            "closed loop is not asymptotically stable (max real part {max_real:e}); \
             (A, B) is not stabilizable"
        )));
    }

    debug!("riccati residual {residual:e}, closed-loop spectral abscissa {max_real:.4}");
    Ok(RiccatiSolution {
        s,
        iterations,
        residual,
    })
}

fn matrix_sign(mut z: DMatrix<f64>, settings: &RiccatiSettings) -> Result<(DMatrix<f64>, usize)> {
    let dim = z.nrows() as f64;
    let mut previous_change = f64::INFINITY;
    for iteration in 1..=settings.max_iterations {
        let det = z.determinant();
        if !(det.is_finite() && det != 0.0) {
            return Err(CartPoleError::riccati(
                "Hamiltonian has eigenvalues on the imaginary axis",
            ));
        }
        let c = det.abs().powf(1.0 / dim);
        let z_inv = z.clone().try_inverse().ok_or_else(|| {
            CartPoleError::riccati("Hamiltonian has eigenvalues on the imaginary axis")
        })?;
        let next = (&z / c + z_inv * c) * 0.5;

        let change = (&next - &z).norm();
        let size = next.norm();
        if !change.is_finite() {
            return Err(CartPoleError::riccati("sign iteration diverged"));
        }
        z = next;
        // Quadratic convergence ends at rounding level; a change that stops shrinking there is done.
        let stalled = change <= 1e-8 * size && change >= previous_change;
        if change <= settings.tolerance * size || stalled {
            return Ok((z, iteration));
        }
        previous_change = change;
    }
    Err(CartPoleError::riccati(format!(
        "sign iteration did not converge in {} iterations",
        settings.max_iterations
    )))
}

fn check_shapes(a: &DMatrix<f64>, b: &DMatrix<f64>, q: &DMatrix<f64>, r: &DMatrix<f64>) -> Result<()> {
    let n = a.nrows();
    let m = b.ncols();
    let ok = n > 0
        && m > 0
        && a.is_square()
        && b.nrows() == n
        && q.shape() == (n, n)
        && r.shape() == (m, m);
    if ok {
        Ok(())
    } else {
        Err(CartPoleError::riccati(format!(
            "incompatible shapes: A {:?}, B {:?}, Q {:?}, R {:?}",
            a.shape(),
            b.shape(),
            q.shape(),
            r.shape()
        )))
    }
}

fn check_finite(name: &str, x: &DMatrix<f64>) -> Result<()> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CartPoleError::riccati(format!("{name} has non-finite entries")))
    }
}

fn check_symmetric(name: &str, x: &DMatrix<f64>) -> Result<()> {
    let asym = (x - x.transpose()).norm();
    if asym <= 1e-10 * (1.0 + x.norm()) {
        Ok(())
    } else {
        Err(CartPoleError::riccati(format!(
            "{name} is not symmetric (‖X − Xᵗ‖ = {asym:e})"
        )))
    }
}

fn min_symmetric_eigenvalue(x: &DMatrix<f64>) -> f64 {
    let sym = (x + x.transpose()) * 0.5;
    sym.symmetric_eigenvalues().min()
}
