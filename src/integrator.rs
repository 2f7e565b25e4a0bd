//! Adaptive explicit integration of the plant over one control period.
//!
//! The control force is held constant across `[t0, t1]` (zero-order hold).
//! Inside that interval the Dormand–Prince 5(4) pair sub-steps as needed to
//! meet `rtol`/`atol`; the error is measured with the RMS norm of the scaled
//! embedded estimate, and the step size follows the usual
//! `safety · err^(-1/5)` rule clamped to `[0.2, 10]`.
//!
//! One [`Integrator`] is meant to live for a whole run: it keeps its stage
//! buffers and the last accepted sub-step size, which seeds the next call.

use log::debug;
use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::dynamics::CartPoleDynamics;
use crate::error::{CartPoleError, IntegrationFailure, Result};
use crate::state::State;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const ERROR_EXPONENT: f64 = -1.0 / 5.0;

// Dormand–Prince 5(4) tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
const B: [f64; 6] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
];
// Fifth-order minus embedded fourth-order weights, last entry multiplies the FSAL stage.
const E: [f64; 7] = [
    -71.0 / 57600.0,
    0.0,
    71.0 / 16695.0,
    -71.0 / 1920.0,
    17253.0 / 339200.0,
    -22.0 / 525.0,
    1.0 / 40.0,
];

/// Tolerances and limits for the adaptive solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Sub-step budget for a single macro step.
    pub max_steps: usize,
    /// Fixed first sub-step; chosen automatically when `None`.
    pub first_step: Option<f64>,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-6,
            max_steps: 10_000,
            first_step: None,
        }
    }
}

impl IntegratorSettings {
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol.is_finite() && self.rtol >= 100.0 * f64::EPSILON) {
            return Err(CartPoleError::configuration(
                "rtol",
                format!("must be at least {:e}, got {}", 100.0 * f64::EPSILON, self.rtol),
            ));
        }
        if !(self.atol.is_finite() && self.atol >= 0.0) {
            return Err(CartPoleError::configuration(
                "atol",
                format!("must be finite and non-negative, got {}", self.atol),
            ));
        }
        if self.max_steps == 0 {
            return Err(CartPoleError::configuration("max_steps", "must be at least 1"));
        }
        if let Some(h) = self.first_step {
            if !(h.is_finite() && h > 0.0) {
                return Err(CartPoleError::configuration(
                    "first_step",
                    format!("must be finite and positive, got {h}"),
                ));
            }
        }
        Ok(())
    }
}

/// Counters for the most recent macro step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
}

/// Reusable Dormand–Prince integrator.
#[derive(Debug, Clone)]
pub struct Integrator {
    settings: IntegratorSettings,
    k: [Vector4<f64>; 7],
    last_step: Option<f64>,
    stats: StepStats,
}

impl Integrator {
    /// # Errors
    ///
    /// Returns a configuration error if the settings are invalid.
    pub fn new(settings: IntegratorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            k: [Vector4::zeros(); 7],
            last_step: None,
            stats: StepStats::default(),
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Statistics of the last call to [`Integrator::step`] or [`Integrator::integrate`].
    #[must_use]
    pub const fn stats(&self) -> StepStats {
        self.stats
    }

    /// Forget the carried-over step size, e.g. before reusing the instance for a new run.
    pub fn reset(&mut self) {
        self.last_step = None;
        self.stats = StepStats::default();
    }

    /// Advance the plant from `t0` to `t1` under a constant `force` and wrap the angle.
    ///
    /// `step_index` only labels a failure.
    ///
    /// # Errors
    ///
    /// A configuration error if `t1 < t0` or either bound is not finite, and an
    /// integration error carrying `state` and `step_index` if the solver fails.
    pub fn step(
        &mut self,
        dynamics: &CartPoleDynamics,
        state: &State,
        force: f64,
        t0: f64,
        t1: f64,
        step_index: usize,
    ) -> Result<State> {
        if !(t0.is_finite() && t1.is_finite() && t1 >= t0) {
            return Err(CartPoleError::configuration(
                "time_span",
                format!("expected finite t0 <= t1, got [{t0}, {t1}]"),
            ));
        }
        if !force.is_finite() {
            return Err(CartPoleError::integration(
                step_index,
                *state,
                IntegrationFailure::NonFinite,
            ));
        }

        let y0 = state.to_vector();
        let y1 = self
            .integrate(|_, y| dynamics.derivative_vector(y, force), &y0, t0, t1)
            .map_err(|kind| CartPoleError::integration(step_index, *state, kind))?;

        Ok(State::from_vector(&y1).wrapped())
    }

    /// Integrate `y' = f(t, y)` from `t0` to `t1`.
    ///
    /// # Errors
    ///
    /// Fails on non-finite values, an exhausted sub-step budget, or a step size
    /// that can no longer advance `t`.
    pub fn integrate<F>(
        &mut self,
        mut f: F,
        y0: &Vector4<f64>,
        t0: f64,
        t1: f64,
    ) -> std::result::Result<Vector4<f64>, IntegrationFailure>
    where
        F: FnMut(f64, &Vector4<f64>) -> Vector4<f64>,
    {
        self.stats = StepStats::default();
        if !y0.iter().all(|v| v.is_finite()) {
            return Err(IntegrationFailure::NonFinite);
        }
        let span = t1 - t0;
        if span <= 0.0 {
            return Ok(*y0);
        }

        let mut t = t0;
        let mut y = *y0;
        self.k[0] = f(t, &y);
        self.stats.evaluations += 1;
        if !is_finite(&self.k[0]) {
            return Err(IntegrationFailure::NonFinite);
        }

        let mut h = match (self.settings.first_step, self.last_step) {
            (Some(h), _) | (None, Some(h)) => h.min(span),
            (None, None) => self.initial_step(&mut f, t, &y, span),
        };

        loop {
            if self.stats.accepted + self.stats.rejected >= self.settings.max_steps {
                return Err(IntegrationFailure::MaxStepsExceeded {
                    limit: self.settings.max_steps,
                });
            }

            let min_step = 10.0 * f64::EPSILON * t.abs().max(t1.abs());
            if h < min_step {
                return Err(IntegrationFailure::StepSizeUnderflow { h });
            }

            let remaining = t1 - t;
            let clipped = h >= remaining - min_step;
            let h_try = if clipped { remaining } else { h };

            let y_new = self.try_step(&mut f, t, &y, h_try)?;
            let err = self.error_norm(&y, &y_new, h_try);
            if !err.is_finite() {
                return Err(IntegrationFailure::NonFinite);
            }

            if err <= 1.0 {
                self.stats.accepted += 1;
                y = y_new;
                self.k[0] = self.k[6];

                let factor = if err == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * err.powf(ERROR_EXPONENT)).min(MAX_FACTOR)
                };

                if clipped {
                    // A step shortened to land on t1 says little about the next interval.
                    self.last_step = Some(h.max(h_try * factor));
                    break;
                }
                t += h_try;
                h = h_try * factor;
                self.last_step = Some(h);
            } else {
                self.stats.rejected += 1;
                h = h_try * (SAFETY * err.powf(ERROR_EXPONENT)).max(MIN_FACTOR);
            }
        }

        debug!(
            "integrated [{t0:.4}, {t1:.4}]: {} accepted, {} rejected, {} evaluations",
            self.stats.accepted, self.stats.rejected, self.stats.evaluations
        );
        Ok(y)
    }

    /// One Dormand–Prince step from `(t, y)` with size `h`; stage 0 must hold `f(t, y)`.
    fn try_step<F>(
        &mut self,
        f: &mut F,
        t: f64,
        y: &Vector4<f64>,
        h: f64,
    ) -> std::result::Result<Vector4<f64>, IntegrationFailure>
    where
        F: FnMut(f64, &Vector4<f64>) -> Vector4<f64>,
    {
        for stage in 1..6 {
            let mut dy = Vector4::zeros();
            for (j, a) in A[stage].iter().take(stage).enumerate() {
                dy += self.k[j] * *a;
            }
            let ks = f(t + C[stage] * h, &(y + dy * h));
            self.stats.evaluations += 1;
            if !is_finite(&ks) {
                return Err(IntegrationFailure::NonFinite);
            }
            self.k[stage] = ks;
        }

        let mut dy = Vector4::zeros();
        for (j, b) in B.iter().enumerate() {
            dy += self.k[j] * *b;
        }
        let y_new = y + dy * h;
        if !is_finite(&y_new) {
            return Err(IntegrationFailure::NonFinite);
        }

        self.k[6] = f(t + h, &y_new);
        self.stats.evaluations += 1;
        if !is_finite(&self.k[6]) {
            return Err(IntegrationFailure::NonFinite);
        }
        Ok(y_new)
    }

    fn error_norm(&self, y: &Vector4<f64>, y_new: &Vector4<f64>, h: f64) -> f64 {
        let mut estimate = Vector4::zeros();
        for (j, e) in E.iter().enumerate() {
            estimate += self.k[j] * *e;
        }
        estimate *= h;

        let mut sum = 0.0;
        for i in 0..4 {
            let scale = self.settings.atol + self.settings.rtol * y[i].abs().max(y_new[i].abs());
            let r = estimate[i] / scale;
            sum += r * r;
        }
        (sum / 4.0).sqrt()
    }

    /// Starting sub-step from the local derivative scale (Hairer, Nørsett & Wanner, II.4).
    fn initial_step<F>(&mut self, f: &mut F, t: f64, y: &Vector4<f64>, span: f64) -> f64
    where
        F: FnMut(f64, &Vector4<f64>) -> Vector4<f64>,
    {
        let f0 = self.k[0];
        let scale = y.map(|v| self.settings.atol + v.abs() * self.settings.rtol);
        let d0 = rms(&y.component_div(&scale));
        let d1 = rms(&f0.component_div(&scale));

        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(span);

        let y1 = y + f0 * h0;
        let f1 = f(t + h0, &y1);
        self.stats.evaluations += 1;
        let d2 = rms(&(f1 - f0).component_div(&scale)) / h0;

        let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / 5.0)
        };

        let h = (100.0 * h0).min(h1).min(span);
        if h.is_finite() && h > 0.0 {
            h
        } else {
            span
        }
    }
}

fn is_finite(v: &Vector4<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn rms(v: &Vector4<f64>) -> f64 {
    (v.norm_squared() / 4.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PhysicalParameters;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn plant() -> CartPoleDynamics {
        CartPoleDynamics::new(PhysicalParameters::default()).unwrap()
    }

    fn tight() -> IntegratorSettings {
        IntegratorSettings {
            rtol: 1e-10,
            atol: 1e-12,
            ..IntegratorSettings::default()
        }
    }

    // Fixed-step classic RK4, used as an independent reference.
    fn rk4_reference(dynamics: &CartPoleDynamics, s: &State, u: f64, dt: f64, substeps: usize) -> State {
        let h = dt / substeps as f64;
        let mut y = s.to_vector();
        for _ in 0..substeps {
            let k1 = dynamics.derivative_vector(&y, u);
            let k2 = dynamics.derivative_vector(&(y + k1 * (0.5 * h)), u);
            let k3 = dynamics.derivative_vector(&(y + k2 * (0.5 * h)), u);
            let k4 = dynamics.derivative_vector(&(y + k3 * h), u);
            y += (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0);
        }
        State::from_vector(&y)
    }

    #[test]
    fn harmonic_oscillator_matches_analytic_solution() {
        let mut integrator = Integrator::new(tight()).unwrap();
        let y0 = Vector4::new(1.0, 0.0, 0.0, 1.0);
        let y = integrator
            .integrate(
                |_, y| Vector4::new(y[1], -y[0], y[3], -y[2]),
                &y0,
                0.0,
                2.0 * PI,
            )
            .unwrap();
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(y[1], 0.0, epsilon = 1e-8);
        assert_relative_eq!(y[2], 0.0, epsilon = 1e-8);
        assert_relative_eq!(y[3], 1.0, epsilon = 1e-8);
        assert!(integrator.stats().accepted > 1);
    }

    #[test]
    fn agrees_with_fine_rk4_on_plant() {
        let dynamics = plant();
        let mut integrator = Integrator::new(tight()).unwrap();
        let s = State::new(0.0, 30.0_f64.to_radians(), 0.0, 0.0);
        let dt = 20.0 / 599.0;

        let adaptive = integrator.step(&dynamics, &s, -39.0, 0.0, dt, 1).unwrap();
        let reference = rk4_reference(&dynamics, &s, -39.0, dt, 2000);

        assert_relative_eq!(adaptive.position, reference.position, epsilon = 1e-9);
        assert_relative_eq!(adaptive.angle, reference.angle, epsilon = 1e-9);
        assert_relative_eq!(adaptive.velocity, reference.velocity, epsilon = 1e-8);
        assert_relative_eq!(adaptive.angular_velocity, reference.angular_velocity, epsilon = 1e-8);
    }

    #[test]
    fn default_tolerances_are_close_to_reference() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let mut s = State::new(0.0, 0.2, 0.0, 0.0);
        let mut r = s;
        let dt = 0.05;
        for i in 0..10_u32 {
            let t0 = f64::from(i) * dt;
            s = integrator.step(&dynamics, &s, 0.0, t0, t0 + dt, i as usize + 1).unwrap();
            r = rk4_reference(&dynamics, &r, 0.0, dt, 200);
        }
        assert!((s.angle - r.angle).abs() < 1e-3);
        assert!((s.position - r.position).abs() < 1e-3);
    }

    #[test]
    fn result_angle_is_wrapped() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        // Fast spin carries the pole past π within one step.
        let s = State::new(0.0, 3.0, 0.0, 10.0);
        let next = integrator.step(&dynamics, &s, 0.0, 0.0, 0.1, 1).unwrap();
        assert!(next.angle > -PI && next.angle <= PI);
        assert!(next.angle < 0.0);
    }

    #[test]
    fn equilibrium_stays_put() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let s = State::upright_at(0.7);
        let next = integrator.step(&dynamics, &s, 0.0, 0.0, 1.0, 1).unwrap();
        assert_eq!(next, s);
    }

    #[test]
    fn zero_length_interval_returns_input() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let s = State::new(0.1, 0.2, 0.3, 0.4);
        assert_eq!(integrator.step(&dynamics, &s, 5.0, 1.0, 1.0, 3).unwrap(), s);
    }

    #[test]
    fn reversed_interval_is_configuration_error() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let err = integrator
            .step(&dynamics, &State::default(), 0.0, 1.0, 0.5, 1)
            .unwrap_err();
        assert!(matches!(err, CartPoleError::Configuration { .. }));
    }

    #[test]
    fn non_finite_force_reports_last_state() {
        let dynamics = plant();
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let s = State::new(0.0, 0.1, 0.0, 0.0);
        let err = integrator.step(&dynamics, &s, f64::NAN, 0.0, 0.1, 7).unwrap_err();
        assert_eq!(
            err,
            CartPoleError::integration(7, s, IntegrationFailure::NonFinite)
        );
    }

    #[test]
    fn blow_up_is_reported_as_non_finite() {
        let mut integrator = Integrator::new(IntegratorSettings::default()).unwrap();
        let y0 = Vector4::new(1.0, 0.0, 0.0, 0.0);
        let result = integrator.integrate(
            |_, y| Vector4::new(if y[0] > 10.0 { f64::NAN } else { y[0] * y[0] }, 0.0, 0.0, 0.0),
            &y0,
            0.0,
            2.0,
        );
        assert!(matches!(
            result,
            Err(IntegrationFailure::NonFinite | IntegrationFailure::StepSizeUnderflow { .. })
        ));
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = IntegratorSettings {
            rtol: 1e-12,
            atol: 1e-14,
            max_steps: 3,
            first_step: None,
        };
        let mut integrator = Integrator::new(settings).unwrap();
        let dynamics = plant();
        let s = State::new(0.0, 1.0, 0.0, 5.0);
        let err = integrator.step(&dynamics, &s, 0.0, 0.0, 5.0, 2).unwrap_err();
        assert!(matches!(
            err,
            CartPoleError::Integration {
                step: 2,
                kind: IntegrationFailure::MaxStepsExceeded { limit: 3 },
                ..
            }
        ));
    }

    #[test]
    fn invalid_settings_rejected() {
        let bad_rtol = IntegratorSettings {
            rtol: 0.0,
            ..IntegratorSettings::default()
        };
        assert!(Integrator::new(bad_rtol).is_err());

        let bad_first = IntegratorSettings {
            first_step: Some(-1.0),
            ..IntegratorSettings::default()
        };
        assert!(Integrator::new(bad_first).is_err());

        let no_steps = IntegratorSettings {
            max_steps: 0,
            ..IntegratorSettings::default()
        };
        assert!(Integrator::new(no_steps).is_err());
    }

    #[test]
    fn instance_is_reusable_across_steps() {
        let dynamics = plant();
        let mut shared = Integrator::new(IntegratorSettings::default()).unwrap();
        let mut s = State::new(0.0, 0.4, 0.0, 0.0);
        for i in 0..5_u32 {
            let t0 = f64::from(i) * 0.1;
            s = shared.step(&dynamics, &s, 1.0, t0, t0 + 0.1, i as usize + 1).unwrap();
        }
        assert!(s.is_finite());
        shared.reset();
        assert_eq!(shared.stats(), StepStats::default());
    }
}
