//! Error types for the cart-pole core.

use thiserror::Error;

use crate::simulation::Trajectory;
use crate::state::State;

/// Why an integrator step was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IntegrationFailure {
    /// A stage, the error estimate or the result contained NaN or Inf.
    #[error("state became non-finite")]
    NonFinite,

    /// The adaptive controller needed more sub-steps than allowed.
    #[error("exceeded {limit} sub-steps")]
    MaxStepsExceeded {
        /// Configured sub-step limit.
        limit: usize,
    },

    /// The step size shrank below floating point resolution of `t`.
    #[error("step size {h:e} underflowed")]
    StepSizeUnderflow {
        /// Rejected step size.
        h: f64,
    },
}

/// Errors surfaced by the cart-pole core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CartPoleError {
    /// Invalid physical parameters, schedule, time grid or lookup.
    #[error("configuration error in `{parameter}`: {reason}")]
    Configuration {
        /// Name of the offending parameter.
        parameter: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No stabilizing solution of the continuous algebraic Riccati equation.
    #[error("riccati solve failed: {reason}")]
    RiccatiSolve {
        /// Why the solve was rejected.
        reason: String,
    },

    /// The plant could not be advanced over a macro step.
    #[error("integration failed at step {step}: {kind} (last valid state {last_state})")]
    Integration {
        /// Macro step index (1-based, matching the trajectory sample index).
        step: usize,
        /// State at the start of the failed step.
        last_state: State,
        /// Failure detail.
        kind: IntegrationFailure,
    },
}

impl CartPoleError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Riccati solve error.
    #[must_use]
    pub fn riccati(reason: impl Into<String>) -> Self {
        Self::RiccatiSolve {
            reason: reason.into(),
        }
    }

    /// Creates an integration error.
    #[must_use]
    pub const fn integration(step: usize, last_state: State, kind: IntegrationFailure) -> Self {
        Self::Integration {
            step,
            last_state,
            kind,
        }
    }

    /// Short name of the component that raised the error.
    #[must_use]
    pub const fn component(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::RiccatiSolve { .. } => "riccati solver",
            Self::Integration { .. } => "integrator",
        }
    }
}

/// A simulation run that aborted, together with everything recorded before the failure.
#[derive(Debug, Error)]
#[error("simulation aborted after {} samples", partial.len())]
pub struct RunFailure {
    /// The error that stopped the run.
    #[source]
    pub error: CartPoleError,
    /// Samples recorded before the failure (may be empty).
    pub partial: Trajectory,
}

impl RunFailure {
    pub(crate) fn new(error: CartPoleError, partial: Trajectory) -> Self {
        Self { error, partial }
    }
}

/// Result type for cart-pole operations.
pub type Result<T> = std::result::Result<T, CartPoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_parameter() {
        let err = CartPoleError::configuration("cart_mass", "must be positive, got 0");
        let msg = err.to_string();
        assert!(msg.contains("cart_mass"));
        assert!(msg.contains("must be positive"));
        assert_eq!(err.component(), "configuration");
    }

    #[test]
    fn integration_error_reports_step_and_state() {
        let last = State::new(0.5, 0.1, 0.0, 0.0);
        let err = CartPoleError::integration(42, last, IntegrationFailure::NonFinite);
        let msg = err.to_string();
        assert!(msg.contains("step 42"));
        assert!(msg.contains("non-finite"));
        assert_eq!(err.component(), "integrator");
    }

    #[test]
    fn max_steps_failure_mentions_limit() {
        let kind = IntegrationFailure::MaxStepsExceeded { limit: 10 };
        assert!(kind.to_string().contains("10"));
    }

    #[test]
    fn run_failure_exposes_source() {
        use std::error::Error as _;

        let failure = RunFailure::new(CartPoleError::riccati("not stabilizable"), Trajectory::default());
        assert!(failure.to_string().contains("0 samples"));
        let source = failure.source().map(ToString::to_string).unwrap_or_default();
        assert!(source.contains("not stabilizable"));
    }
}
