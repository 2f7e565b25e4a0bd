//! Closed-loop simulation: schedule, controller and integrator driven sample by sample.

use std::f64::consts::FRAC_PI_2;

use log::{debug, info, warn};
use serde::Serialize;

use crate::dynamics::CartPoleDynamics;
use crate::error::{CartPoleError, RunFailure};
use crate::grid::TimeGrid;
use crate::integrator::{Integrator, IntegratorSettings};
use crate::lqr::{Controller, OpenLoop};
use crate::params::PhysicalParameters;
use crate::schedule::ReferenceSchedule;
use crate::state::State;

/// One recorded sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub time: f64,
    /// State at `time`, angle wrapped.
    pub state: State,
    /// Force applied over the interval ending at `time` (zero for the first sample).
    pub control: f64,
    /// Target active at this sample index.
    pub reference: State,
}

/// Time-ordered record of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    samples: Vec<Sample>,
}

impl Trajectory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    #[must_use]
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.time)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> + '_ {
        self.samples.iter().map(|s| &s.state)
    }

    pub fn controls(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.control)
    }

    /// Largest `|θ|` over the run, 0 for an empty trajectory.
    #[must_use]
    pub fn max_abs_angle(&self) -> f64 {
        self.states().map(|s| s.angle.abs()).fold(0.0, f64::max)
    }

    /// Largest `|u|` over the run, 0 for an empty trajectory.
    #[must_use]
    pub fn max_abs_control(&self) -> f64 {
        self.controls().map(f64::abs).fold(0.0, f64::max)
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Owns the plant and one integrator; reusable for several sequential runs.
#[derive(Debug, Clone)]
pub struct Simulator {
    dynamics: CartPoleDynamics,
    integrator: Integrator,
}

impl Simulator {
    /// # Errors
    ///
    /// A configuration error for invalid plant parameters or integrator settings.
    pub fn new(params: PhysicalParameters, settings: IntegratorSettings) -> crate::Result<Self> {
        Ok(Self {
            dynamics: CartPoleDynamics::new(params)?,
            integrator: Integrator::new(settings)?,
        })
    }

    #[must_use]
    pub const fn dynamics(&self) -> &CartPoleDynamics {
        &self.dynamics
    }

    /// Simulate `grid.samples()` samples starting from `initial`.
    ///
    /// Sample 0 is `initial` (angle wrapped) with zero control. For each
    /// later index `i` the force `controller.control(x − target(i))` is held
    /// constant while the plant is integrated over `[t_{i−1}, t_i]`.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] with every sample recorded so far if the
    /// inputs are inconsistent or the integrator fails. Nothing is retried.
    pub fn run<C>(
        &mut self,
        controller: &C,
        schedule: &ReferenceSchedule,
        initial: State,
        grid: &TimeGrid,
    ) -> Result<Trajectory, RunFailure>
    where
        C: Controller + ?Sized,
    {
        let n = grid.samples();
        let mut trajectory = Trajectory::with_capacity(n);

        if schedule.total_samples() != n {
            return Err(RunFailure::new(
                CartPoleError::configuration(
                    "reference",
                    format!(
                        "schedule covers {} samples but the grid has {n}",
                        schedule.total_samples()
                    ),
                ),
                trajectory,
            ));
        }
        if !initial.is_finite() {
            return Err(RunFailure::new(
                CartPoleError::configuration("initial_state", format!("not finite: {initial}")),
                trajectory,
            ));
        }

        info!(
            "simulating {n} samples over {:.3} s (dt = {:.5} s) from {initial}",
            grid.t_final(),
            grid.dt()
        );
        self.integrator.reset();

        let mut current = initial.wrapped();
        let first_target = match schedule.target(0) {
            Ok(target) => *target,
            Err(err) => return Err(RunFailure::new(err, trajectory)),
        };
        trajectory.push(Sample {
            time: grid.time(0),
            state: current,
            control: 0.0,
            reference: first_target,
        });

        let mut outside_envelope = false;
        let mut accepted = 0usize;
        let mut rejected = 0usize;

        for i in 1..n {
            let desired = match schedule.target(i) {
                Ok(target) => *target,
                Err(err) => return Err(RunFailure::new(err, trajectory)),
            };
            let force = controller.control(&current.error_from(&desired));

            let t0 = grid.time(i - 1);
            let t1 = grid.time(i);
            current = match self.integrator.step(&self.dynamics, &current, force, t0, t1, i) {
                Ok(next) => next,
                Err(err) => {
                    warn!("run aborted at sample {i}: {err}");
                    return Err(RunFailure::new(err, trajectory));
                }
            };

            let stats = self.integrator.stats();
            accepted += stats.accepted;
            rejected += stats.rejected;

            let outside = current.angle.abs() > FRAC_PI_2;
            if outside && !outside_envelope {
                warn!(
                    "pole left the ±π/2 envelope at t = {t1:.3} s (θ = {:.4}); the fixed gain is only valid near upright",
                    current.angle
                );
            }
            outside_envelope = outside;

            trajectory.push(Sample {
                time: t1,
                state: current,
                control: force,
                reference: desired,
            });
        }

        debug!("integrator totals: {accepted} accepted, {rejected} rejected sub-steps");
        if let Some(last) = trajectory.last() {
            info!("run finished at t = {:.3} s in state {}", last.time, last.state);
        }

        Ok(trajectory)
    }

    /// Free response with zero force, tracked against the upright origin.
    ///
    /// # Errors
    ///
    /// See [`Simulator::run`].
    pub fn run_open_loop(&mut self, initial: State, grid: &TimeGrid) -> Result<Trajectory, RunFailure> {
        let schedule = ReferenceSchedule::constant(grid.samples(), State::default())
            .map_err(|err| RunFailure::new(err, Trajectory::default()))?;
        self.run(&OpenLoop, &schedule, initial, grid)
    }
}
