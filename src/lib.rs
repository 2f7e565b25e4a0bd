//! Nonlinear cart-pole plant stabilized by a linear-quadratic regulator.
//!
//! The pipeline is linear and one-directional:
//!
//! 1. [`LinearModel::upright`] linearizes the plant about the balanced equilibrium.
//! 2. [`LqrController::synthesize`] solves the continuous algebraic Riccati
//!    equation once and caches the feedback gain.
//! 3. [`Simulator::run`] walks a [`TimeGrid`]: the [`ReferenceSchedule`] gives
//!    the target, the controller turns the tracking error into a force, and the
//!    adaptive [`Integrator`] advances the nonlinear [`CartPoleDynamics`] with
//!    that force held constant, wrapping the pole angle onto (−π, π].
//!
//! [`ScenarioConfig`] bundles all inputs in a serde-friendly form.
//!
//! ```no_run
//! use cartpole_lqr::ScenarioConfig;
//!
//! let scenario = ScenarioConfig::default().build()?;
//! let trajectory = scenario.run()?;
//! println!("{} samples, final state {}", trajectory.len(), trajectory.samples()[599].state);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod batch;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod linearize;
pub mod lqr;
pub mod params;
pub mod riccati;
pub mod schedule;
pub mod simulation;
pub mod state;

pub use config::{Scenario, ScenarioConfig};
pub use dynamics::CartPoleDynamics;
pub use error::{CartPoleError, IntegrationFailure, Result, RunFailure};
pub use grid::TimeGrid;
pub use integrator::{Integrator, IntegratorSettings};
pub use linearize::LinearModel;
pub use lqr::{Controller, LqrController, OpenLoop};
pub use params::{CostWeights, PhysicalParameters};
pub use schedule::{ReferenceSchedule, Segment};
pub use simulation::{Sample, Simulator, Trajectory};
pub use state::{wrap_angle, State, StateDerivative};
