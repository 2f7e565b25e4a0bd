//! Serializable scenario description and its validated, ready-to-run form.

use std::fs;
use std::path::Path;

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::error::{CartPoleError, RunFailure, Result};
use crate::grid::TimeGrid;
use crate::integrator::IntegratorSettings;
use crate::linearize::LinearModel;
use crate::lqr::LqrController;
use crate::params::{CostWeights, PhysicalParameters};
use crate::schedule::{ReferenceSchedule, Segment};
use crate::simulation::{Simulator, Trajectory};
use crate::state::State;

/// Diagonal state cost and scalar control cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeightsConfig {
    pub q_diagonal: [f64; 4],
    pub r: f64,
}

impl Default for CostWeightsConfig {
    fn default() -> Self {
        Self {
            q_diagonal: [10.0; 4],
            r: 1.0,
        }
    }
}

impl From<CostWeightsConfig> for CostWeights {
    fn from(config: CostWeightsConfig) -> Self {
        Self::diagonal(Vector4::from(config.q_diagonal), config.r)
    }
}

/// One reference segment. Without `samples` the segment takes an equal share
/// of whatever the explicit segments leave over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub target: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
}

impl SegmentConfig {
    #[must_use]
    pub const fn shared(target: State) -> Self {
        Self {
            target,
            samples: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub plant: PhysicalParameters,
    pub weights: CostWeightsConfig,
    pub initial_state: State,
    pub reference: Vec<SegmentConfig>,
    pub t_final: f64,
    pub sample_rate: f64,
    pub integrator: IntegratorSettings,
}

impl Default for ScenarioConfig {
    /// Unit plant starting 30° off upright, tracking x = 1 then x = −0.5 over 20 s.
    fn default() -> Self {
        Self {
            plant: PhysicalParameters::default(),
            weights: CostWeightsConfig::default(),
            initial_state: State::new(0.0, 30.0_f64.to_radians(), 0.0, 0.0),
            reference: vec![
                SegmentConfig::shared(State::upright_at(1.0)),
                SegmentConfig::shared(State::upright_at(-0.5)),
            ],
            t_final: 20.0,
            sample_rate: 30.0,
            integrator: IntegratorSettings::default(),
        }
    }
}

impl ScenarioConfig {
    /// # Errors
    ///
    /// A configuration error if the file cannot be read or is not valid JSON
    /// for this schema.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            CartPoleError::configuration("config_file", format!("{}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// # Errors
    ///
    /// A configuration error naming the line and column of the first problem.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| {
            CartPoleError::configuration(
                "config_file",
                format!("line {} column {}: {err}", err.line(), err.column()),
            )
        })
    }

    /// # Errors
    ///
    /// A configuration error if a value cannot be represented in JSON (e.g. NaN).
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| CartPoleError::configuration("config", err.to_string()))
    }

    /// Resolve `None` segment lengths against the grid size.
    ///
    /// # Errors
    ///
    /// A configuration error if the explicit lengths already exceed
    /// `total_samples` or leave samples over with no shared segment to absorb them.
    pub fn resolve_reference(&self, total_samples: usize) -> Result<ReferenceSchedule> {
        let explicit = self
            .reference
            .iter()
            .filter_map(|s| s.samples)
            .try_fold(0usize, usize::checked_add)
            .ok_or_else(|| {
                CartPoleError::configuration("reference", "explicit segment lengths overflow")
            })?;
        let shared = self.reference.iter().filter(|s| s.samples.is_none()).count();

        let remaining = total_samples.checked_sub(explicit).ok_or_else(|| {
            CartPoleError::configuration(
                "reference",
                format!("explicit segments need {explicit} samples, grid has {total_samples}"),
            )
        })?;

        let share = if shared == 0 { 0 } else { remaining / shared };
        let mut leftover = if shared == 0 { 0 } else { remaining % shared };
        let last_shared = self.reference.iter().rposition(|s| s.samples.is_none());

        let segments = self
            .reference
            .iter()
            .enumerate()
            .map(|(k, s)| {
                let samples = s.samples.unwrap_or_else(|| {
                    if Some(k) == last_shared {
                        share + std::mem::take(&mut leftover)
                    } else {
                        share
                    }
                });
                Segment {
                    target: s.target,
                    samples,
                }
            })
            .collect();

        ReferenceSchedule::new(segments, total_samples)
    }

    /// Validate every part and synthesize the controller.
    ///
    /// # Errors
    ///
    /// The first configuration or Riccati error encountered.
    pub fn build(&self) -> Result<Scenario> {
        self.plant.validate()?;
        self.integrator.validate()?;
        if !self.initial_state.is_finite() {
            return Err(CartPoleError::configuration(
                "initial_state",
                format!("not finite: {}", self.initial_state),
            ));
        }

        let grid = TimeGrid::from_duration(self.t_final, self.sample_rate)?;
        let schedule = self.resolve_reference(grid.samples())?;
        let model = LinearModel::upright(&self.plant)?;
        let controller = LqrController::synthesize(&model, &self.weights.into())?;

        Ok(Scenario {
            plant: self.plant,
            controller,
            schedule,
            grid,
            initial_state: self.initial_state,
            integrator: self.integrator,
        })
    }
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub plant: PhysicalParameters,
    pub controller: LqrController,
    pub schedule: ReferenceSchedule,
    pub grid: TimeGrid,
    pub initial_state: State,
    pub integrator: IntegratorSettings,
}

impl Scenario {
    /// # Errors
    ///
    /// Only if the stored parameters were modified into an invalid state.
    pub fn simulator(&self) -> Result<Simulator> {
        Simulator::new(self.plant, self.integrator)
    }

    /// Closed-loop run from the configured initial state.
    ///
    /// # Errors
    ///
    /// See [`Simulator::run`].
    pub fn run(&self) -> std::result::Result<Trajectory, RunFailure> {
        self.run_from(self.initial_state)
    }

    /// Closed-loop run from another initial state, same everything else.
    ///
    /// # Errors
    ///
    /// See [`Simulator::run`].
    pub fn run_from(&self, initial: State) -> std::result::Result<Trajectory, RunFailure> {
        let mut simulator = self
            .simulator()
            .map_err(|err| RunFailure::new(err, Trajectory::default()))?;
        simulator.run(&self.controller, &self.schedule, initial, &self.grid)
    }

    /// Zero-force run from the configured initial state.
    ///
    /// # Errors
    ///
    /// See [`Simulator::run`].
    pub fn run_open_loop(&self) -> std::result::Result<Trajectory, RunFailure> {
        let mut simulator = self
            .simulator()
            .map_err(|err| RunFailure::new(err, Trajectory::default()))?;
        simulator.run_open_loop(self.initial_state, &self.grid)
    }
}
