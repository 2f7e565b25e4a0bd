//! Independent runs over many initial states.
//!
//! Every run builds its own [`Simulator`](crate::simulation::Simulator) from
//! the shared, read-only [`Scenario`], so runs never touch each other's
//! state. With the `parallel` feature the runs are spread over rayon's
//! thread pool; otherwise they execute in order. Results are identical
//! either way and keep the order of the inputs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Scenario;
use crate::error::RunFailure;
use crate::simulation::Trajectory;
use crate::state::{wrap_angle, State};

/// Closed-loop run of `scenario` from each of `initial_states`.
pub fn sweep_initial_states(
    scenario: &Scenario,
    initial_states: &[State],
) -> Vec<Result<Trajectory, RunFailure>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
        initial_states
            .par_iter()
            .map(|initial| scenario.run_from(*initial))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        initial_states
            .iter()
            .map(|initial| scenario.run_from(*initial))
            .collect()
    }
}

/// `count` states drawn uniformly from `base ± spread`, component-wise.
///
/// The same `seed` always yields the same states.
#[must_use]
pub fn perturbed_initial_states(base: State, spread: State, count: usize, seed: u64) -> Vec<State> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut jitter = |width: f64| width * rng.gen_range(-1.0..=1.0);
    (0..count)
        .map(|_| {
            State::new(
                base.position + jitter(spread.position),
                base.angle + jitter(spread.angle),
                base.velocity + jitter(spread.velocity),
                base.angular_velocity + jitter(spread.angular_velocity),
            )
        })
        .collect()
}

/// Fraction of runs that completed and ended within `tolerance` of their final target.
///
/// The angle error is wrapped, so ending at −π counts as reaching a target at +π.
#[must_use]
pub fn success_rate(results: &[Result<Trajectory, RunFailure>], tolerance: f64) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let settled = results
        .iter()
        .filter(|result| {
            result
                .as_ref()
                .ok()
                .and_then(Trajectory::last)
                .is_some_and(|last| {
                    (last.state.position - last.reference.position).abs() <= tolerance
                        && wrap_angle(last.state.angle - last.reference.angle).abs() <= tolerance
                })
        })
        .count();
    settled as f64 / results.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use crate::simulation::Sample;

    fn short_scenario() -> Scenario {
        ScenarioConfig {
            t_final: 4.0,
            ..ScenarioConfig::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn perturbations_are_reproducible_and_bounded() {
        let base = State::new(0.0, 0.3, 0.0, 0.0);
        let spread = State::new(0.5, 0.1, 0.0, 0.2);
        let a = perturbed_initial_states(base, spread, 32, 7);
        let b = perturbed_initial_states(base, spread, 32, 7);
        let c = perturbed_initial_states(base, spread, 32, 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        for s in &a {
            assert!((s.position - base.position).abs() <= 0.5);
            assert!((s.angle - base.angle).abs() <= 0.1);
            assert_eq!(s.velocity, 0.0);
            assert!((s.angular_velocity - base.angular_velocity).abs() <= 0.2);
        }
    }

    #[test]
    fn sweep_matches_individual_runs() {
        let scenario = short_scenario();
        let initials = perturbed_initial_states(
            scenario.initial_state,
            State::new(0.2, 0.05, 0.0, 0.0),
            4,
            42,
        );
        let results = sweep_initial_states(&scenario, &initials);

        assert_eq!(results.len(), initials.len());
        for (initial, result) in initials.iter().zip(&results) {
            let expected = scenario.run_from(*initial).unwrap();
            assert_eq!(result.as_ref().unwrap(), &expected);
        }
    }

    #[test]
    fn empty_sweep() {
        let scenario = short_scenario();
        assert!(sweep_initial_states(&scenario, &[]).is_empty());
        assert_eq!(success_rate(&[], 0.1), 0.0);
    }

    #[test]
    fn failed_runs_do_not_count_as_settled() {
        let scenario = short_scenario();
        let initials = [scenario.initial_state, State::new(f64::NAN, 0.0, 0.0, 0.0)];
        let results = sweep_initial_states(&scenario, &initials);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(success_rate(&results, 10.0) <= 0.5);
    }

    #[test]
    fn angle_error_is_measured_across_the_wrap() {
        let mut trajectory = Trajectory::default();
        trajectory.push(Sample {
            time: 0.0,
            state: State::new(0.0, 3.1, 0.0, 0.0),
            control: 0.0,
            reference: State::new(0.0, -3.1, 0.0, 0.0),
        });
        // 3.1 and −3.1 are 2π − 6.2 ≈ 0.083 rad apart on the circle.
        assert_eq!(success_rate(&[Ok(trajectory.clone())], 0.1), 1.0);
        assert_eq!(success_rate(&[Ok(trajectory)], 0.05), 0.0);
    }
}
