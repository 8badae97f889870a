//! Multi-step driver producing compartment time series.

use crate::error::SimulationError;
use crate::model::{SirParameters, SirState, SirStepper};
use crate::traits::Scalar;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// Default integration timestep, in days.
pub const DEFAULT_DT: f64 = 0.001;
/// Default simulated duration, in days.
pub const DEFAULT_HORIZON: f64 = 100.0;
/// Upper bound on up-front allocation when collecting a trajectory.
const MAX_PREALLOCATED_STEPS: usize = 1 << 20;

/// Which state each Euler step starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    /// Each step starts from the previous step's result.
    #[default]
    Compounding,
    /// Every step starts from the initial state, so each entry of the series
    /// is a one-step perturbation of the initial condition.
    FromInitialState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings<T: Scalar> {
    /// Timestep in days.
    pub dt: T,
    /// Total simulated duration in days.
    pub horizon: T,
    pub integration: Integration,
}

impl<T: Scalar> Default for SimulationSettings<T> {
    fn default() -> Self {
        Self {
            dt: T::literal(DEFAULT_DT),
            horizon: T::literal(DEFAULT_HORIZON),
            integration: Integration::Compounding,
        }
    }
}

impl<T: Scalar> SimulationSettings<T> {
    pub fn new(dt: T, horizon: T) -> Self {
        Self {
            dt,
            horizon,
            integration: Integration::Compounding,
        }
    }

    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integration = integration;
        self
    }

    /// Number of full `dt` intervals that fit in the horizon.
    pub fn step_count(&self) -> usize {
        step_count(self.horizon, self.dt)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.dt.is_finite() && self.dt > T::zero()) {
            return Err(SimulationError::InvalidTimestep(to_f64(self.dt)));
        }
        if !(self.horizon.is_finite() && self.horizon >= T::zero()) {
            return Err(SimulationError::InvalidHorizon(to_f64(self.horizon)));
        }
        Ok(())
    }
}

fn to_f64<T: Scalar>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Number of full intervals of length `dt` inside `[0, horizon)`.
///
/// Step markers run 0, dt, 2dt, ... and a trailing partial interval is
/// dropped, so `horizon < dt` yields zero steps. A last interval that ends
/// within a few ULPs of the horizon still counts (0.3 / 0.1 is 3 steps, not 2).
/// Non-positive or non-finite inputs yield zero steps.
pub fn step_count<T: Scalar>(horizon: T, dt: T) -> usize {
    if !(dt.is_finite() && dt > T::zero() && horizon.is_finite() && horizon > T::zero()) {
        return 0;
    }

    let whole = (horizon / dt).floor();
    let next = whole + T::one();
    let tolerance = T::epsilon() * T::literal(4.0) * horizon;
    let steps = if (next * dt - horizon).abs() <= tolerance {
        next
    } else {
        whole
    };
    steps.to_usize().unwrap_or(usize::MAX)
}

/// Lazy stream of `(time, state)` pairs, one per Euler step.
///
/// `time` is the end of the step, `(k + 1) * dt` for the k-th item.
pub struct Simulation<T: Scalar> {
    initial: SirState<T>,
    current: SirState<T>,
    params: SirParameters<T>,
    dt: T,
    integration: Integration,
    stepper: SirStepper<T>,
    taken: usize,
    total: usize,
}

impl<T: Scalar> Simulation<T> {
    pub fn new(
        initial: SirState<T>,
        params: SirParameters<T>,
        settings: &SimulationSettings<T>,
    ) -> Self {
        let total = settings.step_count();
        debug!(
            "Simulating {} steps (dt = {:?}, horizon = {:?}, {:?}) from {:?}",
            total, settings.dt, settings.horizon, settings.integration, initial
        );
        Self {
            initial,
            current: initial,
            params,
            dt: settings.dt,
            integration: settings.integration,
            stepper: SirStepper::new(),
            taken: 0,
            total,
        }
    }

    pub fn steps_taken(&self) -> usize {
        self.taken
    }

    /// State after the most recent step (the initial state before any step).
    pub fn current(&self) -> &SirState<T> {
        &self.current
    }
}

impl<T: Scalar> Iterator for Simulation<T> {
    type Item = (T, SirState<T>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.taken >= self.total {
            return None;
        }

        let basis = match self.integration {
            Integration::Compounding => &self.current,
            Integration::FromInitialState => &self.initial,
        };
        let next = self.stepper.step(basis, &self.params, self.dt);
        self.taken += 1;

        let t = T::from_usize(self.taken).map_or_else(T::nan, |k| k * self.dt);
        if next.infected == T::zero() && self.current.infected != T::zero() {
            debug!("Infected compartment went extinct at t = {:?}", t);
        }
        trace!("t = {:?}: {:?}", t, next);

        self.current = next;
        Some((t, next))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.taken;
        (remaining, Some(remaining))
    }
}

impl<T: Scalar> ExactSizeIterator for Simulation<T> {}

impl<T: Scalar> FusedIterator for Simulation<T> {}

/// Compartment time series. Entry k holds the values after step k + 1,
/// reached at `times[k]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory<T: Scalar> {
    pub times: Vec<T>,
    pub susceptible: Vec<T>,
    pub infected: Vec<T>,
    pub recovered: Vec<T>,
}

impl<T: Scalar> Trajectory<T> {
    pub fn with_capacity(steps: usize) -> Self {
        Self {
            times: Vec::with_capacity(steps),
            susceptible: Vec::with_capacity(steps),
            infected: Vec::with_capacity(steps),
            recovered: Vec::with_capacity(steps),
        }
    }

    pub fn push(&mut self, t: T, state: SirState<T>) {
        self.times.push(t);
        self.susceptible.push(state.susceptible);
        self.infected.push(state.infected);
        self.recovered.push(state.recovered);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<SirState<T>> {
        Some(SirState {
            susceptible: *self.susceptible.get(index)?,
            infected: *self.infected.get(index)?,
            recovered: *self.recovered.get(index)?,
        })
    }

    pub fn final_state(&self) -> Option<SirState<T>> {
        self.len().checked_sub(1).and_then(|last| self.state(last))
    }

    /// Time and size of the largest infected count. Ties resolve to the
    /// earliest time.
    pub fn peak_infected(&self) -> Option<(T, T)> {
        self.times
            .iter()
            .zip(&self.infected)
            .fold(None, |peak, (&t, &i)| match peak {
                Some((_, best)) if i <= best => peak,
                _ => Some((t, i)),
            })
    }

    /// Splits into the (susceptible, infected, recovered) series.
    pub fn into_series(self) -> (Vec<T>, Vec<T>, Vec<T>) {
        (self.susceptible, self.infected, self.recovered)
    }
}

impl<T: Scalar> FromIterator<(T, SirState<T>)> for Trajectory<T> {
    fn from_iter<I: IntoIterator<Item = (T, SirState<T>)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut trajectory = Self::with_capacity(iter.size_hint().0.min(MAX_PREALLOCATED_STEPS));
        for (t, state) in iter {
            trajectory.push(t, state);
        }
        trajectory
    }
}

/// Integrates the model over `settings.horizon` days and collects the
/// resulting time series.
///
/// Never fails: unstable timesteps produce negative or oscillating counts,
/// and invalid horizons or timesteps produce an empty trajectory.
pub fn run<T: Scalar>(
    initial: SirState<T>,
    params: SirParameters<T>,
    settings: &SimulationSettings<T>,
) -> Trajectory<T> {
    Simulation::new(initial, params, settings).collect()
}

/// [`run`] preceded by input validation.
pub fn try_run<T: Scalar>(
    initial: SirState<T>,
    params: SirParameters<T>,
    settings: &SimulationSettings<T>,
) -> Result<Trajectory<T>, SimulationError> {
    settings.validate()?;
    if !initial.is_finite() {
        return Err(SimulationError::NonFiniteState(
            initial.to_array().map(to_f64),
        ));
    }
    if !params.is_finite() {
        return Err(SimulationError::NonFiniteParameters);
    }
    Ok(run(initial, params, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::euler_step;
    use approx::assert_relative_eq;

    fn outbreak() -> (SirState<f64>, SirParameters<f64>) {
        (
            SirState::new(999.0, 1.0),
            SirParameters::new(0.002).with_gamma(0.1),
        )
    }

    #[test]
    fn default_settings() {
        let settings = SimulationSettings::<f64>::default();
        assert_eq!(settings.dt, 0.001);
        assert_eq!(settings.horizon, 100.0);
        assert_eq!(settings.integration, Integration::Compounding);
        assert_eq!(settings.step_count(), 100_000);
    }

    #[test]
    fn step_count_drops_partial_interval() {
        assert_eq!(step_count(5.0, 1.0), 5);
        assert_eq!(step_count(5.5, 1.0), 5);
        assert_eq!(step_count(0.5, 1.0), 0);
        assert_eq!(step_count(0.3, 0.1), 3);
        assert_eq!(step_count(3.0, 0.6), 5);
        assert_eq!(step_count(1000.8_f32, 0.5), 2001);
        assert_eq!(step_count(50_000_000.75_f64, 1.0), 50_000_000);
    }

    #[test]
    fn run_never_passes_the_horizon() {
        let trajectory = run(
            SirState::new(10.0_f32, 0.0),
            SirParameters::new(0.0),
            &SimulationSettings::new(0.5, 1000.8),
        );
        assert_eq!(trajectory.len(), 2001);
        let last = *trajectory.times.last().expect("non-empty trajectory");
        assert!(last <= 1000.8, "last step ends at {last}");
    }

    #[test]
    fn step_count_saturates_when_ratio_overflows() {
        assert_eq!(step_count(1e300, 1e-300), usize::MAX);
    }

    struct Overstated(usize);

    impl Iterator for Overstated {
        type Item = (f64, SirState<f64>);

        fn next(&mut self) -> Option<Self::Item> {
            self.0 = self.0.checked_sub(1)?;
            Some((1.0, SirState::new(1.0, 0.0)))
        }

        fn size_hint(&self) -> (usize, Option<usize>) {
            (usize::MAX, None)
        }
    }

    #[test]
    fn collecting_caps_preallocation() {
        let trajectory: Trajectory<f64> = Overstated(2).collect();
        assert_eq!(trajectory.len(), 2);
        assert!(trajectory.times.capacity() <= MAX_PREALLOCATED_STEPS);
    }

    #[test]
    fn step_count_is_zero_for_degenerate_inputs() {
        assert_eq!(step_count(0.0, 0.1), 0);
        assert_eq!(step_count(-1.0, 0.1), 0);
        assert_eq!(step_count(10.0, 0.0), 0);
        assert_eq!(step_count(10.0, -0.1), 0);
        assert_eq!(step_count(10.0, f64::NAN), 0);
        assert_eq!(step_count(f64::INFINITY, 1.0), 0);
    }

    #[test]
    fn run_series_have_one_entry_per_step() {
        let (initial, params) = outbreak();
        let trajectory = run(initial, params, &SimulationSettings::new(1.0, 5.0));

        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.times, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let (s, i, r) = trajectory.into_series();
        assert_eq!((s.len(), i.len(), r.len()), (5, 5, 5));
    }

    #[test]
    fn first_entry_matches_single_step_from_initial_state() {
        let (initial, params) = outbreak();
        let expected = euler_step(&initial, &params, 1.0);
        assert_eq!(expected, SirState::new(998.0, 3.0).with_recovered(1.0));

        for integration in [Integration::Compounding, Integration::FromInitialState] {
            let settings = SimulationSettings::new(1.0, 5.0).with_integration(integration);
            let trajectory = run(initial, params, &settings);
            assert_eq!(trajectory.state(0), Some(expected));
        }
    }

    #[test]
    fn compounding_threads_state_forward() {
        let (initial, params) = outbreak();
        let trajectory = run(initial, params, &SimulationSettings::new(1.0, 5.0));

        // (998, 3, 1) -> dS = -5.988, dI = 5.688, dR = 0.3
        assert_eq!(
            trajectory.state(1),
            Some(SirState::new(993.0, 9.0).with_recovered(2.0))
        );

        let mut previous = initial;
        for k in 0..trajectory.len() {
            let expected = euler_step(&previous, &params, 1.0);
            assert_eq!(trajectory.state(k), Some(expected));
            previous = expected;
        }
    }

    #[test]
    fn from_initial_state_repeats_the_first_step() {
        let (initial, params) = outbreak();
        let settings =
            SimulationSettings::new(1.0, 5.0).with_integration(Integration::FromInitialState);
        let trajectory = run(initial, params, &settings);

        assert_eq!(trajectory.susceptible, vec![998.0; 5]);
        assert_eq!(trajectory.infected, vec![3.0; 5]);
        assert_eq!(trajectory.recovered, vec![1.0; 5]);
    }

    #[test]
    fn horizon_shorter_than_dt_is_empty() {
        let (initial, params) = outbreak();
        let trajectory = run(initial, params, &SimulationSettings::new(1.0, 0.5));
        assert!(trajectory.is_empty());
        assert_eq!(trajectory.final_state(), None);
        let (s, i, r) = trajectory.into_series();
        assert!(s.is_empty() && i.is_empty() && r.is_empty());
    }

    #[test]
    fn extinct_epidemic_stays_extinct() {
        let initial = SirState::new(100.0, 1.0);
        let params = SirParameters::new(0.0).with_gamma(1.0);
        let trajectory = run(initial, params, &SimulationSettings::new(0.6, 3.0));

        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.infected, vec![0.0; 5]);
        assert_eq!(trajectory.recovered, vec![1.0; 5]);
        assert_eq!(trajectory.susceptible, vec![100.0; 5]);
    }

    #[test]
    fn simulation_reports_exact_size() {
        let (initial, params) = outbreak();
        let mut simulation = Simulation::new(initial, params, &SimulationSettings::new(0.5, 2.0));
        assert_eq!(simulation.len(), 4);

        let (t, state) = simulation.next().expect("first step");
        assert_relative_eq!(t, 0.5);
        assert_eq!(simulation.len(), 3);
        assert_eq!(simulation.steps_taken(), 1);
        assert_eq!(simulation.current(), &state);

        assert_eq!(simulation.by_ref().count(), 3);
        assert_eq!(simulation.next(), None);
    }

    #[test]
    fn runs_are_reproducible() {
        let initial = SirState::new(5000.0, 12.0).with_recovered(40.0);
        let params = SirParameters::new(0.0001)
            .with_gamma(0.2)
            .with_alpha(0.001)
            .with_mu(0.001)
            .with_immunity_loss(0.01);
        let settings = SimulationSettings::new(0.05, 20.0);

        assert_eq!(run(initial, params, &settings), run(initial, params, &settings));
    }

    #[test]
    fn peak_infected_picks_earliest_maximum() {
        let trajectory: Trajectory<f64> = [(1.0, 4.0), (2.0, 9.0), (3.0, 9.0), (4.0, 2.0)]
            .into_iter()
            .map(|(t, i)| (t, SirState::new(100.0 - i, i)))
            .collect();

        assert_eq!(trajectory.peak_infected(), Some((2.0, 9.0)));
        assert_eq!(
            trajectory.final_state(),
            Some(SirState::new(98.0, 2.0))
        );
        assert_eq!(Trajectory::<f64>::with_capacity(0).peak_infected(), None);
    }

    #[test]
    fn try_run_rejects_invalid_inputs() {
        let (initial, params) = outbreak();

        assert_eq!(
            try_run(initial, params, &SimulationSettings::new(0.0, 10.0)),
            Err(SimulationError::InvalidTimestep(0.0))
        );
        assert_eq!(
            try_run(initial, params, &SimulationSettings::new(0.1, -1.0)),
            Err(SimulationError::InvalidHorizon(-1.0))
        );
        assert!(matches!(
            try_run(
                SirState::new(f64::NAN, 1.0),
                params,
                &SimulationSettings::new(0.1, 1.0)
            ),
            Err(SimulationError::NonFiniteState(_))
        ));
        assert_eq!(
            try_run(
                initial,
                params.with_mu(f64::INFINITY),
                &SimulationSettings::new(0.1, 1.0)
            ),
            Err(SimulationError::NonFiniteParameters)
        );
    }

    #[test]
    fn try_run_matches_run_for_valid_inputs() {
        let (initial, params) = outbreak();
        let settings = SimulationSettings::new(0.25, 4.0);
        assert_eq!(try_run(initial, params, &settings), Ok(run(initial, params, &settings)));
    }

    #[test]
    fn error_messages_name_the_offending_input() {
        let message = SimulationError::InvalidTimestep(-0.5).to_string();
        assert!(message.contains("dt"), "unexpected message \"{message}\"");
        assert!(message.contains("-0.5"));
    }
}
