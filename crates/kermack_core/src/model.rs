//! The Kermack–McKendrick compartmental model.
//!
//! The population is split into susceptible (S), infected (I) and recovered (R)
//! compartments evolving under
//!
//! ```text
//! dS/dt = -beta*S*I + alpha*(S + I + R) - mu*S + f*R
//! dI/dt =  beta*S*I - gamma*I - mu*I
//! dR/dt =  gamma*I - mu*R - f*R
//! ```
//!
//! where `beta` is the infection rate, `gamma` the recovery rate, `alpha` the
//! birth rate, `mu` the death rate and `f` the immunity loss rate. With
//! `alpha = mu = f = 0` the total population is conserved.
//!
//! The derivatives are total over all real inputs. Nothing here rejects
//! negative populations or rates; validation lives in
//! [`crate::simulation::try_run`].

use crate::solvers::Euler;
use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

/// Number of compartments (S, I, R).
pub const COMPARTMENTS: usize = 3;

fn zero<T: Scalar>() -> T {
    T::zero()
}

/// Population counts of each compartment. Stored as reals; the head-count
/// Euler step keeps them integral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirState<T: Scalar> {
    pub susceptible: T,
    pub infected: T,
    #[serde(default = "zero")]
    pub recovered: T,
}

impl<T: Scalar> SirState<T> {
    /// A population with no recovered individuals yet.
    pub fn new(susceptible: T, infected: T) -> Self {
        Self {
            susceptible,
            infected,
            recovered: T::zero(),
        }
    }

    pub fn with_recovered(mut self, recovered: T) -> Self {
        self.recovered = recovered;
        self
    }

    pub fn total(&self) -> T {
        self.susceptible + self.infected + self.recovered
    }

    pub fn to_array(&self) -> [T; COMPARTMENTS] {
        [self.susceptible, self.infected, self.recovered]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Applies the discrete head-count policy to a freshly integrated state.
    ///
    /// Infected counts below half a person are zeroed (epidemic die-out), then
    /// every compartment is rounded up. Susceptible and recovered are never
    /// floored, so an unstable step can leave them negative.
    pub fn to_head_count(self) -> Self {
        let infected = if self.infected < extinction_threshold() {
            T::zero()
        } else {
            self.infected
        };
        Self {
            susceptible: self.susceptible.ceil(),
            infected: infected.ceil(),
            recovered: self.recovered.ceil(),
        }
    }
}

impl<T: Scalar> From<[T; COMPARTMENTS]> for SirState<T> {
    fn from(x: [T; COMPARTMENTS]) -> Self {
        Self {
            susceptible: x[0],
            infected: x[1],
            recovered: x[2],
        }
    }
}

/// Infected counts strictly below this value are treated as extinct.
pub fn extinction_threshold<T: Scalar>() -> T {
    T::one() / (T::one() + T::one())
}

/// Rate coefficients of the model. Only `beta` is required; the remaining
/// rates default to zero, which reduces the system to the classic SIR model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirParameters<T: Scalar> {
    /// Infection rate per susceptible-infected contact.
    pub beta: T,
    /// Recovery rate.
    #[serde(default = "zero")]
    pub gamma: T,
    /// Birth rate.
    #[serde(default = "zero")]
    pub alpha: T,
    /// Death rate.
    #[serde(default = "zero")]
    pub mu: T,
    /// Immunity loss rate.
    #[serde(default = "zero")]
    pub f: T,
}

impl<T: Scalar> SirParameters<T> {
    pub fn new(beta: T) -> Self {
        Self {
            beta,
            gamma: T::zero(),
            alpha: T::zero(),
            mu: T::zero(),
            f: T::zero(),
        }
    }

    pub fn with_gamma(mut self, gamma: T) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_alpha(mut self, alpha: T) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_mu(mut self, mu: T) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_immunity_loss(mut self, f: T) -> Self {
        self.f = f;
        self
    }

    pub fn is_finite(&self) -> bool {
        [self.beta, self.gamma, self.alpha, self.mu, self.f]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Basic reproduction number for a fully susceptible population of size
    /// `susceptible`: beta*S0 / (gamma + mu).
    ///
    /// Infinite when nobody ever leaves the infected compartment.
    pub fn basic_reproduction_number(&self, susceptible: T) -> T {
        self.beta * susceptible / (self.gamma + self.mu)
    }
}

/// dS/dt = -beta*S*I + alpha*(S + I + R) - mu*S + f*R
pub fn susceptible_derivative<T: Scalar>(state: &SirState<T>, params: &SirParameters<T>) -> T {
    let SirState {
        susceptible: s,
        infected: i,
        recovered: r,
    } = *state;
    -params.beta * s * i + params.alpha * (s + i + r) - params.mu * s + params.f * r
}

/// dI/dt = beta*S*I - gamma*I - mu*I
pub fn infected_derivative<T: Scalar>(state: &SirState<T>, params: &SirParameters<T>) -> T {
    let s = state.susceptible;
    let i = state.infected;
    params.beta * s * i - params.gamma * i - params.mu * i
}

/// dR/dt = gamma*I - mu*R - f*R
pub fn recovered_derivative<T: Scalar>(state: &SirState<T>, params: &SirParameters<T>) -> T {
    let i = state.infected;
    let r = state.recovered;
    params.gamma * i - params.mu * r - params.f * r
}

/// The SIR vector field as an autonomous [`DynamicalSystem`] over `[S, I, R]`.
#[derive(Debug, Clone, Copy)]
pub struct SirSystem<T: Scalar> {
    pub params: SirParameters<T>,
}

impl<T: Scalar> SirSystem<T> {
    pub fn new(params: SirParameters<T>) -> Self {
        Self { params }
    }
}

impl<T: Scalar> DynamicalSystem<T> for SirSystem<T> {
    fn dimension(&self) -> usize {
        COMPARTMENTS
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let state = SirState {
            susceptible: x[0],
            infected: x[1],
            recovered: x[2],
        };
        out[0] = susceptible_derivative(&state, &self.params);
        out[1] = infected_derivative(&state, &self.params);
        out[2] = recovered_derivative(&state, &self.params);
    }
}

/// Forward Euler over [`SirSystem`] followed by the head-count policy.
///
/// Reuses its derivative buffer across steps, so drivers that take many
/// steps should keep one of these around instead of calling [`euler_step`].
pub struct SirStepper<T: Scalar> {
    solver: Euler<T>,
}

impl<T: Scalar> SirStepper<T> {
    pub fn new() -> Self {
        Self {
            solver: Euler::new(COMPARTMENTS),
        }
    }

    pub fn step(&mut self, state: &SirState<T>, params: &SirParameters<T>, dt: T) -> SirState<T> {
        let system = SirSystem::new(*params);
        let mut x = state.to_array();
        let mut t = T::zero();
        self.solver.step(&system, &mut t, &mut x, dt);
        SirState::from(x).to_head_count()
    }
}

impl<T: Scalar> Default for SirStepper<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances `state` by one forward-Euler step of size `dt`, zeroing infected
/// counts below half a person and rounding every compartment up.
pub fn euler_step<T: Scalar>(state: &SirState<T>, params: &SirParameters<T>, dt: T) -> SirState<T> {
    SirStepper::new().step(state, params, dt)
}
