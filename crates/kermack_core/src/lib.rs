//! The `kermack_core` crate integrates the Kermack–McKendrick SIR epidemic model
//! (with optional vital dynamics and waning immunity) by forward Euler.
//! Everything is generic over `Scalar`, so the model runs in `f32` or `f64`.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `DynamicalSystem` (vector fields), `Steppable` (Solvers).
//! - **Solvers**: the fixed-step forward `Euler` integrator.
//! - **Model**: compartment state, rate parameters, the three derivatives and the head-count Euler step.
//! - **Simulation**: step-count policy, the lazy `Simulation` iterator and the `run` driver.

pub mod error;
pub mod model;
pub mod simulation;
pub mod solvers;
pub mod traits;

pub use error::SimulationError;
pub use model::{
    euler_step, infected_derivative, recovered_derivative, susceptible_derivative, SirParameters,
    SirState, SirSystem,
};
pub use simulation::{run, try_run, Integration, Simulation, SimulationSettings, Trajectory};
