use thiserror::Error;

/// Rejections raised by [`crate::simulation::try_run`].
///
/// The integrator itself is total; these only exist for callers that opt
/// into validating their inputs before running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("Step size dt must be positive and finite, got {0}.")]
    InvalidTimestep(f64),
    #[error("Horizon must be non-negative and finite, got {0}.")]
    InvalidHorizon(f64),
    #[error("Initial state must be finite, got {0:?}.")]
    NonFiniteState([f64; 3]),
    #[error("Rate parameters must be finite.")]
    NonFiniteParameters,
}
