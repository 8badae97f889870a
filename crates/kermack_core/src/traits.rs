use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as population counts and rates.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Converts an f64 constant, yielding NaN if the type cannot represent it.
    fn literal(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A continuous-time vector field dx/dt = f(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A fixed-step solver that advances a system in place.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
