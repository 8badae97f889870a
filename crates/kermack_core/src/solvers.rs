use crate::traits::{DynamicalSystem, Scalar, Steppable};

/// Explicit (forward) Euler solver: y_next = y + dt * f(t, y).
///
/// First order and conditionally stable. Large `dt` relative to the system's
/// rates can overshoot into negative or oscillating states; no step-size
/// control is performed.
pub struct Euler<T: Scalar> {
    k: Vec<T>,
}

impl<T: Scalar> Euler<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Euler<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        // k = f(t, y)
        system.apply(t0, state, &mut self.k);

        for i in 0..state.len() {
            state[i] = state[i] + dt * self.k[i];
        }

        *t = t0 + dt;
    }
}
