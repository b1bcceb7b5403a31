use crate::autodiff::Dual;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the field functions.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Lifts an `f64` literal into `T`. Every `Scalar` in this crate is built on
/// `f64`, so the conversion cannot fail; NaN is returned if it ever does.
pub fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Represents a first-order ODE system dx/dt = f(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current value of the independent variable
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A fixed-step solver.
pub trait Steppable {
    /// Performs one step of signed size dt (negative steps integrate backward).
    /// t and state are updated in place.
    fn step(&mut self, system: &impl DynamicalSystem<f64>, t: &mut f64, state: &mut [f64], dt: f64);
}

/// A solver with an embedded local error estimate, driven by
/// [`crate::integrate::solve_ivp`].
pub trait AdaptiveSteppable {
    /// Order of the lower-order solution of the embedded pair; the step-size
    /// controller uses `1 / (error_order + 1)` as its exponent.
    fn error_order(&self) -> i32;

    /// Attempts one step of signed size dt from (t, state) without committing
    /// it. The candidate state is written to `out` and the local error
    /// estimate to `err`.
    fn try_step<S>(
        &mut self,
        system: &S,
        t: f64,
        state: &[f64],
        dt: f64,
        out: &mut [f64],
        err: &mut [f64],
    ) where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>;
}
