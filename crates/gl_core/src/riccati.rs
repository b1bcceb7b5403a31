//! Riccati form of the master equation in the tortoise coordinate r*.
//!
//! With y = ψ'/ψ the Schrödinger-type equation ψ'' = (s² − V)ψ becomes
//! `dy/dr* = −y² − (s² − V_eff)`, and the radial coordinate is carried along
//! as a second state component through `dr/dr* = f(r)`.

use crate::potential::{effective_potential, horizon_factor, Couplings};
use crate::traits::{constant, DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

/// Clipping thresholds applied inside [`RiccatiField`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiccatiGuards {
    /// Below this value of f the trajectory has reached the inner boundary
    /// and the derivative is held at zero.
    pub horizon_floor: f64,
    /// |y| above which the Riccati derivative is replaced by `saturated_slope`.
    pub saturation: f64,
    /// Magnitude of the forced derivative once |y| exceeds `saturation`.
    pub saturated_slope: f64,
}

impl Default for RiccatiGuards {
    fn default() -> Self {
        Self {
            horizon_floor: 1e-12,
            saturation: 1e5,
            saturated_slope: 1e10,
        }
    }
}

/// Field function for the state `[y, r]` at a fixed trial eigenvalue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiccatiField {
    pub s2: f64,
    pub d: f64,
    pub couplings: Couplings,
    pub guards: RiccatiGuards,
}

impl RiccatiField {
    pub fn new(s2: f64, d: f64, couplings: Couplings) -> Self {
        Self {
            s2,
            d,
            couplings,
            guards: RiccatiGuards::default(),
        }
    }

    pub fn with_guards(mut self, guards: RiccatiGuards) -> Self {
        self.guards = guards;
        self
    }
}

impl<T: Scalar> DynamicalSystem<T> for RiccatiField {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _rstar: T, x: &[T], out: &mut [T]) {
        let (y, r) = (x[0], x[1]);
        let f = horizon_factor(r, self.d);

        if f < constant(self.guards.horizon_floor) {
            out[0] = T::zero();
            out[1] = T::zero();
            return;
        }

        let potential = effective_potential(r, self.d, &self.couplings);
        out[0] = if y.abs() > constant(self.guards.saturation) {
            // Forces the stepper to shrink or give up instead of following a
            // meaningless trajectory.
            -y.signum() * constant(self.guards.saturated_slope)
        } else {
            -y * y - (constant::<T>(self.s2) - potential)
        };
        out[1] = f;
    }
}
