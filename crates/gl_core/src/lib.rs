pub mod approx;
pub mod autodiff;
pub mod integrate;
pub mod potential;
pub mod riccati;
pub mod roots;
pub mod search;
pub mod shooting;
pub mod solvers;
pub mod sweep;
/// The `gl_core` crate computes the Gregory-Laflamme growth rate s²(D) by
/// shooting on the Riccati form of the perturbation master equation.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `DynamicalSystem` (field functions), `Steppable` and `AdaptiveSteppable` (solvers).
/// - **Solvers / Integrate**: RK4, Tsit5 and Rosenbrock23 steppers behind an adaptive `solve_ivp` driver.
/// - **Potential / Riccati**: the effective potential and the clipped Riccati field.
/// - **Shooting / Search**: the total residual function, the coarse scan and the Brent refinement.
/// - **Sweep**: independent searches over a range of D, run in parallel.
pub mod traits;

pub use potential::Couplings;
pub use search::{find_s2, find_s2_with, Refinement, SearchResult, SearchSettings};
pub use shooting::{shoot, RESIDUAL_SENTINEL};
