//! Eigenvalue search for one value of D.
//!
//! The search runs in three stages. An analytic guess centres a uniform
//! coarse scan of the shooting residual. The scan minimiser then seeds a
//! Brent refinement on the signed terminal Riccati value. Every stage
//! degrades to the previous one instead of failing, so a search always
//! produces an estimate; [`SearchResult::refinement`] records how far it got.

use crate::approx::analytic_s2;
use crate::integrate::{IntegratorSettings, Method};
use crate::potential::Couplings;
use crate::roots::{brent, RootSettings};
use crate::shooting::{residual, terminal_value, ShootingGeometry};
use crate::sweep::linspace;
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Coarse-scan window, resolution and integrator for one regime of D.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Half-width of the scan around the analytic guess.
    pub window: f64,
    pub points: usize,
    pub integrator: IntegratorSettings,
    /// Half-width of the refinement bracket around the scan minimiser.
    pub refine: f64,
}

impl ScanSettings {
    pub fn near_branch() -> Self {
        Self {
            window: 3.5,
            points: 51,
            integrator: IntegratorSettings::with_method(Method::Rosenbrock23),
            refine: 2.0,
        }
    }

    pub fn far_from_branch() -> Self {
        Self {
            window: 8.0,
            points: 31,
            integrator: IntegratorSettings::with_method(Method::Tsit5),
            refine: 3.0,
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        if !(self.window > 0.0) || !self.window.is_finite() {
            bail!("{label} scan window must be positive and finite, got {}.", self.window);
        }
        if self.points == 0 {
            bail!("{label} scan needs at least one point.");
        }
        if !(self.refine > 0.0) || !self.refine.is_finite() {
            bail!("{label} refinement half-width must be positive and finite, got {}.", self.refine);
        }
        if let Err(err) = self.integrator.validate() {
            bail!("{label} scan: {err}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// |D − 4| below which the near-branch scan is used.
    pub branch_distance: f64,
    pub near: ScanSettings,
    pub far: ScanSettings,
    pub root: RootSettings,
    pub geometry: ShootingGeometry,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            branch_distance: 0.2,
            near: ScanSettings::near_branch(),
            far: ScanSettings::far_from_branch(),
            root: RootSettings::default(),
            geometry: ShootingGeometry::default(),
        }
    }
}

impl SearchSettings {
    pub fn scan_for(&self, d: f64) -> &ScanSettings {
        if (d - 4.0).abs() < self.branch_distance {
            &self.near
        } else {
            &self.far
        }
    }

    /// Uses `integrator` in both regimes.
    pub fn with_integrator(mut self, integrator: IntegratorSettings) -> Self {
        self.near.integrator = integrator;
        self.far.integrator = integrator;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.branch_distance >= 0.0) {
            bail!("Branch distance must be non-negative, got {}.", self.branch_distance);
        }
        self.near.validate("Near-branch")?;
        self.far.validate("Far-from-branch")?;
        if !(self.root.xtol > 0.0) || self.root.max_iter == 0 {
            bail!("Root tolerance must be positive and max_iter non-zero.");
        }
        Ok(())
    }
}

/// Outcome of the refinement stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Refinement {
    /// Brent converged and its root was kept, or the coarse scan already hit
    /// an exact zero (`iterations == 0`).
    Converged { iterations: usize },
    /// Brent ran out of iterations; the coarse minimiser was kept.
    NotConverged { last: f64, iterations: usize },
    /// Brent converged on a point whose residual is worse than the coarse
    /// minimum (a pole of the Riccati variable); the coarse minimiser was kept.
    Rejected { root: f64, residual: f64 },
    /// The bracket could not be used at all.
    Unavailable { reason: String },
}

impl Refinement {
    pub fn label(&self) -> &'static str {
        match self {
            Refinement::Converged { .. } => "converged",
            Refinement::NotConverged { .. } => "not converged",
            Refinement::Rejected { .. } => "rejected",
            Refinement::Unavailable { .. } => "unavailable",
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Refinement::Converged { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub d: f64,
    /// Analytic starting estimate.
    pub guess: f64,
    /// Coarse-scan minimiser and its residual.
    pub coarse: f64,
    pub coarse_residual: f64,
    /// Final estimate of s² and its residual.
    pub s2: f64,
    pub residual: f64,
    pub method: Method,
    pub refinement: Refinement,
}

/// Best estimate of s²(D) with default settings.
pub fn find_s2(d: f64, couplings: &Couplings) -> f64 {
    find_s2_with(d, couplings, &SearchSettings::default()).s2
}

pub fn find_s2_with(d: f64, couplings: &Couplings, settings: &SearchSettings) -> SearchResult {
    let scan = settings.scan_for(d);
    let geometry = &settings.geometry;
    let guess = analytic_s2(d, couplings);

    let grid = linspace(guess - scan.window, guess + scan.window, scan.points.max(1));
    let residuals: Vec<f64> = grid
        .par_iter()
        .map(|&s2| residual(s2, d, couplings, &scan.integrator, geometry))
        .collect();
    let (coarse, coarse_residual) = first_minimum(&grid, &residuals);
    debug!(d, guess, coarse, coarse_residual, method = %scan.integrator.method, "coarse scan done");

    let signed = |s2: f64| terminal_value(s2, d, couplings, &scan.integrator, geometry).unwrap_or(f64::NAN);
    let (s2, final_residual, refinement) = if coarse_residual == 0.0 {
        // Exact zero on the grid. Any other zero in the bracket is no better,
        // and a frozen trajectory makes a whole interval vanish.
        (coarse, coarse_residual, Refinement::Converged { iterations: 0 })
    } else {
        match brent(signed, coarse - scan.refine, coarse + scan.refine, &settings.root) {
            Ok(root) if root.converged => {
                let root_residual = root.value.abs();
                if root_residual.is_finite() && root_residual <= coarse_residual {
                    let iterations = root.iterations;
                    (root.root, root_residual, Refinement::Converged { iterations })
                } else {
                    let rejected = Refinement::Rejected {
                        root: root.root,
                        residual: root_residual,
                    };
                    (coarse, coarse_residual, rejected)
                }
            }
            Ok(root) => {
                let stalled = Refinement::NotConverged {
                    last: root.root,
                    iterations: root.iterations,
                };
                (coarse, coarse_residual, stalled)
            }
            Err(err) => {
                let reason = err.to_string();
                (coarse, coarse_residual, Refinement::Unavailable { reason })
            }
        }
    };
    debug!(d, s2, residual = final_residual, refinement = refinement.label(), "search done");

    SearchResult {
        d,
        guess,
        coarse,
        coarse_residual,
        s2,
        residual: final_residual,
        method: scan.integrator.method,
        refinement,
    }
}

/// First grid point attaining the smallest residual.
fn first_minimum(grid: &[f64], residuals: &[f64]) -> (f64, f64) {
    let mut best = (grid[0], residuals[0]);
    for (&s2, &value) in grid.iter().zip(residuals).skip(1) {
        if value < best.1 {
            best = (s2, value);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shooting::{shoot, RESIDUAL_SENTINEL};

    #[test]
    fn scan_regime_follows_branch_distance() {
        let settings = SearchSettings::default();
        assert_eq!(settings.scan_for(4.0).points, 51);
        assert_eq!(settings.scan_for(4.19).points, 51);
        assert_eq!(settings.scan_for(3.81).integrator.method, Method::Rosenbrock23);
        assert_eq!(settings.scan_for(4.2).points, 31);
        assert_eq!(settings.scan_for(3.6).integrator.method, Method::Tsit5);
    }

    #[test]
    fn first_minimum_prefers_earliest_tie() {
        let grid = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(first_minimum(&grid, &[5.0, 1.0, 1.0, 2.0]), (1.0, 1.0));
        assert_eq!(first_minimum(&grid, &[1e9, 1e9, 1e9, 1e9]), (0.0, 1e9));
    }

    #[test]
    fn default_settings_validate() {
        assert!(SearchSettings::default().validate().is_ok());
        let mut settings = SearchSettings::default();
        settings.far.points = 0;
        assert!(settings.validate().is_err());
        let settings = SearchSettings::default().with_integrator(IntegratorSettings {
            atol: 0.0,
            ..IntegratorSettings::default()
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn marginal_mode_at_branch_point() {
        let couplings = Couplings::default();
        let result = find_s2_with(4.0, &couplings, &SearchSettings::default());
        assert!(result.refinement.is_converged(), "{:?}", result.refinement);
        // The converged root sits near -0.021; s2 = 0 itself leaves a residual of about 0.055.
        assert!(result.s2.abs() < 0.05, "s2 = {}", result.s2);
        assert!(result.residual < 1e-2, "residual = {}", result.residual);
        assert!(result.residual <= result.coarse_residual);
        assert_eq!(result.method, Method::Rosenbrock23);

        let check = shoot(result.s2, 4.0, &couplings, &ScanSettings::near_branch().integrator);
        assert!(check < 1e-2, "shoot residual = {check}");
    }

    #[test]
    fn unstable_mode_above_branch_point() {
        let couplings = Couplings::default();
        let result = find_s2_with(4.4, &couplings, &SearchSettings::default());
        assert!((result.guess - 0.40612).abs() < 1e-9);
        assert!((result.s2 - result.guess).abs() <= 8.0);
        assert!(result.refinement.is_converged(), "{:?}", result.refinement);
        assert!((result.s2 - 0.5687).abs() < 1e-3, "s2 = {}", result.s2);
        assert!(result.residual < 1e-3);
        assert_eq!(result.method, Method::Tsit5);
    }

    #[test]
    fn exact_zero_on_grid_is_kept_below_branch_point() {
        // For D < 4 the field is frozen from the start, so every s2 >= k2 shoots to y = 0.
        let couplings = Couplings::default();
        let k2 = couplings.k * couplings.k;
        let result = find_s2_with(3.6, &couplings, &SearchSettings::default());
        assert_eq!(result.coarse_residual, 0.0);
        assert_eq!(result.s2, result.coarse);
        assert_eq!(result.residual, 0.0);
        assert_eq!(result.refinement, Refinement::Converged { iterations: 0 });
        let step = 16.0 / 30.0;
        assert!(result.coarse >= k2 && result.coarse - step < k2, "coarse = {}", result.coarse);
        assert!((result.coarse - 1.19388).abs() < 1e-9);
    }

    #[test]
    fn failing_integrator_falls_back_to_coarse_minimiser() {
        let broken = IntegratorSettings {
            max_steps: 1,
            ..IntegratorSettings::default()
        };
        let settings = SearchSettings::default().with_integrator(broken);
        let result = find_s2_with(4.0, &Couplings::default(), &settings);
        assert_eq!(result.coarse, result.guess - 3.5);
        assert_eq!(result.s2, result.coarse);
        assert_eq!(result.residual, RESIDUAL_SENTINEL);
        assert!(matches!(result.refinement, Refinement::Unavailable { .. }));
    }

    #[test]
    fn repeated_searches_are_bit_identical() {
        let couplings = Couplings::default();
        let first = find_s2_with(4.4, &couplings, &SearchSettings::default());
        let second = find_s2_with(4.4, &couplings, &SearchSettings::default());
        assert_eq!(first.s2.to_bits(), second.s2.to_bits());
        assert_eq!(first.residual.to_bits(), second.residual.to_bits());
        assert_eq!(find_s2(4.4, &couplings).to_bits(), first.s2.to_bits());
    }
}
