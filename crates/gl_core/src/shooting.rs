//! Single shot: trial eigenvalue in, boundary mismatch out.
//!
//! A shot starts far from the horizon with the outgoing-wave value of the
//! Riccati variable and integrates inward across a fixed tortoise-coordinate
//! span. The terminal Riccati value vanishes when the trial s² matches the
//! eigenvalue.

use crate::integrate::{solve_ivp, IntegrationError, IntegratorSettings};
use crate::potential::{is_branch_point, Couplings};
use crate::riccati::{RiccatiField, RiccatiGuards};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Residual reported for any shot that fails to produce a terminal value.
pub const RESIDUAL_SENTINEL: f64 = 1e9;

/// Starting point and span of every shot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShootingGeometry {
    pub rstar_start: f64,
    pub rstar_end: f64,
    /// Starting radius away from the branch point.
    pub r_start: f64,
    /// Starting radius at D = 4, where f grows only logarithmically.
    pub r_start_branch: f64,
    pub guards: RiccatiGuards,
}

impl Default for ShootingGeometry {
    fn default() -> Self {
        Self {
            rstar_start: 25.0,
            rstar_end: -20.0,
            r_start: 50.0,
            r_start_branch: 100.0,
            guards: RiccatiGuards::default(),
        }
    }
}

impl ShootingGeometry {
    pub fn start_radius(&self, d: f64) -> f64 {
        if is_branch_point(d) {
            self.r_start_branch
        } else {
            self.r_start
        }
    }
}

/// Outgoing-wave initial state `[y0, r0]`. The radicand `k² − s²` is clamped
/// at zero, so trial values above k² start from y0 = 0.
pub fn initial_state(s2: f64, d: f64, k: f64, geometry: &ShootingGeometry) -> [f64; 2] {
    let y0 = -(k * k - s2).max(0.0).sqrt();
    [y0, geometry.start_radius(d)]
}

/// Terminal data of a completed shot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Shot {
    pub s2: f64,
    /// Riccati variable at the end of the span.
    pub y_end: f64,
    pub r_end: f64,
    /// Accepted output points, including the initial one.
    pub points: usize,
    pub rejected: usize,
}

impl Shot {
    pub fn residual(&self) -> f64 {
        self.y_end.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShotError {
    #[error("integration failed: {0}")]
    Integration(#[from] IntegrationError),

    #[error("integration produced {0} output point(s), need at least two")]
    TooFewPoints(usize),

    #[error("terminal Riccati value is not finite ({0})")]
    NonFinite(f64),
}

impl ShotError {
    /// Non-convergence of the stepper is a normal outcome for trial values
    /// far from the eigenvalue. Everything else points at a real problem.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ShotError::Integration(
                IntegrationError::StepLimit { .. }
                    | IntegrationError::StepSizeUnderflow { .. }
                    | IntegrationError::NonFinite { .. }
            )
        )
    }
}

/// Runs one shot and returns its terminal data.
pub fn shoot_with(
    s2: f64,
    d: f64,
    couplings: &Couplings,
    integrator: &IntegratorSettings,
    geometry: &ShootingGeometry,
) -> Result<Shot, ShotError> {
    let field = RiccatiField::new(s2, d, *couplings).with_guards(geometry.guards);
    let y0 = initial_state(s2, d, couplings.k, geometry);
    let trajectory = solve_ivp(
        &field,
        (geometry.rstar_start, geometry.rstar_end),
        &y0,
        integrator,
    )?;

    if trajectory.len() < 2 {
        return Err(ShotError::TooFewPoints(trajectory.len()));
    }
    let end = trajectory
        .final_state()
        .ok_or(ShotError::TooFewPoints(trajectory.len()))?;
    let (y_end, r_end) = (end[0], end[1]);
    if !y_end.is_finite() {
        return Err(ShotError::NonFinite(y_end));
    }

    Ok(Shot {
        s2,
        y_end,
        r_end,
        points: trajectory.len(),
        rejected: trajectory.rejected,
    })
}

/// Shooting residual `|y(r*_end)|` with the default geometry. Total: every
/// failure is logged and reported as [`RESIDUAL_SENTINEL`].
pub fn shoot(s2: f64, d: f64, couplings: &Couplings, integrator: &IntegratorSettings) -> f64 {
    residual(s2, d, couplings, integrator, &ShootingGeometry::default())
}

pub fn residual(
    s2: f64,
    d: f64,
    couplings: &Couplings,
    integrator: &IntegratorSettings,
    geometry: &ShootingGeometry,
) -> f64 {
    match shoot_with(s2, d, couplings, integrator, geometry) {
        Ok(shot) => shot.residual(),
        Err(err) => {
            log_failure(s2, d, &err);
            RESIDUAL_SENTINEL
        }
    }
}

/// Signed terminal Riccati value, or `None` when the shot failed.
pub fn terminal_value(
    s2: f64,
    d: f64,
    couplings: &Couplings,
    integrator: &IntegratorSettings,
    geometry: &ShootingGeometry,
) -> Option<f64> {
    match shoot_with(s2, d, couplings, integrator, geometry) {
        Ok(shot) => Some(shot.y_end),
        Err(err) => {
            log_failure(s2, d, &err);
            None
        }
    }
}

fn log_failure(s2: f64, d: f64, err: &ShotError) {
    if err.is_expected() {
        debug!(s2, d, %err, "shot did not complete");
    } else {
        warn!(s2, d, %err, "shot failed unexpectedly");
    }
}
