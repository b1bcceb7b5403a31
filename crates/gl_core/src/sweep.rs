//! Runs the eigenvalue search over a range of D.

use crate::approx::analytic_s2;
use crate::potential::Couplings;
use crate::search::{find_s2_with, Refinement, SearchSettings};
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// `n` evenly spaced values from `start` to `end` inclusive. A single point
/// is `start`; zero points is empty.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            values[n - 1] = end;
            values
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub start: f64,
    pub end: f64,
    pub points: usize,
}

impl Default for SweepRange {
    fn default() -> Self {
        Self {
            start: 3.6,
            end: 4.4,
            points: 17,
        }
    }
}

impl SweepRange {
    pub fn validate(&self) -> Result<()> {
        if self.points == 0 {
            bail!("Sweep needs at least one point.");
        }
        if !self.start.is_finite() || !self.end.is_finite() {
            bail!("Sweep bounds must be finite, got [{}, {}].", self.start, self.end);
        }
        if self.start <= 3.0 || self.end <= 3.0 {
            bail!(
                "Dimension must stay above 3, got [{}, {}].",
                self.start,
                self.end
            );
        }
        Ok(())
    }

    pub fn values(&self) -> Vec<f64> {
        linspace(self.start, self.end, self.points)
    }
}

/// One row of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub d: f64,
    pub analytic: f64,
    pub s2: f64,
    pub residual: f64,
    pub refinement: Refinement,
    pub elapsed_secs: f64,
}

/// Solves every D independently; output order follows `ds`.
pub fn sweep(ds: &[f64], couplings: &Couplings, settings: &SearchSettings) -> Vec<SweepPoint> {
    ds.par_iter()
        .map(|&d| {
            let started = Instant::now();
            let result = find_s2_with(d, couplings, settings);
            let elapsed_secs = started.elapsed().as_secs_f64();
            info!(d, s2 = result.s2, residual = result.residual, elapsed_secs, "solved");
            SweepPoint {
                d,
                analytic: analytic_s2(d, couplings),
                s2: result.s2,
                residual: result.residual,
                refinement: result.refinement,
                elapsed_secs,
            }
        })
        .collect()
}

/// Validates all inputs, then sweeps `range`.
pub fn sweep_range(
    range: &SweepRange,
    couplings: &Couplings,
    settings: &SearchSettings,
) -> Result<Vec<SweepPoint>> {
    range.validate()?;
    couplings.validate()?;
    settings.validate()?;
    Ok(sweep(&range.values(), couplings, settings))
}
