//! Bracketed scalar root finding.
//!
//! [`brent`] combines inverse quadratic interpolation, secant steps and
//! bisection (Brent 1973, in the arrangement popularised by `brentq`). The
//! bracket always contains a sign change, so the method cannot diverge; it
//! converges superlinearly on smooth functions and never does worse than
//! bisection by more than a constant factor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootSettings {
    /// Absolute tolerance on the root.
    pub xtol: f64,
    /// Relative tolerance on the root.
    pub rtol: f64,
    /// Maximum number of function evaluations after the two endpoints.
    pub max_iter: usize,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            xtol: 1e-5,
            rtol: 4.0 * f64::EPSILON,
            max_iter: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RootResult {
    pub root: f64,
    /// Function value at `root`.
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    /// False when `max_iter` ran out before the tolerance was met; `root` is
    /// then the best point found so far.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RootError {
    #[error("f({a}) = {fa} and f({b}) = {fb} have the same sign")]
    NoSignChange { a: f64, fa: f64, b: f64, fb: f64 },

    #[error("function is not finite at x = {x}")]
    NonFinite { x: f64 },

    #[error("invalid bracket or tolerances")]
    InvalidBracket,
}

/// Finds a root of `f` in `[a, b]`, which must bracket a sign change.
pub fn brent<F>(mut f: F, a: f64, b: f64, settings: &RootSettings) -> Result<RootResult, RootError>
where
    F: FnMut(f64) -> f64,
{
    if !a.is_finite() || !b.is_finite() || !(settings.xtol > 0.0) || !(settings.rtol >= 0.0) {
        return Err(RootError::InvalidBracket);
    }

    let mut eval = |x: f64| {
        let fx = f(x);
        if fx.is_finite() {
            Ok(fx)
        } else {
            Err(RootError::NonFinite { x })
        }
    };

    let (mut xpre, mut xcur) = (a, b);
    let mut fpre = eval(xpre)?;
    let mut fcur = eval(xcur)?;
    let mut evaluations = 2;

    let found = |root: f64, value: f64, iterations: usize, evaluations: usize| RootResult {
        root,
        value,
        iterations,
        evaluations,
        converged: true,
    };

    if fpre == 0.0 {
        return Ok(found(xpre, fpre, 0, evaluations));
    }
    if fcur == 0.0 {
        return Ok(found(xcur, fcur, 0, evaluations));
    }
    if fpre.signum() == fcur.signum() {
        return Err(RootError::NoSignChange {
            a,
            fa: fpre,
            b,
            fb: fcur,
        });
    }

    // xblk is the contrapoint: f(xblk) and f(xcur) have opposite signs.
    let (mut xblk, mut fblk) = (0.0, 0.0);
    let (mut spre, mut scur) = (0.0, 0.0);

    for iteration in 0..settings.max_iter {
        if fpre != 0.0 && fcur != 0.0 && fpre.signum() != fcur.signum() {
            xblk = xpre;
            fblk = fpre;
            spre = xcur - xpre;
            scur = spre;
        }
        if fblk.abs() < fcur.abs() {
            xpre = xcur;
            xcur = xblk;
            xblk = xpre;
            fpre = fcur;
            fcur = fblk;
            fblk = fpre;
        }

        let delta = (settings.xtol + settings.rtol * xcur.abs()) / 2.0;
        let sbis = (xblk - xcur) / 2.0;
        if fcur == 0.0 || sbis.abs() < delta {
            return Ok(found(xcur, fcur, iteration, evaluations));
        }

        if spre.abs() > delta && fcur.abs() < fpre.abs() {
            let stry = if xpre == xblk {
                // Secant.
                -fcur * (xcur - xpre) / (fcur - fpre)
            } else {
                // Inverse quadratic interpolation.
                let dpre = (fpre - fcur) / (xpre - xcur);
                let dblk = (fblk - fcur) / (xblk - xcur);
                -fcur * (fblk * dblk - fpre * dpre) / (dblk * dpre * (fblk - fpre))
            };
            if 2.0 * stry.abs() < spre.abs().min(3.0 * sbis.abs() - delta) {
                spre = scur;
                scur = stry;
            } else {
                spre = sbis;
                scur = sbis;
            }
        } else {
            spre = sbis;
            scur = sbis;
        }

        xpre = xcur;
        fpre = fcur;
        xcur += if scur.abs() > delta {
            scur
        } else if sbis > 0.0 {
            delta
        } else {
            -delta
        };
        fcur = eval(xcur)?;
        evaluations += 1;
    }

    Ok(RootResult {
        root: xcur,
        value: fcur,
        iterations: settings.max_iter,
        evaluations,
        converged: false,
    })
}
