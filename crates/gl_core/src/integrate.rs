//! Adaptive initial-value driver over the steppers in [`crate::solvers`].
//!
//! [`solve_ivp`] integrates a system across a span in either direction and
//! records every accepted point. Step-size control follows the usual embedded
//! pair recipe: a weighted RMS error norm with `atol + rtol·max(|y|, |y_new|)`,
//! a safety factor, and growth/shrink clamps. Failures come back as typed
//! [`IntegrationError`]s rather than partial trajectories.

use crate::autodiff::Dual;
use crate::solvers::{Rosenbrock23, Tsit5, RK4};
use crate::traits::{AdaptiveSteppable, DynamicalSystem, Steppable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Fixed-step classic Runge-Kutta; `max_step` is the step size.
    Rk4,
    /// Explicit adaptive Tsitouras 5(4).
    Tsit5,
    /// Linearly implicit adaptive Rosenbrock 2(3), for stiff problems.
    Rosenbrock23,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Rk4 => "rk4",
            Method::Tsit5 => "tsit5",
            Method::Rosenbrock23 => "rosenbrock23",
        }
    }

    fn build(self, dim: usize) -> InternalStepper {
        match self {
            Method::Rk4 => InternalStepper::Rk4(RK4::new(dim)),
            Method::Tsit5 => InternalStepper::Tsit5(Tsit5::new(dim)),
            Method::Rosenbrock23 => InternalStepper::Rosenbrock23(Rosenbrock23::new(dim)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown integration method \"{0}\"; expected one of rk4, tsit5, rosenbrock23")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rk4" => Ok(Method::Rk4),
            "tsit5" => Ok(Method::Tsit5),
            "rosenbrock23" | "ros23" => Ok(Method::Rosenbrock23),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

enum InternalStepper {
    Rk4(RK4),
    Tsit5(Tsit5),
    Rosenbrock23(Rosenbrock23),
}

/// Tolerances and limits for one call to [`solve_ivp`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub method: Method,
    pub rtol: f64,
    pub atol: f64,
    /// Upper bound on |dt|. For [`Method::Rk4`] this is the step size.
    pub max_step: f64,
    /// Initial |dt|; chosen automatically when `None`.
    #[serde(default)]
    pub first_step: Option<f64>,
    /// Maximum number of attempted steps (accepted plus rejected).
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: Method::Tsit5,
            rtol: 1e-8,
            atol: 1e-10,
            max_step: 0.5,
            first_step: None,
            max_steps: 100_000,
        }
    }
}

impl IntegratorSettings {
    pub fn with_method(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), IntegrationError> {
        let invalid = |msg: &str| Err(IntegrationError::InvalidSettings(msg.to_string()));
        if !(self.rtol > 0.0) {
            return invalid("rtol must be positive");
        }
        if !(self.atol > 0.0) {
            return invalid("atol must be positive");
        }
        if !(self.max_step > 0.0) {
            return invalid("max_step must be positive");
        }
        if let Some(h) = self.first_step {
            if !(h > 0.0) {
                return invalid("first_step must be positive");
            }
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("invalid integrator settings: {0}")]
    InvalidSettings(String),

    #[error("initial state has dimension {actual}, system expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("step limit of {max_steps} reached at t = {t}")]
    StepLimit { max_steps: usize, t: f64 },

    #[error("step size underflow at t = {t} (|dt| = {dt:e})")]
    StepSizeUnderflow { t: f64, dt: f64 },

    #[error("non-finite state encountered at t = {t}")]
    NonFinite { t: f64 },
}

/// Accepted points of one integration, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    dim: usize,
    times: Vec<f64>,
    states: Vec<f64>,
    /// Number of rejected trial steps.
    pub rejected: usize,
}

impl Trajectory {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            times: Vec::new(),
            states: Vec::new(),
            rejected: 0,
        }
    }

    fn push(&mut self, t: f64, state: &[f64]) {
        self.times.push(t);
        self.states.extend_from_slice(state);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn state(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.dim)?;
        self.states.get(start..start + self.dim)
    }

    pub fn final_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.len().checked_sub(1).and_then(|i| self.state(i))
    }
}

/// Integrates `system` from `span.0` to `span.1` (either direction) starting
/// at `y0`.
///
/// The returned trajectory always starts with `(span.0, y0)`; a successful
/// integration over a non-empty span ends exactly at `span.1`.
pub fn solve_ivp<S>(
    system: &S,
    span: (f64, f64),
    y0: &[f64],
    settings: &IntegratorSettings,
) -> Result<Trajectory, IntegrationError>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    settings.validate()?;
    let dim = <S as DynamicalSystem<f64>>::dimension(system);
    if y0.len() != dim {
        return Err(IntegrationError::DimensionMismatch {
            expected: dim,
            actual: y0.len(),
        });
    }
    let (t0, t1) = span;
    if !t0.is_finite() || !t1.is_finite() {
        return Err(IntegrationError::InvalidSettings(
            "integration span must be finite".to_string(),
        ));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(IntegrationError::NonFinite { t: t0 });
    }

    let mut trajectory = Trajectory::new(dim);
    trajectory.push(t0, y0);
    if t1 == t0 {
        return Ok(trajectory);
    }

    match settings.method.build(dim) {
        InternalStepper::Rk4(mut stepper) => {
            fixed_steps(system, &mut stepper, span, y0, settings, &mut trajectory)?
        }
        InternalStepper::Tsit5(mut stepper) => {
            adaptive_steps(system, &mut stepper, span, y0, settings, &mut trajectory)?
        }
        InternalStepper::Rosenbrock23(mut stepper) => {
            adaptive_steps(system, &mut stepper, span, y0, settings, &mut trajectory)?
        }
    }
    Ok(trajectory)
}

fn fixed_steps<S>(
    system: &S,
    stepper: &mut RK4,
    (t0, t1): (f64, f64),
    y0: &[f64],
    settings: &IntegratorSettings,
    trajectory: &mut Trajectory,
) -> Result<(), IntegrationError>
where
    S: DynamicalSystem<f64>,
{
    let n_steps = ((t1 - t0).abs() / settings.max_step).ceil().max(1.0) as usize;
    let dt = (t1 - t0) / n_steps as f64;
    let mut t = t0;
    let mut state = y0.to_vec();

    for k in 1..=n_steps {
        if k > settings.max_steps {
            return Err(IntegrationError::StepLimit {
                max_steps: settings.max_steps,
                t,
            });
        }
        stepper.step(system, &mut t, &mut state, dt);
        if k == n_steps {
            t = t1;
        }
        if state.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationError::NonFinite { t });
        }
        trajectory.push(t, &state);
    }
    Ok(())
}

fn adaptive_steps<S, A>(
    system: &S,
    stepper: &mut A,
    (t0, t1): (f64, f64),
    y0: &[f64],
    settings: &IntegratorSettings,
    trajectory: &mut Trajectory,
) -> Result<(), IntegrationError>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    A: AdaptiveSteppable,
{
    let dim = y0.len();
    let direction = (t1 - t0).signum();
    let exponent = -1.0 / (stepper.error_order() as f64 + 1.0);

    let mut t = t0;
    let mut state = y0.to_vec();
    let mut candidate = vec![0.0; dim];
    let mut err = vec![0.0; dim];

    let mut h = match settings.first_step {
        Some(h) => h,
        None => initial_step(system, t0, y0, direction, stepper.error_order(), settings),
    }
    .min(settings.max_step);
    let mut attempts = 0usize;

    while direction * (t1 - t) > 0.0 {
        if attempts >= settings.max_steps {
            return Err(IntegrationError::StepLimit {
                max_steps: settings.max_steps,
                t,
            });
        }
        attempts += 1;

        let min_step = 16.0 * f64::EPSILON * t.abs();
        if h <= min_step || h == 0.0 {
            return Err(IntegrationError::StepSizeUnderflow { t, dt: h });
        }

        let remaining = (t1 - t).abs();
        let last = h >= remaining;
        let h_try = if last { remaining } else { h };
        let dt = direction * h_try;

        stepper.try_step(system, t, &state, dt, &mut candidate, &mut err);
        let norm = error_norm(&state, &candidate, &err, settings);

        if !norm.is_finite() || candidate.iter().any(|v| !v.is_finite()) {
            h = h_try * MIN_FACTOR;
            trajectory.rejected += 1;
            continue;
        }

        if norm <= 1.0 {
            t = if last { t1 } else { t + dt };
            state.copy_from_slice(&candidate);
            trajectory.push(t, &state);
            let factor = if norm == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * norm.powf(exponent)).min(MAX_FACTOR)
            };
            h = (h_try * factor).min(settings.max_step);
        } else {
            h = h_try * (SAFETY * norm.powf(exponent)).max(MIN_FACTOR);
            trajectory.rejected += 1;
        }
    }
    Ok(())
}

fn error_norm(state: &[f64], candidate: &[f64], err: &[f64], settings: &IntegratorSettings) -> f64 {
    let sum: f64 = state
        .iter()
        .zip(candidate)
        .zip(err)
        .map(|((y, y_new), e)| {
            let scale = settings.atol + settings.rtol * y.abs().max(y_new.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum / state.len().max(1) as f64).sqrt()
}

fn rms_scaled(values: &[f64], scale: &[f64]) -> f64 {
    let sum: f64 = values.iter().zip(scale).map(|(v, s)| (v / s).powi(2)).sum();
    (sum / values.len().max(1) as f64).sqrt()
}

/// Starting step estimate (Hairer, Nørsett & Wanner, Solving ODEs I, II.4).
fn initial_step<S>(
    system: &S,
    t0: f64,
    y0: &[f64],
    direction: f64,
    error_order: i32,
    settings: &IntegratorSettings,
) -> f64
where
    S: DynamicalSystem<f64>,
{
    const FALLBACK: f64 = 1e-6;
    let dim = y0.len();
    let scale: Vec<f64> = y0.iter().map(|y| settings.atol + settings.rtol * y.abs()).collect();

    let mut f0 = vec![0.0; dim];
    system.apply(t0, y0, &mut f0);
    let d0 = rms_scaled(y0, &scale);
    let d1 = rms_scaled(&f0, &scale);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 { FALLBACK } else { 0.01 * d0 / d1 };

    let y1: Vec<f64> = y0.iter().zip(&f0).map(|(y, f)| y + direction * h0 * f).collect();
    let mut f1 = vec![0.0; dim];
    system.apply(t0 + direction * h0, &y1, &mut f1);
    let diff: Vec<f64> = f1.iter().zip(&f0).map(|(a, b)| a - b).collect();
    let d2 = rms_scaled(&diff, &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(FALLBACK)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (error_order as f64 + 1.0))
    };

    let h = (100.0 * h0).min(h1).min(settings.max_step);
    if h.is_finite() && h > 0.0 {
        h
    } else {
        FALLBACK
    }
}

#[cfg(test)]
mod tests {
    use super::{solve_ivp, IntegrationError, IntegratorSettings, Method};
    use crate::traits::{constant, DynamicalSystem, Scalar};

    struct Decay {
        rate: f64,
    }

    impl<T: Scalar> DynamicalSystem<T> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
            out[0] = -constant::<T>(self.rate) * x[0];
        }
    }

    struct Oscillator;

    impl<T: Scalar> DynamicalSystem<T> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    // y' = -k (y - cos t): stiff relaxation onto a slow manifold.
    struct Relaxation {
        k: f64,
    }

    impl<T: Scalar> DynamicalSystem<T> for Relaxation {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: T, x: &[T], out: &mut [T]) {
            out[0] = -constant::<T>(self.k) * (x[0] - t.cos());
        }
    }

    #[test]
    fn method_parses_from_names() {
        assert_eq!("tsit5".parse::<Method>().unwrap(), Method::Tsit5);
        assert_eq!("Rosenbrock23".parse::<Method>().unwrap(), Method::Rosenbrock23);
        assert_eq!("rk4".parse::<Method>().unwrap(), Method::Rk4);
        assert!("lsoda".parse::<Method>().is_err());
        assert_eq!(Method::Rosenbrock23.to_string(), "rosenbrock23");
    }

    #[test]
    fn rejects_invalid_settings() {
        let system = Decay { rate: 1.0 };
        let cases = [
            IntegratorSettings { rtol: 0.0, ..Default::default() },
            IntegratorSettings { atol: -1.0, ..Default::default() },
            IntegratorSettings { max_step: 0.0, ..Default::default() },
            IntegratorSettings { first_step: Some(0.0), ..Default::default() },
            IntegratorSettings { max_steps: 0, ..Default::default() },
        ];
        for settings in cases {
            let result = solve_ivp(&system, (0.0, 1.0), &[1.0], &settings);
            assert!(
                matches!(result, Err(IntegrationError::InvalidSettings(_))),
                "expected invalid settings for {settings:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let result = solve_ivp(&Oscillator, (0.0, 1.0), &[1.0], &IntegratorSettings::default());
        assert_eq!(
            result.unwrap_err(),
            IntegrationError::DimensionMismatch { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn empty_span_returns_initial_point() {
        let trajectory =
            solve_ivp(&Decay { rate: 1.0 }, (2.0, 2.0), &[3.0], &IntegratorSettings::default())
                .expect("empty span should succeed");
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.final_state(), Some(&[3.0][..]));
    }

    #[test]
    fn adaptive_methods_track_decay_forward_and_backward() {
        for method in [Method::Tsit5, Method::Rosenbrock23] {
            let settings = IntegratorSettings::with_method(method);
            let forward = solve_ivp(&Decay { rate: 1.5 }, (0.0, 2.0), &[1.0], &settings)
                .expect("forward integration should succeed");
            assert_eq!(forward.final_time(), Some(2.0));
            let y = forward.final_state().unwrap()[0];
            assert!((y - (-3.0_f64).exp()).abs() < 1e-6, "{method}: {y}");

            let backward = solve_ivp(&Decay { rate: 1.5 }, (2.0, 0.0), &[1.0], &settings)
                .expect("backward integration should succeed");
            assert_eq!(backward.final_time(), Some(0.0));
            let y = backward.final_state().unwrap()[0];
            assert!((y - 3.0_f64.exp()).abs() < 1e-5 * 3.0_f64.exp(), "{method}: {y}");
        }
    }

    #[test]
    fn tsit5_conserves_oscillator_energy() {
        let settings = IntegratorSettings::with_method(Method::Tsit5);
        let trajectory = solve_ivp(&Oscillator, (0.0, 20.0), &[1.0, 0.0], &settings)
            .expect("oscillator should integrate");
        let end = trajectory.final_state().unwrap();
        assert!((end[0] - 20.0_f64.cos()).abs() < 1e-6);
        assert!((end[1] + 20.0_f64.sin()).abs() < 1e-6);
    }

    #[test]
    fn max_step_bounds_every_accepted_step() {
        let settings = IntegratorSettings {
            max_step: 0.25,
            ..IntegratorSettings::default()
        };
        let trajectory = solve_ivp(&Decay { rate: 0.1 }, (10.0, 0.0), &[1.0], &settings)
            .expect("integration should succeed");
        assert!(trajectory.len() >= 41);
        for pair in trajectory.times().windows(2) {
            assert!(pair[1] < pair[0]);
            assert!(pair[0] - pair[1] <= 0.25 + 1e-12);
        }
    }

    #[test]
    fn rosenbrock_handles_stiff_relaxation_in_few_steps() {
        let system = Relaxation { k: 1.0e5 };
        let settings = IntegratorSettings {
            method: Method::Rosenbrock23,
            rtol: 1e-6,
            atol: 1e-8,
            max_step: 0.5,
            first_step: None,
            max_steps: 5_000,
        };
        let trajectory = solve_ivp(&system, (0.0, 2.0), &[1.0], &settings)
            .expect("stiff problem should integrate");
        let y = trajectory.final_state().unwrap()[0];
        assert!((y - 2.0_f64.cos()).abs() < 1e-4);
    }

    #[test]
    fn step_limit_is_reported() {
        let settings = IntegratorSettings {
            max_steps: 1,
            ..IntegratorSettings::default()
        };
        let result = solve_ivp(&Decay { rate: 1.0 }, (0.0, 10.0), &[1.0], &settings);
        assert!(matches!(result, Err(IntegrationError::StepLimit { max_steps: 1, .. })));
    }

    #[test]
    fn rk4_uses_uniform_steps_bounded_by_max_step() {
        let settings = IntegratorSettings {
            method: Method::Rk4,
            max_step: 0.3,
            ..IntegratorSettings::default()
        };
        let trajectory = solve_ivp(&Decay { rate: 1.0 }, (0.0, 1.0), &[1.0], &settings)
            .expect("rk4 should integrate");
        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.final_time(), Some(1.0));
        let y = trajectory.final_state().unwrap()[0];
        assert!((y - (-1.0_f64).exp()).abs() < 1e-4);
    }

    #[test]
    fn non_finite_initial_state_is_rejected() {
        let result = solve_ivp(
            &Decay { rate: 1.0 },
            (0.0, 1.0),
            &[f64::NAN],
            &IntegratorSettings::default(),
        );
        assert_eq!(result.unwrap_err(), IntegrationError::NonFinite { t: 0.0 });
    }
}
