use crate::autodiff::{jacobian, Dual};
use crate::traits::{AdaptiveSteppable, DynamicalSystem, Steppable};
use nalgebra::{DMatrix, DVector};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(&mut self, system: &impl DynamicalSystem<f64>, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;
        let half = 0.5 * dt;

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k1[i];
        }
        system.apply(t0 + half, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k2[i];
        }
        system.apply(t0 + half, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsitouras (2011) 5(4) tableau.
const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [0.161, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0, 0.0],
    [2.8971530571054935, -6.359448489975075, 4.3622954328695815, 0.0, 0.0, 0.0],
    [
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
        0.0,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
        0.0,
    ],
    // Last row doubles as the 5th-order weights (FSAL).
    [
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ],
];

// b - b̂, applied to all seven stages including the FSAL stage at t + dt.
const TSIT5_BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    1.0 / 66.0,
];

/// Tsitouras 5/4 Solver
pub struct Tsit5 {
    k: [Vec<f64>; 7],
    tmp: Vec<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
        }
    }

    /// Evaluates stages k1..k6 and writes the 5th-order solution into `out`.
    fn stages(&mut self, system: &impl DynamicalSystem<f64>, t: f64, state: &[f64], dt: f64, out: &mut [f64]) {
        let n = state.len();
        system.apply(t, state, &mut self.k[0]);

        for s in 1..6 {
            for i in 0..n {
                let mut acc = 0.0;
                for (j, a) in TSIT5_A[s][..s].iter().enumerate() {
                    acc += a * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t + TSIT5_C[s] * dt, &self.tmp, &mut self.k[s]);
        }

        for i in 0..n {
            let mut acc = 0.0;
            for (j, b) in TSIT5_A[6].iter().enumerate() {
                acc += b * self.k[j][i];
            }
            out[i] = state[i] + dt * acc;
        }
    }
}

impl AdaptiveSteppable for Tsit5 {
    fn error_order(&self) -> i32 {
        4
    }

    fn try_step<S>(&mut self, system: &S, t: f64, state: &[f64], dt: f64, out: &mut [f64], err: &mut [f64])
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    {
        self.stages(system, t, state, dt, out);
        <S as DynamicalSystem<f64>>::apply(system, t + dt, out, &mut self.k[6]);

        for i in 0..state.len() {
            let mut acc = 0.0;
            for (j, e) in TSIT5_BTILDE.iter().enumerate() {
                acc += e * self.k[j][i];
            }
            err[i] = dt * acc;
        }
    }
}

// Shampine & Reichelt (1997) Rosenbrock 2(3) constants.
const ROS23_D: f64 = 0.29289321881345254; // 1 / (2 + √2)
const ROS23_E32: f64 = 7.414213562373095; // 6 + √2

/// Linearly implicit Rosenbrock 2(3) solver for stiff problems.
///
/// The Jacobian (and ∂f/∂t) come from dual-number evaluation of the system, so
/// the system must also implement `DynamicalSystem<Dual>`. A singular stage
/// matrix produces a non-finite candidate, which the driver treats as a
/// rejected step.
pub struct Rosenbrock23 {
    jac: Vec<f64>,
    dfdt: Vec<f64>,
    f0: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<f64>,
    tmp: Vec<f64>,
}

impl Rosenbrock23 {
    pub fn new(dim: usize) -> Self {
        Self {
            jac: vec![0.0; dim * dim],
            dfdt: vec![0.0; dim],
            f0: vec![0.0; dim],
            f1: vec![0.0; dim],
            f2: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    fn time_derivative<S>(&mut self, system: &S, t: f64, state: &[f64])
    where
        S: DynamicalSystem<Dual>,
    {
        let x: Vec<Dual> = state.iter().map(|&v| Dual::constant(v)).collect();
        let mut out = vec![Dual::constant(0.0); state.len()];
        system.apply(Dual::new(t, 1.0), &x, &mut out);
        for (d, o) in self.dfdt.iter_mut().zip(&out) {
            *d = o.eps;
        }
    }
}

impl AdaptiveSteppable for Rosenbrock23 {
    fn error_order(&self) -> i32 {
        2
    }

    fn try_step<S>(&mut self, system: &S, t: f64, state: &[f64], dt: f64, out: &mut [f64], err: &mut [f64])
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    {
        let n = state.len();
        let gamma = dt * ROS23_D;

        jacobian(system, t, state, &mut self.jac);
        self.time_derivative(system, t, state);

        let w = DMatrix::from_fn(n, n, |i, j| {
            let identity = if i == j { 1.0 } else { 0.0 };
            identity - gamma * self.jac[i * n + j]
        });
        let lu = w.lu();
        let solve = |rhs: DVector<f64>| lu.solve(&rhs);

        <S as DynamicalSystem<f64>>::apply(system, t, state, &mut self.f0);
        let rhs1 = DVector::from_fn(n, |i, _| self.f0[i] + gamma * self.dfdt[i]);
        let Some(k1) = solve(rhs1) else {
            out.fill(f64::NAN);
            err.fill(f64::NAN);
            return;
        };

        for i in 0..n {
            self.tmp[i] = state[i] + 0.5 * dt * k1[i];
        }
        <S as DynamicalSystem<f64>>::apply(system, t + 0.5 * dt, &self.tmp, &mut self.f1);
        let rhs2 = DVector::from_fn(n, |i, _| self.f1[i] - k1[i]);
        let Some(k2) = solve(rhs2).map(|v| v + &k1) else {
            out.fill(f64::NAN);
            err.fill(f64::NAN);
            return;
        };

        for i in 0..n {
            out[i] = state[i] + dt * k2[i];
        }
        <S as DynamicalSystem<f64>>::apply(system, t + dt, out, &mut self.f2);
        let rhs3 = DVector::from_fn(n, |i, _| {
            self.f2[i] - ROS23_E32 * (k2[i] - self.f1[i]) - 2.0 * (k1[i] - self.f0[i])
                + gamma * self.dfdt[i]
        });
        let Some(k3) = solve(rhs3) else {
            err.fill(f64::NAN);
            return;
        };

        for i in 0..n {
            err[i] = dt / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }
    }
}
