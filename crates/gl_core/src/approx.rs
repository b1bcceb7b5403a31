//! Closed-form small-ε estimate of s²(D), used to centre the coarse scan.

use crate::potential::Couplings;

const SCALE: f64 = 1.42;
const SLOPE: f64 = 0.715;
const OFFSET: f64 = -1.0 / 6.0;

/// `1.42(0.715ε − k²) − 2λ − 1/6 + 1.42k²` with ε = D − 4.
///
/// Reduces to `0.715·1.42·ε − 2λ − 1/6`, which vanishes at D = 4 for the
/// default regulator λ = −1/12.
pub fn analytic_s2(d: f64, couplings: &Couplings) -> f64 {
    let eps = d - 4.0;
    let k2 = couplings.k * couplings.k;
    SCALE * (SLOPE * eps - k2) - 2.0 * couplings.lambda + OFFSET + SCALE * k2
}

#[cfg(test)]
mod tests {
    use super::analytic_s2;
    use crate::potential::Couplings;

    #[test]
    fn marginal_at_branch_point() {
        assert!(analytic_s2(4.0, &Couplings::default()).abs() < 1e-12);
    }

    #[test]
    fn linear_in_epsilon() {
        let couplings = Couplings::default();
        assert!((analytic_s2(4.4, &couplings) - 0.40612).abs() < 1e-9);
        assert!((analytic_s2(3.6, &couplings) + 0.40612).abs() < 1e-9);
    }

    #[test]
    fn independent_of_k_and_shifted_by_lambda() {
        let base = analytic_s2(4.2, &Couplings::new(0.5, -0.1));
        assert!((analytic_s2(4.2, &Couplings::new(1.3, -0.1)) - base).abs() < 1e-12);
        assert!((analytic_s2(4.2, &Couplings::new(0.5, 0.0)) - (base - 0.2)).abs() < 1e-12);
    }
}
