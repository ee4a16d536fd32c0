//! Anderson acceleration of successive-substitution iterations.
//!
//! The accelerator stores a rolling window of iterates x_k and residuals
//! f_k of the fixed-point map g(x) = x - f(x) and proposes
//! x_next = sum_k gamma_k (x_k - f_k), where the weights minimize
//! ||sum_k gamma_k f_k||_2 subject to sum_k gamma_k = 1. It is unaware of
//! what the vectors mean; the VLE loop feeds it K-value iterates.

use crate::{Composition, FlashResult, PhError};
use nalgebra::{DMatrix, DVector};

/// Condition-number limit of the least-squares Gram matrix.
const MAX_CONDITION: f64 = 1.0e12;

/// Rolling-history Anderson accelerator over NC-vectors.
pub struct AndersonAccelerator {
    max_depth: usize,
    x_history: Vec<Composition>,
    f_history: Vec<Composition>,
}

impl AndersonAccelerator {
    /// Create an accelerator with mixing depth in [2, 10].
    pub fn new(max_depth: usize) -> FlashResult<Self> {
        if !(2..=10).contains(&max_depth) {
            return Err(PhError::ConfigInvalid(format!(
                "Anderson depth {max_depth} outside [2, 10]"
            )));
        }
        Ok(Self {
            max_depth,
            x_history: Vec::with_capacity(max_depth),
            f_history: Vec::with_capacity(max_depth),
        })
    }

    /// Discard the stored history.
    pub fn reset(&mut self) {
        self.x_history.clear();
        self.f_history.clear();
    }

    /// Number of stored iterates.
    pub fn depth(&self) -> usize {
        self.x_history.len()
    }

    /// Store the iterate and residual and propose an accelerated next
    /// iterate. Returns `Ok(None)` while fewer than two iterates are stored
    /// (the caller takes the plain step) and an error when the weight solve
    /// is ill-conditioned or the extrapolation leaves the feasible region.
    pub fn update(
        &mut self,
        x_current: &Composition,
        f_current: &Composition,
    ) -> FlashResult<Option<Composition>> {
        if self.x_history.len() == self.max_depth {
            self.x_history.remove(0);
            self.f_history.remove(0);
        }
        self.x_history.push(*x_current);
        self.f_history.push(*f_current);

        let m = self.f_history.len();
        if m < 2 {
            return Ok(None);
        }

        // minimize ||sum gamma_k f_k|| with sum gamma_k = 1 via the bordered
        // normal equations [2G 1; 1' 0] [gamma; lambda] = [0; 1]
        let gram = DMatrix::from_fn(m, m, |i, j| self.f_history[i].dot(&self.f_history[j]));
        let eigenvalues = gram.clone().symmetric_eigen().eigenvalues;
        let lambda_max = eigenvalues.iter().fold(0.0f64, |a, &l| a.max(l.abs()));
        let lambda_min = eigenvalues
            .iter()
            .fold(f64::INFINITY, |a, &l| a.min(l.abs()));
        if !(lambda_max.is_finite() && lambda_min * MAX_CONDITION >= lambda_max) {
            return Err(PhError::MatrixSingular(
                "Anderson normal equations".to_string(),
            ));
        }

        let mut system = DMatrix::zeros(m + 1, m + 1);
        for i in 0..m {
            for j in 0..m {
                system[(i, j)] = 2.0 * gram[(i, j)];
            }
            system[(i, m)] = 1.0;
            system[(m, i)] = 1.0;
        }
        let mut rhs = DVector::zeros(m + 1);
        rhs[m] = 1.0;
        let gamma = system
            .lu()
            .solve(&rhs)
            .ok_or_else(|| PhError::MatrixSingular("Anderson normal equations".to_string()))?;

        let mut x_next = Composition::zeros();
        for k in 0..m {
            x_next += (self.x_history[k] - self.f_history[k]) * gamma[k];
        }
        if x_next.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PhError::AndersonFailure(
                "extrapolated iterate is not positive".to_string(),
            ));
        }
        Ok(Some(x_next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::NC;
    use approx::assert_relative_eq;

    // contraction x -> A x + c with a known fixed point
    fn map(x: &Composition) -> Composition {
        let c = Composition::from([0.5, 1.0, 0.2, 0.8, 0.4]);
        let mut g = c;
        for i in 0..NC {
            g[i] += 0.55 * x[(i + 1) % NC];
        }
        g
    }

    #[test]
    fn depth_validation() {
        assert!(AndersonAccelerator::new(1).is_err());
        assert!(AndersonAccelerator::new(11).is_err());
        assert!(AndersonAccelerator::new(5).is_ok());
    }

    #[test]
    fn warms_up_before_accelerating() {
        let mut acc = AndersonAccelerator::new(4).unwrap();
        let x = Composition::from_element(1.0);
        let f = x - map(&x);
        assert!(acc.update(&x, &f).unwrap().is_none());
        let x2 = map(&x);
        let f2 = x2 - map(&x2);
        assert!(acc.update(&x2, &f2).unwrap().is_some());
    }

    #[test]
    fn accelerates_linear_fixed_point() {
        let mut acc = AndersonAccelerator::new(5).unwrap();
        let mut x = Composition::from_element(1.0);
        for _ in 0..40 {
            let g = map(&x);
            let f = x - g;
            x = match acc.update(&x, &f) {
                Ok(Some(next)) => next,
                _ => g,
            };
        }
        let residual = (x - map(&x)).norm();
        assert!(residual < 1.0e-8, "residual = {residual:e}");
        // fixed point of the cyclic map
        assert_relative_eq!(x[0], map(&x)[0], max_relative = 1.0e-8);
    }

    #[test]
    fn history_is_rolling() {
        let mut acc = AndersonAccelerator::new(2).unwrap();
        let x = Composition::from_element(1.0);
        let f = Composition::from_element(0.1);
        for _ in 0..5 {
            let _ = acc.update(&x, &f);
        }
        assert_eq!(acc.depth(), 2);
        acc.reset();
        assert_eq!(acc.depth(), 0);
    }

    #[test]
    fn identical_residuals_are_singular() {
        let mut acc = AndersonAccelerator::new(3).unwrap();
        let x = Composition::from_element(1.0);
        let f = Composition::from_element(0.5);
        assert!(acc.update(&x, &f).unwrap().is_none());
        // a second identical residual makes the Gram matrix rank one
        let err = acc.update(&x, &f).unwrap_err();
        assert_eq!(err.code(), -206);
    }
}
