//! Small numeric helpers shared by the solvers.

/// Clamp a value into [min, max].
pub fn clip(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}

/// Relative error of `value` against `reference` with a guarded denominator.
pub fn relative_error(value: f64, reference: f64, min_denominator: f64) -> f64 {
    (value - reference).abs() / reference.abs().max(min_denominator)
}

/// Largest pairwise relative error of two slices.
pub fn max_relative_error(a: &[f64], b: &[f64], min_denominator: f64) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| relative_error(x, y, min_denominator))
        .fold(0.0, f64::max)
}

/// Damping multiplier derived from the recent error history: full steps
/// while the residual shrinks, halved per observed increase, floor 0.1.
pub fn adaptive_damping(iteration: usize, error_history: &[f64]) -> f64 {
    if iteration < 2 || error_history.len() < 2 {
        return 0.8;
    }
    let increases = error_history
        .windows(2)
        .rev()
        .take(3)
        .filter(|w| w[1] >= w[0])
        .count();
    (0.8 * 0.5_f64.powi(increases as i32)).max(0.1)
}

/// Reduce a damping factor after consecutive Anderson failures in the
/// inner loop: the outer loop is limited to max(0.2, 1 - 0.2 k).
pub fn coordinated_damping(base: f64, consecutive_anderson_failures: usize) -> f64 {
    base.min((1.0 - 0.2 * consecutive_anderson_failures as f64).max(0.2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_bounds() {
        assert_eq!(clip(2.0, 0.0, 1.0), 1.0);
        assert_eq!(clip(-2.0, 0.0, 1.0), 0.0);
        assert_eq!(clip(0.5, 0.0, 1.0), 0.5);
    }

    #[test]
    fn relative_errors() {
        assert!((relative_error(1.1, 1.0, 1.0e-10) - 0.1).abs() < 1.0e-12);
        assert!(relative_error(1.0e-12, 0.0, 1.0e-10) < 0.011);
        assert_eq!(max_relative_error(&[1.0, 2.0], &[1.0, 1.0], 1.0e-10), 1.0);
    }

    #[test]
    fn damping_heuristics() {
        assert_eq!(adaptive_damping(0, &[]), 0.8);
        assert_eq!(adaptive_damping(5, &[3.0, 2.0, 1.0, 0.5]), 0.8);
        let mixed = adaptive_damping(5, &[1.0, 2.0, 1.5, 3.0]);
        assert!(mixed < 0.8 && mixed >= 0.1);
        assert_eq!(coordinated_damping(1.0, 0), 1.0);
        assert_eq!(coordinated_damping(1.0, 2), 0.6);
        assert_eq!(coordinated_damping(1.0, 10), 0.2);
        assert_eq!(coordinated_damping(0.3, 1), 0.3);
    }
}
