//! Isothermal vapor-liquid equilibrium at fixed (T, P).
//!
//! K-values start from the Wilson correlation (or a warm start), the vapor
//! fraction and phase compositions come from Rachford-Rice, and successive
//! substitution of the fugacity-coefficient ratio is accelerated with
//! Anderson mixing. Single-phase feeds are confirmed by the stability
//! analysis before they are reported.

use super::rachford_rice::{RachfordRiceSolution, TRACE_FEED, normalize, solve_rachford_rice};
use super::stability::tpd_analysis;
use crate::anderson::AndersonAccelerator;
use crate::components::critical_properties;
use crate::eos::{PengRobinson, Phase};
use crate::{
    Composition, FlashOptions, FlashResult, MAX_ANDERSON_HISTORY, MAX_ITER_VLE, NC, PhError,
    TOL_FUGACITY, TOL_K_VALUE, log_iter, log_result,
};

/// K-values this close to unity flag the trivial solution.
const TRIVIAL_K_DEVIATION: f64 = 1.0e-3;

/// Converged result of an isothermal flash.
#[derive(Debug, Clone)]
pub struct VleSolution {
    /// vapor mole fraction, exactly 0 or 1 for single-phase results
    pub beta: f64,
    /// liquid composition (incipient for all-vapor results)
    pub liquid: Composition,
    /// vapor composition (incipient for all-liquid results)
    pub vapor: Composition,
    /// K-values of the final iterate
    pub k_values: Composition,
    /// liquid compressibility factor
    pub z_liquid: f64,
    /// vapor compressibility factor
    pub z_vapor: f64,
    /// liquid-phase ln(phi)
    pub ln_phi_liquid: Composition,
    /// vapor-phase ln(phi)
    pub ln_phi_vapor: Composition,
    /// successive-substitution iterations used
    pub iterations: usize,
    /// peak run of consecutive Anderson failures
    pub anderson_failures: usize,
    /// whether both phases are present
    pub two_phase: bool,
}

/// Wilson K-value estimate at (T, P) from the classical critical constants.
pub fn wilson_k_values(temperature: f64, pressure: f64) -> Composition {
    let props = critical_properties();
    Composition::from_fn(|i, _| {
        let p = &props[i];
        p.pc / pressure * (5.373 * (1.0 + p.acentric_factor) * (1.0 - p.tc / temperature)).exp()
    })
}

// Assemble a single-phase solution. The stable cubic root decides the
// phase label; the K-values provide the incipient composition of the
// absent phase.
fn single_phase_solution(
    eos: &PengRobinson,
    temperature: f64,
    pressure: f64,
    feed: &Composition,
    k: &Composition,
) -> FlashResult<VleSolution> {
    let (_, _, phase) = eos.stable_root(temperature, pressure, feed)?;
    let mix = eos.mixture_parameters(temperature, feed)?;
    let (z_feed_l, z_feed_v) = eos.compressibility_roots(temperature, pressure, &mix)?;
    match phase {
        Phase::Liquid => {
            let incipient = feed.component_mul(k);
            let vapor = if incipient.sum() > 0.0 {
                normalize(&incipient)?
            } else {
                *feed
            };
            let ln_phi_liquid = eos.ln_phi_with_root(temperature, pressure, &mix, z_feed_l)?;
            let (ln_phi_vapor, z_vapor) = eos.ln_phi(temperature, pressure, &vapor, Phase::Vapor)?;
            Ok(VleSolution {
                beta: 0.0,
                liquid: *feed,
                vapor,
                k_values: *k,
                z_liquid: z_feed_l,
                z_vapor,
                ln_phi_liquid,
                ln_phi_vapor,
                iterations: 0,
                anderson_failures: 0,
                two_phase: false,
            })
        }
        Phase::Vapor => {
            let incipient = Composition::from_fn(|i, _| {
                if feed[i] > TRACE_FEED {
                    feed[i] / k[i]
                } else {
                    0.0
                }
            });
            let liquid = if incipient.sum() > 0.0 {
                normalize(&incipient)?
            } else {
                *feed
            };
            let ln_phi_vapor = eos.ln_phi_with_root(temperature, pressure, &mix, z_feed_v)?;
            let (ln_phi_liquid, z_liquid) =
                eos.ln_phi(temperature, pressure, &liquid, Phase::Liquid)?;
            Ok(VleSolution {
                beta: 1.0,
                liquid,
                vapor: *feed,
                k_values: *k,
                z_liquid,
                z_vapor: z_feed_v,
                ln_phi_liquid,
                ln_phi_vapor,
                iterations: 0,
                anderson_failures: 0,
                two_phase: false,
            })
        }
    }
}

/// Solve the vapor-liquid equilibrium at fixed temperature and pressure.
///
/// `initial_k` warm-starts the iteration, e.g. with the converged K-values
/// of a nearby temperature.
pub fn isothermal_flash(
    eos: &PengRobinson,
    temperature: f64,
    pressure: f64,
    feed: &Composition,
    options: &FlashOptions,
    initial_k: Option<&Composition>,
) -> FlashResult<VleSolution> {
    let verbosity = options.verbosity;
    let mut k = match initial_k {
        Some(k) if k.iter().all(|ki| ki.is_finite() && *ki > 0.0) => *k,
        _ => wilson_k_values(temperature, pressure),
    };
    let mut accelerator = if options.use_anderson {
        Some(AndersonAccelerator::new(MAX_ANDERSON_HISTORY)?)
    } else {
        None
    };

    let mut tpd_used = false;
    let mut damping: f64 = 1.0;
    let mut previous_residual = f64::INFINITY;
    let mut rising = 0usize;
    let mut consecutive_failures = 0usize;
    let mut peak_failures = 0usize;

    log_iter!(
        verbosity,
        "VLE at T = {temperature:.4} K, P = {pressure:.1} Pa"
    );
    log_iter!(verbosity, " iter |    residual    |   beta");

    for iteration in 0..MAX_ITER_VLE {
        // try a two-phase split with the current K-values; reseed from the
        // stability analysis when none exists
        let (beta, x, y) = match solve_rachford_rice(feed, &k)? {
            RachfordRiceSolution::TwoPhase {
                beta,
                liquid,
                vapor,
            } => (beta, liquid, vapor),
            RachfordRiceSolution::AllLiquid { .. } | RachfordRiceSolution::AllVapor { .. } => {
                if !tpd_used {
                    tpd_used = true;
                    let stability = tpd_analysis(eos, temperature, pressure, feed, verbosity)?;
                    if !stability.stable {
                        k = stability.k_values.ok_or_else(|| {
                            PhError::TpdFailure("unstable feed without K estimate".to_string())
                        })?;
                        if let Some(acc) = &mut accelerator {
                            acc.reset();
                        }
                        continue;
                    }
                }
                let mut solution = single_phase_solution(eos, temperature, pressure, feed, &k)?;
                solution.iterations = iteration + 1;
                solution.anderson_failures = peak_failures;
                log_result!(
                    verbosity,
                    "VLE: single phase (beta = {}) after {} iteration(s)",
                    solution.beta,
                    solution.iterations
                );
                return Ok(solution);
            }
        };

        let (ln_phi_l, z_l) = eos.ln_phi(temperature, pressure, &x, Phase::Liquid)?;
        let (ln_phi_v, z_v) = eos.ln_phi(temperature, pressure, &y, Phase::Vapor)?;
        let ln_k_new = ln_phi_l - ln_phi_v;
        let k_new = ln_k_new.map(f64::exp);

        let mut residual: f64 = 0.0;
        let mut fugacity_residual: f64 = 0.0;
        let mut trivial_deviation: f64 = 0.0;
        for i in 0..NC {
            if feed[i] > TRACE_FEED {
                residual = residual.max((ln_k_new[i] - k[i].ln()).abs());
                fugacity_residual = fugacity_residual
                    .max((ln_phi_l[i] + x[i].ln() - ln_phi_v[i] - y[i].ln()).abs());
                trivial_deviation = trivial_deviation.max((k_new[i] - 1.0).abs());
            }
        }
        log_iter!(
            verbosity,
            " {:4} | {:14.8e} | {:.6}",
            iteration + 1,
            residual,
            beta
        );

        // trivial-solution trap: all K drift to unity although the
        // Rachford-Rice window still admits a split
        if trivial_deviation < TRIVIAL_K_DEVIATION {
            if !tpd_used {
                tpd_used = true;
                let stability = tpd_analysis(eos, temperature, pressure, feed, verbosity)?;
                if !stability.stable {
                    k = stability
                        .k_values
                        .ok_or_else(|| PhError::TpdFailure("missing K estimate".to_string()))?;
                    if let Some(acc) = &mut accelerator {
                        acc.reset();
                    }
                    continue;
                }
                let mut solution = single_phase_solution(eos, temperature, pressure, feed, &k_new)?;
                solution.iterations = iteration + 1;
                solution.anderson_failures = peak_failures;
                return Ok(solution);
            }
            return Err(PhError::TrivialSolution);
        }

        if residual < TOL_K_VALUE && fugacity_residual < TOL_FUGACITY {
            log_result!(
                verbosity,
                "VLE: converged in {} iteration(s), beta = {beta:.6}",
                iteration + 1
            );
            return Ok(VleSolution {
                beta,
                liquid: x,
                vapor: y,
                k_values: k,
                z_liquid: z_l,
                z_vapor: z_v,
                ln_phi_liquid: ln_phi_l,
                ln_phi_vapor: ln_phi_v,
                iterations: iteration + 1,
                anderson_failures: peak_failures,
                two_phase: true,
            });
        }

        // oscillation handling: reduce damping and drop the stale Anderson
        // history; give up when the residual keeps rising
        if residual > previous_residual {
            rising += 1;
        } else {
            rising = 0;
        }
        previous_residual = residual;
        if rising > 3 {
            damping = (damping * 0.5).max(0.1);
            if let Some(acc) = &mut accelerator {
                acc.reset();
            }
        }
        if rising >= 10 {
            return Err(PhError::Oscillation(
                "VLE successive substitution".to_string(),
            ));
        }

        let mut next_k = None;
        if let Some(acc) = &mut accelerator {
            match acc.update(&k, &(k - k_new)) {
                Ok(Some(accelerated)) => {
                    consecutive_failures = 0;
                    next_k = Some(accelerated);
                }
                Ok(None) => {}
                Err(_) => {
                    consecutive_failures += 1;
                    peak_failures = peak_failures.max(consecutive_failures);
                }
            }
        }
        k = next_k.unwrap_or_else(|| {
            Composition::from_fn(|i, _| {
                let ln_k = k[i].ln();
                (ln_k + damping * (ln_k_new[i] - ln_k)).exp()
            })
        });
        if k.iter().any(|ki| !ki.is_finite() || *ki <= 0.0) {
            k = k_new;
        }
    }
    Err(PhError::MaxIterations(
        "VLE successive substitution".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BipSource, Component};
    use approx::assert_relative_eq;

    fn eos() -> PengRobinson {
        PengRobinson::new(&BipSource::Recommended, true).unwrap()
    }

    #[test]
    fn wilson_k_is_unity_at_the_critical_point() {
        let props = critical_properties();
        let water = &props[Component::Water.index()];
        let k = wilson_k_values(water.tc, water.pc);
        assert_relative_eq!(k[Component::Water.index()], 1.0, max_relative = 1.0e-10);
    }

    #[test]
    fn wilson_k_increases_with_temperature() {
        let k_cold = wilson_k_values(300.0, 1.0e5);
        let k_warm = wilson_k_values(360.0, 1.0e5);
        for i in 0..NC {
            assert!(k_warm[i] > k_cold[i]);
        }
        // volatility ordering: hydrogen most volatile, water least
        assert!(k_cold[Component::Hydrogen.index()] > k_cold[Component::Nitrogen.index()]);
        assert!(k_cold[Component::Nitrogen.index()] > k_cold[Component::Water.index()]);
    }

    #[test]
    fn warm_vapor_feed_is_single_phase() {
        let z = Composition::from([0.7, 0.3, 0.0, 0.0, 0.0]);
        let options = FlashOptions::default();
        let solution = isothermal_flash(&eos(), 300.0, 2.0e6, &z, &options, None).unwrap();
        assert!(!solution.two_phase);
        assert_relative_eq!(solution.beta, 1.0);
        assert_eq!(solution.vapor, z);
        assert!(solution.iterations <= MAX_ITER_VLE);
    }

    #[test]
    fn nitrogen_water_splits_at_ambient_conditions() {
        let z = Composition::from([0.0, 0.5, 0.0, 0.0, 0.5]);
        let options = FlashOptions::default();
        let solution = isothermal_flash(&eos(), 300.0, 1.0e5, &z, &options, None).unwrap();
        assert!(solution.two_phase);
        assert!(solution.beta > 0.0 && solution.beta < 1.0);
        // the liquid is nearly pure water, the vapor mostly nitrogen
        assert!(solution.liquid[Component::Water.index()] > 0.9);
        assert!(solution.vapor[Component::Nitrogen.index()] > 0.8);
        assert!(solution.z_vapor > solution.z_liquid);
        // equilibrium: K x = y for the present components
        for i in [Component::Nitrogen.index(), Component::Water.index()] {
            assert_relative_eq!(
                solution.k_values[i] * solution.liquid[i],
                solution.vapor[i],
                max_relative = 1.0e-6
            );
        }
    }

    #[test]
    fn ammonia_water_two_phase_window() {
        // between the bubble and dew point of the 40/60 mixture at 5 bar
        let z = Composition::from([0.0, 0.0, 0.0, 0.4, 0.6]);
        let options = FlashOptions::default();
        let solution = isothermal_flash(&eos(), 380.0, 5.0e5, &z, &options, None).unwrap();
        if solution.two_phase {
            // ammonia concentrates in the vapor
            assert!(
                solution.vapor[Component::Ammonia.index()]
                    > solution.liquid[Component::Ammonia.index()]
            );
            assert!(solution.z_vapor > solution.z_liquid);
        }
    }

    #[test]
    fn disabled_anderson_still_converges() {
        let z = Composition::from([0.0, 0.5, 0.0, 0.0, 0.5]);
        let options = FlashOptions::default().anderson(false);
        let solution = isothermal_flash(&eos(), 300.0, 1.0e5, &z, &options, None).unwrap();
        assert!(solution.two_phase);
        assert_eq!(solution.anderson_failures, 0);
    }
}
