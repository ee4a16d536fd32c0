//! Tangent-plane-distance stability analysis.
//!
//! A single-phase assumption at (T, P, z) is tested by iterating trial
//! compositions from several seeds. A converged non-trivial trial with a
//! negative tangent-plane distance proves instability; the minimizing
//! composition seeds the K-values of the subsequent flash.

use super::rachford_rice::{TRACE_FEED, normalize};
use super::vle::wilson_k_values;
use crate::eos::PengRobinson;
use crate::{
    Composition, FlashResult, MAX_ITER_TPD, MAX_TPD_TRIALS, NC, TOL_TPD, Verbosity, log_iter,
};

/// Trial compositions count as trivial when closer than this to the feed.
const TRIVIAL_DEVIATION: f64 = 1.0e-5;

/// Result of the stability analysis.
pub struct StabilityAnalysis {
    /// whether the feed is stable as a single phase
    pub stable: bool,
    /// minimizing trial composition of an unstable feed
    pub trial: Option<Composition>,
    /// K-value estimate derived from the minimizing trial
    pub k_values: Option<Composition>,
    /// smallest tangent-plane distance over all converged trials
    pub tpd: f64,
}

/// Run the tangent-plane-distance analysis at (T, P, z).
pub fn tpd_analysis(
    eos: &PengRobinson,
    temperature: f64,
    pressure: f64,
    feed: &Composition,
    verbosity: Verbosity,
) -> FlashResult<StabilityAnalysis> {
    let (ln_phi_feed, z_feed, _) = eos.stable_root(temperature, pressure, feed)?;

    // reference chemical potentials d_i = ln z_i + ln phi_i(z)
    let mut d = [None; NC];
    for i in 0..NC {
        if feed[i] > TRACE_FEED {
            d[i] = Some(feed[i].ln() + ln_phi_feed[i]);
        }
    }

    // seeds: one nearly pure trial per present component plus the
    // Wilson-derived vapor-like and liquid-like trials
    let wilson = wilson_k_values(temperature, pressure);
    let mut seeds: Vec<Composition> = Vec::with_capacity(MAX_TPD_TRIALS);
    for i in 0..NC {
        if feed[i] > 1.0e-10 {
            let mut seed = Composition::zeros();
            seed[i] = 1.0;
            seeds.push(seed);
        }
    }
    seeds.push(normalize(&feed.component_mul(&wilson))?);
    seeds.push(normalize(&Composition::from_fn(|i, _| {
        if feed[i] > TRACE_FEED {
            feed[i] / wilson[i]
        } else {
            0.0
        }
    }))?);
    seeds.truncate(MAX_TPD_TRIALS);

    let mut best_tpd = f64::INFINITY;
    let mut best_trial = None;
    let mut best_z_factor = z_feed;

    for (trial_index, seed) in seeds.into_iter().enumerate() {
        let mut w = seed;
        let mut converged = false;
        let mut z_trial = z_feed;
        let mut ln_phi_trial = ln_phi_feed;
        for _ in 0..MAX_ITER_TPD {
            let (ln_phi_w, z_w, _) = match eos.stable_root(temperature, pressure, &w) {
                Ok(root) => root,
                // a failed trial composition disqualifies the seed only
                Err(_) => break,
            };
            let mut w_new = Composition::zeros();
            for i in 0..NC {
                if let Some(d_i) = d[i] {
                    w_new[i] = (d_i - ln_phi_w[i]).exp();
                }
            }
            let sum = w_new.sum();
            if !(sum > 0.0) || !sum.is_finite() {
                break;
            }
            w_new /= sum;
            let delta = (w_new - w).amax();
            w = w_new;
            z_trial = z_w;
            ln_phi_trial = ln_phi_w;
            if delta < TOL_TPD {
                converged = true;
                break;
            }
        }
        if !converged {
            continue;
        }
        if (w - feed).amax() < TRIVIAL_DEVIATION {
            continue;
        }
        let mut tpd = 0.0;
        for i in 0..NC {
            if let Some(d_i) = d[i] {
                if w[i] > TRACE_FEED {
                    tpd += w[i] * (w[i].ln() + ln_phi_trial[i] - d_i);
                }
            }
        }
        log_iter!(
            verbosity,
            "TPD trial {trial_index}: tpd* = {tpd:.3e}, w = {:.6?}",
            w.as_slice()
        );
        if tpd < best_tpd {
            best_tpd = tpd;
            best_trial = Some(w);
            best_z_factor = z_trial;
        }
    }

    if best_tpd < -TOL_TPD {
        let w = best_trial.unwrap();
        // vapor-like trials give K = w/z, liquid-like ones K = z/w
        let vapor_like = best_z_factor > z_feed;
        let k = Composition::from_fn(|i, _| {
            if feed[i] > TRACE_FEED && w[i] > TRACE_FEED {
                let ratio = if vapor_like {
                    w[i] / feed[i]
                } else {
                    feed[i] / w[i]
                };
                ratio.clamp(1.0e-8, 1.0e8)
            } else {
                1.0
            }
        });
        Ok(StabilityAnalysis {
            stable: false,
            trial: Some(w),
            k_values: Some(k),
            tpd: best_tpd,
        })
    } else {
        Ok(StabilityAnalysis {
            stable: true,
            trial: None,
            k_values: None,
            tpd: if best_tpd.is_finite() { best_tpd } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BipSource, Component};

    fn eos() -> PengRobinson {
        PengRobinson::new(&BipSource::Recommended, true).unwrap()
    }

    #[test]
    fn pure_vapor_feed_is_stable() {
        let mut z = Composition::zeros();
        z[Component::Nitrogen.index()] = 1.0;
        let result = tpd_analysis(&eos(), 300.0, 1.0e5, &z, Verbosity::None).unwrap();
        assert!(result.stable);
    }

    #[test]
    fn warm_gas_mixture_is_stable() {
        let z = Composition::from([0.3, 0.4, 0.3, 0.0, 0.0]);
        let result = tpd_analysis(&eos(), 300.0, 1.0e5, &z, Verbosity::None).unwrap();
        assert!(result.stable);
    }

    #[test]
    fn subcooled_liquid_feed_is_stable() {
        // ammonia/water well below its bubble point stays one liquid phase
        let z = Composition::from([0.0, 0.0, 0.0, 0.4, 0.6]);
        let result = tpd_analysis(&eos(), 300.0, 5.0e5, &z, Verbosity::None).unwrap();
        assert!(result.stable);
    }

    #[test]
    fn unstable_feed_produces_k_estimate() {
        // an equimolar N2/H2O feed at ambient conditions cannot stay in one
        // phase: water condenses
        let z = Composition::from([0.0, 0.5, 0.0, 0.0, 0.5]);
        let result = tpd_analysis(&eos(), 300.0, 1.0e5, &z, Verbosity::None).unwrap();
        assert!(!result.stable);
        assert!(result.tpd < -TOL_TPD);
        let k = result.k_values.unwrap();
        // nitrogen partitions to the vapor much more strongly than water
        assert!(k[Component::Nitrogen.index()] / k[Component::Water.index()] > 1.0);
    }
}
