//! The Rachford-Rice vapor-fraction solve.
//!
//! RR(beta) = sum_i z_i (K_i - 1) / (1 + beta (K_i - 1)) is strictly
//! decreasing between its poles; the root is isolated by bracketed
//! bisection and refined with Newton steps that are rejected whenever they
//! leave the bracket.

use crate::{Composition, FlashResult, MAX_ITER_RR, NC, PhError, TOL_RR};
use num_dual::{Dual64, DualNum, first_derivative};

/// Components below this feed fraction are treated as absent.
pub(crate) const TRACE_FEED: f64 = 1.0e-12;

/// Outcome of the vapor-fraction solve.
///
/// The single-phase variants carry the incipient composition of the absent
/// phase implied by the K-values.
#[derive(Debug)]
pub enum RachfordRiceSolution {
    TwoPhase {
        beta: f64,
        liquid: Composition,
        vapor: Composition,
    },
    AllLiquid {
        liquid: Composition,
        vapor: Composition,
    },
    AllVapor {
        liquid: Composition,
        vapor: Composition,
    },
}

pub(crate) fn normalize(composition: &Composition) -> FlashResult<Composition> {
    let sum = composition.sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return Err(PhError::NegativeComposition(format!(
            "composition sum {sum:e} is not positive"
        )));
    }
    Ok(composition / sum)
}

/// Solve the Rachford-Rice equation for feed `z` and K-values `k`.
pub fn solve_rachford_rice(
    feed: &Composition,
    k: &Composition,
) -> FlashResult<RachfordRiceSolution> {
    for i in 0..NC {
        if feed[i] > TRACE_FEED && !(k[i].is_finite() && k[i] > 0.0) {
            return Err(PhError::RachfordRice(format!(
                "K[{i}] = {} is not a positive finite value",
                k[i]
            )));
        }
    }

    // single-phase detection from the boundary values of RR
    let g0: f64 = (0..NC).map(|i| feed[i] * k[i]).sum::<f64>() - 1.0;
    let g1: f64 = 1.0
        - (0..NC)
            .filter(|&i| feed[i] > TRACE_FEED)
            .map(|i| feed[i] / k[i])
            .sum::<f64>();
    if g0 <= 0.0 {
        // sum z K <= 1: all liquid with an incipient vapor z K
        let vapor = feed.component_mul(k);
        let vapor = if vapor.sum() > 0.0 {
            normalize(&vapor)?
        } else {
            *feed
        };
        return Ok(RachfordRiceSolution::AllLiquid {
            liquid: *feed,
            vapor,
        });
    }
    if g1 >= 0.0 {
        // sum z / K <= 1: all vapor with an incipient liquid z / K
        let liquid = Composition::from_fn(|i, _| {
            if feed[i] > TRACE_FEED {
                feed[i] / k[i]
            } else {
                0.0
            }
        });
        let liquid = if liquid.sum() > 0.0 {
            normalize(&liquid)?
        } else {
            *feed
        };
        return Ok(RachfordRiceSolution::AllVapor {
            liquid,
            vapor: *feed,
        });
    }

    // the root lies strictly inside (0, 1); tighten the bracket with the
    // feed-based bounds before iterating
    let mut beta_min: f64 = 0.0;
    let mut beta_max: f64 = 1.0;
    for i in 0..NC {
        if feed[i] <= TRACE_FEED {
            continue;
        }
        if k[i] > 1.0 {
            beta_min = beta_min.max((k[i] * feed[i] - 1.0) / (k[i] - 1.0));
        }
        if k[i] < 1.0 {
            beta_max = beta_max.min((1.0 - feed[i]) / (1.0 - k[i]));
        }
    }
    if !(beta_min < beta_max) {
        beta_min = 0.0;
        beta_max = 1.0;
    }
    let mut beta = 0.5 * (beta_min + beta_max);

    for _ in 0..MAX_ITER_RR {
        let (g, dg) = first_derivative(
            |beta: Dual64| {
                let mut sum = Dual64::from(0.0);
                for i in 0..NC {
                    if feed[i] > TRACE_FEED {
                        sum += (beta * (k[i] - 1.0) + 1.0).recip() * (feed[i] * (k[i] - 1.0));
                    }
                }
                sum
            },
            beta,
        );
        // RR is decreasing: a positive residual puts the root above beta
        if g > 0.0 {
            beta_min = beta;
        } else {
            beta_max = beta;
        }
        let step = g / dg;
        let mut beta_new = beta - step;
        if !(beta_new > beta_min && beta_new < beta_max) || !beta_new.is_finite() {
            beta_new = 0.5 * (beta_min + beta_max);
        }
        let converged = g.abs() < TOL_RR || (beta_new - beta).abs() < TOL_RR;
        beta = beta_new;
        if converged {
            break;
        }
    }

    beta = beta.clamp(0.0, 1.0);
    let liquid = Composition::from_fn(|i, _| feed[i] / (1.0 + beta * (k[i] - 1.0)));
    let vapor = liquid.component_mul(k);
    Ok(RachfordRiceSolution::TwoPhase {
        beta,
        liquid: normalize(&liquid)?,
        vapor: normalize(&vapor)?,
    })
}
