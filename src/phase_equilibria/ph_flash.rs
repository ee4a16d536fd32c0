//! The outer pressure-enthalpy driver.
//!
//! An initial temperature is estimated from the ideal-gas enthalpy (or a
//! Wilson boiling estimate for liquid-dominated targets), then Newton steps
//! on the enthalpy residual, protected by a damped line search, drive the
//! temperature to the specification. Nearly pure feeds whose target falls
//! inside the two-phase dome are resolved at the saturation temperature by
//! the enthalpy lever rule. A recoverable failure is retried once with
//! conservative fallback options.

use super::rachford_rice::TRACE_FEED;
use super::vle::{VleSolution, isothermal_flash};
use crate::components::critical_properties;
use crate::enthalpy::{
    EnthalpyModel, enthalpy_derivative, enthalpy_models, ideal_gas_mixture_enthalpy,
    ideal_gas_mixture_heat_capacity, mixture_enthalpy,
};
use crate::eos::PengRobinson;
use crate::state::FlashState;
use crate::utils::{adaptive_damping, clip, coordinated_damping};
use crate::{
    Composition, FlashOptions, FlashResult, MAX_ITER_OUTER, MAX_NEWTON_STEP, NC, OperatingCondition,
    PhError, T_MAX, T_MIN, TOL_COMP_SUM, TOL_FUGACITY, TOL_TEMP, log_iter, log_result,
};

/// Feeds at least this pure take the saturation-split path.
const NEARLY_PURE: f64 = 1.0 - 1.0e-6;
/// Widest bracket the saturation split accepts in K.
const SATURATION_WINDOW: f64 = 20.0;
/// Consecutive stagnating outer iterations tolerated before failing.
const MAX_STAGNATION: usize = 4;
/// Line-search reduction ladder.
const LINE_SEARCH_TAUS: [f64; 5] = [1.0, 0.5, 0.25, 0.125, 0.0625];

/// Calculate the P-H flash of feed `z` at pressure `pressure` and target
/// molar enthalpy `enthalpy_spec`.
///
/// Inputs are validated at the boundary; a recoverable solver failure is
/// retried once with Anderson acceleration disabled and reduced damping.
pub fn flash_calculate(
    feed: &Composition,
    pressure: f64,
    enthalpy_spec: f64,
    options: &FlashOptions,
) -> FlashResult<FlashState> {
    options.validate()?;
    let z = validate_inputs(feed, pressure, enthalpy_spec)?;
    let eos = PengRobinson::new(&options.bip_source, options.use_quantum_h2)?;
    let models = enthalpy_models();

    match flash_once(&eos, &models, &z, pressure, enthalpy_spec, options) {
        Err(error) if error.recoverable() => {
            log_result!(
                options.verbosity,
                "ph flash: retrying once after recoverable error: {error}"
            );
            let fallback = FlashOptions {
                use_anderson: false,
                damping: (options.damping * 0.5).max(0.2),
                use_line_search: true,
                ..options.clone()
            };
            flash_once(&eos, &models, &z, pressure, enthalpy_spec, &fallback)
        }
        other => other,
    }
}

fn validate_inputs(
    feed: &Composition,
    pressure: f64,
    enthalpy_spec: f64,
) -> FlashResult<Composition> {
    if feed.iter().any(|z| !z.is_finite()) {
        return Err(PhError::InvalidComposition(
            "feed contains non-finite entries".to_string(),
        ));
    }
    if feed.iter().any(|z| *z < 0.0) {
        return Err(PhError::InvalidComposition(
            "feed contains negative mole fractions".to_string(),
        ));
    }
    let sum = feed.sum();
    if (sum - 1.0).abs() > TOL_COMP_SUM {
        return Err(PhError::InvalidComposition(format!(
            "feed sums to {sum} instead of 1"
        )));
    }
    if !pressure.is_finite() || !(100.0..=1.0e8).contains(&pressure) {
        return Err(PhError::InvalidPressure(pressure));
    }
    if !enthalpy_spec.is_finite() || enthalpy_spec.abs() > 1.0e7 {
        return Err(PhError::InvalidEnthalpy(enthalpy_spec));
    }
    Ok(feed / sum)
}

// One full evaluation of the residual chain at a trial temperature.
struct Evaluation {
    vle: VleSolution,
    enthalpy: f64,
    enthalpy_liquid: f64,
    enthalpy_vapor: f64,
    z_liquid: f64,
    z_vapor: f64,
}

// Evaluation context of one flash attempt. The K-values of the last
// two-phase solve warm-start the next one, and every single-phase
// evaluation updates the saturation brackets.
struct Driver<'a> {
    eos: &'a PengRobinson,
    models: &'a [EnthalpyModel; NC],
    feed: Composition,
    pressure: f64,
    enthalpy_spec: f64,
    options: &'a FlashOptions,
    warm_k: Option<Composition>,
    // warmest all-liquid evaluation below the target enthalpy
    bracket_liquid: Option<(f64, f64)>,
    // coldest all-vapor evaluation above the target enthalpy
    bracket_vapor: Option<(f64, f64)>,
}

impl Driver<'_> {
    fn evaluate(&mut self, temperature: f64) -> FlashResult<Evaluation> {
        let vle = isothermal_flash(
            self.eos,
            temperature,
            self.pressure,
            &self.feed,
            self.options,
            self.warm_k.as_ref(),
        )?;
        if vle.two_phase {
            self.warm_k = Some(vle.k_values);
        }
        let me = mixture_enthalpy(
            self.eos,
            self.models,
            temperature,
            self.pressure,
            vle.beta,
            &vle.liquid,
            &vle.vapor,
        )?;
        if !vle.two_phase {
            if vle.beta == 0.0 && me.enthalpy < self.enthalpy_spec {
                if self.bracket_liquid.is_none_or(|(t, _)| temperature > t) {
                    self.bracket_liquid = Some((temperature, me.enthalpy));
                }
            } else if vle.beta == 1.0 && me.enthalpy > self.enthalpy_spec {
                if self.bracket_vapor.is_none_or(|(t, _)| temperature < t) {
                    self.bracket_vapor = Some((temperature, me.enthalpy));
                }
            }
        }
        Ok(Evaluation {
            vle,
            enthalpy: me.enthalpy,
            enthalpy_liquid: me.liquid,
            enthalpy_vapor: me.vapor,
            z_liquid: me.z_liquid,
            z_vapor: me.z_vapor,
        })
    }
}

fn flash_once(
    eos: &PengRobinson,
    models: &[EnthalpyModel; NC],
    feed: &Composition,
    pressure: f64,
    enthalpy_spec: f64,
    options: &FlashOptions,
) -> FlashResult<FlashState> {
    let verbosity = options.verbosity;
    let nearly_pure = feed.max() >= NEARLY_PURE;
    let mut driver = Driver {
        eos,
        models,
        feed: *feed,
        pressure,
        enthalpy_spec,
        options,
        warm_k: None,
        bracket_liquid: None,
        bracket_vapor: None,
    };

    let mut temperature = match options.initial_temperature {
        Some(t) => clip(t, T_MIN, T_MAX),
        None => estimate_initial_temperature(models, feed, pressure, enthalpy_spec),
    };
    log_iter!(
        verbosity,
        "ph flash: P = {pressure:.1} Pa, H* = {enthalpy_spec:.2} J/mol, T0 = {temperature:.4} K"
    );
    log_iter!(
        verbosity,
        " iter | temperature |    residual    |   beta   | condition"
    );

    let mut evaluation = driver.evaluate(temperature)?;
    let mut error_history: Vec<f64> = Vec::with_capacity(MAX_ITER_OUTER);
    let mut stagnation = 0usize;

    for iteration in 1..=MAX_ITER_OUTER {
        let condition = OperatingCondition::classify(temperature, pressure, feed);
        let tolerance = condition.enthalpy_tolerance(options);
        let residual = enthalpy_spec - evaluation.enthalpy;
        error_history.push(residual.abs());
        log_iter!(
            verbosity,
            " {:4} | {:11.4} | {:14.8e} | {:.6} | {:?}",
            iteration,
            temperature,
            residual,
            evaluation.vle.beta,
            condition
        );

        if residual.abs() <= tolerance {
            log_result!(
                verbosity,
                "ph flash: converged in {iteration} iteration(s), T = {temperature:.4} K"
            );
            let state = build_state(
                feed,
                pressure,
                enthalpy_spec,
                temperature,
                &evaluation,
                iteration,
                condition,
            );
            validate_solution(&state)?;
            return Ok(state);
        }

        // a pure-component target inside the two-phase dome cannot be
        // reached by the temperature iteration: H(T) jumps at saturation;
        // resolve beta at the bracketed saturation point instead
        if nearly_pure {
            if let (Some((t_liquid, _)), Some((t_vapor, _))) =
                (driver.bracket_liquid, driver.bracket_vapor)
            {
                if t_liquid < t_vapor && t_vapor - t_liquid <= SATURATION_WINDOW {
                    if let Some(state) = saturation_split(
                        &driver,
                        t_liquid,
                        t_vapor,
                        iteration,
                        condition.enthalpy_tolerance(options),
                    )? {
                        log_result!(
                            verbosity,
                            "ph flash: saturation split at T = {:.4} K, beta = {:.6}",
                            state.temperature,
                            state.vapor_fraction
                        );
                        return Ok(state);
                    }
                }
            }
        }

        let dhdt = enthalpy_derivative(
            eos,
            models,
            temperature,
            pressure,
            evaluation.vle.beta,
            &evaluation.vle.liquid,
            &evaluation.vle.vapor,
            options,
        )?;
        let newton = clip(residual / dhdt, -MAX_NEWTON_STEP, MAX_NEWTON_STEP);
        if !newton.is_finite() {
            return Err(PhError::NewtonFailure(format!(
                "step {newton} from residual {residual:e} and dH/dT {dhdt:e}"
            )));
        }

        // initial damping, coordinated with inner-loop Anderson failures
        // and throttled by the error history after stagnating steps
        let mut tau = coordinated_damping(options.damping, evaluation.vle.anderson_failures);
        if stagnation > 0 {
            tau *= adaptive_damping(iteration, &error_history);
        }

        let mut accepted: Option<(f64, Evaluation)> = None;
        let mut stagnating = false;
        if options.use_line_search {
            for factor in LINE_SEARCH_TAUS {
                let trial = clip(temperature + factor * tau * newton, T_MIN, T_MAX);
                if (trial - temperature).abs() < f64::EPSILON {
                    continue;
                }
                if let Ok(e) = driver.evaluate(trial) {
                    if (enthalpy_spec - e.enthalpy).abs() < residual.abs() {
                        accepted = Some((trial, e));
                        break;
                    }
                }
            }
            if accepted.is_none() {
                // no reduction found: take the smallest step regardless
                stagnating = true;
                let trial = clip(
                    temperature + LINE_SEARCH_TAUS[4] * tau * newton,
                    T_MIN,
                    T_MAX,
                );
                let e = driver.evaluate(trial)?;
                accepted = Some((trial, e));
            }
        } else {
            let trial = clip(temperature + tau * newton, T_MIN, T_MAX);
            let e = driver.evaluate(trial)?;
            if (enthalpy_spec - e.enthalpy).abs() >= residual.abs() {
                stagnating = true;
            }
            accepted = Some((trial, e));
        }

        let (next_temperature, next_evaluation) =
            accepted.ok_or_else(|| PhError::LineSearchFailure("no trial accepted".to_string()))?;
        let step = (next_temperature - temperature).abs();
        temperature = next_temperature;
        evaluation = next_evaluation;

        if stagnating || step < TOL_TEMP {
            stagnation += 1;
        } else {
            stagnation = 0;
        }
        if stagnation >= MAX_STAGNATION {
            return Err(PhError::Stagnation("outer temperature loop".to_string()));
        }
    }
    Err(PhError::MaxIterations("outer temperature loop".to_string()))
}

/// Initial temperature from inverting the ideal-gas mixture enthalpy.
///
/// When the inversion saturates at the lower clamp the target is dominated
/// by a liquid departure the ideal model cannot represent; the
/// feed-weighted Wilson boiling estimate seeds the iteration instead.
fn estimate_initial_temperature(
    models: &[EnthalpyModel; NC],
    feed: &Composition,
    pressure: f64,
    enthalpy_spec: f64,
) -> f64 {
    let mut temperature = crate::T_REFERENCE;
    for _ in 0..30 {
        let residual = ideal_gas_mixture_enthalpy(models, temperature, feed) - enthalpy_spec;
        let cp = ideal_gas_mixture_heat_capacity(models, temperature, feed).max(1.0);
        let step = residual / cp;
        temperature = clip(temperature - step, T_MIN, T_MAX);
        if step.abs() < 0.01 {
            break;
        }
    }
    if temperature <= T_MIN + 1.0 {
        let props = critical_properties();
        let mut boiling = 0.0;
        for i in 0..NC {
            if feed[i] > TRACE_FEED {
                let slope = 5.373 * (1.0 + props[i].acentric_factor);
                let denominator = 1.0 - (pressure / props[i].pc).ln() / slope;
                let tb = if denominator > 0.1 {
                    props[i].tc / denominator
                } else {
                    props[i].tc
                };
                boiling += feed[i] * tb;
            }
        }
        temperature = clip(boiling, T_MIN, T_MAX);
    }
    temperature
}

// Resolve a nearly pure feed at its saturation temperature: bisect the
// total fugacity imbalance g(T) = sum z_i (ln phi_L,i - ln phi_V,i) inside
// the bracket and apply the enthalpy lever rule between the two roots.
fn saturation_split(
    driver: &Driver,
    t_liquid: f64,
    t_vapor: f64,
    iterations: usize,
    tolerance: f64,
) -> FlashResult<Option<FlashState>> {
    struct SaturationPoint {
        g: f64,
        z_liquid: f64,
        z_vapor: f64,
        ln_phi_liquid: Composition,
        ln_phi_vapor: Composition,
    }
    let eval = |t: f64| -> FlashResult<Option<SaturationPoint>> {
        let mix = driver.eos.mixture_parameters(t, &driver.feed)?;
        let (z_l, z_v) = driver
            .eos
            .compressibility_roots(t, driver.pressure, &mix)?;
        if z_v - z_l < 1.0e-9 {
            return Ok(None);
        }
        let ln_phi_l = driver.eos.ln_phi_with_root(t, driver.pressure, &mix, z_l)?;
        let ln_phi_v = driver.eos.ln_phi_with_root(t, driver.pressure, &mix, z_v)?;
        Ok(Some(SaturationPoint {
            g: driver.feed.dot(&(ln_phi_l - ln_phi_v)),
            z_liquid: z_l,
            z_vapor: z_v,
            ln_phi_liquid: ln_phi_l,
            ln_phi_vapor: ln_phi_v,
        }))
    };

    let (Some(low), Some(high)) = (eval(t_liquid)?, eval(t_vapor)?) else {
        return Ok(None);
    };
    if !(low.g < 0.0 && high.g > 0.0) {
        return Ok(None);
    }

    let mut lo = t_liquid;
    let mut hi = t_vapor;
    let mut best_t = 0.5 * (lo + hi);
    let mut best: Option<SaturationPoint> = None;
    for _ in 0..80 {
        let mid = 0.5 * (lo + hi);
        match eval(mid)? {
            Some(point) => {
                let g = point.g;
                if best.as_ref().is_none_or(|b| g.abs() < b.g.abs()) {
                    best_t = mid;
                    best = Some(point);
                }
                if g < 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            // single root between the brackets: classify by its magnitude
            None => {
                let mix = driver.eos.mixture_parameters(mid, &driver.feed)?;
                let (z_l, _) = driver
                    .eos
                    .compressibility_roots(mid, driver.pressure, &mix)?;
                if z_l > 0.3 {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
        }
        if hi - lo < 1.0e-12 {
            break;
        }
    }
    let Some(point) = best else {
        return Ok(None);
    };

    let t_sat = best_t;
    let mix = driver.eos.mixture_parameters(t_sat, &driver.feed)?;
    let h_ideal = ideal_gas_mixture_enthalpy(driver.models, t_sat, &driver.feed);
    let h_liquid = h_ideal
        + driver
            .eos
            .enthalpy_departure(t_sat, driver.pressure, &mix, point.z_liquid)?;
    let h_vapor = h_ideal
        + driver
            .eos
            .enthalpy_departure(t_sat, driver.pressure, &mix, point.z_vapor)?;
    if h_vapor - h_liquid <= tolerance
        || driver.enthalpy_spec < h_liquid - tolerance
        || driver.enthalpy_spec > h_vapor + tolerance
    {
        return Ok(None);
    }
    let beta = clip((driver.enthalpy_spec - h_liquid) / (h_vapor - h_liquid), 0.0, 1.0);
    let k_values = Composition::from_fn(|i, _| (point.ln_phi_liquid[i] - point.ln_phi_vapor[i]).exp());

    let state = FlashState {
        temperature: t_sat,
        pressure: driver.pressure,
        vapor_fraction: beta,
        feed: driver.feed,
        liquid: driver.feed,
        vapor: driver.feed,
        k_values,
        enthalpy_spec: driver.enthalpy_spec,
        enthalpy: (1.0 - beta) * h_liquid + beta * h_vapor,
        enthalpy_liquid: h_liquid,
        enthalpy_vapor: h_vapor,
        z_liquid: point.z_liquid,
        z_vapor: point.z_vapor,
        ln_phi_liquid: point.ln_phi_liquid,
        ln_phi_vapor: point.ln_phi_vapor,
        iterations,
        condition: OperatingCondition::classify(t_sat, driver.pressure, &driver.feed),
    };
    validate_solution(&state)?;
    Ok(Some(state))
}

fn build_state(
    feed: &Composition,
    pressure: f64,
    enthalpy_spec: f64,
    temperature: f64,
    evaluation: &Evaluation,
    iterations: usize,
    condition: OperatingCondition,
) -> FlashState {
    FlashState {
        temperature,
        pressure,
        vapor_fraction: evaluation.vle.beta,
        feed: *feed,
        liquid: evaluation.vle.liquid,
        vapor: evaluation.vle.vapor,
        k_values: evaluation.vle.k_values,
        enthalpy_spec,
        enthalpy: evaluation.enthalpy,
        enthalpy_liquid: evaluation.enthalpy_liquid,
        enthalpy_vapor: evaluation.enthalpy_vapor,
        z_liquid: evaluation.z_liquid,
        z_vapor: evaluation.z_vapor,
        ln_phi_liquid: evaluation.vle.ln_phi_liquid,
        ln_phi_vapor: evaluation.vle.ln_phi_vapor,
        iterations,
        condition,
    }
}

// Physical consistency of a converged state: composition sums, mass
// balance, fugacity balance and root ordering.
fn validate_solution(state: &FlashState) -> FlashResult<()> {
    for (composition, name) in [(&state.liquid, "liquid"), (&state.vapor, "vapor")] {
        if (composition.sum() - 1.0).abs() > 1.0e-6 {
            return Err(PhError::InvalidComposition(format!(
                "{name} composition sums to {}",
                composition.sum()
            )));
        }
        if composition.iter().any(|x| *x < -1.0e-10) {
            return Err(PhError::NegativeComposition(format!("{name} composition")));
        }
    }
    if !(0.0..=1.0).contains(&state.vapor_fraction) {
        return Err(PhError::InvalidPhase(format!(
            "vapor fraction {}",
            state.vapor_fraction
        )));
    }
    let beta = state.vapor_fraction;
    let mass_balance = (0..NC)
        .map(|i| {
            (state.feed[i] - (1.0 - beta) * state.liquid[i] - beta * state.vapor[i]).abs()
        })
        .fold(0.0, f64::max);
    if mass_balance > 1.0e-8 {
        return Err(PhError::ImpossibleState(format!(
            "mass balance residual {mass_balance:e}"
        )));
    }
    if state.is_two_phase() {
        let mut imbalance: f64 = 0.0;
        for i in 0..NC {
            // trace components of a saturation split carry x = y = z and
            // cannot balance exactly; they are excluded here
            if state.feed[i] > 1.0e-6 {
                imbalance = imbalance.max(
                    (state.ln_phi_liquid[i] + state.liquid[i].ln()
                        - state.ln_phi_vapor[i]
                        - state.vapor[i].ln())
                    .abs(),
                );
            }
        }
        if imbalance > 5.0 * TOL_FUGACITY {
            return Err(PhError::FugacityImbalance(imbalance));
        }
        if state.z_vapor <= state.z_liquid {
            return Err(PhError::InvalidPhase(format!(
                "Z_V = {} not above Z_L = {}",
                state.z_vapor, state.z_liquid
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Component;

    #[test]
    fn input_validation_codes() {
        let options = FlashOptions::default();
        let bad_sum = Composition::from([0.5, 0.4, 0.0, 0.0, 0.0]);
        assert_eq!(
            flash_calculate(&bad_sum, 1.0e5, 0.0, &options)
                .unwrap_err()
                .code(),
            -102
        );
        let negative = Composition::from([1.1, -0.1, 0.0, 0.0, 0.0]);
        assert_eq!(
            flash_calculate(&negative, 1.0e5, 0.0, &options)
                .unwrap_err()
                .code(),
            -102
        );
        let z = Composition::from([0.5, 0.5, 0.0, 0.0, 0.0]);
        assert_eq!(
            flash_calculate(&z, 10.0, 0.0, &options).unwrap_err().code(),
            -103
        );
        assert_eq!(
            flash_calculate(&z, 1.0e9, 0.0, &options)
                .unwrap_err()
                .code(),
            -103
        );
        assert_eq!(
            flash_calculate(&z, 1.0e5, 2.0e7, &options)
                .unwrap_err()
                .code(),
            -105
        );
        assert_eq!(
            flash_calculate(&z, 1.0e5, f64::NAN, &options)
                .unwrap_err()
                .code(),
            -105
        );
    }

    #[test]
    fn initial_estimate_inverts_ideal_gas_enthalpy() {
        let models = enthalpy_models();
        let z = {
            let mut z = Composition::zeros();
            z[Component::Nitrogen.index()] = 1.0;
            z
        };
        // H* = 0 corresponds to the reference temperature
        let t = estimate_initial_temperature(&models, &z, 1.0e5, 0.0);
        assert!((t - crate::T_REFERENCE).abs() < 0.5);
        // a mildly positive target lands above the reference
        let t = estimate_initial_temperature(&models, &z, 1.0e5, 3.0e3);
        assert!(t > 350.0 && t < 450.0);
    }

    #[test]
    fn initial_estimate_falls_back_to_boiling_point() {
        let models = enthalpy_models();
        let z = {
            let mut z = Composition::zeros();
            z[Component::Water.index()] = 1.0;
            z
        };
        // far below anything the ideal gas can represent
        let t = estimate_initial_temperature(&models, &z, 101325.0, -4.0e4);
        assert!(t > 300.0 && t < 450.0, "T0 = {t}");
    }

    #[test]
    fn estimate_respects_clamps() {
        let models = enthalpy_models();
        let z = {
            let mut z = Composition::zeros();
            z[Component::Hydrogen.index()] = 1.0;
            z
        };
        let t = estimate_initial_temperature(&models, &z, 1.0e5, 9.9e6);
        assert!(t <= T_MAX);
    }
}
