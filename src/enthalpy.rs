//! Ideal-gas enthalpy models and the enthalpy aggregator.
//!
//! Each component carries a Shomate coefficient set with its validity range
//! and a NASA-7 set used outside that range. The enthalpy scale is the
//! ideal-gas sensible enthalpy, zero at 298.15 K; continuity offsets
//! computed at model construction make the two polynomial branches agree
//! exactly at the range boundaries. Phase enthalpies add the PR departure
//! to the ideal-gas mixture value.

use crate::eos::{PengRobinson, Phase};
use crate::{Composition, FlashOptions, FlashResult, NC, PhError, R_GAS, T_REFERENCE, log_result};

/// Piecewise ideal-gas enthalpy model of one component.
///
/// Shomate is used inside `[t_min, t_max]`, NASA-7 (with a continuity
/// offset) outside.
#[derive(Clone, Debug)]
pub struct EnthalpyModel {
    /// Shomate coefficients A..F, H
    shomate: [f64; 7],
    /// NASA-7 coefficients a1..a7
    nasa7: [f64; 7],
    /// lower bound of the Shomate range in K
    pub t_min: f64,
    /// upper bound of the Shomate range in K
    pub t_max: f64,
    offset_low: f64,
    offset_high: f64,
}

impl EnthalpyModel {
    fn new(shomate: [f64; 7], nasa7: [f64; 7], t_min: f64, t_max: f64) -> Self {
        let mut model = Self {
            shomate,
            nasa7,
            t_min,
            t_max,
            offset_low: 0.0,
            offset_high: 0.0,
        };
        model.ensure_continuity();
        model
    }

    // Match the NASA-7 branch to the Shomate branch at both range
    // boundaries so that H(T) is continuous across the switchover.
    fn ensure_continuity(&mut self) {
        self.offset_low = self.shomate_enthalpy(self.t_min) - self.nasa7_sensible(self.t_min);
        self.offset_high = self.shomate_enthalpy(self.t_max) - self.nasa7_sensible(self.t_max);
    }

    // H(T) - H(298.15) in J/mol from the Shomate form, t = T/1000
    fn shomate_enthalpy(&self, temperature: f64) -> f64 {
        let [a, b, c, d, e, f, h] = self.shomate;
        let t = temperature / 1000.0;
        1000.0
            * (a * t + b * t * t / 2.0 + c * t * t * t / 3.0 + d * t * t * t * t / 4.0 - e / t + f
                - h)
    }

    fn shomate_heat_capacity(&self, temperature: f64) -> f64 {
        let [a, b, c, d, e, ..] = self.shomate;
        let t = temperature / 1000.0;
        a + b * t + c * t * t + d * t * t * t + e / (t * t)
    }

    // absolute NASA-7 enthalpy including the integration constant a6
    fn nasa7_enthalpy_raw(&self, t: f64) -> f64 {
        let [a1, a2, a3, a4, a5, a6, _] = self.nasa7;
        R_GAS
            * (t * (a1 + a2 * t / 2.0 + a3 * t * t / 3.0 + a4 * t * t * t / 4.0
                + a5 * t * t * t * t / 5.0)
                + a6)
    }

    fn nasa7_sensible(&self, t: f64) -> f64 {
        self.nasa7_enthalpy_raw(t) - self.nasa7_enthalpy_raw(T_REFERENCE)
    }

    fn nasa7_heat_capacity(&self, t: f64) -> f64 {
        let [a1, a2, a3, a4, a5, ..] = self.nasa7;
        R_GAS * (a1 + a2 * t + a3 * t * t + a4 * t * t * t + a5 * t * t * t * t)
    }

    /// Ideal-gas enthalpy H(T) - H(298.15 K) in J/mol.
    pub fn enthalpy(&self, temperature: f64) -> f64 {
        if temperature < self.t_min {
            self.nasa7_sensible(temperature) + self.offset_low
        } else if temperature > self.t_max {
            self.nasa7_sensible(temperature) + self.offset_high
        } else {
            self.shomate_enthalpy(temperature)
        }
    }

    /// Ideal-gas heat capacity in J/(mol K).
    pub fn heat_capacity(&self, temperature: f64) -> f64 {
        if (self.t_min..=self.t_max).contains(&temperature) {
            self.shomate_heat_capacity(temperature)
        } else {
            self.nasa7_heat_capacity(temperature)
        }
    }
}

/// Build the ideal-gas enthalpy models of all five components.
///
/// Shomate coefficients and ranges follow the NIST WebBook; the NASA-7
/// low-temperature sets follow GRI-Mech 3.0.
pub fn enthalpy_models() -> [EnthalpyModel; NC] {
    [
        // H2
        EnthalpyModel::new(
            [
                33.066178,
                -11.363417,
                11.432816,
                -2.772874,
                -0.158558,
                -9.980797,
                0.0,
            ],
            [
                2.34433112,
                7.98052075e-3,
                -1.9478151e-5,
                2.01572094e-8,
                -7.37611761e-12,
                -917.935173,
                0.683010238,
            ],
            298.0,
            1000.0,
        ),
        // N2
        EnthalpyModel::new(
            [
                28.98641, 1.853978, -9.647459, 16.63537, 0.000117, -8.671914, 0.0,
            ],
            [
                3.298677,
                1.4082404e-3,
                -3.963222e-6,
                5.641515e-9,
                -2.444854e-12,
                -1020.8999,
                3.950372,
            ],
            100.0,
            500.0,
        ),
        // O2
        EnthalpyModel::new(
            [
                31.32234, -20.23531, 57.86644, -36.50624, -0.007374, -8.903471, 0.0,
            ],
            [
                3.78245636,
                -2.99673416e-3,
                9.84730201e-6,
                -9.68129509e-9,
                3.24372837e-12,
                -1063.94356,
                3.65767573,
            ],
            100.0,
            700.0,
        ),
        // NH3
        EnthalpyModel::new(
            [
                19.99563, 49.77119, -15.37599, 1.921168, 0.189174, -53.30667, -45.89806,
            ],
            [
                4.28602740,
                -4.66052300e-3,
                2.17185100e-5,
                -2.28088800e-8,
                8.26380400e-12,
                -6741.72850,
                -0.625372770,
            ],
            298.0,
            1400.0,
        ),
        // H2O
        EnthalpyModel::new(
            [
                30.09200, 6.832514, 6.793435, -2.534480, 0.082139, -250.8810, -241.8264,
            ],
            [
                4.19864056,
                -2.0364341e-3,
                6.52040211e-6,
                -5.48797062e-9,
                1.77197817e-12,
                -30293.7267,
                -0.849032208,
            ],
            500.0,
            1700.0,
        ),
    ]
}

/// Ideal-gas mixture enthalpy in J/mol.
pub fn ideal_gas_mixture_enthalpy(
    models: &[EnthalpyModel; NC],
    temperature: f64,
    composition: &Composition,
) -> f64 {
    (0..NC)
        .map(|i| composition[i] * models[i].enthalpy(temperature))
        .sum()
}

/// Ideal-gas mixture heat capacity in J/(mol K).
pub fn ideal_gas_mixture_heat_capacity(
    models: &[EnthalpyModel; NC],
    temperature: f64,
    composition: &Composition,
) -> f64 {
    (0..NC)
        .map(|i| composition[i] * models[i].heat_capacity(temperature))
        .sum()
}

/// Enthalpy and compressibility of one phase at (T, P, composition).
pub fn phase_enthalpy(
    eos: &PengRobinson,
    models: &[EnthalpyModel; NC],
    temperature: f64,
    pressure: f64,
    composition: &Composition,
    phase: Phase,
) -> FlashResult<(f64, f64)> {
    let mix = eos.mixture_parameters(temperature, composition)?;
    let z_factor = eos.compressibility(temperature, pressure, &mix, phase)?;
    let h_dep = eos.enthalpy_departure(temperature, pressure, &mix, z_factor)?;
    let h = ideal_gas_mixture_enthalpy(models, temperature, composition) + h_dep;
    Ok((h, z_factor))
}

/// Two-phase mixture enthalpy and the per-phase contributions.
pub struct MixtureEnthalpy {
    /// mixture enthalpy (1 - beta) H_L + beta H_V in J/mol
    pub enthalpy: f64,
    pub liquid: f64,
    pub vapor: f64,
    pub z_liquid: f64,
    pub z_vapor: f64,
}

/// Evaluate both phase enthalpies and combine them with the vapor fraction.
pub fn mixture_enthalpy(
    eos: &PengRobinson,
    models: &[EnthalpyModel; NC],
    temperature: f64,
    pressure: f64,
    beta: f64,
    liquid: &Composition,
    vapor: &Composition,
) -> FlashResult<MixtureEnthalpy> {
    let (h_l, z_l) = phase_enthalpy(eos, models, temperature, pressure, liquid, Phase::Liquid)?;
    let (h_v, z_v) = phase_enthalpy(eos, models, temperature, pressure, vapor, Phase::Vapor)?;
    Ok(MixtureEnthalpy {
        enthalpy: (1.0 - beta) * h_l + beta * h_v,
        liquid: h_l,
        vapor: h_v,
        z_liquid: z_l,
        z_vapor: z_v,
    })
}

/// dH/dT of the mixture at fixed compositions and vapor fraction.
///
/// The primary path is analytic: ideal-gas heat capacities plus the
/// da/dT-based departure derivative. When the adaptive cross-check is
/// enabled a central difference of the full enthalpy is compared against
/// the analytic value and replaces it on disagreement above 5%.
#[expect(clippy::too_many_arguments)]
pub fn enthalpy_derivative(
    eos: &PengRobinson,
    models: &[EnthalpyModel; NC],
    temperature: f64,
    pressure: f64,
    beta: f64,
    liquid: &Composition,
    vapor: &Composition,
    options: &FlashOptions,
) -> FlashResult<f64> {
    let phase_derivative = |composition: &Composition, phase: Phase| -> FlashResult<f64> {
        let mix = eos.mixture_parameters(temperature, composition)?;
        let z = eos.compressibility(temperature, pressure, &mix, phase)?;
        let dep = eos.departure_derivative(temperature, pressure, &mix, z)?;
        Ok(ideal_gas_mixture_heat_capacity(models, temperature, composition) + dep)
    };
    let analytic = (1.0 - beta) * phase_derivative(liquid, Phase::Liquid)?
        + beta * phase_derivative(vapor, Phase::Vapor)?;

    let mut value = analytic;
    if options.use_adaptive_derivative {
        let h = options
            .derivative_perturbation
            .unwrap_or_else(|| (1.0e-4 * temperature).max(0.01));
        let hi = mixture_enthalpy(eos, models, temperature + h, pressure, beta, liquid, vapor)?;
        let lo = mixture_enthalpy(eos, models, temperature - h, pressure, beta, liquid, vapor)?;
        let numeric = (hi.enthalpy - lo.enthalpy) / (2.0 * h);
        let magnitude = analytic.abs().max(numeric.abs());
        if (analytic - numeric).abs() > 0.05 * magnitude {
            log_result!(
                options.verbosity,
                "dH/dT: analytic {analytic:.3} J/(mol K) deviates from central difference \
                 {numeric:.3} J/(mol K), using the numerical value"
            );
            value = numeric;
        }
    }
    if !value.is_finite() || !(1.0..=options.max_reasonable_dhdt).contains(&value) {
        return Err(PhError::ImpossibleState(format!(
            "dH/dT = {value:e} J/(mol K) outside [1, {:e}]",
            options.max_reasonable_dhdt
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BipSource, Component};
    use approx::assert_relative_eq;

    fn pure(component: Component) -> Composition {
        let mut z = Composition::zeros();
        z[component.index()] = 1.0;
        z
    }

    #[test]
    fn reference_state_is_zero() {
        for model in enthalpy_models() {
            assert!(
                model.enthalpy(T_REFERENCE).abs() < 150.0,
                "H(298.15) = {}",
                model.enthalpy(T_REFERENCE)
            );
        }
    }

    #[test]
    fn branches_are_continuous_at_range_boundaries() {
        let eps = 1.0e-6;
        for model in enthalpy_models() {
            for t in [model.t_min, model.t_max] {
                let below = model.enthalpy(t - eps);
                let above = model.enthalpy(t + eps);
                assert!(
                    (below - above).abs() <= 1.0,
                    "discontinuity of {} J/mol at {t} K",
                    (below - above).abs()
                );
            }
        }
    }

    #[test]
    fn heat_capacity_is_positive_and_consistent() {
        let models = enthalpy_models();
        for model in &models {
            for t in [60.0, 90.0, 150.0, 250.0, 350.0, 600.0, 1200.0] {
                let cp = model.heat_capacity(t);
                assert!(cp > 10.0 && cp < 100.0, "cp({t}) = {cp}");
            }
            // dH/dT matches cp inside the Shomate range
            let t = 0.5 * (model.t_min + model.t_max);
            let dh = (model.enthalpy(t + 0.5) - model.enthalpy(t - 0.5)) / 1.0;
            assert_relative_eq!(dh, model.heat_capacity(t), max_relative = 1.0e-3);
        }
    }

    #[test]
    fn water_vapor_enthalpy_magnitude() {
        let models = enthalpy_models();
        let h = models[Component::Water.index()].enthalpy(373.15);
        // roughly cp * 75 K
        assert!(h > 2.0e3 && h < 3.2e3, "H = {h}");
    }

    #[test]
    fn derivative_of_vapor_mixture_is_near_cp() {
        let eos = PengRobinson::new(&BipSource::Recommended, true).unwrap();
        let models = enthalpy_models();
        let z = pure(Component::Nitrogen);
        let options = FlashOptions::default();
        let dhdt =
            enthalpy_derivative(&eos, &models, 300.0, 1.0e5, 1.0, &z, &z, &options).unwrap();
        assert_relative_eq!(dhdt, 29.1, max_relative = 0.05);
    }

    #[test]
    fn two_phase_enthalpy_is_the_lever_rule() {
        let eos = PengRobinson::new(&BipSource::Recommended, true).unwrap();
        let models = enthalpy_models();
        let z = pure(Component::Water);
        let me = mixture_enthalpy(&eos, &models, 360.0, 101325.0, 0.25, &z, &z).unwrap();
        assert_relative_eq!(
            me.enthalpy,
            0.75 * me.liquid + 0.25 * me.vapor,
            max_relative = 1.0e-12
        );
        assert!(me.vapor > me.liquid);
        assert!(me.z_vapor > me.z_liquid);
    }
}
