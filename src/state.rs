use crate::{Composition, OperatingCondition};
use std::fmt;

/// The fully populated result of a P-H flash calculation.
///
/// All intensive quantities are molar and in SI units (K, Pa, J/mol).
/// For single-phase results the vapor fraction is exactly 0 or 1 and the
/// composition of the absent phase is the incipient one implied by the
/// final K-values.
#[derive(Debug, Clone)]
pub struct FlashState {
    /// temperature in K
    pub temperature: f64,
    /// pressure in Pa
    pub pressure: f64,
    /// vapor mole fraction in [0, 1]
    pub vapor_fraction: f64,
    /// feed composition
    pub feed: Composition,
    /// liquid composition
    pub liquid: Composition,
    /// vapor composition
    pub vapor: Composition,
    /// K-values y/x
    pub k_values: Composition,
    /// specified enthalpy in J/mol
    pub enthalpy_spec: f64,
    /// computed mixture enthalpy in J/mol
    pub enthalpy: f64,
    /// liquid-phase enthalpy in J/mol
    pub enthalpy_liquid: f64,
    /// vapor-phase enthalpy in J/mol
    pub enthalpy_vapor: f64,
    /// liquid compressibility factor
    pub z_liquid: f64,
    /// vapor compressibility factor
    pub z_vapor: f64,
    /// liquid-phase fugacity coefficients as ln(phi)
    pub ln_phi_liquid: Composition,
    /// vapor-phase fugacity coefficients as ln(phi)
    pub ln_phi_vapor: Composition,
    /// outer-loop iterations used
    pub iterations: usize,
    /// operating-condition classification at the solution
    pub condition: OperatingCondition,
}

impl FlashState {
    /// Whether both phases are present.
    pub fn is_two_phase(&self) -> bool {
        self.vapor_fraction > 0.0 && self.vapor_fraction < 1.0
    }
}

impl fmt::Display for FlashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "T = {:.4} K, P = {:.1} Pa, beta = {:.6}",
            self.temperature, self.pressure, self.vapor_fraction
        )?;
        writeln!(
            f,
            "H = {:.2} J/mol (spec {:.2}), H_L = {:.2}, H_V = {:.2}",
            self.enthalpy, self.enthalpy_spec, self.enthalpy_liquid, self.enthalpy_vapor
        )?;
        writeln!(f, "Z_L = {:.6}, Z_V = {:.6}", self.z_liquid, self.z_vapor)?;
        writeln!(f, "x = {:.6?}", self.liquid.as_slice())?;
        writeln!(f, "y = {:.6?}", self.vapor.as_slice())?;
        write!(f, "iterations: {}", self.iterations)
    }
}
