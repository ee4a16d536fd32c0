//! The Peng-Robinson equation-of-state kernel.
//!
//! Covers pure-component parameters with the hydrogen quantum correction,
//! the van der Waals one-fluid mixing rules with their analytic temperature
//! derivatives, the cubic compressibility solve with spurious-root
//! rejection, fugacity coefficients and the enthalpy departure.

use crate::components::{BipSource, Component, NC, critical_properties};
use crate::{Composition, FlashResult, PhError, R_GAS};
use nalgebra::SMatrix;
use std::f64::consts::SQRT_2;

/// Guard width of the logarithm in the fugacity expression.
const LOG_GUARD: f64 = 1.0e-12;
/// Relative width below which the cubic discriminant counts as degenerate.
const DEGENERATE_DISCRIMINANT: f64 = 1.0e-14;

/// Phase label used to select cubic roots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Liquid,
    Vapor,
}

/// Pure-component PR parameters at one temperature.
struct PureParameters {
    a: [f64; NC],
    b: [f64; NC],
    da_dt: [f64; NC],
    d2a_dt2: [f64; NC],
    tc_used: [f64; NC],
    pc_used: [f64; NC],
}

/// Mixture PR parameters for one (temperature, composition) pair.
///
/// `a_partial[i]` is the composition sum `sum_j x_j sqrt(a_i a_j)(1-k_ij)`
/// that enters the fugacity-coefficient expression.
#[derive(Debug)]
pub struct MixtureParameters {
    pub a_pure: [f64; NC],
    pub b_pure: [f64; NC],
    pub a_mix: f64,
    pub b_mix: f64,
    pub da_dt: f64,
    pub d2a_dt2: f64,
    pub a_partial: [f64; NC],
    pub tc_used: [f64; NC],
    pub pc_used: [f64; NC],
}

/// The Peng-Robinson equation of state for the fixed component set.
pub struct PengRobinson {
    k_ij: SMatrix<f64, NC, NC>,
    use_quantum_h2: bool,
}

impl PengRobinson {
    /// Create the equation of state from a BIP source.
    pub fn new(bip_source: &BipSource, use_quantum_h2: bool) -> FlashResult<Self> {
        Ok(Self {
            k_ij: bip_source.matrix()?,
            use_quantum_h2,
        })
    }

    /// Temperature-dependent effective critical point of hydrogen in the
    /// Prausnitz-Gunn form. Approaches the quantum-gas classical constants
    /// (43.6 K, 20.5 atm) at elevated temperature.
    pub fn h2_effective_criticals(temperature: f64) -> (f64, f64) {
        const TC0: f64 = 43.6;
        const PC0: f64 = 20.5 * 101325.0;
        const C_TC: f64 = 21.8;
        const C_PC: f64 = 44.2;
        let mw = critical_properties()[Component::Hydrogen.index()].molar_weight;
        let tc = TC0 / (1.0 + C_TC / (mw * temperature));
        let pc = PC0 / (1.0 + C_PC / (mw * temperature));
        (tc, pc)
    }

    fn m_factor(acentric_factor: f64) -> f64 {
        if acentric_factor <= 0.49 {
            0.37464 + (1.54226 - 0.26992 * acentric_factor) * acentric_factor
        } else {
            // 1978 extension for heavy components
            0.379642
                + (1.48503 - (0.164423 - 0.016666 * acentric_factor) * acentric_factor)
                    * acentric_factor
        }
    }

    fn pure_parameters(&self, temperature: f64) -> FlashResult<PureParameters> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(PhError::InvalidTemperature(temperature));
        }
        let props = critical_properties();
        let mut p = PureParameters {
            a: [0.0; NC],
            b: [0.0; NC],
            da_dt: [0.0; NC],
            d2a_dt2: [0.0; NC],
            tc_used: [0.0; NC],
            pc_used: [0.0; NC],
        };
        for i in 0..NC {
            let (tc, pc) = if i == Component::Hydrogen.index() && self.use_quantum_h2 {
                Self::h2_effective_criticals(temperature)
            } else {
                (props[i].tc, props[i].pc)
            };
            let m = Self::m_factor(props[i].acentric_factor);
            let ac = 0.45724 * R_GAS * R_GAS * tc * tc / pc;
            let s = (temperature / tc).sqrt();
            let u = 1.0 + m * (1.0 - s);
            p.a[i] = ac * u * u;
            p.b[i] = 0.07780 * R_GAS * tc / pc;
            p.da_dt[i] = -ac * m * s * u / temperature;
            p.d2a_dt2[i] = ac * m * s * (1.0 + m) / (2.0 * temperature * temperature);
            p.tc_used[i] = tc;
            p.pc_used[i] = pc;
        }
        Ok(p)
    }

    /// Van der Waals one-fluid mixing rules with analytic dT derivatives.
    pub fn mixture_parameters(
        &self,
        temperature: f64,
        composition: &Composition,
    ) -> FlashResult<MixtureParameters> {
        if composition.iter().any(|x| !x.is_finite() || *x < -1.0e-12) {
            return Err(PhError::NegativeComposition(
                "mixture parameters".to_string(),
            ));
        }
        let pure = self.pure_parameters(temperature)?;
        let mut mix = MixtureParameters {
            a_pure: pure.a,
            b_pure: pure.b,
            a_mix: 0.0,
            b_mix: 0.0,
            da_dt: 0.0,
            d2a_dt2: 0.0,
            a_partial: [0.0; NC],
            tc_used: pure.tc_used,
            pc_used: pure.pc_used,
        };
        let x: [f64; NC] = std::array::from_fn(|i| composition[i].max(0.0));
        for i in 0..NC {
            mix.b_mix += x[i] * pure.b[i];
            for j in 0..NC {
                let factor = 1.0 - self.k_ij[(i, j)];
                let g = (pure.a[i] * pure.a[j]).sqrt();
                let a_ij = g * factor;
                mix.a_partial[i] += x[j] * a_ij;
                let num = pure.da_dt[i] * pure.a[j] + pure.a[i] * pure.da_dt[j];
                let gp = num / (2.0 * g);
                let num_p = pure.d2a_dt2[i] * pure.a[j]
                    + 2.0 * pure.da_dt[i] * pure.da_dt[j]
                    + pure.a[i] * pure.d2a_dt2[j];
                let gpp = num_p / (2.0 * g) - gp * gp / g;
                let w = x[i] * x[j] * factor;
                mix.a_mix += w * g;
                mix.da_dt += w * gp;
                mix.d2a_dt2 += w * gpp;
            }
        }
        if mix.b_mix <= 0.0 || mix.a_mix <= 0.0 {
            return Err(PhError::InvalidResult(
                "nonpositive mixture parameters".to_string(),
            ));
        }
        Ok(mix)
    }

    fn dimensionless(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
    ) -> FlashResult<(f64, f64)> {
        let rt = R_GAS * temperature;
        let a = mix.a_mix * pressure / (rt * rt);
        let b = mix.b_mix * pressure / rt;
        if !(a > 0.0) || !(b > 0.0) {
            return Err(PhError::InvalidResult(format!(
                "cubic coefficients A = {a:e}, B = {b:e} must be positive"
            )));
        }
        Ok((a, b))
    }

    /// Solve the PR cubic in Z and return the liquid (smallest) and vapor
    /// (largest) physical roots. A single real root is returned for both.
    pub fn solve_cubic(a: f64, b: f64) -> FlashResult<(f64, f64)> {
        if !(a > 0.0) || !(b > 0.0) {
            return Err(PhError::InvalidResult(format!(
                "cubic coefficients A = {a:e}, B = {b:e} must be positive"
            )));
        }
        // z^3 + c2 z^2 + c1 z + c0 = 0
        let c2 = -(1.0 - b);
        let c1 = a - 3.0 * b * b - 2.0 * b;
        let c0 = -(a * b - b * b - b * b * b);

        // depressed cubic t^3 + p t + q with z = t - c2/3
        let shift = -c2 / 3.0;
        let p = c1 - c2 * c2 / 3.0;
        let q = 2.0 * c2 * c2 * c2 / 27.0 - c2 * c1 / 3.0 + c0;
        let half_q = 0.5 * q;
        let third_p = p / 3.0;
        let disc = half_q * half_q + third_p * third_p * third_p;
        let scale = (half_q * half_q).abs() + (third_p * third_p * third_p).abs();

        let mut roots = [0.0; 3];
        let n_roots;
        if disc.abs() < DEGENERATE_DISCRIMINANT * scale.max(f64::MIN_POSITIVE) || disc >= 0.0 {
            // near-degenerate discriminants take the single-root branch so
            // that rounding noise cannot fabricate or destroy roots
            let d = disc.max(0.0).sqrt();
            roots[0] = (-half_q + d).cbrt() + (-half_q - d).cbrt() + shift;
            n_roots = 1;
        } else {
            let m = (-third_p).sqrt();
            let theta = (-half_q / (m * m * m)).clamp(-1.0, 1.0).acos();
            for (k, root) in roots.iter_mut().enumerate() {
                let phi = (theta - 2.0 * std::f64::consts::PI * k as f64) / 3.0;
                *root = 2.0 * m * phi.cos() + shift;
            }
            n_roots = 3;
        }

        // reject roots at or below the covolume
        let mut z_min = f64::INFINITY;
        let mut z_max = f64::NEG_INFINITY;
        for &z in roots.iter().take(n_roots) {
            if z.is_finite() && z - b > LOG_GUARD {
                z_min = z_min.min(z);
                z_max = z_max.max(z);
            }
        }
        if !z_min.is_finite() {
            return Err(PhError::EosFailure(format!(
                "no physical compressibility root for A = {a:e}, B = {b:e}"
            )));
        }
        Ok((z_min, z_max))
    }

    /// Liquid and vapor compressibility roots of a mixture.
    pub fn compressibility_roots(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
    ) -> FlashResult<(f64, f64)> {
        let (a, b) = self.dimensionless(temperature, pressure, mix)?;
        Self::solve_cubic(a, b)
    }

    /// Compressibility of the requested phase.
    pub fn compressibility(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
        phase: Phase,
    ) -> FlashResult<f64> {
        let (z_l, z_v) = self.compressibility_roots(temperature, pressure, mix)?;
        Ok(match phase {
            Phase::Liquid => z_l,
            Phase::Vapor => z_v,
        })
    }

    /// Fugacity coefficients (as ln phi) for a known compressibility root.
    pub fn ln_phi_with_root(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
        z_factor: f64,
    ) -> FlashResult<Composition> {
        let (a, b) = self.dimensionless(temperature, pressure, mix)?;
        if z_factor - b <= LOG_GUARD {
            return Err(PhError::InvalidResult(format!(
                "log guard: Z = {z_factor:e} too close to B = {b:e}"
            )));
        }
        let ln_z_b = (z_factor - b).ln();
        let l = ((z_factor + (1.0 + SQRT_2) * b) / (z_factor + (1.0 - SQRT_2) * b)).ln();
        let prefactor = a / (2.0 * SQRT_2 * b);
        Ok(Composition::from_fn(|i, _| {
            let bi = mix.b_pure[i] / mix.b_mix;
            bi * (z_factor - 1.0)
                - ln_z_b
                - prefactor * (2.0 * mix.a_partial[i] / mix.a_mix - bi) * l
        }))
    }

    /// Fugacity coefficients of the requested phase at (T, P, composition).
    pub fn ln_phi(
        &self,
        temperature: f64,
        pressure: f64,
        composition: &Composition,
        phase: Phase,
    ) -> FlashResult<(Composition, f64)> {
        let mix = self.mixture_parameters(temperature, composition)?;
        let z = self.compressibility(temperature, pressure, &mix, phase)?;
        let ln_phi = self.ln_phi_with_root(temperature, pressure, &mix, z)?;
        Ok((ln_phi, z))
    }

    /// Enthalpy departure from the ideal gas at the same (T, composition)
    /// in J/mol.
    pub fn enthalpy_departure(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
        z_factor: f64,
    ) -> FlashResult<f64> {
        let (_, b) = self.dimensionless(temperature, pressure, mix)?;
        if z_factor - b <= LOG_GUARD {
            return Err(PhError::InvalidResult(format!(
                "log guard: Z = {z_factor:e} too close to B = {b:e}"
            )));
        }
        let l = ((z_factor + (1.0 + SQRT_2) * b) / (z_factor + (1.0 - SQRT_2) * b)).ln();
        Ok(R_GAS * temperature * (z_factor - 1.0)
            + (temperature * mix.da_dt - mix.a_mix) / (2.0 * SQRT_2 * mix.b_mix) * l)
    }

    /// Temperature derivative of the enthalpy departure with the
    /// compressibility held fixed. The adaptive numeric cross-check of the
    /// enthalpy aggregator absorbs the omitted dZ/dT contribution.
    pub(crate) fn departure_derivative(
        &self,
        temperature: f64,
        pressure: f64,
        mix: &MixtureParameters,
        z_factor: f64,
    ) -> FlashResult<f64> {
        let (_, b) = self.dimensionless(temperature, pressure, mix)?;
        let l = ((z_factor + (1.0 + SQRT_2) * b) / (z_factor + (1.0 - SQRT_2) * b)).ln();
        Ok(R_GAS * (z_factor - 1.0)
            + temperature * mix.d2a_dt2 / (2.0 * SQRT_2 * mix.b_mix) * l)
    }

    /// Fugacity coefficients of the thermodynamically stable root at
    /// (T, P, composition), selected by the lower normalized Gibbs energy.
    /// A single cubic root counts as vapor-like.
    pub fn stable_root(
        &self,
        temperature: f64,
        pressure: f64,
        composition: &Composition,
    ) -> FlashResult<(Composition, f64, Phase)> {
        let mix = self.mixture_parameters(temperature, composition)?;
        let (z_l, z_v) = self.compressibility_roots(temperature, pressure, &mix)?;
        if z_v - z_l < 1.0e-9 {
            let ln_phi = self.ln_phi_with_root(temperature, pressure, &mix, z_v)?;
            return Ok((ln_phi, z_v, Phase::Vapor));
        }
        let ln_phi_l = self.ln_phi_with_root(temperature, pressure, &mix, z_l)?;
        let ln_phi_v = self.ln_phi_with_root(temperature, pressure, &mix, z_v)?;
        let g_l = composition.dot(&ln_phi_l);
        let g_v = composition.dot(&ln_phi_v);
        if g_l < g_v {
            Ok((ln_phi_l, z_l, Phase::Liquid))
        } else {
            Ok((ln_phi_v, z_v, Phase::Vapor))
        }
    }
}
