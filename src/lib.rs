#![warn(clippy::all)]
//! Pressure-enthalpy flash calculations for a fixed five-component system
//! (H2, N2, O2, NH3, H2O) described by the Peng-Robinson equation of state.
//!
//! Given a feed composition, a pressure and a target molar enthalpy, the
//! solver determines the temperature and vapor fraction at which the
//! two-phase mixture enthalpy matches the specification and vapor-liquid
//! equilibrium holds. The crate consists of the PR-EOS kernel ([`eos`]),
//! an Anderson accelerator ([`anderson`]), the isothermal VLE solver and
//! the outer temperature loop ([`phase_equilibria`]), and the ideal-gas +
//! departure enthalpy model ([`enthalpy`]).
//!
//! ```
//! use ph_flash::{Composition, FlashOptions, flash_calculate};
//!
//! let z = Composition::from([0.7, 0.3, 0.0, 0.0, 0.0]);
//! let options = FlashOptions::default();
//! let state = flash_calculate(&z, 2.0e6, -1000.0, &options).unwrap();
//! assert!(state.vapor_fraction > 0.99);
//! ```

use serde::{Deserialize, Serialize};

/// Print messages with level `Verbosity::Iter` or higher.
#[macro_export]
macro_rules! log_iter {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::Verbosity::Iter {
            println!($($arg)*);
        }
    }
}

/// Print messages with level `Verbosity::Result` or higher.
#[macro_export]
macro_rules! log_result {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::Verbosity::Result {
            println!($($arg)*);
        }
    }
}

pub mod anderson;
pub mod components;
pub mod enthalpy;
pub mod eos;
mod errors;
pub mod phase_equilibria;
mod state;
pub mod utils;

pub use components::{BipSource, Component, CriticalProperties, NC, critical_properties};
pub use errors::{FlashResult, PhError};
pub use phase_equilibria::{VleSolution, flash_calculate, isothermal_flash};
pub use state::FlashState;

/// Mole-fraction vector over the fixed component set.
pub type Composition = nalgebra::SVector<f64, NC>;

/// Universal gas constant in J/(mol K).
pub const R_GAS: f64 = 8.314462618;
/// Reference temperature of the ideal-gas enthalpy scale in K.
pub const T_REFERENCE: f64 = 298.15;
/// Lower clamp of the temperature iteration in K.
pub const T_MIN: f64 = 50.0;
/// Upper clamp of the temperature iteration in K.
pub const T_MAX: f64 = 1500.0;

/// Maximum iterations of the outer temperature loop.
pub const MAX_ITER_OUTER: usize = 50;
/// Maximum iterations of the successive-substitution VLE loop.
pub const MAX_ITER_VLE: usize = 100;
/// Maximum iterations of the Rachford-Rice solve.
pub const MAX_ITER_RR: usize = 30;
/// Maximum iterations per tangent-plane-distance trial.
pub const MAX_ITER_TPD: usize = 20;
/// Number of trial compositions in the stability analysis.
pub const MAX_TPD_TRIALS: usize = 7;
/// Depth of the Anderson mixing history.
pub const MAX_ANDERSON_HISTORY: usize = 5;

/// Enthalpy tolerance under standard conditions in J/mol.
pub const TOL_ENTHALPY_STANDARD: f64 = 5.0;
/// Enthalpy tolerance under difficult conditions in J/mol.
pub const TOL_ENTHALPY_DIFFICULT: f64 = 50.0;
/// Enthalpy tolerance under extreme conditions in J/mol.
pub const TOL_ENTHALPY_EXTREME: f64 = 150.0;
/// Relative tolerance on K-value updates.
pub const TOL_K_VALUE: f64 = 1.0e-6;
/// Tolerance on composition sums.
pub const TOL_COMP_SUM: f64 = 1.0e-8;
/// Absolute temperature tolerance in K.
pub const TOL_TEMP: f64 = 1.0e-2;
/// Tolerance of the Rachford-Rice equation.
pub const TOL_RR: f64 = 1.0e-10;
/// Tolerance of the tangent-plane-distance criterion.
pub const TOL_TPD: f64 = 1.0e-8;
/// Tolerance of the fugacity balance.
pub const TOL_FUGACITY: f64 = 1.0e-7;
/// Largest Newton step of the outer temperature loop in K.
pub const MAX_NEWTON_STEP: f64 = 50.0;

/// Level of detail in the iteration output.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    /// Do not print output.
    None,
    /// Print information about the success or failure of the iteration.
    Result,
    /// Print a detailed output for every iteration.
    Iter,
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::None
    }
}

/// Classification of the operating condition, used to adapt the enthalpy
/// tolerance of the outer loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingCondition {
    /// Moderate pressure and temperature.
    Standard,
    /// Everything that is neither standard nor extreme.
    Difficult,
    /// Very high pressure, cryogenic temperature, or cold hydrogen-rich feeds.
    Extreme,
}

impl OperatingCondition {
    /// Classify an operating point from temperature, pressure and feed.
    pub fn classify(temperature: f64, pressure: f64, feed: &Composition) -> Self {
        if pressure > 2.0e7
            || temperature < 100.0
            || (temperature < 150.0 && feed[Component::Hydrogen.index()] > 0.5)
        {
            Self::Extreme
        } else if (1.0e5..=1.0e6).contains(&pressure) && (250.0..=400.0).contains(&temperature) {
            Self::Standard
        } else {
            Self::Difficult
        }
    }

    /// Enthalpy tolerance for this condition in J/mol.
    pub fn enthalpy_tolerance(&self, options: &FlashOptions) -> f64 {
        if let Some(tol) = options.custom_enthalpy_tol {
            return tol;
        }
        if !options.use_adaptive_tolerance {
            return TOL_ENTHALPY_STANDARD;
        }
        match self {
            Self::Standard => TOL_ENTHALPY_STANDARD,
            Self::Difficult => TOL_ENTHALPY_DIFFICULT,
            Self::Extreme => TOL_ENTHALPY_EXTREME,
        }
    }
}

/// Options of the flash calculation.
///
/// The defaults enable the hydrogen quantum correction, Anderson
/// acceleration, the damped line search and the adaptive tolerances.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashOptions {
    /// Apply the quantum correction to the critical point of hydrogen.
    pub use_quantum_h2: bool,
    /// Source of the binary interaction parameters.
    pub bip_source: BipSource,
    /// Accelerate the K-value iteration with Anderson mixing.
    pub use_anderson: bool,
    /// Protect the outer Newton update with a damped line search.
    pub use_line_search: bool,
    /// Initial damping factor of the outer loop in [0.1, 1.0].
    pub damping: f64,
    /// Switch the enthalpy tolerance by operating condition.
    pub use_adaptive_tolerance: bool,
    /// Override the enthalpy tolerance in J/mol.
    pub custom_enthalpy_tol: Option<f64>,
    /// Cross-check the analytic enthalpy derivative numerically.
    pub use_adaptive_derivative: bool,
    /// Override of the central-difference temperature step in K.
    pub derivative_perturbation: Option<f64>,
    /// Upper sanity bound of dH/dT in J/(mol K).
    pub max_reasonable_dhdt: f64,
    /// Seed temperature in K, e.g. from a previous solution.
    pub initial_temperature: Option<f64>,
    /// Diagnostic output level.
    pub verbosity: Verbosity,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            use_quantum_h2: true,
            bip_source: BipSource::Recommended,
            use_anderson: true,
            use_line_search: true,
            damping: 1.0,
            use_adaptive_tolerance: true,
            custom_enthalpy_tol: None,
            use_adaptive_derivative: true,
            derivative_perturbation: None,
            max_reasonable_dhdt: 1.0e6,
            initial_temperature: None,
            verbosity: Verbosity::None,
        }
    }
}

impl FlashOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantum_h2(mut self, use_quantum_h2: bool) -> Self {
        self.use_quantum_h2 = use_quantum_h2;
        self
    }

    pub fn bip_source(mut self, bip_source: BipSource) -> Self {
        self.bip_source = bip_source;
        self
    }

    pub fn anderson(mut self, use_anderson: bool) -> Self {
        self.use_anderson = use_anderson;
        self
    }

    pub fn line_search(mut self, use_line_search: bool) -> Self {
        self.use_line_search = use_line_search;
        self
    }

    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn enthalpy_tolerance(mut self, tol: f64) -> Self {
        self.custom_enthalpy_tol = Some(tol);
        self
    }

    pub fn initial_temperature(mut self, temperature: f64) -> Self {
        self.initial_temperature = Some(temperature);
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Check the option values that have a restricted range.
    pub fn validate(&self) -> FlashResult<()> {
        if !(0.1..=1.0).contains(&self.damping) || !self.damping.is_finite() {
            return Err(PhError::ConfigInvalid(format!(
                "damping factor {} outside [0.1, 1.0]",
                self.damping
            )));
        }
        if let Some(tol) = self.custom_enthalpy_tol {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(PhError::ConfigInvalid(format!(
                    "enthalpy tolerance {tol} must be positive"
                )));
            }
        }
        if let Some(h) = self.derivative_perturbation {
            if !(h.is_finite() && h > 0.0) {
                return Err(PhError::ConfigInvalid(format!(
                    "derivative perturbation {h} must be positive"
                )));
            }
        }
        if !(self.max_reasonable_dhdt.is_finite() && self.max_reasonable_dhdt > 1.0) {
            return Err(PhError::ConfigInvalid(format!(
                "dH/dT bound {} must exceed 1 J/(mol K)",
                self.max_reasonable_dhdt
            )));
        }
        self.bip_source.matrix().map(|_| ())
    }
}
