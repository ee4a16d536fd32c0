//! Vapor-liquid equilibrium and the pressure-enthalpy driver.
//!
//! [`rachford_rice`] solves the vapor fraction for given K-values,
//! [`stability`] runs the tangent-plane-distance analysis, [`vle`] iterates
//! the isothermal flash, and [`ph_flash`] wraps everything into the outer
//! temperature loop.

mod ph_flash;
mod rachford_rice;
mod stability;
mod vle;

pub use ph_flash::flash_calculate;
pub use rachford_rice::{RachfordRiceSolution, solve_rachford_rice};
pub use stability::{StabilityAnalysis, tpd_analysis};
pub use vle::{VleSolution, isothermal_flash, wilson_k_values};
