//! The fixed component set and its constant property tables.
//!
//! The solver is specialized to the five-component system H2, N2, O2, NH3
//! and H2O. `NC` is a compile-time constant so that every composition
//! vector, BIP matrix and history buffer lives on the stack.

use crate::{FlashResult, PhError};
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

/// Number of components.
pub const NC: usize = 5;

/// The five components, in storage order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Hydrogen,
    Nitrogen,
    Oxygen,
    Ammonia,
    Water,
}

impl Component {
    /// All components in storage order.
    pub const ALL: [Component; NC] = [
        Component::Hydrogen,
        Component::Nitrogen,
        Component::Oxygen,
        Component::Ammonia,
        Component::Water,
    ];

    /// Index of the component in composition vectors.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Human-readable identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Component::Hydrogen => "H2",
            Component::Nitrogen => "N2",
            Component::Oxygen => "O2",
            Component::Ammonia => "NH3",
            Component::Water => "H2O",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Critical properties of a single substance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CriticalProperties {
    /// critical temperature in Kelvin
    pub tc: f64,
    /// critical pressure in Pascal
    pub pc: f64,
    /// acentric factor
    pub acentric_factor: f64,
    /// molar weight in g/mol
    pub molar_weight: f64,
}

const CRITICAL_PROPERTIES: [CriticalProperties; NC] = [
    CriticalProperties {
        tc: 33.19,
        pc: 1.313e6,
        acentric_factor: -0.216,
        molar_weight: 2.01588,
    },
    CriticalProperties {
        tc: 126.19,
        pc: 3.3958e6,
        acentric_factor: 0.0372,
        molar_weight: 28.0134,
    },
    CriticalProperties {
        tc: 154.58,
        pc: 5.043e6,
        acentric_factor: 0.0222,
        molar_weight: 31.9988,
    },
    CriticalProperties {
        tc: 405.40,
        pc: 1.1333e7,
        acentric_factor: 0.2560,
        molar_weight: 17.0305,
    },
    CriticalProperties {
        tc: 647.096,
        pc: 2.2064e7,
        acentric_factor: 0.3443,
        molar_weight: 18.01528,
    },
];

/// The read-only critical-property table, indexed like [`Component::ALL`].
pub fn critical_properties() -> &'static [CriticalProperties; NC] {
    &CRITICAL_PROPERTIES
}

// Engineering-recommended values. Pairs without published data are zero.
const KIJ_RECOMMENDED: [[f64; NC]; NC] = [
    [0.0, 0.103, 0.0, 0.0, 0.0],
    [0.103, 0.0, -0.0119, 0.2193, 0.325],
    [0.0, -0.0119, 0.0, 0.0, 0.0],
    [0.0, 0.2193, 0.0, 0.0, -0.2589],
    [0.0, 0.325, 0.0, -0.2589, 0.0],
];

const KIJ_UNISIM: [[f64; NC]; NC] = [
    [0.0, 0.0711, 0.0, 0.0, 0.0],
    [0.0711, 0.0, -0.008, 0.2, 0.44],
    [0.0, -0.008, 0.0, 0.0, 0.0],
    [0.0, 0.2, 0.0, 0.0, -0.25],
    [0.0, 0.44, 0.0, -0.25, 0.0],
];

/// Source of the binary interaction parameters of the a-mixing rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BipSource {
    /// Engineering-recommended values.
    Recommended,
    /// Values matching the UniSim property package.
    UniSim,
    /// A caller-supplied matrix, validated at load time.
    Custom([[f64; NC]; NC]),
}

impl BipSource {
    /// Build the interaction matrix, rejecting asymmetric entries, nonzero
    /// diagonals and out-of-range values.
    pub fn matrix(&self) -> FlashResult<SMatrix<f64, NC, NC>> {
        let raw = match self {
            BipSource::Recommended => &KIJ_RECOMMENDED,
            BipSource::UniSim => &KIJ_UNISIM,
            BipSource::Custom(k) => k,
        };
        for i in 0..NC {
            if raw[i][i] != 0.0 {
                return Err(PhError::ConfigInvalid(format!(
                    "BIP diagonal entry k[{i}][{i}] = {} must be zero",
                    raw[i][i]
                )));
            }
            for j in 0..NC {
                let k = raw[i][j];
                if !k.is_finite() || k.abs() > 0.5 {
                    return Err(PhError::OutOfRange(format!(
                        "BIP k[{i}][{j}] = {k} outside [-0.5, 0.5]"
                    )));
                }
                if (k - raw[j][i]).abs() > 1.0e-12 {
                    return Err(PhError::ConfigInvalid(format!(
                        "BIP matrix not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(SMatrix::from_fn(|i, j| raw[i][j]))
    }
}
