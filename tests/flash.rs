//! End-to-end pressure-enthalpy flash scenarios and property checks.
//!
//! Enthalpy targets refer to the crate's ideal-gas sensible reference
//! (H = 0 at 298.15 K for every component).

use approx::assert_relative_eq;
use ph_flash::{
    Composition, FlashOptions, FlashState, MAX_ITER_OUTER, NC, flash_calculate,
};

fn pure_water() -> Composition {
    Composition::from([0.0, 0.0, 0.0, 0.0, 1.0])
}

// Shared invariants of every converged flash result.
fn assert_state_valid(state: &FlashState) {
    assert!(state.iterations <= MAX_ITER_OUTER);
    assert!((0.0..=1.0).contains(&state.vapor_fraction));
    assert_relative_eq!(state.liquid.sum(), 1.0, epsilon = 1.0e-6);
    assert_relative_eq!(state.vapor.sum(), 1.0, epsilon = 1.0e-6);
    // mass balance
    let beta = state.vapor_fraction;
    for i in 0..NC {
        let reconstructed = (1.0 - beta) * state.liquid[i] + beta * state.vapor[i];
        assert!(
            (state.feed[i] - reconstructed).abs() <= 1.0e-8,
            "mass balance violated for component {i}"
        );
    }
    // enthalpy lever rule
    assert_relative_eq!(
        state.enthalpy,
        (1.0 - beta) * state.enthalpy_liquid + beta * state.enthalpy_vapor,
        epsilon = 1.0e-6
    );
    // enthalpy round trip within the widest adaptive tolerance
    assert!(
        (state.enthalpy - state.enthalpy_spec).abs() <= 150.0,
        "enthalpy residual {} J/mol",
        state.enthalpy - state.enthalpy_spec
    );
    if state.is_two_phase() {
        assert!(state.z_vapor > state.z_liquid);
        // K-values match the fugacity-coefficient ratio
        for i in 0..NC {
            if state.feed[i] > 1.0e-6 {
                let phi_ratio = (state.ln_phi_liquid[i] - state.ln_phi_vapor[i]).exp();
                assert_relative_eq!(state.k_values[i], phi_ratio, max_relative = 1.0e-5);
            }
        }
    }
}

#[test]
fn pure_water_saturated_vapor() {
    let z = pure_water();
    let state = flash_calculate(&z, 101325.0, 2.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert!(
        state.temperature > 360.0 && state.temperature < 385.0,
        "T = {}",
        state.temperature
    );
    assert!(state.vapor_fraction >= 0.9, "beta = {}", state.vapor_fraction);
}

#[test]
fn pure_water_two_phase() {
    let z = pure_water();
    let state = flash_calculate(&z, 101325.0, -5.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert!(
        state.temperature > 360.0 && state.temperature < 385.0,
        "T = {}",
        state.temperature
    );
    assert!(
        state.vapor_fraction > 0.6 && state.vapor_fraction < 0.999,
        "beta = {}",
        state.vapor_fraction
    );
    assert!(state.enthalpy_vapor > state.enthalpy_liquid);
}

#[test]
fn hydrogen_nitrogen_stays_vapor() {
    let z = Composition::from([0.7, 0.3, 0.0, 0.0, 0.0]);
    let state = flash_calculate(&z, 2.0e6, -1.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert_eq!(state.vapor_fraction, 1.0);
    assert!(
        state.temperature > 200.0 && state.temperature < 350.0,
        "T = {}",
        state.temperature
    );
    assert_eq!(state.vapor, state.feed);
}

#[test]
fn high_pressure_hydrogen_nitrogen() {
    let z = Composition::from([0.5, 0.5, 0.0, 0.0, 0.0]);
    let state = flash_calculate(&z, 1.0e7, -5.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert_eq!(state.vapor_fraction, 1.0);
    assert!(
        state.temperature > 120.0 && state.temperature < 260.0,
        "T = {}",
        state.temperature
    );
}

#[test]
fn ammonia_water_flashes_two_phase() {
    let z = Composition::from([0.0, 0.0, 0.0, 0.4, 0.6]);
    let state = flash_calculate(&z, 5.0e5, -1.5e4, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert!(
        state.temperature > 320.0 && state.temperature < 460.0,
        "T = {}",
        state.temperature
    );
    assert!(
        state.vapor_fraction > 0.05 && state.vapor_fraction < 0.98,
        "beta = {}",
        state.vapor_fraction
    );
    // ammonia is the more volatile of the pair
    assert!(state.vapor[3] > state.liquid[3]);
}

#[test]
fn cryogenic_air_is_mostly_liquid() {
    let z = Composition::from([0.0, 0.79, 0.21, 0.0, 0.0]);
    let state = flash_calculate(&z, 101325.0, -1.15e4, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert!(
        state.temperature > 60.0 && state.temperature < 110.0,
        "T = {}",
        state.temperature
    );
    assert!(state.vapor_fraction <= 0.6, "beta = {}", state.vapor_fraction);
}

#[test]
fn low_pressure_boundary() {
    let z = pure_water();
    let state = flash_calculate(&z, 100.0, 1.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert_eq!(state.vapor_fraction, 1.0);
}

#[test]
fn high_pressure_boundary() {
    let z = Composition::from([0.5, 0.5, 0.0, 0.0, 0.0]);
    let state = flash_calculate(&z, 1.0e8, 0.0, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert_eq!(state.vapor_fraction, 1.0);
    assert!(
        state.temperature > 100.0 && state.temperature < 500.0,
        "T = {}",
        state.temperature
    );
}

#[test]
fn nearly_pure_feed() {
    let trace = 2.5e-11;
    let z = Composition::from([trace, trace, trace, trace, 1.0 - 4.0 * trace]);
    let state = flash_calculate(&z, 101325.0, -5.0e3, &FlashOptions::default()).unwrap();
    assert_state_valid(&state);
    assert!(state.vapor_fraction > 0.5 && state.vapor_fraction < 1.0);
}

#[test]
fn results_are_deterministic() {
    let z = Composition::from([0.0, 0.0, 0.0, 0.4, 0.6]);
    let options = FlashOptions::default();
    let first = flash_calculate(&z, 5.0e5, -1.5e4, &options).unwrap();
    let second = flash_calculate(&z, 5.0e5, -1.5e4, &options).unwrap();
    assert_eq!(first.temperature.to_bits(), second.temperature.to_bits());
    assert_eq!(
        first.vapor_fraction.to_bits(),
        second.vapor_fraction.to_bits()
    );
    assert_eq!(first.iterations, second.iterations);
}

#[test]
fn composition_scale_invariance() {
    // rescaling the feed and renormalizing must not change the result
    let z = Composition::from([0.0, 0.5, 0.0, 0.0, 0.5]);
    let scaled = {
        let s = z * 3.7;
        s / s.sum()
    };
    let options = FlashOptions::default();
    let a = flash_calculate(&z, 1.0e5, -2.0e4, &options).unwrap();
    let b = flash_calculate(&scaled, 1.0e5, -2.0e4, &options).unwrap();
    assert_state_valid(&a);
    assert!(a.is_two_phase());
    assert_eq!(a.temperature.to_bits(), b.temperature.to_bits());
    assert_eq!(a.vapor_fraction.to_bits(), b.vapor_fraction.to_bits());
}

#[test]
fn quantum_correction_changes_cold_hydrogen_results() {
    let z = Composition::from([0.5, 0.5, 0.0, 0.0, 0.0]);
    let with = flash_calculate(&z, 1.0e7, -5.0e3, &FlashOptions::default()).unwrap();
    let without = flash_calculate(
        &z,
        1.0e7,
        -5.0e3,
        &FlashOptions::default().quantum_h2(false),
    )
    .unwrap();
    assert_state_valid(&with);
    assert_state_valid(&without);
    // both must converge; the effective criticals shift the solution
    assert!((with.temperature - without.temperature).abs() < 60.0);
}

#[test]
fn options_toggles_still_converge() {
    let z = Composition::from([0.0, 0.5, 0.0, 0.0, 0.5]);
    for options in [
        FlashOptions::default().anderson(false),
        FlashOptions::default().line_search(false),
        FlashOptions::default().damping(0.5),
        FlashOptions::default().enthalpy_tolerance(25.0),
    ] {
        let state = flash_calculate(&z, 1.0e5, -2.0e4, &options).unwrap();
        assert_state_valid(&state);
        assert!(state.is_two_phase());
    }
}

#[test]
fn unisim_bip_source_converges() {
    let z = Composition::from([0.0, 0.0, 0.0, 0.4, 0.6]);
    let options = FlashOptions::default().bip_source(ph_flash::BipSource::UniSim);
    let state = flash_calculate(&z, 5.0e5, -1.5e4, &options).unwrap();
    assert_state_valid(&state);
}

#[test]
fn previous_solution_seeds_the_next_flash() {
    let z = pure_water();
    let options = FlashOptions::default();
    let first = flash_calculate(&z, 101325.0, -5.0e3, &options).unwrap();
    let seeded = FlashOptions::default().initial_temperature(first.temperature);
    let second = flash_calculate(&z, 101325.0, -5.5e3, &seeded).unwrap();
    assert_state_valid(&second);
    // both targets sit inside the dome at the same saturation temperature
    assert_relative_eq!(second.temperature, first.temperature, epsilon = 1.0);
    assert!(second.vapor_fraction < first.vapor_fraction);
}

#[test]
fn invalid_custom_bip_is_rejected() {
    let mut k = [[0.0; NC]; NC];
    k[0][4] = 0.75;
    k[4][0] = 0.75;
    let options = FlashOptions::default().bip_source(ph_flash::BipSource::Custom(k));
    let z = pure_water();
    let error = flash_calculate(&z, 101325.0, -5.0e3, &options).unwrap_err();
    assert_eq!(error.code(), -106);
    assert_eq!(error.category(), "input");
}
