//! Shared helpers for integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use veckern::backend::NativeBackend;
use veckern::harness::{parse_scenario_str, Harness, Report};
use veckern::oracle::ReferenceOracle;
use veckern::Tensor;

/// Asserts every element in a slice is finite (not NaN or infinite).
pub fn assert_all_finite(slice: &[f32]) {
    for (i, &val) in slice.iter().enumerate() {
        assert!(val.is_finite(), "Element [{i}] is not finite: {val}");
    }
}

/// `n` uniform values in `[low, high)` from a fixed seed.
pub fn seeded_vec(seed: u64, n: usize, low: f32, high: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(low..high)).collect()
}

/// Seeded tensor of the given shape.
pub fn seeded(seed: u64, shape: &[usize], low: f32, high: f32) -> Tensor {
    let n = shape.iter().product();
    Tensor::from_vec(shape, seeded_vec(seed, n, low, high)).unwrap()
}

/// Deterministic ramp with mixed signs, handy for tail tests.
pub fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i as f32 * 0.37).sin() * 5.0 - 0.5).collect()
}

/// Run a YAML scenario through the native backend and reference oracle.
pub fn run_scenario(yaml: &str) -> Report {
    let scenario = parse_scenario_str(yaml).unwrap();
    Harness::new(&NativeBackend, &ReferenceOracle)
        .run(&scenario)
        .unwrap()
}

/// Every row of `report` within `1e-4` max-abs-error and above 80 dB SNR.
pub fn assert_matches_oracle(report: &Report) {
    assert!(!report.rows.is_empty(), "{}: no rows", report.scenario);
    for row in &report.rows {
        let err = row
            .max_abs_error
            .unwrap_or_else(|| panic!("{}/{}: no error metric ({:?})", report.scenario, row.implementation, row.note));
        let snr = row.snr_db.unwrap_or(f64::NEG_INFINITY);
        assert!(err < 1e-4, "{}/{}: max abs error {err}", report.scenario, row.implementation);
        assert!(snr > 80.0, "{}/{}: SNR {snr} dB", report.scenario, row.implementation);
    }
}
