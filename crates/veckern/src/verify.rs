//! Accuracy metrics and pass/warn/fail classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

fn check_lengths(reference: &[f32], test: &[f32]) -> Result<()> {
    if reference.len() == test.len() {
        Ok(())
    } else {
        Err(KernelError::shape(
            "verify",
            format!("reference has {} elements, test has {}", reference.len(), test.len()),
        ))
    }
}

/// `max_i |reference_i - test_i|`, 0 for empty inputs.
///
/// A NaN on either side makes the error NaN, which classifies as a failure.
///
/// # Errors
/// `ShapeMismatch` if the lengths differ.
pub fn max_abs_error(reference: &[f32], test: &[f32]) -> Result<f64> {
    check_lengths(reference, test)?;
    let mut worst = 0.0_f64;
    for (&r, &t) in reference.iter().zip(test) {
        let e = (f64::from(r) - f64::from(t)).abs();
        if e.is_nan() {
            return Ok(f64::NAN);
        }
        worst = worst.max(e);
    }
    Ok(worst)
}

/// Signal-to-noise ratio in dB: `10 * log10(Σ ref² / Σ (ref - test)²)`.
///
/// Returns `+inf` when the noise energy is exactly zero.
///
/// # Errors
/// `ShapeMismatch` if the lengths differ.
pub fn snr_db(reference: &[f32], test: &[f32]) -> Result<f64> {
    check_lengths(reference, test)?;
    let (mut signal, mut noise) = (0.0_f64, 0.0_f64);
    for (&r, &t) in reference.iter().zip(test) {
        let (r, t) = (f64::from(r), f64::from(t));
        signal += r * r;
        noise += (r - t) * (r - t);
    }
    if noise == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (signal / noise).log10())
}

/// Outcome of one comparison row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
    /// The implementation had no output to compare.
    Skipped,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
            Verdict::Skipped => "SKIPPED",
        })
    }
}

/// Error bounds for [`Thresholds::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Errors strictly below this pass.
    pub pass: f64,
    /// Errors strictly below this (and not passing) warn.
    pub warn: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { pass: 1e-5, warn: 1e-3 }
    }
}

impl Thresholds {
    #[must_use]
    pub fn classify(&self, max_abs_error: f64) -> Verdict {
        if max_abs_error < self.pass {
            Verdict::Pass
        } else if max_abs_error < self.warn {
            Verdict::Warn
        } else {
            Verdict::Fail
        }
    }
}
