//! Softmax kernel.
//!
//! `y[i] = exp(x[i] - max(x)) / sum_j exp(x[j] - max(x))`, applied
//! independently to every row of the last axis.
//!
//! The max pass is exact in any order. Vector forms keep one partial sum per
//! lane for the denominator, so they agree with the scalar form within a few
//! ULP rather than bit-for-bit.

use super::lanes::{strips, Lanes};
use super::{ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Row-wise softmax over the last axis of `input`.
///
/// # Errors
///
/// `ShapeMismatch` for a rank-0 input or an `output` shaped differently.
pub fn softmax(variant: Variant, input: &Tensor, output: &mut Tensor) -> Result<()> {
    ensure_variant(KernelOp::Softmax, variant)?;
    let Some(&row) = input.shape().last() else {
        return Err(KernelError::shape(
            KernelOp::Softmax.name(),
            "input must have at least one axis",
        ));
    };
    ensure_shape(KernelOp::Softmax, "output", output, input.shape())?;
    if row == 0 {
        return Ok(());
    }
    let (x, y) = (input.data(), output.data_mut());
    for (xr, yr) in x.chunks_exact(row).zip(y.chunks_exact_mut(row)) {
        match variant.width() {
            None => softmax_scalar(xr, yr),
            Some(w) => dispatch_width!(w, softmax_vector(xr, yr)),
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Softmax of one row (scalar reference).
///
/// # Panics
/// Panics if `input` is empty or the lengths differ.
pub fn softmax_scalar(input: &[f32], output: &mut [f32]) {
    assert!(!input.is_empty(), "softmax of an empty row");
    assert_eq!(input.len(), output.len(), "length mismatch");

    let max = input.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0_f32;
    for (y, &x) in output.iter_mut().zip(input) {
        *y = (x - max).exp();
        sum += *y;
    }
    for y in output.iter_mut() {
        *y /= sum;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Softmax of one row with `L` lanes per strip.
///
/// # Panics
/// Panics if `input` is empty or the lengths differ.
pub fn softmax_vector<const L: usize>(input: &[f32], output: &mut [f32]) {
    assert!(!input.is_empty(), "softmax of an empty row");
    assert_eq!(input.len(), output.len(), "length mismatch");
    let n = input.len();

    let mut vmax = Lanes::<L>::splat(f32::NEG_INFINITY);
    for s in strips::<L>(n) {
        vmax = vmax.max(Lanes::<L>::load(&input[s.offset..], s.vl, f32::NEG_INFINITY));
    }
    let max = Lanes::<L>::splat(vmax.reduce_max(L));

    // Inactive lanes load -inf and contribute exp(-inf) = 0 to the sum.
    let mut acc = Lanes::<L>::splat(0.0);
    for s in strips::<L>(n) {
        let e = (Lanes::<L>::load(&input[s.offset..], s.vl, f32::NEG_INFINITY) - max).map(f32::exp);
        e.store(&mut output[s.offset..], s.vl);
        acc = acc + e;
    }
    let sum = Lanes::<L>::splat(acc.reduce_sum(L));

    for s in strips::<L>(n) {
        let e = Lanes::<L>::load(&output[s.offset..], s.vl, 0.0);
        (e / sum).store(&mut output[s.offset..], s.vl);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
