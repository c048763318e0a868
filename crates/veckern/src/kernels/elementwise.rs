//! Elementwise kernels: ReLU, LeakyReLU, tensor addition, channel bias addition.
//!
//! `relu(x) = max(0, x)`, `leaky_relu(x) = x if x >= 0 else alpha * x`,
//! `tensor_add(a, b) = a + b` over identical shapes, and
//! `bias_add(x, b)[n, c, ...] = x[n, c, ...] + b[c]`.
//!
//! There is no cross-element dependency, so every variant produces the same
//! bits; variants differ only in how many elements one strip covers. ReLU
//! and LeakyReLU also have tiled forms that run the untiled body over
//! consecutive `tile`-element chunks.

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Default negative slope for [`leaky_relu`].
pub const DEFAULT_LEAKY_ALPHA: f32 = 0.01;
/// Default chunk length for tiled ReLU and LeakyReLU.
pub const DEFAULT_ELEMENT_TILE: usize = 32;

// ────────────────────────────────────────────────────────────────────────────
// Typed entry points
// ────────────────────────────────────────────────────────────────────────────

/// ReLU over a tensor of any shape. Tiled variants use
/// [`DEFAULT_ELEMENT_TILE`].
///
/// # Errors
///
/// `ShapeMismatch` if `output` is not shaped like `input`.
pub fn relu(variant: Variant, input: &Tensor, output: &mut Tensor) -> Result<()> {
    relu_with_tile(variant, input, DEFAULT_ELEMENT_TILE, output)
}

/// [`relu`] with an explicit chunk length for tiled variants.
///
/// # Errors
///
/// As [`relu`], plus `InvalidConfiguration` for a zero `tile` with a tiled
/// variant.
pub fn relu_with_tile(variant: Variant, input: &Tensor, tile: usize, output: &mut Tensor) -> Result<()> {
    let op = KernelOp::Relu;
    ensure_variant(op, variant)?;
    ensure_shape(op, "output", output, input.shape())?;
    if variant.is_tiled() {
        ensure_positive(op, "tile", &[tile])?;
    }
    let (x, y) = (input.data(), output.data_mut());
    match variant {
        Variant::Scalar => relu_scalar(x, y),
        Variant::Vector(w) => dispatch_width!(w, relu_vector(x, y)),
        Variant::TiledScalar => relu_tiled_scalar(x, tile, y),
        Variant::TiledVector(w) => dispatch_width!(w, relu_tiled_vector(x, tile, y)),
    }
    Ok(())
}

/// LeakyReLU with negative slope `alpha`. Tiled variants use
/// [`DEFAULT_ELEMENT_TILE`].
///
/// # Errors
///
/// `ShapeMismatch` if `output` is not shaped like `input`;
/// `InvalidConfiguration` for a non-finite `alpha`.
pub fn leaky_relu(variant: Variant, input: &Tensor, alpha: f32, output: &mut Tensor) -> Result<()> {
    leaky_relu_with_tile(variant, input, alpha, DEFAULT_ELEMENT_TILE, output)
}

/// [`leaky_relu`] with an explicit chunk length for tiled variants.
///
/// # Errors
///
/// As [`leaky_relu`], plus `InvalidConfiguration` for a zero `tile` with a
/// tiled variant.
pub fn leaky_relu_with_tile(
    variant: Variant,
    input: &Tensor,
    alpha: f32,
    tile: usize,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::LeakyRelu;
    ensure_variant(op, variant)?;
    if !alpha.is_finite() {
        return Err(KernelError::config(
            op.name(),
            format!("alpha must be finite, got {alpha}"),
        ));
    }
    ensure_shape(op, "output", output, input.shape())?;
    if variant.is_tiled() {
        ensure_positive(op, "tile", &[tile])?;
    }
    let (x, y) = (input.data(), output.data_mut());
    match variant {
        Variant::Scalar => leaky_relu_scalar(x, alpha, y),
        Variant::Vector(w) => dispatch_width!(w, leaky_relu_vector(x, alpha, y)),
        Variant::TiledScalar => leaky_relu_tiled_scalar(x, alpha, tile, y),
        Variant::TiledVector(w) => {
            dispatch_width!(w, leaky_relu_tiled_vector(x, alpha, tile, y));
        }
    }
    Ok(())
}

/// Elementwise `a + b`. Shapes must be identical; no broadcasting.
///
/// # Errors
///
/// `ShapeMismatch` if `a`, `b` and `output` do not share one shape.
pub fn tensor_add(variant: Variant, a: &Tensor, b: &Tensor, output: &mut Tensor) -> Result<()> {
    ensure_variant(KernelOp::TensorAdd, variant)?;
    ensure_shape(KernelOp::TensorAdd, "rhs", b, a.shape())?;
    ensure_shape(KernelOp::TensorAdd, "output", output, a.shape())?;
    let y = output.data_mut();
    match variant.width() {
        None => tensor_add_scalar(a.data(), b.data(), y),
        Some(w) => dispatch_width!(w, tensor_add_vector(a.data(), b.data(), y)),
    }
    Ok(())
}

/// Add `bias[c]` to every element of channel `c`.
///
/// `input` is `[N, C, H, W]` (or `[N, C]`, treated as `H = W = 1`).
///
/// # Errors
///
/// `ShapeMismatch` if the rank is not 2 or 4, `bias` is not `[C]`, or
/// `output` is not shaped like `input`.
pub fn bias_add(variant: Variant, input: &Tensor, bias: &Tensor, output: &mut Tensor) -> Result<()> {
    ensure_variant(KernelOp::BiasAdd, variant)?;
    let (batch, channels, plane) = channel_planes(KernelOp::BiasAdd, input)?;
    ensure_shape(KernelOp::BiasAdd, "bias", bias, &[channels])?;
    ensure_shape(KernelOp::BiasAdd, "output", output, input.shape())?;
    let (x, b, y) = (input.data(), bias.data(), output.data_mut());
    match variant.width() {
        None => bias_add_scalar(x, b, batch, channels, plane, y),
        Some(w) => dispatch_width!(w, bias_add_vector(x, b, batch, channels, plane, y)),
    }
    Ok(())
}

/// `(N, C, H*W)` of a `[N, C, H, W]` or `[N, C]` tensor.
pub(crate) fn channel_planes(op: KernelOp, t: &Tensor) -> Result<(usize, usize, usize)> {
    match *t.shape() {
        [n, c] => Ok((n, c, 1)),
        [n, c, h, w] => Ok((n, c, h * w)),
        _ => Err(KernelError::shape(
            op.name(),
            format!("expected [N, C, H, W] or [N, C], got {:?}", t.shape()),
        )),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// # Panics
/// Panics if `input.len() != output.len()`.
pub fn relu_scalar(input: &[f32], output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    for (y, &x) in output.iter_mut().zip(input) {
        *y = x.max(0.0);
    }
}

/// # Panics
/// Panics if `input.len() != output.len()`.
pub fn leaky_relu_scalar(input: &[f32], alpha: f32, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    for (y, &x) in output.iter_mut().zip(input) {
        *y = if x < 0.0 { alpha * x } else { x };
    }
}

/// Scalar ReLU over consecutive `tile`-element chunks.
///
/// # Panics
/// Panics if `input.len() != output.len()` or `tile == 0`.
pub fn relu_tiled_scalar(input: &[f32], tile: usize, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    assert!(tile > 0, "tile must be positive");
    for (x, y) in input.chunks(tile).zip(output.chunks_mut(tile)) {
        relu_scalar(x, y);
    }
}

/// # Panics
/// Panics if `input.len() != output.len()` or `tile == 0`.
pub fn leaky_relu_tiled_scalar(input: &[f32], alpha: f32, tile: usize, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    assert!(tile > 0, "tile must be positive");
    for (x, y) in input.chunks(tile).zip(output.chunks_mut(tile)) {
        leaky_relu_scalar(x, alpha, y);
    }
}

/// # Panics
/// Panics if the three slices differ in length.
pub fn tensor_add_scalar(a: &[f32], b: &[f32], output: &mut [f32]) {
    assert_eq!(a.len(), b.len(), "operand length mismatch");
    assert_eq!(a.len(), output.len(), "output length mismatch");
    for i in 0..a.len() {
        output[i] = a[i] + b[i];
    }
}

/// Broadcast bias addition over `batch x channels` planes of `plane` elements.
///
/// # Panics
/// Panics if buffer lengths disagree with the dimensions.
pub fn bias_add_scalar(
    input: &[f32],
    bias: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
    output: &mut [f32],
) {
    assert_eq!(input.len(), batch * channels * plane, "input dimension mismatch");
    assert_eq!(bias.len(), channels, "bias dimension mismatch");
    assert_eq!(output.len(), input.len(), "output dimension mismatch");

    for n in 0..batch {
        for c in 0..channels {
            let base = (n * channels + c) * plane;
            for i in base..base + plane {
                output[i] = input[i] + bias[c];
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// # Panics
/// Panics if `input.len() != output.len()`.
pub fn relu_vector<const L: usize>(input: &[f32], output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    let zero = Lanes::<L>::splat(0.0);
    for s in strips::<L>(input.len()) {
        let v = Lanes::<L>::load(&input[s.offset..], s.vl, 0.0);
        v.max(zero).store(&mut output[s.offset..], s.vl);
    }
}

/// # Panics
/// Panics if `input.len() != output.len()`.
pub fn leaky_relu_vector<const L: usize>(input: &[f32], alpha: f32, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    let slope = Lanes::<L>::splat(alpha);
    for s in strips::<L>(input.len()) {
        let v = Lanes::<L>::load(&input[s.offset..], s.vl, 0.0);
        let negative = v.mask(|x| x < 0.0);
        v.merge(negative, v * slope)
            .store(&mut output[s.offset..], s.vl);
    }
}

/// Vector ReLU over consecutive `tile`-element chunks; each chunk is strip
/// mined on its own, so a chunk not divisible by `L` ends in a short strip.
///
/// # Panics
/// Panics if `input.len() != output.len()` or `tile == 0`.
pub fn relu_tiled_vector<const L: usize>(input: &[f32], tile: usize, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    assert!(tile > 0, "tile must be positive");
    for (x, y) in input.chunks(tile).zip(output.chunks_mut(tile)) {
        relu_vector::<L>(x, y);
    }
}

/// # Panics
/// Panics if `input.len() != output.len()` or `tile == 0`.
pub fn leaky_relu_tiled_vector<const L: usize>(input: &[f32], alpha: f32, tile: usize, output: &mut [f32]) {
    assert_eq!(input.len(), output.len(), "length mismatch");
    assert!(tile > 0, "tile must be positive");
    for (x, y) in input.chunks(tile).zip(output.chunks_mut(tile)) {
        leaky_relu_vector::<L>(x, alpha, y);
    }
}

/// # Panics
/// Panics if the three slices differ in length.
pub fn tensor_add_vector<const L: usize>(a: &[f32], b: &[f32], output: &mut [f32]) {
    assert_eq!(a.len(), b.len(), "operand length mismatch");
    assert_eq!(a.len(), output.len(), "output length mismatch");
    for s in strips::<L>(a.len()) {
        let va = Lanes::<L>::load(&a[s.offset..], s.vl, 0.0);
        let vb = Lanes::<L>::load(&b[s.offset..], s.vl, 0.0);
        (va + vb).store(&mut output[s.offset..], s.vl);
    }
}

/// # Panics
/// Panics if buffer lengths disagree with the dimensions.
pub fn bias_add_vector<const L: usize>(
    input: &[f32],
    bias: &[f32],
    batch: usize,
    channels: usize,
    plane: usize,
    output: &mut [f32],
) {
    assert_eq!(input.len(), batch * channels * plane, "input dimension mismatch");
    assert_eq!(bias.len(), channels, "bias dimension mismatch");
    assert_eq!(output.len(), input.len(), "output dimension mismatch");

    for n in 0..batch {
        for c in 0..channels {
            let base = (n * channels + c) * plane;
            let vb = Lanes::<L>::splat(bias[c]);
            for s in strips::<L>(plane) {
                let at = base + s.offset;
                (Lanes::<L>::load(&input[at..], s.vl, 0.0) + vb).store(&mut output[at..], s.vl);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
