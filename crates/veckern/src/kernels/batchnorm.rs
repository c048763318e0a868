//! Inference-mode batch normalization kernel.
//!
//! `y[n,c,h,w] = scale[c] * (x[n,c,h,w] - mean[c]) / sqrt(var[c] + eps) + bias[c]`
//!
//! Every variant folds the per-channel statistics into
//! `alpha = scale / sqrt(var + eps)` and `beta = bias - mean * alpha`
//! and evaluates `y = x * alpha + beta` (two roundings, no FMA). Tiled forms
//! walk each `H*W` plane in blocks of `tile` elements, visiting every channel
//! of a block before moving on; the per-element arithmetic is unchanged, so
//! all variants agree bit-for-bit.

use super::elementwise::channel_planes;
use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Default variance guard.
pub const DEFAULT_EPSILON: f32 = 1e-5;
/// Default block length (elements of one channel plane) for tiled forms.
pub const DEFAULT_TILE: usize = 64;

/// Per-channel statistics, each `[C]`.
#[derive(Debug, Clone, Copy)]
pub struct BatchNormStats<'a> {
    pub scale: &'a Tensor,
    pub bias: &'a Tensor,
    pub mean: &'a Tensor,
    pub variance: &'a Tensor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNormConfig {
    pub epsilon: f32,
    /// Block length for tiled variants; ignored by untiled ones.
    pub tile: usize,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            tile: DEFAULT_TILE,
        }
    }
}

/// Batch normalization of `[N, C, H, W]` (or `[N, C]`) input.
///
/// # Errors
///
/// `ShapeMismatch` if a statistic is not `[C]` or `output` differs from
/// `input`; `InvalidConfiguration` for a zero tile or a negative or
/// non-finite epsilon.
pub fn batch_norm(
    variant: Variant,
    input: &Tensor,
    stats: &BatchNormStats<'_>,
    config: BatchNormConfig,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::BatchNorm;
    ensure_variant(op, variant)?;
    let (batch, channels, plane) = channel_planes(op, input)?;
    for (what, t) in [
        ("scale", stats.scale),
        ("bias", stats.bias),
        ("mean", stats.mean),
        ("variance", stats.variance),
    ] {
        ensure_shape(op, what, t, &[channels])?;
    }
    ensure_shape(op, "output", output, input.shape())?;
    if !(config.epsilon >= 0.0 && config.epsilon.is_finite()) {
        return Err(KernelError::config(
            op.name(),
            format!("epsilon must be finite and non-negative, got {}", config.epsilon),
        ));
    }
    if variant.is_tiled() {
        ensure_positive(op, "tile", &[config.tile])?;
    }

    let p = PlaneLayout {
        batch,
        channels,
        plane,
    };
    let s = FoldedStats {
        scale: stats.scale.data(),
        bias: stats.bias.data(),
        mean: stats.mean.data(),
        variance: stats.variance.data(),
        epsilon: config.epsilon,
    };
    let (x, y) = (input.data(), output.data_mut());
    match variant {
        Variant::Scalar => batch_norm_scalar(x, &s, p, y),
        Variant::Vector(w) => dispatch_width!(w, batch_norm_vector(x, &s, p, y)),
        Variant::TiledScalar => batch_norm_tiled_scalar(x, &s, p, config.tile, y),
        Variant::TiledVector(w) => {
            dispatch_width!(w, batch_norm_tiled_vector(x, &s, p, config.tile, y));
        }
    }
    Ok(())
}

/// Extents of a channel-planar buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub batch: usize,
    pub channels: usize,
    /// `H * W`.
    pub plane: usize,
}

impl PlaneLayout {
    fn len(self) -> usize {
        self.batch * self.channels * self.plane
    }

    fn base(self, n: usize, c: usize) -> usize {
        (n * self.channels + c) * self.plane
    }
}

/// Raw per-channel statistics plus epsilon.
#[derive(Debug, Clone, Copy)]
pub struct FoldedStats<'a> {
    pub scale: &'a [f32],
    pub bias: &'a [f32],
    pub mean: &'a [f32],
    pub variance: &'a [f32],
    pub epsilon: f32,
}

impl FoldedStats<'_> {
    /// `(alpha, beta)` for channel `c`.
    #[inline]
    pub fn fold(&self, c: usize) -> (f32, f32) {
        let alpha = self.scale[c] / (self.variance[c] + self.epsilon).sqrt();
        (alpha, self.bias[c] - self.mean[c] * alpha)
    }

    fn check(&self, p: PlaneLayout, x: &[f32], y: &[f32]) {
        assert_eq!(x.len(), p.len(), "input length must be n * c * plane");
        assert_eq!(y.len(), p.len(), "output length must be n * c * plane");
        for s in [self.scale, self.bias, self.mean, self.variance] {
            assert_eq!(s.len(), p.channels, "statistic length must be c");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Scalar reference.
///
/// # Panics
/// Panics if buffer lengths are inconsistent with `p`.
pub fn batch_norm_scalar(x: &[f32], s: &FoldedStats<'_>, p: PlaneLayout, y: &mut [f32]) {
    s.check(p, x, y);
    for n in 0..p.batch {
        for c in 0..p.channels {
            let (alpha, beta) = s.fold(c);
            let base = p.base(n, c);
            for i in base..base + p.plane {
                y[i] = x[i] * alpha + beta;
            }
        }
    }
}

/// Scalar form over `tile`-element blocks of each plane.
///
/// # Panics
/// Panics if buffer lengths are inconsistent with `p` or `tile == 0`.
pub fn batch_norm_tiled_scalar(
    x: &[f32],
    s: &FoldedStats<'_>,
    p: PlaneLayout,
    tile: usize,
    y: &mut [f32],
) {
    s.check(p, x, y);
    assert!(tile > 0, "tile must be positive");
    for n in 0..p.batch {
        for t0 in (0..p.plane).step_by(tile) {
            let t1 = (t0 + tile).min(p.plane);
            for c in 0..p.channels {
                let (alpha, beta) = s.fold(c);
                let base = p.base(n, c);
                for i in base + t0..base + t1 {
                    y[i] = x[i] * alpha + beta;
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

#[inline]
fn affine_strips<const L: usize>(x: &[f32], alpha: f32, beta: f32, y: &mut [f32]) {
    let (va, vb) = (Lanes::<L>::splat(alpha), Lanes::<L>::splat(beta));
    for s in strips::<L>(x.len()) {
        Lanes::<L>::load(&x[s.offset..], s.vl, 0.0)
            .mul_add(va, vb)
            .store(&mut y[s.offset..], s.vl);
    }
}

/// # Panics
/// Panics if buffer lengths are inconsistent with `p`.
pub fn batch_norm_vector<const L: usize>(
    x: &[f32],
    s: &FoldedStats<'_>,
    p: PlaneLayout,
    y: &mut [f32],
) {
    s.check(p, x, y);
    for n in 0..p.batch {
        for c in 0..p.channels {
            let (alpha, beta) = s.fold(c);
            let r = p.base(n, c)..p.base(n, c) + p.plane;
            affine_strips::<L>(&x[r.clone()], alpha, beta, &mut y[r]);
        }
    }
}

/// # Panics
/// Panics if buffer lengths are inconsistent with `p` or `tile == 0`.
pub fn batch_norm_tiled_vector<const L: usize>(
    x: &[f32],
    s: &FoldedStats<'_>,
    p: PlaneLayout,
    tile: usize,
    y: &mut [f32],
) {
    s.check(p, x, y);
    assert!(tile > 0, "tile must be positive");
    for n in 0..p.batch {
        for t0 in (0..p.plane).step_by(tile) {
            let t1 = (t0 + tile).min(p.plane);
            for c in 0..p.channels {
                let (alpha, beta) = s.fold(c);
                let base = p.base(n, c);
                let r = base + t0..base + t1;
                affine_strips::<L>(&x[r.clone()], alpha, beta, &mut y[r]);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
