//! Matrix multiply and dense-layer kernels.
//!
//! `C[i,j] = sum_k A[i,k] * B[k,j]` for `[M,K] x [K,N]`, and the dense form
//! `y[r,o] = bias[o] + sum_i x[r,i] * W[o,i]` (GEMM against a transposed
//! weight matrix).
//!
//! Matmul variants vectorize over `j` and block over `M, N, K`, but every
//! `C[i,j]` still receives its products one at a time in ascending `k`, so
//! all ten variants are bit-identical. Dense vector forms reduce along the
//! input features with per-lane partial sums and match only within tolerance.

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Cache-block extents for tiled matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tiling {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl Default for Tiling {
    fn default() -> Self {
        Self {
            m: 32,
            n: 32,
            k: 32,
        }
    }
}

/// `[M, K] x [K, N] -> [M, N]`.
///
/// # Errors
///
/// `ShapeMismatch` for non-matrix operands, disagreeing inner dimensions or
/// a wrongly shaped `c`; `InvalidConfiguration` for a zero tile extent when a
/// tiled variant is requested.
pub fn matmul(variant: Variant, a: &Tensor, b: &Tensor, tiling: Tiling, c: &mut Tensor) -> Result<()> {
    let op = KernelOp::MatMul;
    ensure_variant(op, variant)?;
    let [m, k] = a.dims2(op.name())?;
    let [k2, n] = b.dims2(op.name())?;
    if k != k2 {
        return Err(KernelError::shape(
            op.name(),
            format!("inner dimensions differ: A is [{m}, {k}], B is [{k2}, {n}]"),
        ));
    }
    ensure_shape(op, "output", c, &[m, n])?;
    if variant.is_tiled() {
        ensure_positive(op, "tile extents", &[tiling.m, tiling.n, tiling.k])?;
    }
    let dims = MatDims { m, k, n };
    run_matmul(variant, a.data(), b.data(), dims, tiling, c.data_mut());
    Ok(())
}

/// Dispatch on an already validated problem.
pub(crate) fn run_matmul(
    variant: Variant,
    a: &[f32],
    b: &[f32],
    d: MatDims,
    tiling: Tiling,
    c: &mut [f32],
) {
    match variant {
        Variant::Scalar => matmul_scalar(a, b, d, c),
        Variant::Vector(w) => dispatch_width!(w, matmul_vector(a, b, d, c)),
        Variant::TiledScalar => matmul_tiled_scalar(a, b, d, tiling, c),
        Variant::TiledVector(w) => dispatch_width!(w, matmul_tiled_vector(a, b, d, tiling, c)),
    }
}

/// Fully connected layer over `[B, in]` (or `[in]`) rows.
///
/// `weights` is `[out, in]`, `bias` is `[out]`, `y` is `[B, out]` (or `[out]`).
///
/// # Errors
///
/// `ShapeMismatch` if the in-feature counts differ, `bias` is not `[out]`,
/// or `y` is wrongly shaped.
pub fn dense(
    variant: Variant,
    x: &Tensor,
    weights: &Tensor,
    bias: Option<&Tensor>,
    y: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::Dense;
    ensure_variant(op, variant)?;
    let [out_f, in_f] = weights.dims2(op.name())?;
    let (rows, expected_y) = match *x.shape() {
        [i] if i == in_f => (1, vec![out_f]),
        [r, i] if i == in_f => (r, vec![r, out_f]),
        _ => {
            return Err(KernelError::shape(
                op.name(),
                format!("input {:?} does not end in {in_f} features", x.shape()),
            ))
        }
    };
    if let Some(b) = bias {
        ensure_shape(op, "bias", b, &[out_f])?;
    }
    ensure_shape(op, "output", y, &expected_y)?;
    let d = DenseDims {
        rows,
        in_features: in_f,
        out_features: out_f,
    };
    let bias = bias.map(Tensor::data);
    let (xs, ws, ys) = (x.data(), weights.data(), y.data_mut());
    match variant.width() {
        None => dense_scalar(xs, ws, bias, d, ys),
        Some(w) => dispatch_width!(w, dense_vector(xs, ws, bias, d, ys)),
    }
    Ok(())
}

/// Matmul extents: `A` is `m x k`, `B` is `k x n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl MatDims {
    fn check(self, a: &[f32], b: &[f32], c: &[f32]) {
        assert_eq!(a.len(), self.m * self.k, "A length must be m * k");
        assert_eq!(b.len(), self.k * self.n, "B length must be k * n");
        assert_eq!(c.len(), self.m * self.n, "C length must be m * n");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseDims {
    pub rows: usize,
    pub in_features: usize,
    pub out_features: usize,
}

impl DenseDims {
    fn check(self, x: &[f32], w: &[f32], bias: Option<&[f32]>, y: &[f32]) {
        assert_eq!(x.len(), self.rows * self.in_features, "x length mismatch");
        assert_eq!(w.len(), self.out_features * self.in_features, "weight length mismatch");
        if let Some(b) = bias {
            assert_eq!(b.len(), self.out_features, "bias length mismatch");
        }
        assert_eq!(y.len(), self.rows * self.out_features, "y length mismatch");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// # Panics
/// Panics if buffer lengths disagree with `d`.
pub fn matmul_scalar(a: &[f32], b: &[f32], d: MatDims, c: &mut [f32]) {
    d.check(a, b, c);
    for i in 0..d.m {
        for j in 0..d.n {
            let mut sum = 0.0_f32;
            for p in 0..d.k {
                sum += a[i * d.k + p] * b[p * d.n + j];
            }
            c[i * d.n + j] = sum;
        }
    }
}

/// Blocked over `i -> k -> j`; each `C[i,j]` accumulates in ascending `k`.
///
/// # Panics
/// Panics if buffer lengths disagree with `d` or a tile extent is zero.
pub fn matmul_tiled_scalar(a: &[f32], b: &[f32], d: MatDims, t: Tiling, c: &mut [f32]) {
    d.check(a, b, c);
    assert!(t.m > 0 && t.n > 0 && t.k > 0, "tile extents must be positive");
    c.fill(0.0);
    for i0 in (0..d.m).step_by(t.m) {
        let i1 = (i0 + t.m).min(d.m);
        for p0 in (0..d.k).step_by(t.k) {
            let p1 = (p0 + t.k).min(d.k);
            for j0 in (0..d.n).step_by(t.n) {
                let j1 = (j0 + t.n).min(d.n);
                for i in i0..i1 {
                    for j in j0..j1 {
                        let mut acc = c[i * d.n + j];
                        for p in p0..p1 {
                            acc += a[i * d.k + p] * b[p * d.n + j];
                        }
                        c[i * d.n + j] = acc;
                    }
                }
            }
        }
    }
}

/// # Panics
/// Panics if buffer lengths disagree with `d`.
pub fn dense_scalar(x: &[f32], w: &[f32], bias: Option<&[f32]>, d: DenseDims, y: &mut [f32]) {
    d.check(x, w, bias, y);
    for r in 0..d.rows {
        let xr = &x[r * d.in_features..(r + 1) * d.in_features];
        for o in 0..d.out_features {
            let wr = &w[o * d.in_features..(o + 1) * d.in_features];
            let mut sum = 0.0_f32;
            for i in 0..d.in_features {
                sum += xr[i] * wr[i];
            }
            y[r * d.out_features + o] = sum + bias.map_or(0.0, |b| b[o]);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// One row strip `C[i, j0..j0+vl] += sum_{p in ps} A[i,p] * B[p, j0..]`.
#[inline]
fn row_strip<const L: usize>(
    a_row: &[f32],
    b: &[f32],
    n: usize,
    j0: usize,
    vl: usize,
    ps: std::ops::Range<usize>,
    mut acc: Lanes<L>,
) -> Lanes<L> {
    for p in ps {
        let vb = Lanes::<L>::load(&b[p * n + j0..], vl, 0.0);
        acc = acc + Lanes::splat(a_row[p]) * vb;
    }
    acc
}

/// # Panics
/// Panics if buffer lengths disagree with `d`.
pub fn matmul_vector<const L: usize>(a: &[f32], b: &[f32], d: MatDims, c: &mut [f32]) {
    d.check(a, b, c);
    for i in 0..d.m {
        let a_row = &a[i * d.k..(i + 1) * d.k];
        for s in strips::<L>(d.n) {
            let acc = row_strip::<L>(a_row, b, d.n, s.offset, s.vl, 0..d.k, Lanes::splat(0.0));
            acc.store(&mut c[i * d.n + s.offset..], s.vl);
        }
    }
}

/// # Panics
/// Panics if buffer lengths disagree with `d` or a tile extent is zero.
pub fn matmul_tiled_vector<const L: usize>(
    a: &[f32],
    b: &[f32],
    d: MatDims,
    t: Tiling,
    c: &mut [f32],
) {
    d.check(a, b, c);
    assert!(t.m > 0 && t.n > 0 && t.k > 0, "tile extents must be positive");
    c.fill(0.0);
    for i0 in (0..d.m).step_by(t.m) {
        let i1 = (i0 + t.m).min(d.m);
        for p0 in (0..d.k).step_by(t.k) {
            let p1 = (p0 + t.k).min(d.k);
            for j0 in (0..d.n).step_by(t.n) {
                let j1 = (j0 + t.n).min(d.n);
                for i in i0..i1 {
                    let a_row = &a[i * d.k..(i + 1) * d.k];
                    for s in strips::<L>(j1 - j0) {
                        let at = i * d.n + j0 + s.offset;
                        let acc = Lanes::<L>::load(&c[at..], s.vl, 0.0);
                        let acc = row_strip::<L>(a_row, b, d.n, j0 + s.offset, s.vl, p0..p1, acc);
                        acc.store(&mut c[at..], s.vl);
                    }
                }
            }
        }
    }
}

/// # Panics
/// Panics if buffer lengths disagree with `d`.
pub fn dense_vector<const L: usize>(
    x: &[f32],
    w: &[f32],
    bias: Option<&[f32]>,
    d: DenseDims,
    y: &mut [f32],
) {
    d.check(x, w, bias, y);
    for r in 0..d.rows {
        let xr = &x[r * d.in_features..(r + 1) * d.in_features];
        for o in 0..d.out_features {
            let wr = &w[o * d.in_features..(o + 1) * d.in_features];
            let mut acc = Lanes::<L>::splat(0.0);
            for s in strips::<L>(d.in_features) {
                let vx = Lanes::<L>::load(&xr[s.offset..], s.vl, 0.0);
                let vw = Lanes::<L>::load(&wr[s.offset..], s.vl, 0.0);
                acc = acc + vx * vw;
            }
            y[r * d.out_features + o] = acc.reduce_sum(L) + bias.map_or(0.0, |b| b[o]);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Width;
    use proptest::prelude::*;

    fn mat(r: usize, c: usize, f: impl Fn(usize) -> f32) -> Tensor {
        Tensor::from_vec(&[r, c], (0..r * c).map(f).collect()).unwrap()
    }

    // ── Matmul known-answer tests ────────────────────────────────────────

    #[test]
    fn test_matmul_2x3_times_3x2() {
        let a = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_vec(&[3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        for v in KernelOp::MatMul.variants() {
            let mut c = Tensor::zeros(&[2, 2]);
            let tiling = Tiling { m: 1, n: 1, k: 2 };
            matmul(v, &a, &b, tiling, &mut c).unwrap();
            assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0], "variant {v}");
        }
    }

    #[test]
    fn test_matmul_identity() {
        let a = mat(5, 5, |i| (i as f32).sin());
        let eye = mat(5, 5, |i| if i % 6 == 0 { 1.0 } else { 0.0 });
        let mut c = Tensor::zeros(&[5, 5]);
        matmul(Variant::Vector(Width::M1), &a, &eye, Tiling::default(), &mut c).unwrap();
        assert_eq!(c.data(), a.data());
    }

    #[test]
    fn test_matmul_inner_dimension_mismatch() {
        let a = Tensor::zeros(&[2, 3]);
        let b = Tensor::zeros(&[4, 2]);
        let mut c = Tensor::zeros(&[2, 2]);
        assert!(matches!(
            matmul(Variant::Scalar, &a, &b, Tiling::default(), &mut c),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_matmul_zero_tile_rejected() {
        let a = Tensor::zeros(&[2, 2]);
        let b = Tensor::zeros(&[2, 2]);
        let mut c = Tensor::zeros(&[2, 2]);
        let bad = Tiling { m: 0, n: 4, k: 4 };
        assert!(matmul(Variant::Scalar, &a, &b, bad, &mut c).is_ok());
        assert!(matches!(
            matmul(Variant::TiledScalar, &a, &b, bad, &mut c),
            Err(KernelError::InvalidConfiguration { .. })
        ));
    }

    // ── Dense ─────────────────────────────────────────────────────────────

    #[test]
    fn test_dense_single_vector() {
        let x = Tensor::from_vec(&[3], vec![1.0, 2.0, 3.0]).unwrap();
        let w = Tensor::from_vec(&[2, 3], vec![1.0, 0.0, -1.0, 0.5, 0.5, 0.5]).unwrap();
        let b = Tensor::from_vec(&[2], vec![10.0, -3.0]).unwrap();
        for v in Variant::UNTILED {
            let mut y = Tensor::zeros(&[2]);
            dense(v, &x, &w, Some(&b), &mut y).unwrap();
            assert_eq!(y.data(), &[8.0, 0.0], "variant {v}");
        }
    }

    #[test]
    fn test_dense_feature_mismatch() {
        let x = Tensor::zeros(&[4, 5]);
        let w = Tensor::zeros(&[3, 6]);
        let mut y = Tensor::zeros(&[4, 3]);
        assert!(matches!(
            dense(Variant::Scalar, &x, &w, None, &mut y),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_dense_rejects_tiled() {
        let x = Tensor::zeros(&[2]);
        let w = Tensor::zeros(&[1, 2]);
        let mut y = Tensor::zeros(&[1]);
        assert!(dense(Variant::TiledScalar, &x, &w, None, &mut y).is_err());
    }

    // ── Cross-variant equivalence ────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_matmul_variants_bit_identical(
            m in 1usize..9, k in 1usize..20, n in 1usize..40,
            tm in 1usize..6, tn in 1usize..12, tk in 1usize..7,
        ) {
            let a = mat(m, k, |i| ((i * 37 % 23) as f32 - 11.0) * 0.173);
            let b = mat(k, n, |i| ((i * 53 % 29) as f32 - 14.0) * 0.091);
            let tiling = Tiling { m: tm, n: tn, k: tk };
            let mut expected = Tensor::zeros(&[m, n]);
            matmul(Variant::Scalar, &a, &b, tiling, &mut expected).unwrap();
            for v in KernelOp::MatMul.variants() {
                let mut c = Tensor::zeros(&[m, n]);
                matmul(v, &a, &b, tiling, &mut c).unwrap();
                prop_assert_eq!(c.data(), expected.data(), "variant {}", v);
            }
        }

        #[test]
        fn prop_dense_variants_within_tolerance(
            rows in 1usize..4, inf in 1usize..70, outf in 1usize..6,
        ) {
            let x = mat(rows, inf, |i| ((i * 7 % 13) as f32 - 6.0) * 0.21);
            let w = mat(outf, inf, |i| ((i * 11 % 17) as f32 - 8.0) * 0.05);
            let b = Tensor::from_vec(&[outf], (0..outf).map(|o| o as f32 * 0.5).collect()).unwrap();
            let mut expected = Tensor::zeros(&[rows, outf]);
            dense(Variant::Scalar, &x, &w, Some(&b), &mut expected).unwrap();
            for v in Variant::UNTILED {
                let mut y = Tensor::zeros(&[rows, outf]);
                dense(v, &x, &w, Some(&b), &mut y).unwrap();
                for (p, q) in y.data().iter().zip(expected.data()) {
                    prop_assert!((p - q).abs() < 1e-4 * (1.0 + q.abs()), "variant {}: {} vs {}", v, p, q);
                }
            }
        }
    }
}
