//! GatherElements and ScatterElements over rank-2 tensors.
//!
//! Axis 0: `out[i,j] = data[idx[i,j], j]`; axis 1: `out[i,j] = data[i, idx[i,j]]`.
//! Negative indices count from the end of the indexed axis. Every index is
//! resolved before the output is touched, so an out-of-range index leaves
//! the output unchanged.
//!
//! Gather has tiled forms that walk the index matrix in `tile`-row blocks
//! (the scalar form also blocks columns). A gather is a pure copy, so every
//! variant yields the same bits.
//!
//! Scatter starts from a copy of `data` and applies updates in row-major scan
//! order over `indices`; repeated targets therefore see their updates in the
//! same order for every variant.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::{IndexTensor, Tensor};

/// Default block edge for tiled gather forms.
pub const DEFAULT_GATHER_TILE: usize = 8;

/// How a scattered update combines with the value already in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScatterReduction {
    /// Overwrite.
    #[default]
    None,
    Add,
    Mul,
    Max,
    Min,
}

impl ScatterReduction {
    #[inline]
    #[must_use]
    pub fn combine(self, current: f32, update: f32) -> f32 {
        match self {
            ScatterReduction::None => update,
            ScatterReduction::Add => current + update,
            ScatterReduction::Mul => current * update,
            ScatterReduction::Max => current.max(update),
            ScatterReduction::Min => current.min(update),
        }
    }
}

impl fmt::Display for ScatterReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScatterReduction::None => "none",
            ScatterReduction::Add => "add",
            ScatterReduction::Mul => "mul",
            ScatterReduction::Max => "max",
            ScatterReduction::Min => "min",
        })
    }
}

impl FromStr for ScatterReduction {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ScatterReduction::None),
            "add" => Ok(ScatterReduction::Add),
            "mul" => Ok(ScatterReduction::Mul),
            "max" => Ok(ScatterReduction::Max),
            "min" => Ok(ScatterReduction::Min),
            _ => Err(KernelError::config(
                KernelOp::ScatterElements.name(),
                format!("unknown reduction '{s}'"),
            )),
        }
    }
}

/// Extents of a rank-2 gather/scatter problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexGeometry {
    /// `[rows, cols]` of `data`.
    pub data: [usize; 2],
    /// `[rows, cols]` of `indices` (and of the gather output / scatter updates).
    pub indices: [usize; 2],
    pub axis: usize,
}

impl IndexGeometry {
    /// # Errors
    ///
    /// `ShapeMismatch` for non-rank-2 operands or `indices` wider than
    /// `data` off the axis; `InvalidConfiguration` for an axis above 1.
    pub fn new(op: KernelOp, data: &Tensor, indices: &IndexTensor, axis: usize) -> Result<Self> {
        let d = data.dims2(op.name())?;
        let i = indices.dims2(op.name())?;
        if axis > 1 {
            return Err(KernelError::config(
                op.name(),
                format!("axis {axis} out of range for rank 2"),
            ));
        }
        let other = 1 - axis;
        if i[other] > d[other] {
            return Err(KernelError::shape(
                op.name(),
                format!("indices shape {i:?} exceeds data shape {d:?} off axis {axis}"),
            ));
        }
        Ok(Self {
            data: d,
            indices: i,
            axis,
        })
    }

    /// Extent of the indexed axis.
    pub fn bound(&self) -> usize {
        self.data[self.axis]
    }

    /// Flat `data` offset addressed by `indices[i, j]` once resolved to `r`.
    #[inline]
    fn target(&self, i: usize, j: usize, r: usize) -> usize {
        if self.axis == 0 {
            r * self.data[1] + j
        } else {
            i * self.data[1] + r
        }
    }
}

/// Map a possibly negative index into `0..bound`.
#[inline]
fn resolve(raw: i64, bound: usize) -> Option<usize> {
    let wrapped = if raw < 0 { raw + bound as i64 } else { raw };
    usize::try_from(wrapped).ok().filter(|&r| r < bound)
}

fn check_indices(op: KernelOp, indices: &[i64], bound: usize) -> Result<()> {
    match indices.iter().find(|&&raw| resolve(raw, bound).is_none()) {
        Some(&index) => Err(KernelError::IndexOutOfRange {
            op: op.name().to_string(),
            index,
            bound,
        }),
        None => Ok(()),
    }
}

#[inline]
fn resolved(raw: i64, bound: usize) -> usize {
    match resolve(raw, bound) {
        Some(r) => r,
        None => panic!("index {raw} out of range for axis of extent {bound}"),
    }
}

/// Gather along `axis`; `output` has the shape of `indices`. Tiled variants
/// use [`DEFAULT_GATHER_TILE`].
///
/// # Errors
///
/// `ShapeMismatch` for non-rank-2 operands, `indices` wider than `data` off
/// the axis, or a wrongly shaped `output`; `InvalidConfiguration` for an
/// axis other than 0 or 1; `IndexOutOfRange` for an index outside
/// `[-dim, dim)`.
pub fn gather_elements(
    variant: Variant,
    data: &Tensor,
    indices: &IndexTensor,
    axis: usize,
    output: &mut Tensor,
) -> Result<()> {
    gather_elements_with_tile(variant, data, indices, axis, DEFAULT_GATHER_TILE, output)
}

/// [`gather_elements`] with an explicit block edge for tiled variants.
///
/// # Errors
///
/// As [`gather_elements`], plus `InvalidConfiguration` for a zero `tile`
/// with a tiled variant.
pub fn gather_elements_with_tile(
    variant: Variant,
    data: &Tensor,
    indices: &IndexTensor,
    axis: usize,
    tile: usize,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::GatherElements;
    ensure_variant(op, variant)?;
    let g = IndexGeometry::new(op, data, indices, axis)?;
    ensure_shape(op, "output", output, &g.indices)?;
    if variant.is_tiled() {
        ensure_positive(op, "tile", &[tile])?;
    }
    check_indices(op, indices.data(), g.bound())?;
    let (d, idx, y) = (data.data(), indices.data(), output.data_mut());
    match variant {
        Variant::Scalar => gather_elements_scalar(d, idx, &g, y),
        Variant::Vector(w) => dispatch_width!(w, gather_elements_vector(d, idx, &g, y)),
        Variant::TiledScalar => gather_elements_tiled_scalar(d, idx, &g, tile, y),
        Variant::TiledVector(w) => {
            dispatch_width!(w, gather_elements_tiled_vector(d, idx, &g, tile, y));
        }
    }
    Ok(())
}

/// Scatter `updates` into a copy of `data` along `axis`.
///
/// # Errors
///
/// As [`gather_elements`], plus `ShapeMismatch` if `updates` is not shaped
/// like `indices` or `output` not like `data`.
pub fn scatter_elements(
    variant: Variant,
    data: &Tensor,
    indices: &IndexTensor,
    updates: &Tensor,
    axis: usize,
    reduction: ScatterReduction,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::ScatterElements;
    ensure_variant(op, variant)?;
    let g = IndexGeometry::new(op, data, indices, axis)?;
    ensure_shape(op, "updates", updates, &g.indices)?;
    ensure_shape(op, "output", output, &g.data)?;
    check_indices(op, indices.data(), g.bound())?;
    let (d, idx, u, y) = (data.data(), indices.data(), updates.data(), output.data_mut());
    match variant.width() {
        None => scatter_elements_scalar(d, idx, u, &g, reduction, y),
        Some(w) => dispatch_width!(w, scatter_elements_vector(d, idx, u, &g, reduction, y)),
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// # Panics
/// Panics on length mismatches or an unresolvable index.
pub fn gather_elements_scalar(data: &[f32], indices: &[i64], g: &IndexGeometry, out: &mut [f32]) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(out.len(), ir * ic, "output length mismatch");
    for i in 0..ir {
        for j in 0..ic {
            let r = resolved(indices[i * ic + j], g.bound());
            out[i * ic + j] = data[g.target(i, j, r)];
        }
    }
}

/// Scalar gather over `tile x tile` blocks of the index matrix.
///
/// # Panics
/// Panics on length mismatches, an unresolvable index or `tile == 0`.
pub fn gather_elements_tiled_scalar(data: &[f32], indices: &[i64], g: &IndexGeometry, tile: usize, out: &mut [f32]) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(out.len(), ir * ic, "output length mismatch");
    assert!(tile > 0, "tile must be positive");
    for i0 in (0..ir).step_by(tile) {
        let i1 = (i0 + tile).min(ir);
        for j0 in (0..ic).step_by(tile) {
            let j1 = (j0 + tile).min(ic);
            for i in i0..i1 {
                for j in j0..j1 {
                    let r = resolved(indices[i * ic + j], g.bound());
                    out[i * ic + j] = data[g.target(i, j, r)];
                }
            }
        }
    }
}

/// # Panics
/// Panics on length mismatches or an unresolvable index.
pub fn scatter_elements_scalar(
    data: &[f32],
    indices: &[i64],
    updates: &[f32],
    g: &IndexGeometry,
    reduction: ScatterReduction,
    out: &mut [f32],
) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(updates.len(), ir * ic, "updates length mismatch");
    assert_eq!(out.len(), data.len(), "output length mismatch");
    out.copy_from_slice(data);
    for i in 0..ir {
        for j in 0..ic {
            let at = g.target(i, j, resolved(indices[i * ic + j], g.bound()));
            out[at] = reduction.combine(out[at], updates[i * ic + j]);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Resolve the `vl` target offsets of one strip of index row `i`.
#[inline]
fn strip_offsets<const L: usize>(indices: &[i64], g: &IndexGeometry, i: usize, j0: usize, vl: usize) -> [usize; L] {
    let mut offsets = [0usize; L];
    for (lane, off) in offsets[..vl].iter_mut().enumerate() {
        let j = j0 + lane;
        *off = g.target(i, j, resolved(indices[i * g.indices[1] + j], g.bound()));
    }
    offsets
}

/// Gather with indexed `L`-lane loads along each index row.
///
/// # Panics
/// Panics on length mismatches or an unresolvable index.
pub fn gather_elements_vector<const L: usize>(data: &[f32], indices: &[i64], g: &IndexGeometry, out: &mut [f32]) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(out.len(), ir * ic, "output length mismatch");
    for i in 0..ir {
        gather_row::<L>(data, indices, g, i, out);
    }
}

/// Vector gather over blocks of `tile` index rows.
///
/// # Panics
/// Panics on length mismatches, an unresolvable index or `tile == 0`.
pub fn gather_elements_tiled_vector<const L: usize>(
    data: &[f32],
    indices: &[i64],
    g: &IndexGeometry,
    tile: usize,
    out: &mut [f32],
) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(out.len(), ir * ic, "output length mismatch");
    assert!(tile > 0, "tile must be positive");
    for i0 in (0..ir).step_by(tile) {
        for i in i0..(i0 + tile).min(ir) {
            gather_row::<L>(data, indices, g, i, out);
        }
    }
}

#[inline]
fn gather_row<const L: usize>(data: &[f32], indices: &[i64], g: &IndexGeometry, i: usize, out: &mut [f32]) {
    let ic = g.indices[1];
    for s in strips::<L>(ic) {
        let offsets = strip_offsets::<L>(indices, g, i, s.offset, s.vl);
        Lanes::<L>::gather(data, &offsets[..s.vl], 0.0).store(&mut out[i * ic + s.offset..], s.vl);
    }
}

/// Copy `data` with lanes, then apply each strip of updates with an ordered
/// indexed store.
///
/// # Panics
/// Panics on length mismatches or an unresolvable index.
pub fn scatter_elements_vector<const L: usize>(
    data: &[f32],
    indices: &[i64],
    updates: &[f32],
    g: &IndexGeometry,
    reduction: ScatterReduction,
    out: &mut [f32],
) {
    let [ir, ic] = g.indices;
    assert_eq!(data.len(), g.data[0] * g.data[1], "data length mismatch");
    assert_eq!(indices.len(), ir * ic, "indices length mismatch");
    assert_eq!(updates.len(), ir * ic, "updates length mismatch");
    assert_eq!(out.len(), data.len(), "output length mismatch");
    for s in strips::<L>(data.len()) {
        Lanes::<L>::load(&data[s.offset..], s.vl, 0.0).store(&mut out[s.offset..], s.vl);
    }
    for i in 0..ir {
        for s in strips::<L>(ic) {
            let offsets = strip_offsets::<L>(indices, g, i, s.offset, s.vl);
            let u = Lanes::<L>::load(&updates[i * ic + s.offset..], s.vl, 0.0);
            // Lanes are stored in order so repeated targets resolve like the scan.
            for lane in 0..s.vl {
                let at = offsets[lane];
                out[at] = reduction.combine(out[at], u.0[lane]);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn data_3x3() -> Tensor {
        Tensor::from_vec(&[3, 3], (1..=9).map(|v| v as f32).collect()).unwrap()
    }

    fn idx(shape: &[usize], v: Vec<i64>) -> IndexTensor {
        IndexTensor::from_vec(shape, v).unwrap()
    }

    #[test]
    fn test_gather_axis0() {
        let i = idx(&[2, 3], vec![1, 2, 0, 2, 0, 0]);
        for v in KernelOp::GatherElements.variants() {
            let mut y = Tensor::zeros(&[2, 3]);
            gather_elements(v, &data_3x3(), &i, 0, &mut y).unwrap();
            assert_eq!(y.data(), &[4.0, 8.0, 3.0, 7.0, 2.0, 3.0], "variant {v}");
        }
    }

    #[test]
    fn test_gather_axis1_negative_indices() {
        let d = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let i = idx(&[2, 2], vec![0, 0, -1, 0]);
        for v in Variant::UNTILED {
            let mut y = Tensor::zeros(&[2, 2]);
            gather_elements(v, &d, &i, 1, &mut y).unwrap();
            assert_eq!(y.data(), &[1.0, 1.0, 4.0, 3.0], "variant {v}");
        }
    }

    #[test]
    fn test_gather_out_of_range_leaves_output() {
        let i = idx(&[1, 2], vec![0, 3]);
        let mut y = Tensor::from_vec(&[1, 2], vec![-1.0, -1.0]).unwrap();
        let err = gather_elements(Variant::Scalar, &data_3x3(), &i, 0, &mut y).unwrap_err();
        assert!(matches!(err, KernelError::IndexOutOfRange { index: 3, bound: 3, .. }));
        assert_eq!(y.data(), &[-1.0, -1.0]);
        assert_eq!(err.status_code(), 3);

        let below = idx(&[1, 1], vec![-4]);
        let mut y1 = Tensor::zeros(&[1, 1]);
        assert!(gather_elements(Variant::Scalar, &data_3x3(), &below, 1, &mut y1).is_err());
    }

    #[test]
    fn test_axis_and_shape_validation() {
        let i = idx(&[1, 1], vec![0]);
        let mut y = Tensor::zeros(&[1, 1]);
        assert!(matches!(
            gather_elements(Variant::Scalar, &data_3x3(), &i, 2, &mut y),
            Err(KernelError::InvalidConfiguration { .. })
        ));
        let wide = idx(&[1, 4], vec![0; 4]);
        let mut y4 = Tensor::zeros(&[1, 4]);
        assert!(matches!(
            gather_elements(Variant::Scalar, &data_3x3(), &wide, 0, &mut y4),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gather_tiled_blocks_cover_ragged_edges() {
        let d = Tensor::from_vec(&[7, 11], (0..77).map(|v| v as f32).collect()).unwrap();
        let i = idx(&[5, 11], (0..55).map(|v| (v * 3 % 7) as i64 - 3).collect());
        let mut expected = Tensor::zeros(&[5, 11]);
        gather_elements(Variant::Scalar, &d, &i, 0, &mut expected).unwrap();
        for tile in [1, 2, 3, 5, 64] {
            for v in Variant::TILED {
                let mut y = Tensor::from_vec(&[5, 11], vec![f32::NAN; 55]).unwrap();
                gather_elements_with_tile(v, &d, &i, 0, tile, &mut y).unwrap();
                assert_eq!(y.data(), expected.data(), "{v} tile {tile}");
            }
        }
    }

    #[test]
    fn test_gather_zero_tile_rejected() {
        let i = idx(&[1, 1], vec![0]);
        let mut y = Tensor::zeros(&[1, 1]);
        assert!(matches!(
            gather_elements_with_tile(Variant::TiledScalar, &data_3x3(), &i, 0, 0, &mut y),
            Err(KernelError::InvalidConfiguration { .. })
        ));
        gather_elements_with_tile(Variant::Scalar, &data_3x3(), &i, 0, 0, &mut y).unwrap();
    }

    #[test]
    fn test_scatter_tiled_rejected() {
        let i = idx(&[1, 1], vec![0]);
        let u = Tensor::zeros(&[1, 1]);
        let mut y = Tensor::zeros(&[3, 3]);
        assert!(matches!(
            scatter_elements(Variant::TiledScalar, &data_3x3(), &i, &u, 0, ScatterReduction::Add, &mut y),
            Err(KernelError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_scatter_axis0_overwrite() {
        let d = Tensor::zeros(&[3, 3]);
        let i = idx(&[2, 3], vec![1, 0, 2, 0, 2, 1]);
        let u = Tensor::from_vec(&[2, 3], vec![1.0, 1.1, 1.2, 2.0, 2.1, 2.2]).unwrap();
        for v in Variant::UNTILED {
            let mut y = Tensor::zeros(&[3, 3]);
            scatter_elements(v, &d, &i, &u, 0, ScatterReduction::None, &mut y).unwrap();
            assert_eq!(y.data(), &[2.0, 1.1, 0.0, 1.0, 0.0, 2.2, 0.0, 2.1, 1.2], "variant {v}");
        }
    }

    #[test]
    fn test_scatter_duplicates_in_scan_order() {
        let d = Tensor::from_vec(&[1, 5], vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let i = idx(&[1, 2], vec![1, 1]);
        let u = Tensor::from_vec(&[1, 2], vec![1.1, 2.1]).unwrap();
        let cases = [
            (ScatterReduction::None, 2.1),
            (ScatterReduction::Add, 2.0 + 1.1 + 2.1),
            (ScatterReduction::Mul, 2.0 * 1.1 * 2.1),
            (ScatterReduction::Max, 2.1),
            (ScatterReduction::Min, 1.1),
        ];
        for (red, want) in cases {
            for v in Variant::UNTILED {
                let mut y = Tensor::zeros(&[1, 5]);
                scatter_elements(v, &d, &i, &u, 1, red, &mut y).unwrap();
                assert_eq!(y.data()[1], want, "{red} {v}");
                assert_eq!(y.data()[0], 1.0);
                assert_eq!(&y.data()[2..], &[3.0, 4.0, 5.0]);
            }
        }
    }

    #[test]
    fn test_scatter_updates_shape_checked() {
        let i = idx(&[1, 2], vec![0, 1]);
        let u = Tensor::zeros(&[2, 1]);
        let mut y = Tensor::zeros(&[3, 3]);
        assert!(matches!(
            scatter_elements(Variant::Scalar, &data_3x3(), &i, &u, 1, ScatterReduction::Add, &mut y),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reduction_parse() {
        assert_eq!("mul".parse::<ScatterReduction>().unwrap(), ScatterReduction::Mul);
        assert!("avg".parse::<ScatterReduction>().is_err());
        assert_eq!(ScatterReduction::Max.to_string(), "max");
    }

    proptest! {
        #[test]
        fn prop_scatter_add_variants_identical(
            rows in 1usize..5, cols in 1usize..40, axis in 0usize..2,
            raw in proptest::collection::vec(-20i64..20, 160),
        ) {
            let d = Tensor::from_vec(&[rows, cols], (0..rows * cols).map(|v| v as f32 * 0.5).collect()).unwrap();
            let bound = (if axis == 0 { rows } else { cols }) as i64;
            let n = rows * cols;
            let i = idx(&[rows, cols], raw[..n].iter().map(|r| r.rem_euclid(2 * bound) - bound).collect());
            let u = Tensor::from_vec(&[rows, cols], (0..n).map(|v| 1.0 + v as f32 * 0.01).collect()).unwrap();
            let mut expected = Tensor::zeros(&[rows, cols]);
            scatter_elements(Variant::Scalar, &d, &i, &u, axis, ScatterReduction::Add, &mut expected).unwrap();
            let mut gathered = Tensor::zeros(&[rows, cols]);
            gather_elements(Variant::Scalar, &d, &i, axis, &mut gathered).unwrap();
            for v in &Variant::UNTILED[1..] {
                let mut y = Tensor::zeros(&[rows, cols]);
                scatter_elements(*v, &d, &i, &u, axis, ScatterReduction::Add, &mut y).unwrap();
                prop_assert_eq!(y.data(), expected.data());
            }
            for v in &KernelOp::GatherElements.variants()[1..] {
                let mut gy = Tensor::zeros(&[rows, cols]);
                gather_elements_with_tile(*v, &d, &i, axis, 3, &mut gy).unwrap();
                prop_assert_eq!(gy.data(), gathered.data());
            }
        }
    }
}
