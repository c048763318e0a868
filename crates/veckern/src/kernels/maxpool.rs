//! 2D max pooling with optional argmax output.
//!
//! Window positions outside the input are excluded from the maximum (padding
//! never wins). Within a window, positions are scanned in `(kh, kw)` order
//! and a value replaces the running maximum only if strictly greater, so the
//! first maximum wins ties. Argmax indices are flat offsets into the whole
//! input tensor: `((n*C + c)*H + h)*W + w`.

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::{IndexTensor, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2dParams {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    /// Symmetric padding; must be smaller than the kernel.
    pub padding: (usize, usize),
    /// Round the output extent up instead of down.
    pub ceil_mode: bool,
}

impl Default for MaxPool2dParams {
    fn default() -> Self {
        Self {
            kernel: (2, 2),
            stride: (2, 2),
            padding: (0, 0),
            ceil_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl PoolGeometry {
    /// # Errors
    ///
    /// `ShapeMismatch` unless `input` is rank 4; `InvalidConfiguration` for
    /// zero kernel or stride, padding not smaller than the kernel, or a
    /// kernel larger than the padded input.
    pub fn new(input: &Tensor, params: MaxPool2dParams) -> Result<Self> {
        let op = KernelOp::MaxPool2d;
        let [batch, channels, height, width] = input.dims4(op.name())?;
        let (kernel_h, kernel_w) = params.kernel;
        let (stride_h, stride_w) = params.stride;
        let (pad_h, pad_w) = params.padding;
        ensure_positive(op, "kernel extent", &[kernel_h, kernel_w])?;
        ensure_positive(op, "stride", &[stride_h, stride_w])?;
        if pad_h >= kernel_h || pad_w >= kernel_w {
            return Err(KernelError::config(
                op.name(),
                format!("padding {:?} must be smaller than kernel {:?}", params.padding, params.kernel),
            ));
        }
        let out_h = pool_extent(height, kernel_h, stride_h, pad_h, params.ceil_mode)?;
        let out_w = pool_extent(width, kernel_w, stride_w, pad_w, params.ceil_mode)?;
        Ok(Self {
            batch,
            channels,
            height,
            width,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad_h,
            pad_w,
            out_h,
            out_w,
        })
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.out_h, self.out_w]
    }

    fn check(&self, x: &[f32], y: &[f32], argmax: Option<&[i64]>) {
        let out_len = self.batch * self.channels * self.out_h * self.out_w;
        assert_eq!(
            x.len(),
            self.batch * self.channels * self.height * self.width,
            "input length mismatch"
        );
        assert_eq!(y.len(), out_len, "output length mismatch");
        if let Some(a) = argmax {
            assert_eq!(a.len(), out_len, "argmax length mismatch");
        }
    }
}

/// Output extent along one axis.
///
/// In ceil mode the last window is dropped when it would start inside the
/// trailing padding.
pub fn pool_extent(input: usize, k: usize, stride: usize, pad: usize, ceil_mode: bool) -> Result<usize> {
    let padded = input + 2 * pad;
    if k > padded {
        return Err(KernelError::config(
            KernelOp::MaxPool2d.name(),
            format!("kernel extent {k} exceeds padded input extent {padded}"),
        ));
    }
    let span = padded - k;
    if !ceil_mode {
        return Ok(span / stride + 1);
    }
    let mut out = span.div_ceil(stride) + 1;
    if (out - 1) * stride >= input + pad {
        out -= 1;
    }
    Ok(out)
}

/// Max pooling; `argmax`, when given, receives the flat input index of each
/// selected maximum.
///
/// # Errors
///
/// See [`PoolGeometry::new`]; additionally `ShapeMismatch` if `output` or
/// `argmax` is not shaped like the pooled output.
pub fn max_pool2d(
    variant: Variant,
    input: &Tensor,
    params: MaxPool2dParams,
    output: &mut Tensor,
    argmax: Option<&mut IndexTensor>,
) -> Result<()> {
    let op = KernelOp::MaxPool2d;
    ensure_variant(op, variant)?;
    let g = PoolGeometry::new(input, params)?;
    ensure_shape(op, "output", output, &g.output_shape())?;
    if let Some(a) = argmax.as_deref() {
        ensure_shape(op, "argmax", a, &g.output_shape())?;
    }
    let (x, y, a) = (input.data(), output.data_mut(), argmax.map(IndexTensor::data_mut));
    match variant.width() {
        None => max_pool2d_scalar(x, &g, y, a),
        Some(w) => dispatch_width!(w, max_pool2d_vector(x, &g, y, a)),
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn max_pool2d_scalar(x: &[f32], g: &PoolGeometry, y: &mut [f32], mut argmax: Option<&mut [i64]>) {
    g.check(x, y, argmax.as_deref());
    let hw = g.height * g.width;
    for nc in 0..g.batch * g.channels {
        let plane = &x[nc * hw..][..hw];
        for oh in 0..g.out_h {
            for ow in 0..g.out_w {
                let mut best = f32::NEG_INFINITY;
                let mut best_at: Option<usize> = None;
                for kh in 0..g.kernel_h {
                    let Some(ih) = (oh * g.stride_h + kh).checked_sub(g.pad_h) else { continue };
                    if ih >= g.height {
                        continue;
                    }
                    for kw in 0..g.kernel_w {
                        let Some(iw) = (ow * g.stride_w + kw).checked_sub(g.pad_w) else { continue };
                        if iw >= g.width {
                            continue;
                        }
                        let v = plane[ih * g.width + iw];
                        if best_at.is_none() || v > best {
                            best = v;
                            best_at = Some(ih * g.width + iw);
                        }
                    }
                }
                let at = (nc * g.out_h + oh) * g.out_w + ow;
                y[at] = best;
                if let Some(a) = argmax.as_deref_mut() {
                    a[at] = best_at.map_or(-1, |p| (nc * hw + p) as i64);
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Pooling over strips of output columns with strided window loads.
///
/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn max_pool2d_vector<const L: usize>(
    x: &[f32],
    g: &PoolGeometry,
    y: &mut [f32],
    mut argmax: Option<&mut [i64]>,
) {
    g.check(x, y, argmax.as_deref());
    let hw = g.height * g.width;
    for nc in 0..g.batch * g.channels {
        let plane = &x[nc * hw..][..hw];
        for oh in 0..g.out_h {
            for s in strips::<L>(g.out_w) {
                let mut best = Lanes::<L>::splat(f32::NEG_INFINITY);
                let mut seen = [false; L];
                let mut best_at = [-1_i64; L];
                for kh in 0..g.kernel_h {
                    let Some(ih) = (oh * g.stride_h + kh).checked_sub(g.pad_h) else { continue };
                    if ih >= g.height {
                        continue;
                    }
                    let row = &plane[ih * g.width..][..g.width];
                    for kw in 0..g.kernel_w {
                        let start = (s.offset * g.stride_w + kw) as isize - g.pad_w as isize;
                        let (v, valid) = Lanes::<L>::load_window(row, start, g.stride_w, s.vl, f32::NEG_INFINITY);
                        let greater = v.gt(best);
                        let mut take = [false; L];
                        for i in 0..L {
                            take[i] = valid[i] && (!seen[i] || greater[i]);
                        }
                        best = best.merge(take, v);
                        for i in 0..s.vl {
                            if take[i] {
                                seen[i] = true;
                                let iw = start + (i * g.stride_w) as isize;
                                best_at[i] = (nc * hw + ih * g.width) as i64 + iw as i64;
                            }
                        }
                    }
                }
                let at = (nc * g.out_h + oh) * g.out_w + s.offset;
                best.store(&mut y[at..], s.vl);
                if let Some(a) = argmax.as_deref_mut() {
                    a[at..at + s.vl].copy_from_slice(&best_at[..s.vl]);
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
