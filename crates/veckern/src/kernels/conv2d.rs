//! Direct 2D convolution and its 3x3 specialization.
//!
//! `out[n,co,oh,ow] = bias[co] + sum_{ci,kh,kw} x[n,ci,oh*sH+kh-pH,ow*sW+kw-pW] * k[co,ci,kh,kw]`
//!
//! Input `[N, Cin, H, W]`, kernel `[Cout, Cin, kH, kW]`, output
//! `[N, Cout, (H+2pH-kH)/sH+1, (W+2pW-kW)/sW+1]`. Padded positions are
//! skipped. Every path sums products from zero in `(ci, kh, kw)` order and
//! adds the bias last, so the direct, 3x3 and im2col forms agree exactly.
//! Vector forms run over output columns; lanes whose input column falls in
//! the padding are masked out.

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Stride and symmetric zero padding, each `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: (0, 0),
        }
    }
}

/// Every extent of one convolution problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub height: usize,
    pub width: usize,
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvGeometry {
    /// Derive and validate the geometry of `input * kernel`.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` for wrong ranks or disagreeing channel counts;
    /// `InvalidConfiguration` for zero strides or a kernel larger than the
    /// padded input.
    pub fn new(op: KernelOp, input: &Tensor, kernel: &Tensor, params: Conv2dParams) -> Result<Self> {
        let [batch, in_channels, height, width] = input.dims4(op.name())?;
        let [out_channels, kc, kernel_h, kernel_w] = kernel.dims4(op.name())?;
        if kc != in_channels {
            return Err(KernelError::shape(
                op.name(),
                format!("kernel expects {kc} input channels, input has {in_channels}"),
            ));
        }
        let (stride_h, stride_w) = params.stride;
        let (pad_h, pad_w) = params.padding;
        ensure_positive(op, "stride", &[stride_h, stride_w])?;
        ensure_positive(op, "kernel extent", &[kernel_h, kernel_w])?;
        let out_h = conv_out_extent(op, height, kernel_h, stride_h, pad_h)?;
        let out_w = conv_out_extent(op, width, kernel_w, stride_w, pad_w)?;
        Ok(Self {
            batch,
            in_channels,
            height,
            width,
            out_channels,
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
        [self.batch, self.out_channels, self.out_h, self.out_w]
    }

    /// Rows of the im2col matrix: `Cin * kH * kW`.
    pub fn patch_len(&self) -> usize {
        self.in_channels * self.kernel_h * self.kernel_w
    }

    /// Columns of the im2col matrix: `outH * outW`.
    pub fn out_plane(&self) -> usize {
        self.out_h * self.out_w
    }

    /// Input row for output row `oh` and kernel row `kh`, if not padding.
    #[inline]
    pub(crate) fn input_row(&self, oh: usize, kh: usize) -> Option<usize> {
        (oh * self.stride_h + kh)
            .checked_sub(self.pad_h)
            .filter(|&ih| ih < self.height)
    }

    /// Signed input column of output column `ow` under kernel column `kw`.
    #[inline]
    pub(crate) fn input_col(&self, ow: usize, kw: usize) -> isize {
        (ow * self.stride_w + kw) as isize - self.pad_w as isize
    }

    fn check(&self, x: &[f32], k: &[f32], bias: Option<&[f32]>, y: &[f32]) {
        let [n, co, oh, ow] = self.output_shape();
        assert_eq!(
            x.len(),
            self.batch * self.in_channels * self.height * self.width,
            "input length mismatch"
        );
        assert_eq!(k.len(), co * self.patch_len(), "kernel length mismatch");
        if let Some(b) = bias {
            assert_eq!(b.len(), co, "bias length mismatch");
        }
        assert_eq!(y.len(), n * co * oh * ow, "output length mismatch");
    }
}

/// `(in + 2*pad - k) / stride + 1`, failing if the kernel does not fit.
pub(crate) fn conv_out_extent(op: KernelOp, input: usize, k: usize, stride: usize, pad: usize) -> Result<usize> {
    let padded = input + 2 * pad;
    if k > padded {
        return Err(KernelError::config(
            op.name(),
            format!("kernel extent {k} exceeds padded input extent {padded}"),
        ));
    }
    Ok((padded - k) / stride + 1)
}

/// Validate the shared conv arguments and return the geometry.
pub(crate) fn validate_conv(
    op: KernelOp,
    variant: Variant,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
    output: &Tensor,
) -> Result<ConvGeometry> {
    ensure_variant(op, variant)?;
    let g = ConvGeometry::new(op, input, kernel, params)?;
    if let Some(b) = bias {
        ensure_shape(op, "bias", b, &[g.out_channels])?;
    }
    ensure_shape(op, "output", output, &g.output_shape())?;
    Ok(g)
}

/// Direct convolution.
///
/// # Errors
///
/// See [`ConvGeometry::new`]; additionally `ShapeMismatch` for a wrongly
/// shaped `bias` or `output`.
pub fn conv2d(
    variant: Variant,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
    output: &mut Tensor,
) -> Result<()> {
    let g = validate_conv(KernelOp::Conv2d, variant, input, kernel, bias, params, output)?;
    let (x, k, b, y) = (input.data(), kernel.data(), bias.map(Tensor::data), output.data_mut());
    match variant.width() {
        None => conv2d_scalar(x, k, b, &g, y),
        Some(w) => dispatch_width!(w, conv2d_vector(x, k, b, &g, y)),
    }
    Ok(())
}

/// Convolution with a 3x3 kernel, unrolled over the nine taps.
///
/// # Errors
///
/// `InvalidConfiguration` if the kernel is not `3x3`; otherwise as [`conv2d`].
pub fn conv2d_3x3(
    variant: Variant,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::Conv2d3x3;
    if let [_, _, kh, kw] = *kernel.shape() {
        if (kh, kw) != (3, 3) {
            return Err(KernelError::config(
                op.name(),
                format!("kernel must be 3x3, got {kh}x{kw}"),
            ));
        }
    }
    let g = validate_conv(op, variant, input, kernel, bias, params, output)?;
    let (x, k, b, y) = (input.data(), kernel.data(), bias.map(Tensor::data), output.data_mut());
    match variant.width() {
        None => conv2d_3x3_scalar(x, k, b, &g, y),
        Some(w) => dispatch_width!(w, conv2d_3x3_vector(x, k, b, &g, y)),
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Direct convolution, scalar reference.
///
/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn conv2d_scalar(x: &[f32], k: &[f32], bias: Option<&[f32]>, g: &ConvGeometry, y: &mut [f32]) {
    g.check(x, k, bias, y);
    let (hw, khw) = (g.height * g.width, g.kernel_h * g.kernel_w);
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            for oh in 0..g.out_h {
                for ow in 0..g.out_w {
                    let mut sum = 0.0_f32;
                    for ci in 0..g.in_channels {
                        let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                        let taps = &k[(co * g.in_channels + ci) * khw..][..khw];
                        for kh in 0..g.kernel_h {
                            let Some(ih) = g.input_row(oh, kh) else { continue };
                            for kw in 0..g.kernel_w {
                                let iw = g.input_col(ow, kw);
                                if iw < 0 || iw as usize >= g.width {
                                    continue;
                                }
                                sum += plane[ih * g.width + iw as usize] * taps[kh * g.kernel_w + kw];
                            }
                        }
                    }
                    let at = ((n * g.out_channels + co) * g.out_h + oh) * g.out_w + ow;
                    y[at] = match bias {
                        Some(b) => sum + b[co],
                        None => sum,
                    };
                }
            }
        }
    }
}

/// 3x3 convolution, scalar, nine taps unrolled per input channel.
///
/// # Panics
/// Panics if buffer lengths disagree with `g` or the kernel is not 3x3.
pub fn conv2d_3x3_scalar(x: &[f32], k: &[f32], bias: Option<&[f32]>, g: &ConvGeometry, y: &mut [f32]) {
    g.check(x, k, bias, y);
    assert_eq!((g.kernel_h, g.kernel_w), (3, 3), "kernel must be 3x3");
    let hw = g.height * g.width;
    let tap = |plane: &[f32], ih: Option<usize>, iw: isize| -> Option<f32> {
        let ih = ih?;
        let iw = usize::try_from(iw).ok().filter(|&c| c < g.width)?;
        Some(plane[ih * g.width + iw])
    };
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            for oh in 0..g.out_h {
                let rows = [g.input_row(oh, 0), g.input_row(oh, 1), g.input_row(oh, 2)];
                for ow in 0..g.out_w {
                    let cols = [g.input_col(ow, 0), g.input_col(ow, 1), g.input_col(ow, 2)];
                    let mut sum = 0.0_f32;
                    for ci in 0..g.in_channels {
                        let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                        let t = &k[(co * g.in_channels + ci) * 9..][..9];
                        for (r, &row) in rows.iter().enumerate() {
                            if let Some(v) = tap(plane, row, cols[0]) {
                                sum += v * t[r * 3];
                            }
                            if let Some(v) = tap(plane, row, cols[1]) {
                                sum += v * t[r * 3 + 1];
                            }
                            if let Some(v) = tap(plane, row, cols[2]) {
                                sum += v * t[r * 3 + 2];
                            }
                        }
                    }
                    let at = ((n * g.out_channels + co) * g.out_h + oh) * g.out_w + ow;
                    y[at] = match bias {
                        Some(b) => sum + b[co],
                        None => sum,
                    };
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Accumulate one kernel tap into the lanes of an output-column strip.
#[inline]
fn tap_strip<const L: usize>(
    acc: Lanes<L>,
    row: &[f32],
    g: &ConvGeometry,
    ow0: usize,
    vl: usize,
    kw: usize,
    weight: f32,
) -> Lanes<L> {
    let (v, mask) = Lanes::<L>::load_window(row, g.input_col(ow0, kw), g.stride_w, vl, 0.0);
    acc.merge(mask, acc + v * Lanes::splat(weight))
}

#[inline]
fn finish_strip<const L: usize>(acc: Lanes<L>, bias: Option<f32>, out: &mut [f32], vl: usize) {
    match bias {
        Some(b) => (acc + Lanes::splat(b)).store(out, vl),
        None => acc.store(out, vl),
    }
}

/// Direct convolution over strips of output columns.
///
/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn conv2d_vector<const L: usize>(
    x: &[f32],
    k: &[f32],
    bias: Option<&[f32]>,
    g: &ConvGeometry,
    y: &mut [f32],
) {
    g.check(x, k, bias, y);
    let (hw, khw) = (g.height * g.width, g.kernel_h * g.kernel_w);
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            for oh in 0..g.out_h {
                for s in strips::<L>(g.out_w) {
                    let mut acc = Lanes::<L>::splat(0.0);
                    for ci in 0..g.in_channels {
                        let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                        let taps = &k[(co * g.in_channels + ci) * khw..][..khw];
                        for kh in 0..g.kernel_h {
                            let Some(ih) = g.input_row(oh, kh) else { continue };
                            let row = &plane[ih * g.width..][..g.width];
                            for kw in 0..g.kernel_w {
                                acc = tap_strip(acc, row, g, s.offset, s.vl, kw, taps[kh * g.kernel_w + kw]);
                            }
                        }
                    }
                    let at = ((n * g.out_channels + co) * g.out_h + oh) * g.out_w + s.offset;
                    finish_strip(acc, bias.map(|b| b[co]), &mut y[at..], s.vl);
                }
            }
        }
    }
}

/// 3x3 convolution over strips of output columns, taps unrolled.
///
/// # Panics
/// Panics if buffer lengths disagree with `g` or the kernel is not 3x3.
pub fn conv2d_3x3_vector<const L: usize>(
    x: &[f32],
    k: &[f32],
    bias: Option<&[f32]>,
    g: &ConvGeometry,
    y: &mut [f32],
) {
    g.check(x, k, bias, y);
    assert_eq!((g.kernel_h, g.kernel_w), (3, 3), "kernel must be 3x3");
    let hw = g.height * g.width;
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            for oh in 0..g.out_h {
                let rows = [g.input_row(oh, 0), g.input_row(oh, 1), g.input_row(oh, 2)];
                for s in strips::<L>(g.out_w) {
                    let mut acc = Lanes::<L>::splat(0.0);
                    for ci in 0..g.in_channels {
                        let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                        let t = &k[(co * g.in_channels + ci) * 9..][..9];
                        for (r, ih) in rows.iter().enumerate() {
                            let Some(ih) = *ih else { continue };
                            let row = &plane[ih * g.width..][..g.width];
                            acc = tap_strip(acc, row, g, s.offset, s.vl, 0, t[r * 3]);
                            acc = tap_strip(acc, row, g, s.offset, s.vl, 1, t[r * 3 + 1]);
                            acc = tap_strip(acc, row, g, s.offset, s.vl, 2, t[r * 3 + 2]);
                        }
                    }
                    let at = ((n * g.out_channels + co) * g.out_h + oh) * g.out_w + s.offset;
                    finish_strip(acc, bias.map(|b| b[co]), &mut y[at..], s.vl);
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
