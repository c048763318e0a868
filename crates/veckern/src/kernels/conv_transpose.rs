//! Transposed 2D convolution.
//!
//! `out[n,co,h*sH+kh-pH,w*sW+kw-pW] += x[n,ci,h,w] * k[ci,co,kh,kw]`
//!
//! Input `[N, Cin, H, W]`, kernel `[Cin, Cout, kH, kW]`, output
//! `[N, Cout, (H-1)*sH - 2pH + kH + oH, ...]` where `oH < sH` is the output
//! padding. Every output element sums its contributions in input-raster
//! order `(ci, h, w)` and adds the bias last. The scalar form scatters into a
//! zeroed output; the vector form is the gather dual over output columns,
//! masking lanes whose kernel column falls outside `0..kW`. Both visit the
//! same contributions in the same order, so all variants agree exactly.

use super::lanes::{strips, Lanes};
use super::{ensure_positive, ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Stride, symmetric padding and trailing output padding, each `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvTranspose2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub output_padding: (usize, usize),
}

impl Default for ConvTranspose2dParams {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: (0, 0),
            output_padding: (0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeGeometry {
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

impl TransposeGeometry {
    /// Derive and validate the geometry of a transposed convolution.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` for wrong ranks or disagreeing channel counts;
    /// `InvalidConfiguration` for zero strides, output padding not smaller
    /// than the stride, or padding that leaves no output.
    pub fn new(input: &Tensor, kernel: &Tensor, params: ConvTranspose2dParams) -> Result<Self> {
        let op = KernelOp::ConvTranspose2d;
        let [batch, in_channels, height, width] = input.dims4(op.name())?;
        let [kc, out_channels, kernel_h, kernel_w] = kernel.dims4(op.name())?;
        if kc != in_channels {
            return Err(KernelError::shape(
                op.name(),
                format!("kernel expects {kc} input channels, input has {in_channels}"),
            ));
        }
        let (stride_h, stride_w) = params.stride;
        let (pad_h, pad_w) = params.padding;
        ensure_positive(op, "stride", &[stride_h, stride_w])?;
        ensure_positive(op, "input extent", &[height, width])?;
        ensure_positive(op, "kernel extent", &[kernel_h, kernel_w])?;
        let out_h = transpose_extent(height, kernel_h, stride_h, pad_h, params.output_padding.0)?;
        let out_w = transpose_extent(width, kernel_w, stride_w, pad_w, params.output_padding.1)?;
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

    /// Kernel row linking input row `h` to output row `oh`, if any.
    #[inline]
    fn kernel_row(&self, oh: usize, h: usize) -> Option<usize> {
        (oh + self.pad_h)
            .checked_sub(h * self.stride_h)
            .filter(|&kh| kh < self.kernel_h)
    }

    fn check(&self, x: &[f32], k: &[f32], bias: Option<&[f32]>, y: &[f32]) {
        assert_eq!(
            x.len(),
            self.batch * self.in_channels * self.height * self.width,
            "input length mismatch"
        );
        assert_eq!(
            k.len(),
            self.in_channels * self.out_channels * self.kernel_h * self.kernel_w,
            "kernel length mismatch"
        );
        if let Some(b) = bias {
            assert_eq!(b.len(), self.out_channels, "bias length mismatch");
        }
        assert_eq!(
            y.len(),
            self.batch * self.out_channels * self.out_h * self.out_w,
            "output length mismatch"
        );
    }
}

/// `(in - 1)*stride - 2*pad + k + out_pad`, failing if it is not positive.
fn transpose_extent(input: usize, k: usize, stride: usize, pad: usize, out_pad: usize) -> Result<usize> {
    let op = KernelOp::ConvTranspose2d.name();
    if out_pad >= stride {
        return Err(KernelError::config(
            op,
            format!("output padding {out_pad} must be smaller than stride {stride}"),
        ));
    }
    let full = (input - 1) * stride + k + out_pad;
    match full.checked_sub(2 * pad) {
        Some(extent) if extent > 0 => Ok(extent),
        _ => Err(KernelError::config(
            op,
            format!("padding {pad} leaves no output from extent {full}"),
        )),
    }
}

/// Transposed convolution.
///
/// # Errors
///
/// See [`TransposeGeometry::new`]; additionally `ShapeMismatch` for a wrongly
/// shaped `bias` or `output`.
pub fn conv_transpose2d(
    variant: Variant,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: ConvTranspose2dParams,
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::ConvTranspose2d;
    ensure_variant(op, variant)?;
    let g = TransposeGeometry::new(input, kernel, params)?;
    if let Some(b) = bias {
        ensure_shape(op, "bias", b, &[g.out_channels])?;
    }
    ensure_shape(op, "output", output, &g.output_shape())?;
    let (x, k, b, y) = (input.data(), kernel.data(), bias.map(Tensor::data), output.data_mut());
    match variant.width() {
        None => conv_transpose2d_scalar(x, k, b, &g, y),
        Some(w) => dispatch_width!(w, conv_transpose2d_vector(x, k, b, &g, y)),
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Zero the output, scatter every input element through its footprint,
/// then add the bias.
///
/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn conv_transpose2d_scalar(x: &[f32], k: &[f32], bias: Option<&[f32]>, g: &TransposeGeometry, y: &mut [f32]) {
    g.check(x, k, bias, y);
    let (hw, khw, out_hw) = (g.height * g.width, g.kernel_h * g.kernel_w, g.out_h * g.out_w);
    y.fill(0.0);
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            let out = &mut y[(n * g.out_channels + co) * out_hw..][..out_hw];
            for ci in 0..g.in_channels {
                let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                let taps = &k[(ci * g.out_channels + co) * khw..][..khw];
                for h in 0..g.height {
                    for w in 0..g.width {
                        let v = plane[h * g.width + w];
                        for kh in 0..g.kernel_h {
                            let Some(oh) = (h * g.stride_h + kh).checked_sub(g.pad_h) else { continue };
                            if oh >= g.out_h {
                                continue;
                            }
                            for kw in 0..g.kernel_w {
                                let Some(ow) = (w * g.stride_w + kw).checked_sub(g.pad_w) else { continue };
                                if ow >= g.out_w {
                                    continue;
                                }
                                out[oh * g.out_w + ow] += v * taps[kh * g.kernel_w + kw];
                            }
                        }
                    }
                }
            }
            if let Some(b) = bias {
                for o in out.iter_mut() {
                    *o += b[co];
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Gather form over strips of output columns.
///
/// For a strip starting at `ow0`, input column `w` reaches lane `i` through
/// kernel column `ow0 + i + pW - w*sW`; only the `w` whose footprint overlaps
/// the strip are visited, in ascending order.
///
/// # Panics
/// Panics if buffer lengths disagree with `g`.
pub fn conv_transpose2d_vector<const L: usize>(
    x: &[f32],
    k: &[f32],
    bias: Option<&[f32]>,
    g: &TransposeGeometry,
    y: &mut [f32],
) {
    g.check(x, k, bias, y);
    let (hw, khw) = (g.height * g.width, g.kernel_h * g.kernel_w);
    for n in 0..g.batch {
        for co in 0..g.out_channels {
            for oh in 0..g.out_h {
                for s in strips::<L>(g.out_w) {
                    // Input columns w with 0 <= ow + pW - w*sW < kW for some lane.
                    let lo_num = (s.offset + g.pad_w + 1).saturating_sub(g.kernel_w);
                    let w_lo = lo_num.div_ceil(g.stride_w);
                    let w_hi = ((s.offset + s.vl - 1 + g.pad_w) / g.stride_w).min(g.width - 1);
                    let mut acc = Lanes::<L>::splat(0.0);
                    for ci in 0..g.in_channels {
                        let plane = &x[(n * g.in_channels + ci) * hw..][..hw];
                        let taps = &k[(ci * g.out_channels + co) * khw..][..khw];
                        for h in 0..g.height {
                            let Some(kh) = g.kernel_row(oh, h) else { continue };
                            let trow = &taps[kh * g.kernel_w..][..g.kernel_w];
                            for w in w_lo..=w_hi {
                                let start = (s.offset + g.pad_w) as isize - (w * g.stride_w) as isize;
                                let (wt, mask) = Lanes::<L>::load_window(trow, start, 1, s.vl, 0.0);
                                let v = Lanes::splat(plane[h * g.width + w]);
                                acc = acc.merge(mask, acc + v * wt);
                            }
                        }
                    }
                    let at = ((n * g.out_channels + co) * g.out_h + oh) * g.out_w + s.offset;
                    match bias {
                        Some(b) => (acc + Lanes::splat(b[co])).store(&mut y[at..], s.vl),
                        None => acc.store(&mut y[at..], s.vl),
                    }
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
