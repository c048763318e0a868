//! Im2Col lowering and the Conv2D-as-GEMM path.
//!
//! `col[(ci*kH + kh)*kW + kw, oh*outW + ow] = x[ci, oh*sH+kh-pH, ow*sW+kw-pW]`
//! (zero where the position is padding), so that
//! `out[n] = W[Cout, Cin*kH*kW] x col[Cin*kH*kW, outH*outW] + bias`.
//!
//! The caller owns both scratch buffers: the column matrix
//! (`Cin*kH*kW*outH*outW` floats, reused per batch item) and the GEMM result
//! (`N*Cout*outH*outW` floats).

use super::conv2d::{validate_conv, Conv2dParams, ConvGeometry};
use super::gemm::{run_matmul, MatDims, Tiling};
use super::lanes::{strips, Lanes};
use super::{KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Scratch sizes `(column, gemm)` in floats for a problem geometry.
pub fn scratch_sizes(g: &ConvGeometry) -> (usize, usize) {
    (
        g.patch_len() * g.out_plane(),
        g.batch * g.out_channels * g.out_plane(),
    )
}

/// Convolution through an explicit column matrix and a matrix multiply.
///
/// # Errors
///
/// As [`conv2d`](super::conv2d::conv2d), plus `ShapeMismatch` when a scratch
/// buffer is smaller than [`scratch_sizes`] requires.
pub fn conv2d_im2col(
    variant: Variant,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
    col: &mut [f32],
    gemm: &mut [f32],
    output: &mut Tensor,
) -> Result<()> {
    let op = KernelOp::Conv2dIm2col;
    let g = validate_conv(op, variant, input, kernel, bias, params, output)?;
    let (col_len, gemm_len) = scratch_sizes(&g);
    for (what, have, need) in [("column buffer", col.len(), col_len), ("gemm buffer", gemm.len(), gemm_len)] {
        if have < need {
            return Err(KernelError::shape(
                op.name(),
                format!("{what} holds {have} floats, needs {need}"),
            ));
        }
    }
    let col = &mut col[..col_len];
    let gemm = &mut gemm[..gemm_len];

    let image = g.in_channels * g.height * g.width;
    let plane = g.out_plane();
    let dims = MatDims {
        m: g.out_channels,
        k: g.patch_len(),
        n: plane,
    };
    for n in 0..g.batch {
        let x = &input.data()[n * image..][..image];
        match variant.width() {
            None => im2col_scalar(x, &g, col),
            Some(w) => dispatch_width!(w, im2col_vector(x, &g, col)),
        }
        let out = &mut gemm[n * g.out_channels * plane..][..g.out_channels * plane];
        run_matmul(variant, kernel.data(), col, dims, Tiling::default(), out);
    }

    let y = output.data_mut();
    match bias.map(Tensor::data) {
        None => y.copy_from_slice(gemm),
        Some(b) => {
            for (i, (dst, &src)) in y.iter_mut().zip(gemm.iter()).enumerate() {
                *dst = src + b[(i / plane) % g.out_channels];
            }
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Lower one `[Cin, H, W]` image into `col`.
///
/// # Panics
/// Panics if `image` or `col` are not sized for `g`.
pub fn im2col_scalar(image: &[f32], g: &ConvGeometry, col: &mut [f32]) {
    assert_eq!(image.len(), g.in_channels * g.height * g.width, "image length mismatch");
    assert_eq!(col.len(), g.patch_len() * g.out_plane(), "column length mismatch");
    let plane = g.out_plane();
    for ci in 0..g.in_channels {
        let src = &image[ci * g.height * g.width..][..g.height * g.width];
        for kh in 0..g.kernel_h {
            for kw in 0..g.kernel_w {
                let r = (ci * g.kernel_h + kh) * g.kernel_w + kw;
                let dst = &mut col[r * plane..][..plane];
                for oh in 0..g.out_h {
                    let row = g.input_row(oh, kh);
                    for ow in 0..g.out_w {
                        let iw = g.input_col(ow, kw);
                        dst[oh * g.out_w + ow] = match row {
                            Some(ih) if iw >= 0 && (iw as usize) < g.width => {
                                src[ih * g.width + iw as usize]
                            }
                            _ => 0.0,
                        };
                    }
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Lower one image with `L`-lane strided gathers along each output row.
///
/// # Panics
/// Panics if `image` or `col` are not sized for `g`.
pub fn im2col_vector<const L: usize>(image: &[f32], g: &ConvGeometry, col: &mut [f32]) {
    assert_eq!(image.len(), g.in_channels * g.height * g.width, "image length mismatch");
    assert_eq!(col.len(), g.patch_len() * g.out_plane(), "column length mismatch");
    let plane = g.out_plane();
    for ci in 0..g.in_channels {
        let src = &image[ci * g.height * g.width..][..g.height * g.width];
        for kh in 0..g.kernel_h {
            for kw in 0..g.kernel_w {
                let r = (ci * g.kernel_h + kh) * g.kernel_w + kw;
                let dst = &mut col[r * plane..][..plane];
                for oh in 0..g.out_h {
                    let out_row = &mut dst[oh * g.out_w..][..g.out_w];
                    let Some(ih) = g.input_row(oh, kh) else {
                        out_row.fill(0.0);
                        continue;
                    };
                    let in_row = &src[ih * g.width..][..g.width];
                    for s in strips::<L>(g.out_w) {
                        let start = g.input_col(s.offset, kw);
                        let (v, _) = Lanes::<L>::load_window(in_row, start, g.stride_w, s.vl, 0.0);
                        v.store(&mut out_row[s.offset..], s.vl);
                    }
                }
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
    use crate::kernels::conv2d::conv2d;
    use crate::kernels::Width;
    use proptest::prelude::*;

    fn run_im2col(v: Variant, x: &Tensor, k: &Tensor, b: Option<&Tensor>, p: Conv2dParams) -> Tensor {
        let g = ConvGeometry::new(KernelOp::Conv2dIm2col, x, k, p).unwrap();
        let (cl, gl) = scratch_sizes(&g);
        let (mut col, mut gemm) = (vec![0.0; cl], vec![0.0; gl]);
        let mut y = Tensor::zeros(&g.output_shape());
        conv2d_im2col(v, x, k, b, p, &mut col, &mut gemm, &mut y).unwrap();
        y
    }

    #[test]
    fn test_column_layout_small() {
        // 1 channel 3x3 image, 2x2 kernel, stride 1, no padding -> 4 x 4 columns
        let x = Tensor::from_vec(&[1, 1, 3, 3], (1..=9).map(|v| v as f32).collect()).unwrap();
        let k = Tensor::zeros(&[1, 1, 2, 2]);
        let g = ConvGeometry::new(KernelOp::Conv2dIm2col, &x, &k, Conv2dParams::default()).unwrap();
        let mut col = vec![f32::NAN; 16];
        im2col_scalar(x.data(), &g, &mut col);
        assert_eq!(
            col,
            vec![
                1.0, 2.0, 4.0, 5.0, // tap (0,0)
                2.0, 3.0, 5.0, 6.0, // tap (0,1)
                4.0, 5.0, 7.0, 8.0, // tap (1,0)
                5.0, 6.0, 8.0, 9.0, // tap (1,1)
            ]
        );
        let mut colv = vec![f32::NAN; 16];
        im2col_vector::<4>(x.data(), &g, &mut colv);
        assert_eq!(colv, col);
    }

    #[test]
    fn test_padding_zero_filled() {
        let x = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let k = Tensor::zeros(&[1, 1, 3, 3]);
        let p = Conv2dParams {
            stride: (1, 1),
            padding: (1, 1),
        };
        let g = ConvGeometry::new(KernelOp::Conv2dIm2col, &x, &k, p).unwrap();
        let mut col = vec![f32::NAN; 9 * 4];
        im2col_vector::<8>(x.data(), &g, &mut col);
        // Tap (0,0) sees the image shifted down-right: only out (1,1) reads x[0,0].
        assert_eq!(&col[..4], &[0.0, 0.0, 0.0, 1.0]);
        // Centre tap (1,1) sees the image itself.
        assert_eq!(&col[16..20], &[1.0, 2.0, 3.0, 4.0]);
        assert!(col.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_edge_kernel_through_gemm() {
        let x = Tensor::from_vec(&[1, 1, 4, 4], (1..=16).map(|v| v as f32).collect()).unwrap();
        let k = Tensor::from_vec(&[1, 1, 3, 3], vec![-1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0])
            .unwrap();
        let p = Conv2dParams {
            stride: (1, 1),
            padding: (1, 1),
        };
        for v in Variant::UNTILED {
            let y = run_im2col(v, &x, &k, None, p);
            assert_eq!(
                y.data(),
                &[
                    11.0, 18.0, 21.0, 15.0, 16.0, 24.0, 24.0, 16.0, 16.0, 24.0, 24.0, 16.0, -19.0,
                    -30.0, -33.0, -23.0
                ],
                "variant {v}"
            );
        }
    }

    #[test]
    fn test_short_scratch_rejected() {
        let x = Tensor::zeros(&[1, 1, 4, 4]);
        let k = Tensor::zeros(&[1, 1, 3, 3]);
        let mut col = vec![0.0; 8];
        let mut gemm = vec![0.0; 4];
        let mut y = Tensor::zeros(&[1, 1, 2, 2]);
        let err = conv2d_im2col(
            Variant::Scalar,
            &x,
            &k,
            None,
            Conv2dParams::default(),
            &mut col,
            &mut gemm,
            &mut y,
        )
        .unwrap_err();
        assert!(err.to_string().contains("column buffer"));
    }

    #[test]
    fn test_tiled_variant_rejected() {
        let x = Tensor::zeros(&[1, 1, 3, 3]);
        let k = Tensor::zeros(&[1, 1, 3, 3]);
        let (mut col, mut gemm) = (vec![0.0; 9], vec![0.0; 1]);
        let mut y = Tensor::zeros(&[1, 1, 1, 1]);
        let r = conv2d_im2col(
            Variant::TiledVector(Width::M1),
            &x,
            &k,
            None,
            Conv2dParams::default(),
            &mut col,
            &mut gemm,
            &mut y,
        );
        assert!(matches!(r, Err(KernelError::InvalidConfiguration { .. })));
    }

    proptest! {
        #[test]
        fn prop_im2col_equals_direct(
            n in 1usize..3, cin in 1usize..3, cout in 1usize..4,
            h in 3usize..8, w in 3usize..20, kk in 1usize..4,
            stride in 1usize..3, pad in 0usize..2, salt in 0u32..50,
        ) {
            let gen = |len: usize, s: u32| -> Vec<f32> {
                (0..len).map(|i| ((i as u32 * 131 + s * 17) % 41) as f32 * 0.25 - 5.0).collect()
            };
            let x = Tensor::from_vec(&[n, cin, h, w], gen(n * cin * h * w, salt)).unwrap();
            let k = Tensor::from_vec(&[cout, cin, kk, kk], gen(cout * cin * kk * kk, salt + 9)).unwrap();
            let b = Tensor::from_vec(&[cout], gen(cout, salt + 4)).unwrap();
            let p = Conv2dParams { stride: (stride, stride), padding: (pad, pad) };
            let g = ConvGeometry::new(KernelOp::Conv2d, &x, &k, p).unwrap();
            let mut direct = Tensor::zeros(&g.output_shape());
            conv2d(Variant::Scalar, &x, &k, Some(&b), p, &mut direct).unwrap();
            for v in Variant::UNTILED {
                let y = run_im2col(v, &x, &k, Some(&b), p);
                prop_assert_eq!(y.data(), direct.data(), "variant {}", v);
            }
        }
    }
}
