//! C ABI edge.
//!
//! One `extern "C"` function per kernel and variant, named `<op>_<variant>`
//! (`relu_e32m4`, `batchnorm_tiled_scalar`, ...). Each takes raw buffer
//! pointers plus shape scalars, copies the inputs into [`Tensor`]s, runs the
//! typed kernel and copies the result into the caller's output buffer.
//! Tiled ReLU, LeakyReLU and GatherElements symbols take one extra trailing
//! `tile` argument.
//!
//! Every function returns an `i32` status: 0 on success, then
//! [`KernelError::status_code`]: 1 shape mismatch, 2 invalid configuration
//! (including null pointers), 3 index out of range.
//!
//! # Safety
//!
//! Every non-null pointer must be valid for the element count its shape
//! arguments imply, and output buffers must be writable for the kernel's
//! output element count. Optional inputs (bias, argmax) may be null.

#![allow(clippy::too_many_arguments, clippy::missing_safety_doc)]

use std::os::raw::c_int;

use tracing::debug;

use crate::error::{KernelError, Result};
use crate::kernels::batchnorm::{batch_norm, BatchNormConfig, BatchNormStats};
use crate::kernels::conv2d::{conv2d, conv2d_3x3, Conv2dParams, ConvGeometry};
use crate::kernels::conv_transpose::{conv_transpose2d, ConvTranspose2dParams, TransposeGeometry};
use crate::kernels::elementwise::{bias_add, leaky_relu_with_tile, relu_with_tile, tensor_add, DEFAULT_ELEMENT_TILE};
use crate::kernels::gemm::{dense, matmul, Tiling};
use crate::kernels::im2col::conv2d_im2col;
use crate::kernels::indexing::{
    gather_elements_with_tile, scatter_elements, ScatterReduction, DEFAULT_GATHER_TILE,
};
use crate::kernels::maxpool::{max_pool2d, MaxPool2dParams, PoolGeometry};
use crate::kernels::nms::nms_1d;
use crate::kernels::softmax::softmax;
use crate::kernels::{KernelOp, Variant, Width};
use crate::tensor::{IndexTensor, Tensor};

const S: Variant = Variant::Scalar;
const M1: Variant = Variant::Vector(Width::M1);
const M2: Variant = Variant::Vector(Width::M2);
const M4: Variant = Variant::Vector(Width::M4);
const M8: Variant = Variant::Vector(Width::M8);
const TS: Variant = Variant::TiledScalar;
const TM1: Variant = Variant::TiledVector(Width::M1);
const TM2: Variant = Variant::TiledVector(Width::M2);
const TM4: Variant = Variant::TiledVector(Width::M4);
const TM8: Variant = Variant::TiledVector(Width::M8);

/// Export `$inner` once per listed variant under the given symbol names.
macro_rules! export_variants {
    (
        fn $inner:ident $args:tt;
        $($name:ident => $variant:expr),+ $(,)?
    ) => {
        $( export_one!($inner, $name, $variant, $args); )+
    };
}

macro_rules! export_one {
    ($inner:ident, $name:ident, $variant:expr, ($($arg:ident: $ty:ty),* $(,)?)) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name($($arg: $ty),*) -> c_int {
            unsafe { $inner($variant, $($arg),*) }
        }
    };
}

fn status(op: KernelOp, f: impl FnOnce() -> Result<()>) -> c_int {
    match f() {
        Ok(()) => 0,
        Err(e) => {
            debug!(%op, error = %e, "ffi call failed");
            e.status_code()
        }
    }
}

fn null(what: &str) -> KernelError {
    KernelError::config("ffi", format!("{what} pointer is null"))
}

fn numel(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| KernelError::config("ffi", format!("shape {shape:?} overflows")))
}

unsafe fn load(ptr: *const f32, shape: &[usize], what: &str) -> Result<Tensor> {
    if ptr.is_null() {
        return Err(null(what));
    }
    let data = unsafe { std::slice::from_raw_parts(ptr, numel(shape)?) };
    Tensor::from_vec(shape, data.to_vec())
}

unsafe fn load_opt(ptr: *const f32, shape: &[usize], what: &str) -> Result<Option<Tensor>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        unsafe { load(ptr, shape, what) }.map(Some)
    }
}

unsafe fn load_indices(ptr: *const i64, shape: &[usize]) -> Result<IndexTensor> {
    if ptr.is_null() {
        return Err(null("indices"));
    }
    let data = unsafe { std::slice::from_raw_parts(ptr, numel(shape)?) };
    IndexTensor::from_vec(shape, data.to_vec())
}

unsafe fn store<T: Copy + Default>(ptr: *mut T, t: &Tensor<T>) -> Result<()> {
    if ptr.is_null() {
        return Err(null("output"));
    }
    unsafe { std::slice::from_raw_parts_mut(ptr, t.numel()) }.copy_from_slice(t.data());
    Ok(())
}

// ── Elementwise ────────────────────────────────────────────────────────────

unsafe fn relu_tiled_ffi(variant: Variant, x: *const f32, y: *mut f32, len: usize, tile: usize) -> c_int {
    status(KernelOp::Relu, || {
        let x = unsafe { load(x, &[len], "input") }?;
        let mut out = Tensor::zeros(&[len]);
        relu_with_tile(variant, &x, tile, &mut out)?;
        unsafe { store(y, &out) }
    })
}

unsafe fn relu_ffi(variant: Variant, x: *const f32, y: *mut f32, len: usize) -> c_int {
    unsafe { relu_tiled_ffi(variant, x, y, len, DEFAULT_ELEMENT_TILE) }
}

export_variants! {
    fn relu_ffi(x: *const f32, y: *mut f32, len: usize);
    relu_scalar => S, relu_e32m1 => M1, relu_e32m2 => M2, relu_e32m4 => M4, relu_e32m8 => M8,
}

export_variants! {
    fn relu_tiled_ffi(x: *const f32, y: *mut f32, len: usize, tile: usize);
    relu_tiled_scalar => TS, relu_tiled_e32m1 => TM1, relu_tiled_e32m2 => TM2,
    relu_tiled_e32m4 => TM4, relu_tiled_e32m8 => TM8,
}

unsafe fn leaky_relu_tiled_ffi(
    variant: Variant,
    x: *const f32,
    y: *mut f32,
    len: usize,
    alpha: f32,
    tile: usize,
) -> c_int {
    status(KernelOp::LeakyRelu, || {
        let x = unsafe { load(x, &[len], "input") }?;
        let mut out = Tensor::zeros(&[len]);
        leaky_relu_with_tile(variant, &x, alpha, tile, &mut out)?;
        unsafe { store(y, &out) }
    })
}

unsafe fn leaky_relu_ffi(variant: Variant, x: *const f32, y: *mut f32, len: usize, alpha: f32) -> c_int {
    unsafe { leaky_relu_tiled_ffi(variant, x, y, len, alpha, DEFAULT_ELEMENT_TILE) }
}

export_variants! {
    fn leaky_relu_tiled_ffi(x: *const f32, y: *mut f32, len: usize, alpha: f32, tile: usize);
    leaky_relu_tiled_scalar => TS, leaky_relu_tiled_e32m1 => TM1, leaky_relu_tiled_e32m2 => TM2,
    leaky_relu_tiled_e32m4 => TM4, leaky_relu_tiled_e32m8 => TM8,
}

export_variants! {
    fn leaky_relu_ffi(x: *const f32, y: *mut f32, len: usize, alpha: f32);
    leaky_relu_scalar => S, leaky_relu_e32m1 => M1, leaky_relu_e32m2 => M2,
    leaky_relu_e32m4 => M4, leaky_relu_e32m8 => M8,
}

unsafe fn tensor_add_ffi(variant: Variant, a: *const f32, b: *const f32, y: *mut f32, len: usize) -> c_int {
    status(KernelOp::TensorAdd, || {
        let a = unsafe { load(a, &[len], "lhs") }?;
        let b = unsafe { load(b, &[len], "rhs") }?;
        let mut out = Tensor::zeros(&[len]);
        tensor_add(variant, &a, &b, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn tensor_add_ffi(a: *const f32, b: *const f32, y: *mut f32, len: usize);
    tensor_add_scalar => S, tensor_add_e32m1 => M1, tensor_add_e32m2 => M2,
    tensor_add_e32m4 => M4, tensor_add_e32m8 => M8,
}

unsafe fn bias_add_ffi(
    variant: Variant,
    x: *const f32,
    bias: *const f32,
    y: *mut f32,
    batch: usize,
    channels: usize,
    plane: usize,
) -> c_int {
    status(KernelOp::BiasAdd, || {
        let shape = [batch, channels, plane, 1];
        let x = unsafe { load(x, &shape, "input") }?;
        let b = unsafe { load(bias, &[channels], "bias") }?;
        let mut out = Tensor::zeros(&shape);
        bias_add(variant, &x, &b, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn bias_add_ffi(x: *const f32, bias: *const f32, y: *mut f32, batch: usize, channels: usize, plane: usize);
    bias_add_scalar => S, bias_add_e32m1 => M1, bias_add_e32m2 => M2,
    bias_add_e32m4 => M4, bias_add_e32m8 => M8,
}

// ── Normalization ──────────────────────────────────────────────────────────

unsafe fn softmax_ffi(variant: Variant, x: *const f32, y: *mut f32, rows: usize, cols: usize) -> c_int {
    status(KernelOp::Softmax, || {
        let x = unsafe { load(x, &[rows, cols], "input") }?;
        let mut out = Tensor::zeros(&[rows, cols]);
        softmax(variant, &x, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn softmax_ffi(x: *const f32, y: *mut f32, rows: usize, cols: usize);
    softmax_scalar => S, softmax_e32m1 => M1, softmax_e32m2 => M2, softmax_e32m4 => M4, softmax_e32m8 => M8,
}

unsafe fn batchnorm_ffi(
    variant: Variant,
    x: *const f32,
    scale: *const f32,
    bias: *const f32,
    mean: *const f32,
    var: *const f32,
    y: *mut f32,
    batch: usize,
    channels: usize,
    plane: usize,
    epsilon: f32,
    tile: usize,
) -> c_int {
    status(KernelOp::BatchNorm, || {
        let shape = [batch, channels, plane, 1];
        let x = unsafe { load(x, &shape, "input") }?;
        let c = [channels];
        let (scale, bias) = unsafe { (load(scale, &c, "scale")?, load(bias, &c, "bias")?) };
        let (mean, variance) = unsafe { (load(mean, &c, "mean")?, load(var, &c, "variance")?) };
        let stats = BatchNormStats {
            scale: &scale,
            bias: &bias,
            mean: &mean,
            variance: &variance,
        };
        let mut out = Tensor::zeros(&shape);
        batch_norm(variant, &x, &stats, BatchNormConfig { epsilon, tile }, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn batchnorm_ffi(
        x: *const f32, scale: *const f32, bias: *const f32, mean: *const f32, var: *const f32,
        y: *mut f32, batch: usize, channels: usize, plane: usize, epsilon: f32, tile: usize,
    );
    batchnorm_scalar => S, batchnorm_e32m1 => M1, batchnorm_e32m2 => M2,
    batchnorm_e32m4 => M4, batchnorm_e32m8 => M8,
    batchnorm_tiled_scalar => TS, batchnorm_tiled_e32m1 => TM1, batchnorm_tiled_e32m2 => TM2,
    batchnorm_tiled_e32m4 => TM4, batchnorm_tiled_e32m8 => TM8,
}

// ── Matrix ─────────────────────────────────────────────────────────────────

unsafe fn matmul_ffi(
    variant: Variant,
    a: *const f32,
    b: *const f32,
    c: *mut f32,
    m: usize,
    k: usize,
    n: usize,
    tile: usize,
) -> c_int {
    status(KernelOp::MatMul, || {
        let a = unsafe { load(a, &[m, k], "lhs") }?;
        let b = unsafe { load(b, &[k, n], "rhs") }?;
        let tiling = if tile == 0 {
            Tiling::default()
        } else {
            Tiling { m: tile, n: tile, k: tile }
        };
        let mut out = Tensor::zeros(&[m, n]);
        matmul(variant, &a, &b, tiling, &mut out)?;
        unsafe { store(c, &out) }
    })
}

export_variants! {
    fn matmul_ffi(a: *const f32, b: *const f32, c: *mut f32, m: usize, k: usize, n: usize, tile: usize);
    matmul_scalar => S, matmul_e32m1 => M1, matmul_e32m2 => M2, matmul_e32m4 => M4, matmul_e32m8 => M8,
    matmul_tiled_scalar => TS, matmul_tiled_e32m1 => TM1, matmul_tiled_e32m2 => TM2,
    matmul_tiled_e32m4 => TM4, matmul_tiled_e32m8 => TM8,
}

unsafe fn dense_ffi(
    variant: Variant,
    x: *const f32,
    w: *const f32,
    bias: *const f32,
    y: *mut f32,
    rows: usize,
    in_features: usize,
    out_features: usize,
) -> c_int {
    status(KernelOp::Dense, || {
        let x = unsafe { load(x, &[rows, in_features], "input") }?;
        let w = unsafe { load(w, &[out_features, in_features], "weights") }?;
        let b = unsafe { load_opt(bias, &[out_features], "bias") }?;
        let mut out = Tensor::zeros(&[rows, out_features]);
        dense(variant, &x, &w, b.as_ref(), &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn dense_ffi(
        x: *const f32, w: *const f32, bias: *const f32, y: *mut f32,
        rows: usize, in_features: usize, out_features: usize,
    );
    dense_scalar => S, dense_e32m1 => M1, dense_e32m2 => M2, dense_e32m4 => M4, dense_e32m8 => M8,
}

// ── Spatial ────────────────────────────────────────────────────────────────

/// Which direct-convolution entry point a symbol runs.
#[derive(Clone, Copy)]
enum ConvForm {
    Direct,
    Unrolled3x3,
}

unsafe fn conv2d_ffi(
    variant: Variant,
    form: ConvForm,
    x: *const f32,
    k: *const f32,
    bias: *const f32,
    y: *mut f32,
    batch: usize,
    in_channels: usize,
    height: usize,
    width: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> c_int {
    let op = match form {
        ConvForm::Direct => KernelOp::Conv2d,
        ConvForm::Unrolled3x3 => KernelOp::Conv2d3x3,
    };
    status(op, || {
        let x = unsafe { load(x, &[batch, in_channels, height, width], "input") }?;
        let k = unsafe { load(k, &[out_channels, in_channels, kernel_h, kernel_w], "kernel") }?;
        let b = unsafe { load_opt(bias, &[out_channels], "bias") }?;
        let params = Conv2dParams {
            stride: (stride_h, stride_w),
            padding: (pad_h, pad_w),
        };
        let mut out = Tensor::zeros(&ConvGeometry::new(op, &x, &k, params)?.output_shape());
        match form {
            ConvForm::Direct => conv2d(variant, &x, &k, b.as_ref(), params, &mut out)?,
            ConvForm::Unrolled3x3 => conv2d_3x3(variant, &x, &k, b.as_ref(), params, &mut out)?,
        }
        unsafe { store(y, &out) }
    })
}

unsafe fn conv2d_direct_ffi(
    variant: Variant,
    x: *const f32,
    k: *const f32,
    bias: *const f32,
    y: *mut f32,
    batch: usize,
    in_channels: usize,
    height: usize,
    width: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> c_int {
    unsafe {
        conv2d_ffi(
            variant, ConvForm::Direct, x, k, bias, y, batch, in_channels, height, width,
            out_channels, kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w,
        )
    }
}

unsafe fn conv2d3x3_ffi(
    variant: Variant,
    x: *const f32,
    k: *const f32,
    bias: *const f32,
    y: *mut f32,
    batch: usize,
    in_channels: usize,
    height: usize,
    width: usize,
    out_channels: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> c_int {
    unsafe {
        conv2d_ffi(
            variant, ConvForm::Unrolled3x3, x, k, bias, y, batch, in_channels, height, width,
            out_channels, 3, 3, stride_h, stride_w, pad_h, pad_w,
        )
    }
}

export_variants! {
    fn conv2d_direct_ffi(
        x: *const f32, k: *const f32, bias: *const f32, y: *mut f32,
        batch: usize, in_channels: usize, height: usize, width: usize, out_channels: usize,
        kernel_h: usize, kernel_w: usize, stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize,
    );
    conv2d_scalar => S, conv2d_e32m1 => M1, conv2d_e32m2 => M2, conv2d_e32m4 => M4, conv2d_e32m8 => M8,
}

export_variants! {
    fn conv2d3x3_ffi(
        x: *const f32, k: *const f32, bias: *const f32, y: *mut f32,
        batch: usize, in_channels: usize, height: usize, width: usize, out_channels: usize,
        stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize,
    );
    conv2d3x3_scalar => S, conv2d3x3_e32m1 => M1, conv2d3x3_e32m2 => M2,
    conv2d3x3_e32m4 => M4, conv2d3x3_e32m8 => M8,
}

unsafe fn conv2d_im2col_ffi(
    variant: Variant,
    x: *const f32,
    k: *const f32,
    bias: *const f32,
    y: *mut f32,
    col: *mut f32,
    col_len: usize,
    gemm: *mut f32,
    gemm_len: usize,
    batch: usize,
    in_channels: usize,
    height: usize,
    width: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> c_int {
    let op = KernelOp::Conv2dIm2col;
    status(op, || {
        if col.is_null() || gemm.is_null() {
            return Err(null("scratch"));
        }
        let x = unsafe { load(x, &[batch, in_channels, height, width], "input") }?;
        let k = unsafe { load(k, &[out_channels, in_channels, kernel_h, kernel_w], "kernel") }?;
        let b = unsafe { load_opt(bias, &[out_channels], "bias") }?;
        let params = Conv2dParams {
            stride: (stride_h, stride_w),
            padding: (pad_h, pad_w),
        };
        let mut out = Tensor::zeros(&ConvGeometry::new(op, &x, &k, params)?.output_shape());
        let col = unsafe { std::slice::from_raw_parts_mut(col, col_len) };
        let gemm = unsafe { std::slice::from_raw_parts_mut(gemm, gemm_len) };
        conv2d_im2col(variant, &x, &k, b.as_ref(), params, col, gemm, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn conv2d_im2col_ffi(
        x: *const f32, k: *const f32, bias: *const f32, y: *mut f32,
        col: *mut f32, col_len: usize, gemm: *mut f32, gemm_len: usize,
        batch: usize, in_channels: usize, height: usize, width: usize, out_channels: usize,
        kernel_h: usize, kernel_w: usize, stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize,
    );
    conv2d_im2col_scalar => S, conv2d_im2col_e32m1 => M1, conv2d_im2col_e32m2 => M2,
    conv2d_im2col_e32m4 => M4, conv2d_im2col_e32m8 => M8,
}

unsafe fn conv_transpose2d_ffi(
    variant: Variant,
    x: *const f32,
    k: *const f32,
    bias: *const f32,
    y: *mut f32,
    batch: usize,
    in_channels: usize,
    height: usize,
    width: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    output_pad_h: usize,
    output_pad_w: usize,
) -> c_int {
    status(KernelOp::ConvTranspose2d, || {
        let x = unsafe { load(x, &[batch, in_channels, height, width], "input") }?;
        let k = unsafe { load(k, &[in_channels, out_channels, kernel_h, kernel_w], "kernel") }?;
        let b = unsafe { load_opt(bias, &[out_channels], "bias") }?;
        let params = ConvTranspose2dParams {
            stride: (stride_h, stride_w),
            padding: (pad_h, pad_w),
            output_padding: (output_pad_h, output_pad_w),
        };
        let mut out = Tensor::zeros(&TransposeGeometry::new(&x, &k, params)?.output_shape());
        conv_transpose2d(variant, &x, &k, b.as_ref(), params, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn conv_transpose2d_ffi(
        x: *const f32, k: *const f32, bias: *const f32, y: *mut f32,
        batch: usize, in_channels: usize, height: usize, width: usize, out_channels: usize,
        kernel_h: usize, kernel_w: usize, stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize,
        output_pad_h: usize, output_pad_w: usize,
    );
    conv_transpose2d_scalar => S, conv_transpose2d_e32m1 => M1, conv_transpose2d_e32m2 => M2,
    conv_transpose2d_e32m4 => M4, conv_transpose2d_e32m8 => M8,
}

unsafe fn maxpool2d_ffi(
    variant: Variant,
    x: *const f32,
    y: *mut f32,
    argmax: *mut i64,
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    ceil_mode: c_int,
) -> c_int {
    status(KernelOp::MaxPool2d, || {
        let x = unsafe { load(x, &[batch, channels, height, width], "input") }?;
        let params = MaxPool2dParams {
            kernel: (kernel_h, kernel_w),
            stride: (stride_h, stride_w),
            padding: (pad_h, pad_w),
            ceil_mode: ceil_mode != 0,
        };
        let shape = PoolGeometry::new(&x, params)?.output_shape();
        let mut out = Tensor::zeros(&shape);
        if argmax.is_null() {
            max_pool2d(variant, &x, params, &mut out, None)?;
        } else {
            let mut indices = IndexTensor::zeros(&shape);
            max_pool2d(variant, &x, params, &mut out, Some(&mut indices))?;
            unsafe { store(argmax, &indices) }?;
        }
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn maxpool2d_ffi(
        x: *const f32, y: *mut f32, argmax: *mut i64,
        batch: usize, channels: usize, height: usize, width: usize,
        kernel_h: usize, kernel_w: usize, stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize,
        ceil_mode: c_int,
    );
    maxpool2d_scalar => S, maxpool2d_e32m1 => M1, maxpool2d_e32m2 => M2,
    maxpool2d_e32m4 => M4, maxpool2d_e32m8 => M8,
}

// ── Selection and indexing ─────────────────────────────────────────────────

unsafe fn gather_elements_tiled_ffi(
    variant: Variant,
    data: *const f32,
    indices: *const i64,
    y: *mut f32,
    rows: usize,
    cols: usize,
    index_rows: usize,
    index_cols: usize,
    axis: usize,
    tile: usize,
) -> c_int {
    status(KernelOp::GatherElements, || {
        let data = unsafe { load(data, &[rows, cols], "data") }?;
        let idx = unsafe { load_indices(indices, &[index_rows, index_cols]) }?;
        let mut out = Tensor::zeros(&[index_rows, index_cols]);
        gather_elements_with_tile(variant, &data, &idx, axis, tile, &mut out)?;
        unsafe { store(y, &out) }
    })
}

unsafe fn gather_elements_ffi(
    variant: Variant,
    data: *const f32,
    indices: *const i64,
    y: *mut f32,
    rows: usize,
    cols: usize,
    index_rows: usize,
    index_cols: usize,
    axis: usize,
) -> c_int {
    unsafe {
        gather_elements_tiled_ffi(
            variant, data, indices, y, rows, cols, index_rows, index_cols, axis, DEFAULT_GATHER_TILE,
        )
    }
}

export_variants! {
    fn gather_elements_ffi(
        data: *const f32, indices: *const i64, y: *mut f32,
        rows: usize, cols: usize, index_rows: usize, index_cols: usize, axis: usize,
    );
    gather_elements_scalar => S, gather_elements_e32m1 => M1, gather_elements_e32m2 => M2,
    gather_elements_e32m4 => M4, gather_elements_e32m8 => M8,
}

export_variants! {
    fn gather_elements_tiled_ffi(
        data: *const f32, indices: *const i64, y: *mut f32,
        rows: usize, cols: usize, index_rows: usize, index_cols: usize, axis: usize, tile: usize,
    );
    gather_elements_tiled_scalar => TS, gather_elements_tiled_e32m1 => TM1,
    gather_elements_tiled_e32m2 => TM2, gather_elements_tiled_e32m4 => TM4,
    gather_elements_tiled_e32m8 => TM8,
}

/// `0` none, `1` add, `2` mul, `3` max, `4` min.
fn reduction_from_code(code: c_int) -> Result<ScatterReduction> {
    Ok(match code {
        0 => ScatterReduction::None,
        1 => ScatterReduction::Add,
        2 => ScatterReduction::Mul,
        3 => ScatterReduction::Max,
        4 => ScatterReduction::Min,
        _ => {
            return Err(KernelError::config(
                KernelOp::ScatterElements.name(),
                format!("unknown reduction code {code}"),
            ))
        }
    })
}

unsafe fn scatter_elements_ffi(
    variant: Variant,
    data: *const f32,
    indices: *const i64,
    updates: *const f32,
    y: *mut f32,
    rows: usize,
    cols: usize,
    index_rows: usize,
    index_cols: usize,
    axis: usize,
    reduction: c_int,
) -> c_int {
    status(KernelOp::ScatterElements, || {
        let reduction = reduction_from_code(reduction)?;
        let data = unsafe { load(data, &[rows, cols], "data") }?;
        let idx = unsafe { load_indices(indices, &[index_rows, index_cols]) }?;
        let upd = unsafe { load(updates, &[index_rows, index_cols], "updates") }?;
        let mut out = Tensor::zeros(&[rows, cols]);
        scatter_elements(variant, &data, &idx, &upd, axis, reduction, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn scatter_elements_ffi(
        data: *const f32, indices: *const i64, updates: *const f32, y: *mut f32,
        rows: usize, cols: usize, index_rows: usize, index_cols: usize, axis: usize, reduction: c_int,
    );
    scatter_elements_scalar => S, scatter_elements_e32m1 => M1, scatter_elements_e32m2 => M2,
    scatter_elements_e32m4 => M4, scatter_elements_e32m8 => M8,
}

unsafe fn nms1d_ffi(variant: Variant, x: *const f32, y: *mut f32, len: usize) -> c_int {
    status(KernelOp::Nms1d, || {
        let x = unsafe { load(x, &[len], "input") }?;
        let mut out = Tensor::zeros(&[len]);
        nms_1d(variant, &x, &mut out)?;
        unsafe { store(y, &out) }
    })
}

export_variants! {
    fn nms1d_ffi(x: *const f32, y: *mut f32, len: usize);
    nms1d_scalar => S, nms1d_e32m1 => M1, nms1d_e32m2 => M2, nms1d_e32m4 => M4, nms1d_e32m8 => M8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_relu_symbols_agree() {
        let x = [-1.0f32, 0.5, 2.0, -3.0, 4.0];
        let mut a = [9.0f32; 5];
        let mut b = [9.0f32; 5];
        unsafe {
            assert_eq!(relu_scalar(x.as_ptr(), a.as_mut_ptr(), 5), 0);
            assert_eq!(relu_e32m8(x.as_ptr(), b.as_mut_ptr(), 5), 0);
        }
        assert_eq!(a, [0.0, 0.5, 2.0, 0.0, 4.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_one_symbol_per_op() {
        unsafe {
            let x = [-10.0f32, -1.0, 0.0, 3.0];
            let mut y = [0.0f32; 4];
            assert_eq!(leaky_relu_e32m8(x.as_ptr(), y.as_mut_ptr(), 4, 0.1), 0);
            assert_eq!(y, [-1.0, -0.1, 0.0, 3.0]);

            let (a, b) = ([1.0f32, 2.0, 3.0], [10.0f32, 20.0, 30.0]);
            let mut sum = [0.0f32; 3];
            assert_eq!(tensor_add_e32m4(a.as_ptr(), b.as_ptr(), sum.as_mut_ptr(), 3), 0);
            assert_eq!(sum, [11.0, 22.0, 33.0]);

            let planes = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
            let mut biased = [0.0f32; 6];
            assert_eq!(bias_add_e32m1(planes.as_ptr(), [10.0f32, 20.0].as_ptr(), biased.as_mut_ptr(), 1, 2, 3), 0);
            assert_eq!(biased, [11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);

            let mut probs = [0.0f32; 4];
            assert_eq!(softmax_e32m8([0.0f32; 4].as_ptr(), probs.as_mut_ptr(), 2, 2), 0);
            assert_eq!(probs, [0.5; 4]);

            let mut normed = [0.0f32; 4];
            let s = batchnorm_tiled_e32m2(
                [1.0f32, 2.0, 3.0, 4.0].as_ptr(), [2.0f32].as_ptr(), [1.0f32].as_ptr(),
                [0.0f32].as_ptr(), [1.0f32].as_ptr(), normed.as_mut_ptr(), 1, 1, 4, 0.0, 3,
            );
            assert_eq!(s, 0);
            assert_eq!(normed, [3.0, 5.0, 7.0, 9.0]);

            let w = [1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0];
            let mut dense_out = [0.0f32; 3];
            let s = dense_e32m1(
                [1.0f32, 2.0].as_ptr(), w.as_ptr(), [0.5f32, 0.0, 0.0].as_ptr(), dense_out.as_mut_ptr(), 1, 2, 3,
            );
            assert_eq!(s, 0);
            assert_eq!(dense_out, [1.5, 2.0, 3.0]);

            let image: Vec<f32> = (1..=16).map(|v| v as f32).collect();
            let k = [-1.0f32, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
            let (mut col, mut gemm, mut conv) = ([0.0f32; 144], [0.0f32; 16], [0.0f32; 16]);
            let s = conv2d_im2col_e32m4(
                image.as_ptr(), k.as_ptr(), ptr::null(), conv.as_mut_ptr(),
                col.as_mut_ptr(), col.len(), gemm.as_mut_ptr(), gemm.len(),
                1, 1, 4, 4, 1, 3, 3, 1, 1, 1, 1,
            );
            assert_eq!(s, 0);
            assert_eq!(&conv[..4], &[11.0, 18.0, 21.0, 15.0]);

            let mut up = [0.0f32; 9];
            let s = conv_transpose2d_e32m2(
                [1.0f32, 2.0, 3.0, 4.0].as_ptr(), [1.0f32; 4].as_ptr(), ptr::null(), up.as_mut_ptr(),
                1, 1, 2, 2, 1, 2, 2, 1, 1, 0, 0, 0, 0,
            );
            assert_eq!(s, 0);
            assert_eq!(up, [1.0, 3.0, 2.0, 4.0, 10.0, 6.0, 3.0, 7.0, 4.0]);

            let mut scattered = [0.0f32; 4];
            let s = scatter_elements_e32m2(
                [0.0f32; 4].as_ptr(), [1i64, 0].as_ptr(), [5.0f32, 6.0].as_ptr(), scattered.as_mut_ptr(),
                2, 2, 1, 2, 0, 1,
            );
            assert_eq!(s, 0);
            assert_eq!(scattered, [0.0, 6.0, 5.0, 0.0]);

            let mut peaks = [9.0f32; 5];
            assert_eq!(nms1d_e32m4([1.0f32, 3.0, 2.0, 2.0, 0.0].as_ptr(), peaks.as_mut_ptr(), 5), 0);
            assert_eq!(peaks, [0.0, 3.0, 0.0, 2.0, 0.0]);
        }
    }

    #[test]
    fn test_tiled_activation_and_gather_symbols() {
        let x = [-1.0f32, 0.5, 2.0, -3.0, 4.0];
        let mut r = [9.0f32; 5];
        let mut l = [9.0f32; 5];
        let data: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let idx = [1i64, 2, 0, 2, 0, 0];
        let mut g = [0.0f32; 6];
        unsafe {
            assert_eq!(relu_tiled_e32m1(x.as_ptr(), r.as_mut_ptr(), 5, 2), 0);
            assert_eq!(leaky_relu_tiled_scalar(x.as_ptr(), l.as_mut_ptr(), 5, 0.5, 3), 0);
            assert_eq!(
                gather_elements_tiled_e32m8(data.as_ptr(), idx.as_ptr(), g.as_mut_ptr(), 3, 3, 2, 3, 0, 1),
                0
            );
            assert_eq!(relu_tiled_scalar(x.as_ptr(), r.as_mut_ptr(), 5, 0), 2);
        }
        assert_eq!(r, [0.0, 0.5, 2.0, 0.0, 4.0]);
        assert_eq!(l, [-0.5, 0.5, 2.0, -1.5, 4.0]);
        assert_eq!(g, [4.0, 8.0, 3.0, 7.0, 2.0, 3.0]);
    }

    #[test]
    fn test_null_pointer_is_status_2() {
        let mut y = [0.0f32; 2];
        unsafe {
            assert_eq!(relu_scalar(ptr::null(), y.as_mut_ptr(), 2), 2);
            assert_eq!(relu_e32m1([1.0f32, 2.0].as_ptr(), ptr::null_mut(), 2), 2);
        }
    }

    #[test]
    fn test_conv2d_edge_case_through_c_abi() {
        let x: Vec<f32> = (1..=16).map(|v| v as f32).collect();
        let k = [-1.0f32, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut y = [0.0f32; 16];
        let mut y3 = [0.0f32; 16];
        unsafe {
            let s = conv2d_e32m2(x.as_ptr(), k.as_ptr(), ptr::null(), y.as_mut_ptr(), 1, 1, 4, 4, 1, 3, 3, 1, 1, 1, 1);
            assert_eq!(s, 0);
            let s = conv2d3x3_scalar(x.as_ptr(), k.as_ptr(), ptr::null(), y3.as_mut_ptr(), 1, 1, 4, 4, 1, 1, 1, 1, 1);
            assert_eq!(s, 0);
        }
        assert_eq!(&y[..4], &[11.0, 18.0, 21.0, 15.0]);
        assert_eq!(y, y3);
    }

    #[test]
    fn test_im2col_short_scratch_is_shape_status() {
        let x = [1.0f32; 16];
        let k = [1.0f32; 9];
        let mut y = [0.0f32; 4];
        let mut col = [0.0f32; 3];
        let mut gemm = [0.0f32; 4];
        let s = unsafe {
            conv2d_im2col_e32m1(
                x.as_ptr(), k.as_ptr(), ptr::null(), y.as_mut_ptr(),
                col.as_mut_ptr(), col.len(), gemm.as_mut_ptr(), gemm.len(),
                1, 1, 4, 4, 1, 3, 3, 1, 1, 0, 0,
            )
        };
        assert_eq!(s, 1);
    }

    #[test]
    fn test_matmul_tiled_symbol() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [5.0f32, 6.0, 7.0, 8.0];
        let mut c = [0.0f32; 4];
        assert_eq!(unsafe { matmul_tiled_e32m4(a.as_ptr(), b.as_ptr(), c.as_mut_ptr(), 2, 2, 2, 1) }, 0);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_gather_out_of_range_is_status_3() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let idx = [0i64, 5];
        let mut y = [0.0f32; 2];
        let s = unsafe { gather_elements_scalar(data.as_ptr(), idx.as_ptr(), y.as_mut_ptr(), 2, 2, 1, 2, 0) };
        assert_eq!(s, 3);
    }

    #[test]
    fn test_maxpool_writes_argmax_when_requested() {
        let x: Vec<f32> = (1..=16).map(|v| v as f32).collect();
        let mut y = [0.0f32; 4];
        let mut idx = [0i64; 4];
        let s = unsafe {
            maxpool2d_e32m4(x.as_ptr(), y.as_mut_ptr(), idx.as_mut_ptr(), 1, 1, 4, 4, 2, 2, 2, 2, 0, 0, 0)
        };
        assert_eq!(s, 0);
        assert_eq!(y, [6.0, 8.0, 14.0, 16.0]);
        assert_eq!(idx, [5, 7, 13, 15]);
    }

    #[test]
    fn test_scatter_reduction_code_checked() {
        let data = [0.0f32; 2];
        let idx = [0i64];
        let upd = [1.0f32];
        let mut y = [0.0f32; 2];
        let s = unsafe {
            scatter_elements_scalar(data.as_ptr(), idx.as_ptr(), upd.as_ptr(), y.as_mut_ptr(), 1, 2, 1, 1, 1, 9)
        };
        assert_eq!(s, 2);
    }
}
