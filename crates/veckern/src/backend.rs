//! Kernel dispatch behind a trait object.
//!
//! The harness never calls kernels directly: it receives a [`KernelBackend`]
//! at construction and asks it to execute an [`OpSpec`] for one variant.
//! [`NativeBackend`] runs the in-crate kernels, allocating every output and
//! scratch buffer the caller-owned kernel APIs expect.
//!
//! Inputs are named the way the matching ONNX operator names them (`X`, `W`,
//! `B`, `A`, `scale`, `mean`, `var`, `data`, `indices`, `updates`, `boxes`,
//! `scores`). Attributes are in kernel terms: `strides` and `pads` carry one
//! value per spatial axis (symmetric padding).

use tracing::debug;

use crate::error::{KernelError, Result};
use crate::kernels::batchnorm::{batch_norm, BatchNormConfig, BatchNormStats, DEFAULT_EPSILON, DEFAULT_TILE};
use crate::kernels::conv2d::{conv2d, conv2d_3x3, Conv2dParams, ConvGeometry};
use crate::kernels::conv_transpose::{conv_transpose2d, ConvTranspose2dParams, TransposeGeometry};
use crate::kernels::elementwise::{
    bias_add, leaky_relu_with_tile, relu_with_tile, tensor_add, DEFAULT_ELEMENT_TILE, DEFAULT_LEAKY_ALPHA,
};
use crate::kernels::gemm::{dense, matmul, Tiling};
use crate::kernels::im2col::{conv2d_im2col, scratch_sizes};
use crate::kernels::indexing::{gather_elements_with_tile, scatter_elements, ScatterReduction, DEFAULT_GATHER_TILE};
use crate::kernels::maxpool::{max_pool2d, MaxPool2dParams, PoolGeometry};
use crate::kernels::nms::{nms_1d, nms_boxes, selected_to_tensor, NmsParams, NmsWorkspace};
use crate::kernels::softmax::softmax;
use crate::kernels::{KernelOp, Variant};
use crate::oracle::{input_f32, input_i64, optional_f32, AttrReader, AttrValue, Attributes};
use crate::tensor::{DynTensor, IndexTensor, Tensor, TensorMap};

/// One operator call: which kernel, with which attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub op: KernelOp,
    pub attributes: Attributes,
}

impl OpSpec {
    pub fn new(op: KernelOp) -> Self {
        Self {
            op,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    fn reader(&self) -> AttrReader<'_> {
        AttrReader::new(self.op.name(), &self.attributes)
    }
}

/// Something that can run a kernel variant over named inputs.
pub trait KernelBackend {
    fn name(&self) -> &str;

    fn supports(&self, op: KernelOp, variant: Variant) -> bool;

    /// Run `spec` with `variant` and return its outputs in declaration order.
    ///
    /// # Errors
    ///
    /// Whatever the kernel reports, plus `InvalidConfiguration` for missing
    /// inputs or malformed attributes.
    fn execute(&self, spec: &OpSpec, variant: Variant, inputs: &TensorMap) -> Result<Vec<DynTensor>>;
}

/// The kernels compiled into this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl KernelBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn supports(&self, op: KernelOp, variant: Variant) -> bool {
        op.supports(variant)
    }

    fn execute(&self, spec: &OpSpec, variant: Variant, inputs: &TensorMap) -> Result<Vec<DynTensor>> {
        debug!(op = %spec.op, %variant, "native dispatch");
        let op = spec.op;
        let name = op.name();
        let attrs = spec.reader();
        match op {
            KernelOp::Relu | KernelOp::LeakyRelu | KernelOp::Softmax | KernelOp::Nms1d => {
                let x = input_f32(name, inputs, "X")?;
                let mut y = Tensor::zeros(x.shape());
                match op {
                    KernelOp::Relu => {
                        relu_with_tile(variant, x, attrs.usize("tile", DEFAULT_ELEMENT_TILE)?, &mut y)?;
                    }
                    KernelOp::LeakyRelu => {
                        let alpha = narrow(attrs.float("alpha", f64::from(DEFAULT_LEAKY_ALPHA))?);
                        let tile = attrs.usize("tile", DEFAULT_ELEMENT_TILE)?;
                        leaky_relu_with_tile(variant, x, alpha, tile, &mut y)?;
                    }
                    KernelOp::Softmax => softmax(variant, x, &mut y)?,
                    _ => nms_1d(variant, x, &mut y)?,
                }
                Ok(vec![y.into()])
            }
            KernelOp::TensorAdd => {
                let a = input_f32(name, inputs, "A")?;
                let b = input_f32(name, inputs, "B")?;
                let mut y = Tensor::zeros(a.shape());
                tensor_add(variant, a, b, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::BiasAdd => {
                let x = input_f32(name, inputs, "X")?;
                let b = input_f32(name, inputs, "B")?;
                let mut y = Tensor::zeros(x.shape());
                bias_add(variant, x, b, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::BatchNorm => {
                let x = input_f32(name, inputs, "X")?;
                let stats = BatchNormStats {
                    scale: input_f32(name, inputs, "scale")?,
                    bias: input_f32(name, inputs, "B")?,
                    mean: input_f32(name, inputs, "mean")?,
                    variance: input_f32(name, inputs, "var")?,
                };
                let config = BatchNormConfig {
                    epsilon: narrow(attrs.float("epsilon", f64::from(DEFAULT_EPSILON))?),
                    tile: attrs.usize("tile", DEFAULT_TILE)?,
                };
                let mut y = Tensor::zeros(x.shape());
                batch_norm(variant, x, &stats, config, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::MatMul => {
                let a = input_f32(name, inputs, "A")?;
                let b = input_f32(name, inputs, "B")?;
                let d = Tiling::default();
                let [m, n, k] = attrs.usizes("tiling", [d.m, d.n, d.k])?;
                let [rows, _] = a.dims2(name)?;
                let [_, cols] = b.dims2(name)?;
                let mut c = Tensor::zeros(&[rows, cols]);
                matmul(variant, a, b, Tiling { m, n, k }, &mut c)?;
                Ok(vec![c.into()])
            }
            KernelOp::Dense => {
                let x = input_f32(name, inputs, "X")?;
                let w = input_f32(name, inputs, "W")?;
                let bias = optional_f32(name, inputs, "B")?;
                let [out_f, _] = w.dims2(name)?;
                let mut shape = x.shape().to_vec();
                if let Some(last) = shape.last_mut() {
                    *last = out_f;
                }
                let mut y = Tensor::zeros(&shape);
                dense(variant, x, w, bias, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::Conv2d | KernelOp::Conv2dIm2col | KernelOp::Conv2d3x3 => {
                let x = input_f32(name, inputs, "X")?;
                let w = input_f32(name, inputs, "W")?;
                let bias = optional_f32(name, inputs, "B")?;
                let params = Conv2dParams {
                    stride: pair(attrs.usizes("strides", [1, 1])?),
                    padding: pair(attrs.usizes("pads", [0, 0])?),
                };
                let g = ConvGeometry::new(op, x, w, params)?;
                let mut y = Tensor::zeros(&g.output_shape());
                match op {
                    KernelOp::Conv2d => conv2d(variant, x, w, bias, params, &mut y)?,
                    KernelOp::Conv2d3x3 => conv2d_3x3(variant, x, w, bias, params, &mut y)?,
                    _ => {
                        let (col_len, gemm_len) = scratch_sizes(&g);
                        let (mut col, mut gemm) = (vec![0.0; col_len], vec![0.0; gemm_len]);
                        conv2d_im2col(variant, x, w, bias, params, &mut col, &mut gemm, &mut y)?;
                    }
                }
                Ok(vec![y.into()])
            }
            KernelOp::ConvTranspose2d => {
                let x = input_f32(name, inputs, "X")?;
                let w = input_f32(name, inputs, "W")?;
                let bias = optional_f32(name, inputs, "B")?;
                let params = ConvTranspose2dParams {
                    stride: pair(attrs.usizes("strides", [1, 1])?),
                    padding: pair(attrs.usizes("pads", [0, 0])?),
                    output_padding: pair(attrs.usizes("output_padding", [0, 0])?),
                };
                let g = TransposeGeometry::new(x, w, params)?;
                let mut y = Tensor::zeros(&g.output_shape());
                conv_transpose2d(variant, x, w, bias, params, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::MaxPool2d => {
                let x = input_f32(name, inputs, "X")?;
                let kernel = attrs.usizes("kernel_shape", [2, 2])?;
                let params = MaxPool2dParams {
                    kernel: pair(kernel),
                    stride: pair(attrs.usizes("strides", kernel)?),
                    padding: pair(attrs.usizes("pads", [0, 0])?),
                    ceil_mode: attrs.int("ceil_mode", 0)? != 0,
                };
                let shape = PoolGeometry::new(x, params)?.output_shape();
                let mut y = Tensor::zeros(&shape);
                let mut indices = IndexTensor::zeros(&shape);
                max_pool2d(variant, x, params, &mut y, Some(&mut indices))?;
                Ok(vec![y.into(), indices.into()])
            }
            KernelOp::GatherElements => {
                let data = input_f32(name, inputs, "data")?;
                let indices = input_i64(name, inputs, "indices")?;
                let mut y = Tensor::zeros(indices.shape());
                let axis = attrs.usize("axis", 0)?;
                let tile = attrs.usize("tile", DEFAULT_GATHER_TILE)?;
                gather_elements_with_tile(variant, data, indices, axis, tile, &mut y)?;
                Ok(vec![y.into()])
            }
            KernelOp::ScatterElements => {
                let data = input_f32(name, inputs, "data")?;
                let indices = input_i64(name, inputs, "indices")?;
                let updates = input_f32(name, inputs, "updates")?;
                let reduction: ScatterReduction = attrs.string("reduction", "none")?.parse()?;
                let mut y = Tensor::zeros(data.shape());
                scatter_elements(
                    variant,
                    data,
                    indices,
                    updates,
                    attrs.usize("axis", 0)?,
                    reduction,
                    &mut y,
                )?;
                Ok(vec![y.into()])
            }
            KernelOp::NmsBoxes => {
                let boxes = input_f32(name, inputs, "boxes")?;
                let scores = input_f32(name, inputs, "scores")?;
                let params = NmsParams {
                    max_output_boxes_per_class: attrs.usize("max_output_boxes_per_class", 0)?,
                    iou_threshold: narrow(attrs.float("iou_threshold", 0.0)?),
                    score_threshold: narrow(attrs.float("score_threshold", f64::NEG_INFINITY)?),
                    center_point_box: attrs.int("center_point_box", 0)? != 0,
                };
                let mut workspace = NmsWorkspace::with_capacity(boxes.shape().get(1).copied().unwrap_or(0));
                let mut selected = Vec::new();
                nms_boxes(variant, boxes, scores, params, &mut workspace, &mut selected)?;
                Ok(vec![selected_to_tensor(&selected)?.into()])
            }
        }
    }
}

/// `(required, optional)` input names of `op`.
pub fn input_names(op: KernelOp) -> (&'static [&'static str], &'static [&'static str]) {
    match op {
        KernelOp::Relu | KernelOp::LeakyRelu | KernelOp::Softmax | KernelOp::Nms1d | KernelOp::MaxPool2d => {
            (&["X"], &[])
        }
        KernelOp::TensorAdd | KernelOp::MatMul => (&["A", "B"], &[]),
        KernelOp::BiasAdd => (&["X", "B"], &[]),
        KernelOp::BatchNorm => (&["X", "scale", "B", "mean", "var"], &[]),
        KernelOp::Dense
        | KernelOp::Conv2d
        | KernelOp::Conv2dIm2col
        | KernelOp::Conv2d3x3
        | KernelOp::ConvTranspose2d => (&["X", "W"], &["B"]),
        KernelOp::GatherElements => (&["data", "indices"], &[]),
        KernelOp::ScatterElements => (&["data", "indices", "updates"], &[]),
        KernelOp::NmsBoxes => (&["boxes", "scores"], &[]),
    }
}

/// Output names of `op`, in the order [`KernelBackend::execute`] returns them.
pub fn output_names(op: KernelOp) -> &'static [&'static str] {
    match op {
        KernelOp::MaxPool2d => &["Y", "Indices"],
        KernelOp::NmsBoxes => &["selected_indices"],
        _ => &["Y"],
    }
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(v: f64) -> f32 {
    v as f32
}

fn pair([a, b]: [usize; 2]) -> (usize, usize) {
    (a, b)
}

/// Fail unless the backend accepts `variant` for `op`.
///
/// # Errors
/// `InvalidConfiguration` naming the op and variant.
pub fn ensure_supported(backend: &dyn KernelBackend, op: KernelOp, variant: Variant) -> Result<()> {
    if backend.supports(op, variant) {
        Ok(())
    } else {
        Err(KernelError::config(
            op.name(),
            format!("backend '{}' has no {variant} form", backend.name()),
        ))
    }
}
