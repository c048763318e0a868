//! Straight-line f64 reference implementations of the ONNX operators the
//! kernels are checked against.
//!
//! Every operator accumulates in `f64` and rounds once to `f32` at the end,
//! uses plain nested loops over the full index space and follows the ONNX
//! attribute conventions (`pads` as `[top, left, bottom, right]`, kernel
//! layouts `[M, C/group, kH, kW]` and `[C, M/group, kH, kW]`).

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::too_many_lines
)]

use tracing::debug;

use super::{input_f32, input_i64, optional_f32, AttrReader, Attributes, Oracle};
use crate::error::{KernelError, Result};
use crate::tensor::{c_strides, DynTensor, IndexTensor, Tensor, TensorMap};

/// The built-in golden reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceOracle;

impl Oracle for ReferenceOracle {
    fn name(&self) -> &str {
        "reference"
    }

    fn evaluate(&self, op: &str, inputs: &TensorMap, attrs: &Attributes) -> Result<Vec<DynTensor>> {
        debug!(op, inputs = inputs.len(), attributes = attrs.len(), "reference evaluation");
        let a = AttrReader::new(op, attrs);
        match op {
            "Relu" => unary(op, inputs, |x| x.max(0.0)),
            "LeakyRelu" => {
                let alpha = a.float("alpha", 0.01)?;
                unary(op, inputs, move |x| if x >= 0.0 { x } else { alpha * x })
            }
            "Add" => add(op, inputs),
            "Gemm" => gemm(op, inputs, a),
            "Conv" => conv(op, inputs, a),
            "ConvTranspose" => conv_transpose(op, inputs, a),
            "MaxPool" => max_pool(op, inputs, a),
            "BatchNormalization" => batch_normalization(op, inputs, a),
            "Softmax" => softmax(op, inputs, a),
            "GatherElements" => gather_elements(op, inputs, a),
            "ScatterElements" => scatter_elements(op, inputs, a),
            "NonMaxSuppression" => non_max_suppression(op, inputs, a),
            "LocalMaxSuppression" => local_max_suppression(op, inputs),
            other => Err(KernelError::Unsupported { op: other.to_string() }),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn widen(t: &Tensor) -> Vec<f64> {
    t.data().iter().map(|&v| f64::from(v)).collect()
}

fn narrow(shape: &[usize], data: &[f64]) -> Result<DynTensor> {
    Ok(Tensor::from_vec(shape, data.iter().map(|&v| v as f32).collect())?.into())
}

fn rank4(op: &str, t: &Tensor, what: &str) -> Result<[usize; 4]> {
    t.dims4(op).map_err(|_| {
        KernelError::shape(op, format!("{what} must be rank 4, got {:?}", t.shape()))
    })
}

/// Resolve a possibly negative axis against `rank`.
fn normalize_axis(op: &str, axis: i64, rank: usize) -> Result<usize> {
    let r = rank as i64;
    if axis < -r || axis >= r {
        return Err(KernelError::config(op, format!("axis {axis} out of range for rank {rank}")));
    }
    Ok(if axis < 0 { (axis + r) as usize } else { axis as usize })
}

/// Right-aligned NumPy broadcast of two shapes.
fn broadcast_shape(op: &str, a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| {
        let pad = rank - s.len();
        if i < pad {
            1
        } else {
            s[i - pad]
        }
    };
    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            (x, y) => Err(KernelError::shape(
                op,
                format!("cannot broadcast {a:?} with {b:?} (axis {i}: {x} vs {y})"),
            )),
        })
        .collect()
}

/// Flat offset into a tensor of shape `src` for every element of the
/// broadcast shape `out`.
fn broadcast_offsets(out: &[usize], src: &[usize]) -> Vec<usize> {
    let pad = out.len() - src.len();
    let src_strides = c_strides(src);
    let total: usize = out.iter().product();
    let mut offsets = Vec::with_capacity(total);
    let mut index = vec![0usize; out.len()];
    for _ in 0..total {
        let mut off = 0;
        for (d, &i) in index.iter().enumerate().skip(pad) {
            if src[d - pad] != 1 {
                off += i * src_strides[d - pad];
            }
        }
        offsets.push(off);
        for d in (0..out.len()).rev() {
            index[d] += 1;
            if index[d] < out[d] {
                break;
            }
            index[d] = 0;
        }
    }
    offsets
}

// ── Elementwise ────────────────────────────────────────────────────────────

fn unary(op: &str, inputs: &TensorMap, f: impl Fn(f64) -> f64) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    let y: Vec<f64> = x.data().iter().map(|&v| f(f64::from(v))).collect();
    Ok(vec![narrow(x.shape(), &y)?])
}

fn add(op: &str, inputs: &TensorMap) -> Result<Vec<DynTensor>> {
    let a = input_f32(op, inputs, "A")?;
    let b = input_f32(op, inputs, "B")?;
    let shape = broadcast_shape(op, a.shape(), b.shape())?;
    let (oa, ob) = (broadcast_offsets(&shape, a.shape()), broadcast_offsets(&shape, b.shape()));
    let y: Vec<f64> = oa
        .iter()
        .zip(&ob)
        .map(|(&i, &j)| f64::from(a.data()[i]) + f64::from(b.data()[j]))
        .collect();
    Ok(vec![narrow(&shape, &y)?])
}

// ── Gemm ───────────────────────────────────────────────────────────────────

fn gemm(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let a = input_f32(op, inputs, "A")?;
    let b = input_f32(op, inputs, "B")?;
    let c = optional_f32(op, inputs, "C")?;
    let trans_a = attrs.int("transA", 0)? != 0;
    let trans_b = attrs.int("transB", 0)? != 0;
    let alpha = attrs.float("alpha", 1.0)?;
    let beta = attrs.float("beta", 1.0)?;

    let [ar, ac] = a.dims2(op)?;
    let [br, bc] = b.dims2(op)?;
    let (m, k) = if trans_a { (ac, ar) } else { (ar, ac) };
    let (kb, n) = if trans_b { (bc, br) } else { (br, bc) };
    if k != kb {
        return Err(KernelError::shape(
            op,
            format!("inner dimensions differ: A {:?}, B {:?}", a.shape(), b.shape()),
        ));
    }
    let at = |i: usize, p: usize| f64::from(if trans_a { a.data()[p * ac + i] } else { a.data()[i * ac + p] });
    let bt = |p: usize, j: usize| f64::from(if trans_b { b.data()[j * bc + p] } else { b.data()[p * bc + j] });

    let bias = match c {
        Some(c) => {
            let shape = broadcast_shape(op, c.shape(), &[m, n])?;
            if shape != [m, n] {
                return Err(KernelError::shape(
                    op,
                    format!("C {:?} does not broadcast to [{m}, {n}]", c.shape()),
                ));
            }
            let offsets = broadcast_offsets(&[m, n], c.shape());
            offsets.iter().map(|&o| f64::from(c.data()[o])).collect()
        }
        None => vec![0.0; m * n],
    };
    let mut y = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let dot: f64 = (0..k).map(|p| at(i, p) * bt(p, j)).sum();
            y[i * n + j] = alpha * dot + beta * bias[i * n + j];
        }
    }
    Ok(vec![narrow(&[m, n], &y)?])
}

// ── Convolutions ───────────────────────────────────────────────────────────

/// Spatial attributes shared by Conv, ConvTranspose and MaxPool.
#[derive(Debug, Clone, Copy)]
struct Window {
    strides: [usize; 2],
    /// `[top, left, bottom, right]`
    pads: [usize; 4],
    dilations: [usize; 2],
}

impl Window {
    fn read(op: &str, attrs: AttrReader<'_>) -> Result<Self> {
        let w = Self {
            strides: attrs.usizes("strides", [1, 1])?,
            pads: attrs.usizes("pads", [0, 0, 0, 0])?,
            dilations: attrs.usizes("dilations", [1, 1])?,
        };
        if w.strides.contains(&0) || w.dilations.contains(&0) {
            return Err(KernelError::config(op, "strides and dilations must be positive"));
        }
        Ok(w)
    }

    /// Input coordinate of output `o`, kernel tap `k` along `axis`, if inside `0..extent`.
    fn input_pos(&self, axis: usize, o: usize, k: usize, extent: usize) -> Option<usize> {
        let p = (o * self.strides[axis] + k * self.dilations[axis]) as isize - self.pads[axis] as isize;
        usize::try_from(p).ok().filter(|&p| p < extent)
    }
}

fn check_kernel_shape(op: &str, attrs: AttrReader<'_>, kh: usize, kw: usize) -> Result<()> {
    if attrs.has("kernel_shape") {
        let ks = attrs.usizes("kernel_shape", [kh, kw])?;
        if ks != [kh, kw] {
            return Err(KernelError::shape(
                op,
                format!("kernel_shape {ks:?} disagrees with weights [{kh}, {kw}]"),
            ));
        }
    }
    Ok(())
}

fn conv_extent(op: &str, input: usize, k: usize, stride: usize, dilation: usize, pad_total: usize) -> Result<usize> {
    let effective = (k - 1) * dilation + 1;
    let padded = input + pad_total;
    if effective > padded {
        return Err(KernelError::config(
            op,
            format!("kernel extent {effective} exceeds padded input extent {padded}"),
        ));
    }
    Ok((padded - effective) / stride + 1)
}

fn conv(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    let w = input_f32(op, inputs, "W")?;
    let b = optional_f32(op, inputs, "B")?;
    let [n, c, h, wd] = rank4(op, x, "X")?;
    let [m, cg, kh, kw] = rank4(op, w, "W")?;
    let group = attrs.usize("group", 1)?;
    if group == 0 || c % group != 0 || m % group != 0 || cg != c / group {
        return Err(KernelError::shape(
            op,
            format!("channels {c} / weights {:?} incompatible with group {group}", w.shape()),
        ));
    }
    check_kernel_shape(op, attrs, kh, kw)?;
    let win = Window::read(op, attrs)?;
    let oh_n = conv_extent(op, h, kh, win.strides[0], win.dilations[0], win.pads[0] + win.pads[2])?;
    let ow_n = conv_extent(op, wd, kw, win.strides[1], win.dilations[1], win.pads[1] + win.pads[3])?;
    if let Some(b) = b {
        if b.shape() != [m] {
            return Err(KernelError::shape(op, format!("B must be [{m}], got {:?}", b.shape())));
        }
    }
    let (xs, ws) = (widen(x), widen(w));
    let mg = m / group;
    let mut y = vec![0.0; n * m * oh_n * ow_n];
    for ni in 0..n {
        for mi in 0..m {
            let g = mi / mg;
            for oh in 0..oh_n {
                for ow in 0..ow_n {
                    let mut sum = b.map_or(0.0, |b| f64::from(b.data()[mi]));
                    for cl in 0..cg {
                        let ci = g * cg + cl;
                        for ki in 0..kh {
                            let Some(ih) = win.input_pos(0, oh, ki, h) else { continue };
                            for kj in 0..kw {
                                let Some(iw) = win.input_pos(1, ow, kj, wd) else { continue };
                                sum += xs[((ni * c + ci) * h + ih) * wd + iw] * ws[((mi * cg + cl) * kh + ki) * kw + kj];
                            }
                        }
                    }
                    y[((ni * m + mi) * oh_n + oh) * ow_n + ow] = sum;
                }
            }
        }
    }
    Ok(vec![narrow(&[n, m, oh_n, ow_n], &y)?])
}

fn conv_transpose(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    let w = input_f32(op, inputs, "W")?;
    let b = optional_f32(op, inputs, "B")?;
    let [n, c, h, wd] = rank4(op, x, "X")?;
    let [wc, mg, kh, kw] = rank4(op, w, "W")?;
    let group = attrs.usize("group", 1)?;
    if group == 0 || wc != c || c % group != 0 {
        return Err(KernelError::shape(
            op,
            format!("channels {c} / weights {:?} incompatible with group {group}", w.shape()),
        ));
    }
    check_kernel_shape(op, attrs, kh, kw)?;
    let win = Window::read(op, attrs)?;
    let out_pad = attrs.usizes("output_padding", [0, 0])?;
    let extent = |axis: usize, input: usize, k: usize| -> Result<usize> {
        let full = win.strides[axis] * (input - 1) + out_pad[axis] + (k - 1) * win.dilations[axis] + 1;
        full.checked_sub(win.pads[axis] + win.pads[axis + 2])
            .filter(|&e| e > 0)
            .ok_or_else(|| KernelError::config(op, format!("padding leaves no output on axis {axis}")))
    };
    let oh_n = extent(0, h, kh)?;
    let ow_n = extent(1, wd, kw)?;
    let m = mg * group;
    let cg = c / group;
    if let Some(b) = b {
        if b.shape() != [m] {
            return Err(KernelError::shape(op, format!("B must be [{m}], got {:?}", b.shape())));
        }
    }
    let (xs, ws) = (widen(x), widen(w));
    let mut y = vec![0.0; n * m * oh_n * ow_n];
    for ni in 0..n {
        for ci in 0..c {
            let g = ci / cg;
            for ih in 0..h {
                for iw in 0..wd {
                    let v = xs[((ni * c + ci) * h + ih) * wd + iw];
                    for ml in 0..mg {
                        let mi = g * mg + ml;
                        for ki in 0..kh {
                            let oh = (ih * win.strides[0] + ki * win.dilations[0]) as isize - win.pads[0] as isize;
                            if oh < 0 || oh as usize >= oh_n {
                                continue;
                            }
                            for kj in 0..kw {
                                let ow = (iw * win.strides[1] + kj * win.dilations[1]) as isize - win.pads[1] as isize;
                                if ow < 0 || ow as usize >= ow_n {
                                    continue;
                                }
                                y[((ni * m + mi) * oh_n + oh as usize) * ow_n + ow as usize] +=
                                    v * ws[((ci * mg + ml) * kh + ki) * kw + kj];
                            }
                        }
                    }
                }
            }
        }
    }
    if let Some(b) = b {
        let plane = oh_n * ow_n;
        for (i, v) in y.iter_mut().enumerate() {
            *v += f64::from(b.data()[(i / plane) % m]);
        }
    }
    Ok(vec![narrow(&[n, m, oh_n, ow_n], &y)?])
}

// ── Pooling ────────────────────────────────────────────────────────────────

fn pool_extent(op: &str, input: usize, k: usize, stride: usize, dilation: usize, pad_begin: usize, pad_end: usize, ceil: bool) -> Result<usize> {
    let effective = (k - 1) * dilation + 1;
    let padded = input + pad_begin + pad_end;
    if effective > padded {
        return Err(KernelError::config(
            op,
            format!("kernel extent {effective} exceeds padded input extent {padded}"),
        ));
    }
    let span = padded - effective;
    if !ceil {
        return Ok(span / stride + 1);
    }
    let mut out = span.div_ceil(stride) + 1;
    // A window may not start inside the trailing padding.
    if (out - 1) * stride >= input + pad_begin {
        out -= 1;
    }
    Ok(out)
}

fn max_pool(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    let [n, c, h, wd] = rank4(op, x, "X")?;
    if !attrs.has("kernel_shape") {
        return Err(KernelError::config(op, "kernel_shape is required"));
    }
    let [kh, kw] = attrs.usizes("kernel_shape", [1, 1])?;
    if kh == 0 || kw == 0 {
        return Err(KernelError::config(op, "kernel_shape must be positive"));
    }
    if attrs.int("storage_order", 0)? != 0 {
        return Err(KernelError::config(op, "only row-major storage_order is supported"));
    }
    let win = Window::read(op, attrs)?;
    let ceil = attrs.int("ceil_mode", 0)? != 0;
    let oh_n = pool_extent(op, h, kh, win.strides[0], win.dilations[0], win.pads[0], win.pads[2], ceil)?;
    let ow_n = pool_extent(op, wd, kw, win.strides[1], win.dilations[1], win.pads[1], win.pads[3], ceil)?;

    let mut y = vec![f64::NEG_INFINITY; n * c * oh_n * ow_n];
    let mut idx = vec![-1_i64; y.len()];
    for nc in 0..n * c {
        for oh in 0..oh_n {
            for ow in 0..ow_n {
                let at = (nc * oh_n + oh) * ow_n + ow;
                for ki in 0..kh {
                    let Some(ih) = win.input_pos(0, oh, ki, h) else { continue };
                    for kj in 0..kw {
                        let Some(iw) = win.input_pos(1, ow, kj, wd) else { continue };
                        let flat = (nc * h + ih) * wd + iw;
                        let v = f64::from(x.data()[flat]);
                        if idx[at] < 0 || v > y[at] {
                            y[at] = v;
                            idx[at] = flat as i64;
                        }
                    }
                }
            }
        }
    }
    let shape = [n, c, oh_n, ow_n];
    Ok(vec![narrow(&shape, &y)?, IndexTensor::from_vec(&shape, idx)?.into()])
}

// ── Normalization ──────────────────────────────────────────────────────────

fn batch_normalization(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    let stats = [
        input_f32(op, inputs, "scale")?,
        input_f32(op, inputs, "B")?,
        input_f32(op, inputs, "mean")?,
        input_f32(op, inputs, "var")?,
    ];
    let eps = attrs.float("epsilon", 1e-5)?;
    if x.rank() < 2 {
        return Err(KernelError::shape(op, format!("X must be at least rank 2, got {:?}", x.shape())));
    }
    let (n, c) = (x.shape()[0], x.shape()[1]);
    let plane: usize = x.shape()[2..].iter().product();
    for s in stats {
        if s.shape() != [c] {
            return Err(KernelError::shape(op, format!("statistics must be [{c}], got {:?}", s.shape())));
        }
    }
    let [scale, bias, mean, var] = stats.map(widen);
    let xs = widen(x);
    let mut y = vec![0.0; xs.len()];
    for ni in 0..n {
        for ci in 0..c {
            let base = (ni * c + ci) * plane;
            let inv = 1.0 / (var[ci] + eps).sqrt();
            for i in base..base + plane {
                y[i] = (xs[i] - mean[ci]) * inv * scale[ci] + bias[ci];
            }
        }
    }
    Ok(vec![narrow(x.shape(), &y)?])
}

fn softmax(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    if x.rank() == 0 {
        return Err(KernelError::shape(op, "X must have rank >= 1"));
    }
    let axis = normalize_axis(op, attrs.int("axis", -1)?, x.rank())?;
    let len = x.shape()[axis];
    let inner: usize = x.shape()[axis + 1..].iter().product();
    let outer: usize = x.shape()[..axis].iter().product();
    let xs = widen(x);
    let mut y = vec![0.0; xs.len()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |j: usize| (o * len + j) * inner + i;
            let max = (0..len).map(|j| xs[at(j)]).fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = (0..len).map(|j| (xs[at(j)] - max).exp()).sum();
            for j in 0..len {
                y[at(j)] = (xs[at(j)] - max).exp() / sum;
            }
        }
    }
    Ok(vec![narrow(x.shape(), &y)?])
}

// ── Indexing ───────────────────────────────────────────────────────────────

/// Walk every position of `indices` in row-major order, yielding the flat
/// index position and the flat `data` offset it addresses along `axis`.
fn index_targets(op: &str, data_shape: &[usize], indices: &IndexTensor, axis: usize) -> Result<Vec<(usize, usize)>> {
    let ishape = indices.shape();
    if ishape.len() != data_shape.len() {
        return Err(KernelError::shape(
            op,
            format!("indices rank {} differs from data rank {}", ishape.len(), data_shape.len()),
        ));
    }
    for (d, (&i, &s)) in ishape.iter().zip(data_shape).enumerate() {
        if d != axis && i > s {
            return Err(KernelError::shape(
                op,
                format!("indices shape {ishape:?} exceeds data shape {data_shape:?} off axis {axis}"),
            ));
        }
    }
    let dstrides = c_strides(data_shape);
    let istrides = c_strides(ishape);
    let bound = data_shape[axis];
    let mut out = Vec::with_capacity(indices.numel());
    for (pos, &raw) in indices.data().iter().enumerate() {
        let resolved = if raw < 0 { raw + bound as i64 } else { raw };
        if resolved < 0 || resolved as usize >= bound {
            return Err(KernelError::IndexOutOfRange { op: op.to_string(), index: raw, bound });
        }
        let mut offset = 0;
        for d in 0..ishape.len() {
            let coord = if d == axis { resolved as usize } else { (pos / istrides[d]) % ishape[d] };
            offset += coord * dstrides[d];
        }
        out.push((pos, offset));
    }
    Ok(out)
}

fn gather_elements(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let data = input_f32(op, inputs, "data")?;
    let indices = input_i64(op, inputs, "indices")?;
    let axis = normalize_axis(op, attrs.int("axis", 0)?, data.rank())?;
    let targets = index_targets(op, data.shape(), indices, axis)?;
    let mut y = vec![0.0; indices.numel()];
    for (pos, offset) in targets {
        y[pos] = f64::from(data.data()[offset]);
    }
    Ok(vec![narrow(indices.shape(), &y)?])
}

fn scatter_elements(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let data = input_f32(op, inputs, "data")?;
    let indices = input_i64(op, inputs, "indices")?;
    let updates = input_f32(op, inputs, "updates")?;
    if updates.shape() != indices.shape() {
        return Err(KernelError::shape(
            op,
            format!("updates {:?} must match indices {:?}", updates.shape(), indices.shape()),
        ));
    }
    let axis = normalize_axis(op, attrs.int("axis", 0)?, data.rank())?;
    let reduction = attrs.string("reduction", "none")?;
    let combine: fn(f64, f64) -> f64 = match reduction.as_str() {
        "none" => |_, u| u,
        "add" => |c, u| c + u,
        "mul" => |c, u| c * u,
        "max" => f64::max,
        "min" => f64::min,
        other => return Err(KernelError::config(op, format!("unknown reduction '{other}'"))),
    };
    let targets = index_targets(op, data.shape(), indices, axis)?;
    let mut y = widen(data);
    for (pos, offset) in targets {
        y[offset] = combine(y[offset], f64::from(updates.data()[pos]));
    }
    Ok(vec![narrow(data.shape(), &y)?])
}

// ── Suppression ────────────────────────────────────────────────────────────

fn non_max_suppression(op: &str, inputs: &TensorMap, attrs: AttrReader<'_>) -> Result<Vec<DynTensor>> {
    let boxes = input_f32(op, inputs, "boxes")?;
    let scores = input_f32(op, inputs, "scores")?;
    let max_out = attrs.usize("max_output_boxes_per_class", 0)?;
    let iou_threshold = attrs.float("iou_threshold", 0.0)?;
    let score_threshold = attrs.float("score_threshold", f64::NEG_INFINITY)?;
    let center = attrs.int("center_point_box", 0)? != 0;
    if !(0.0..=1.0).contains(&iou_threshold) {
        return Err(KernelError::config(op, format!("iou_threshold {iou_threshold} outside [0, 1]")));
    }
    let (b, m) = match *boxes.shape() {
        [b, m, 4] => (b, m),
        _ => return Err(KernelError::shape(op, format!("boxes must be [B, M, 4], got {:?}", boxes.shape()))),
    };
    let k = match *scores.shape() {
        [sb, k, sm] if sb == b && sm == m => k,
        _ => {
            return Err(KernelError::shape(
                op,
                format!("scores must be [{b}, K, {m}], got {:?}", scores.shape()),
            ))
        }
    };

    let mut selected: Vec<i64> = Vec::new();
    for bi in 0..b {
        let corners: Vec<[f64; 4]> = boxes.data()[bi * m * 4..][..m * 4]
            .chunks_exact(4)
            .map(|q| {
                let q = [q[0], q[1], q[2], q[3]].map(f64::from);
                let (y1, x1, y2, x2) = if center {
                    (q[1] - q[3] / 2.0, q[0] - q[2] / 2.0, q[1] + q[3] / 2.0, q[0] + q[2] / 2.0)
                } else {
                    (q[0], q[1], q[2], q[3])
                };
                [y1.min(y2), x1.min(x2), y1.max(y2), x1.max(x2)]
            })
            .collect();
        let area = |q: &[f64; 4]| (q[2] - q[0]) * (q[3] - q[1]);
        let iou = |p: &[f64; 4], q: &[f64; 4]| {
            let ih = (p[2].min(q[2]) - p[0].max(q[0])).max(0.0);
            let iw = (p[3].min(q[3]) - p[1].max(q[1])).max(0.0);
            let inter = ih * iw;
            let union = area(p) + area(q) - inter;
            if area(p) <= 0.0 || area(q) <= 0.0 || union <= 0.0 {
                0.0
            } else {
                inter / union
            }
        };
        for ki in 0..k {
            let s = &scores.data()[(bi * k + ki) * m..][..m];
            let mut order: Vec<usize> = (0..m).filter(|&i| f64::from(s[i]) >= score_threshold).collect();
            order.sort_by(|&p, &q| s[q].total_cmp(&s[p]));
            let mut kept: Vec<usize> = Vec::new();
            for &cand in &order {
                if kept.len() >= max_out {
                    break;
                }
                if kept.iter().all(|&sel| iou(&corners[sel], &corners[cand]) <= iou_threshold) {
                    kept.push(cand);
                    selected.extend([bi as i64, ki as i64, cand as i64]);
                }
            }
        }
    }
    let rows = selected.len() / 3;
    Ok(vec![IndexTensor::from_vec(&[rows, 3], selected)?.into()])
}

fn local_max_suppression(op: &str, inputs: &TensorMap) -> Result<Vec<DynTensor>> {
    let x = input_f32(op, inputs, "X")?;
    if x.rank() != 1 {
        return Err(KernelError::shape(op, format!("X must be rank 1, got {:?}", x.shape())));
    }
    let v = x.data();
    let y: Vec<f64> = (0..v.len())
        .map(|i| {
            let smaller = (i > 0 && v[i] < v[i - 1]) || (i + 1 < v.len() && v[i] < v[i + 1]);
            if smaller {
                0.0
            } else {
                f64::from(v[i])
            }
        })
        .collect();
    Ok(vec![narrow(x.shape(), &y)?])
}
