//! Dense row-major tensors.
//!
//! A [`Tensor`] owns a contiguous buffer plus its shape; strides are the
//! implicit C-order strides. Kernels borrow the buffer of an input tensor and
//! fully overwrite the buffer of a pre-allocated output tensor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Dense C-order tensor over element type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T = f32> {
    shape: Vec<usize>,
    data: Vec<T>,
}

/// Index tensor (int64) used by argmax, gather/scatter and NMS outputs.
pub type IndexTensor = Tensor<i64>;

impl<T: Copy + Default> Tensor<T> {
    /// Zero-initialized tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let n = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![T::default(); n],
        }
    }

    /// Wrap an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ShapeMismatch`] if `data.len()` differs from
    /// the element count implied by `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if n != data.len() {
            return Err(KernelError::shape(
                "tensor",
                format!("shape {shape:?} needs {n} elements, got {}", data.len()),
            ));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Same buffer, new shape with the same element count.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ShapeMismatch`] if the element counts differ.
    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        Self::from_vec(shape, self.data)
    }

    /// C-order strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        c_strides(&self.shape)
    }

    /// The four `[N, C, H, W]` extents of a rank-4 tensor.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ShapeMismatch`] naming `op` for any other rank.
    pub fn dims4(&self, op: &str) -> Result<[usize; 4]> {
        match *self.shape.as_slice() {
            [n, c, h, w] => Ok([n, c, h, w]),
            _ => Err(KernelError::shape(
                op,
                format!("expected rank-4 [N, C, H, W], got {:?}", self.shape),
            )),
        }
    }

    /// The two `[rows, cols]` extents of a rank-2 tensor.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ShapeMismatch`] naming `op` for any other rank.
    pub fn dims2(&self, op: &str) -> Result<[usize; 2]> {
        match *self.shape.as_slice() {
            [r, c] => Ok([r, c]),
            _ => Err(KernelError::shape(
                op,
                format!("expected rank-2 [rows, cols], got {:?}", self.shape),
            )),
        }
    }
}

impl Tensor<f32> {
    /// Convert element-wise to `f32` (index tensors compared as floats).
    #[allow(clippy::cast_precision_loss)]
    pub fn from_indices(t: &IndexTensor) -> Self {
        Self {
            shape: t.shape.clone(),
            data: t.data.iter().map(|&v| v as f32).collect(),
        }
    }
}

/// C-order strides for `shape`.
pub fn c_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Named operands of one operator call, keyed by input name.
pub type TensorMap = BTreeMap<String, DynTensor>;

/// Either element type, as exchanged with the oracle and the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", rename_all = "snake_case")]
pub enum DynTensor {
    F32(Tensor<f32>),
    I64(IndexTensor),
}

impl DynTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(t) => t.shape(),
            Self::I64(t) => t.shape(),
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Self::F32(_) => "float32",
            Self::I64(_) => "int64",
        }
    }

    /// Float view for metric computation.
    pub fn to_f32(&self) -> Tensor<f32> {
        match self {
            Self::F32(t) => t.clone(),
            Self::I64(t) => Tensor::from_indices(t),
        }
    }

    pub fn as_f32(&self) -> Option<&Tensor<f32>> {
        match self {
            Self::F32(t) => Some(t),
            Self::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&IndexTensor> {
        match self {
            Self::I64(t) => Some(t),
            Self::F32(_) => None,
        }
    }
}

impl From<Tensor<f32>> for DynTensor {
    fn from(t: Tensor<f32>) -> Self {
        Self::F32(t)
    }
}

impl From<IndexTensor> for DynTensor {
    fn from(t: IndexTensor) -> Self {
        Self::I64(t)
    }
}
