//! Golden-reference evaluation.
//!
//! An [`Oracle`] evaluates an operator by its ONNX name over named input
//! tensors and typed attributes. The harness computes one reference result
//! per scenario through this seam and compares every kernel variant against
//! it, so the oracle must never share code paths with the kernels.

pub mod reference;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::tensor::{DynTensor, IndexTensor, Tensor, TensorMap};

pub use reference::ReferenceOracle;

/// One attribute value, as written in scenario files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Ints(v) => write!(f, "{v:?}"),
            AttrValue::Floats(v) => write!(f, "{v:?}"),
            AttrValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

/// Attributes of one operator call, keyed by attribute name.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Typed, defaulted access to an [`Attributes`] map.
///
/// Every accessor fails with `InvalidConfiguration` naming the operator when
/// the attribute is present with the wrong type.
#[derive(Debug, Clone, Copy)]
pub struct AttrReader<'a> {
    op: &'a str,
    attrs: &'a Attributes,
}

impl<'a> AttrReader<'a> {
    pub fn new(op: &'a str, attrs: &'a Attributes) -> Self {
        Self { op, attrs }
    }

    fn wrong_type(&self, key: &str, want: &str, got: &AttrValue) -> KernelError {
        KernelError::config(self.op, format!("attribute '{key}' must be {want}, got {got}"))
    }

    pub fn has(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// # Errors
    /// `InvalidConfiguration` if the attribute is not an integer.
    pub fn int(&self, key: &str, default: i64) -> Result<i64> {
        match self.attrs.get(key) {
            None => Ok(default),
            Some(AttrValue::Int(v)) => Ok(*v),
            Some(other) => Err(self.wrong_type(key, "an integer", other)),
        }
    }

    /// Non-negative integer as `usize`.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the attribute is not a non-negative integer.
    pub fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.attrs.get(key) {
            None => Ok(default),
            Some(AttrValue::Int(v)) => usize::try_from(*v)
                .map_err(|_| KernelError::config(self.op, format!("attribute '{key}' must be non-negative, got {v}"))),
            Some(other) => Err(self.wrong_type(key, "an integer", other)),
        }
    }

    /// # Errors
    /// `InvalidConfiguration` if the attribute is not a number.
    #[allow(clippy::cast_precision_loss)]
    pub fn float(&self, key: &str, default: f64) -> Result<f64> {
        match self.attrs.get(key) {
            None => Ok(default),
            Some(AttrValue::Float(v)) => Ok(*v),
            Some(AttrValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(self.wrong_type(key, "a number", other)),
        }
    }

    /// # Errors
    /// `InvalidConfiguration` if the attribute is not an integer list.
    pub fn ints(&self, key: &str, default: &[i64]) -> Result<Vec<i64>> {
        match self.attrs.get(key) {
            None => Ok(default.to_vec()),
            Some(AttrValue::Ints(v)) => Ok(v.clone()),
            Some(AttrValue::Int(v)) => Ok(vec![*v]),
            Some(other) => Err(self.wrong_type(key, "an integer list", other)),
        }
    }

    /// Exactly `N` non-negative integers; a single integer is broadcast.
    ///
    /// # Errors
    /// `InvalidConfiguration` on a wrong type, length or sign.
    pub fn usizes<const N: usize>(&self, key: &str, default: [usize; N]) -> Result<[usize; N]> {
        if !self.has(key) {
            return Ok(default);
        }
        let raw = self.ints(key, &[])?;
        let raw = if raw.len() == 1 { vec![raw[0]; N] } else { raw };
        if raw.len() != N {
            return Err(KernelError::config(
                self.op,
                format!("attribute '{key}' needs {N} values, got {raw:?}"),
            ));
        }
        let mut out = [0usize; N];
        for (dst, &v) in out.iter_mut().zip(&raw) {
            *dst = usize::try_from(v)
                .map_err(|_| KernelError::config(self.op, format!("attribute '{key}' must be non-negative, got {raw:?}")))?;
        }
        Ok(out)
    }

    /// # Errors
    /// `InvalidConfiguration` if the attribute is not a string.
    pub fn string(&self, key: &str, default: &str) -> Result<String> {
        match self.attrs.get(key) {
            None => Ok(default.to_string()),
            Some(AttrValue::Str(v)) => Ok(v.clone()),
            Some(other) => Err(self.wrong_type(key, "a string", other)),
        }
    }
}

/// Borrow a required float input.
///
/// # Errors
/// `InvalidConfiguration` if absent, `ShapeMismatch` if it holds indices.
pub fn input_f32<'t>(op: &str, inputs: &'t TensorMap, name: &str) -> Result<&'t Tensor> {
    match inputs.get(name) {
        Some(DynTensor::F32(t)) => Ok(t),
        Some(DynTensor::I64(_)) => Err(KernelError::shape(op, format!("input '{name}' must be float32"))),
        None => Err(KernelError::config(op, format!("missing input '{name}'"))),
    }
}

/// Borrow an optional float input.
///
/// # Errors
/// `ShapeMismatch` if present but holding indices.
pub fn optional_f32<'t>(op: &str, inputs: &'t TensorMap, name: &str) -> Result<Option<&'t Tensor>> {
    if inputs.contains_key(name) {
        input_f32(op, inputs, name).map(Some)
    } else {
        Ok(None)
    }
}

/// Borrow a required index input.
///
/// # Errors
/// `InvalidConfiguration` if absent, `ShapeMismatch` if it holds floats.
pub fn input_i64<'t>(op: &str, inputs: &'t TensorMap, name: &str) -> Result<&'t IndexTensor> {
    match inputs.get(name) {
        Some(DynTensor::I64(t)) => Ok(t),
        Some(DynTensor::F32(_)) => Err(KernelError::shape(op, format!("input '{name}' must be int64"))),
        None => Err(KernelError::config(op, format!("missing input '{name}'"))),
    }
}

/// Source of golden outputs.
pub trait Oracle {
    /// Short label used in logs and reports.
    fn name(&self) -> &str;

    /// Evaluate ONNX operator `op` and return its outputs in declaration order.
    ///
    /// # Errors
    ///
    /// `Unsupported` for an unknown operator; shape and configuration
    /// errors as the operator defines them.
    fn evaluate(&self, op: &str, inputs: &TensorMap, attrs: &Attributes) -> Result<Vec<DynTensor>>;
}
