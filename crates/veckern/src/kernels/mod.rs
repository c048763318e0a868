//! Kernel implementations: scalar reference and width-polymorphic vector forms.
//!
//! Each submodule exposes its kernel at two levels:
//! - a typed entry point `fn {name}(variant, &Tensor..., &mut Tensor) -> Result<()>`
//!   that validates shapes and configuration before touching the output;
//! - slice-level bodies `fn {name}_scalar(...)` (ground truth) and
//!   `fn {name}_vector::<L>(...)`, generic over the lane count `L`.
//!
//! The vector width only chooses `L`; shape arithmetic and tail handling live
//! once in the shared body.

// Kernel code naturally uses single-character math variable names (n, c, h, w, k)
// and index arithmetic between usize and the i64 index tensors.
#![allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::needless_range_loop,
    clippy::float_cmp,
    clippy::doc_markdown
)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KernelError, Result};
use crate::tensor::Tensor;

/// Instantiate a lane-generic body for the given [`Width`].
///
/// `dispatch_width!(w, relu_vector(input, output))` calls
/// `relu_vector::<4>`, `::<8>`, `::<16>` or `::<32>`.
macro_rules! dispatch_width {
    ($width:expr, $func:ident ( $($arg:expr),* $(,)? )) => {
        match $width {
            $crate::kernels::Width::M1 => {
                $func::<{ $crate::kernels::Width::M1.lanes() }>($($arg),*)
            }
            $crate::kernels::Width::M2 => {
                $func::<{ $crate::kernels::Width::M2.lanes() }>($($arg),*)
            }
            $crate::kernels::Width::M4 => {
                $func::<{ $crate::kernels::Width::M4.lanes() }>($($arg),*)
            }
            $crate::kernels::Width::M8 => {
                $func::<{ $crate::kernels::Width::M8.lanes() }>($($arg),*)
            }
        }
    };
}

pub mod lanes;
pub mod ulp;

// Group A: Elementwise
pub mod elementwise;

// Group B: Reduction / normalization
pub mod batchnorm;
pub mod softmax;

// Group C: Matrix
pub mod gemm;

// Group D: Spatial
pub mod conv2d;
pub mod conv_transpose;
pub mod im2col;
pub mod maxpool;

// Group E: Selection and indexing
pub mod indexing;
pub mod nms;

use lanes::BASE_LANES;

/// Register-group multiplier of a vector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    /// One register (4 f32 lanes).
    M1,
    /// Two registers (8 lanes).
    M2,
    /// Four registers (16 lanes).
    M4,
    /// Eight registers (32 lanes).
    M8,
}

impl Width {
    pub const ALL: [Width; 4] = [Width::M1, Width::M2, Width::M4, Width::M8];

    #[must_use]
    pub const fn lmul(self) -> usize {
        match self {
            Width::M1 => 1,
            Width::M2 => 2,
            Width::M4 => 4,
            Width::M8 => 8,
        }
    }

    /// f32 lanes processed per inner-loop iteration.
    #[must_use]
    pub const fn lanes(self) -> usize {
        BASE_LANES * self.lmul()
    }
}

/// Implementation tag selecting how a kernel walks its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    /// Plain loops; the ground truth every other variant is checked against.
    Scalar,
    /// Strip-mined over `Width::lanes()` lanes.
    Vector(Width),
    /// Scalar loops over cache blocks.
    TiledScalar,
    /// Vector loops over cache blocks.
    TiledVector(Width),
}

impl Variant {
    /// Scalar plus the four vector widths.
    pub const UNTILED: [Variant; 5] = [
        Variant::Scalar,
        Variant::Vector(Width::M1),
        Variant::Vector(Width::M2),
        Variant::Vector(Width::M4),
        Variant::Vector(Width::M8),
    ];

    /// The tiled counterparts of [`Variant::UNTILED`].
    pub const TILED: [Variant; 5] = [
        Variant::TiledScalar,
        Variant::TiledVector(Width::M1),
        Variant::TiledVector(Width::M2),
        Variant::TiledVector(Width::M4),
        Variant::TiledVector(Width::M8),
    ];

    #[must_use]
    pub const fn is_tiled(self) -> bool {
        matches!(self, Variant::TiledScalar | Variant::TiledVector(_))
    }

    /// Vector width, `None` for the scalar forms.
    #[must_use]
    pub const fn width(self) -> Option<Width> {
        match self {
            Variant::Vector(w) | Variant::TiledVector(w) => Some(w),
            Variant::Scalar | Variant::TiledScalar => None,
        }
    }

    /// Tag used in reports, artifact names and the C ABI.
    #[must_use]
    pub fn tag(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tiled = if self.is_tiled() { "tiled_" } else { "" };
        match self.width() {
            None => write!(f, "{tiled}scalar"),
            Some(w) => write!(f, "{tiled}e32m{}", w.lmul()),
        }
    }
}

impl FromStr for Variant {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let (tiled, rest) = match lower.strip_prefix("tiled_") {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };
        let width = match rest {
            "scalar" => None,
            "e32m1" | "m1" => Some(Width::M1),
            "e32m2" | "m2" => Some(Width::M2),
            "e32m4" | "m4" => Some(Width::M4),
            "e32m8" | "m8" => Some(Width::M8),
            _ => {
                return Err(KernelError::config(
                    "variant",
                    format!("unknown variant tag '{s}'"),
                ))
            }
        };
        Ok(match (tiled, width) {
            (false, None) => Variant::Scalar,
            (false, Some(w)) => Variant::Vector(w),
            (true, None) => Variant::TiledScalar,
            (true, Some(w)) => Variant::TiledVector(w),
        })
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Operations implemented by the kernel library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelOp {
    Relu,
    LeakyRelu,
    TensorAdd,
    BiasAdd,
    Softmax,
    BatchNorm,
    MatMul,
    Dense,
    Conv2d,
    Conv2dIm2col,
    Conv2d3x3,
    ConvTranspose2d,
    MaxPool2d,
    GatherElements,
    ScatterElements,
    NmsBoxes,
    Nms1d,
}

impl KernelOp {
    pub const ALL: [KernelOp; 17] = [
        KernelOp::Relu,
        KernelOp::LeakyRelu,
        KernelOp::TensorAdd,
        KernelOp::BiasAdd,
        KernelOp::Softmax,
        KernelOp::BatchNorm,
        KernelOp::MatMul,
        KernelOp::Dense,
        KernelOp::Conv2d,
        KernelOp::Conv2dIm2col,
        KernelOp::Conv2d3x3,
        KernelOp::ConvTranspose2d,
        KernelOp::MaxPool2d,
        KernelOp::GatherElements,
        KernelOp::ScatterElements,
        KernelOp::NmsBoxes,
        KernelOp::Nms1d,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            KernelOp::Relu => "relu",
            KernelOp::LeakyRelu => "leaky_relu",
            KernelOp::TensorAdd => "tensor_add",
            KernelOp::BiasAdd => "bias_add",
            KernelOp::Softmax => "softmax",
            KernelOp::BatchNorm => "batch_norm",
            KernelOp::MatMul => "mat_mul",
            KernelOp::Dense => "dense",
            KernelOp::Conv2d => "conv2d",
            KernelOp::Conv2dIm2col => "conv2d_im2col",
            KernelOp::Conv2d3x3 => "conv2d3x3",
            KernelOp::ConvTranspose2d => "conv_transpose2d",
            KernelOp::MaxPool2d => "max_pool2d",
            KernelOp::GatherElements => "gather_elements",
            KernelOp::ScatterElements => "scatter_elements",
            KernelOp::NmsBoxes => "nms_boxes",
            KernelOp::Nms1d => "nms1d",
        }
    }

    /// Whether the op has cache-blocked forms.
    #[must_use]
    pub const fn has_tiled(self) -> bool {
        matches!(
            self,
            KernelOp::Relu
                | KernelOp::LeakyRelu
                | KernelOp::BatchNorm
                | KernelOp::MatMul
                | KernelOp::GatherElements
        )
    }

    #[must_use]
    pub fn supports(self, variant: Variant) -> bool {
        !variant.is_tiled() || self.has_tiled()
    }

    /// Every variant tag this op accepts, scalar first.
    #[must_use]
    pub fn variants(self) -> Vec<Variant> {
        let mut v = Variant::UNTILED.to_vec();
        if self.has_tiled() {
            v.extend(Variant::TILED);
        }
        v
    }
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelOp {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        KernelOp::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| KernelError::config("op", format!("unknown op '{s}'")))
    }
}

/// Fail with `InvalidConfiguration` if `op` has no form for `variant`.
pub(crate) fn ensure_variant(op: KernelOp, variant: Variant) -> Result<()> {
    if op.supports(variant) {
        Ok(())
    } else {
        Err(KernelError::config(
            op.name(),
            format!("variant {variant} is not available"),
        ))
    }
}

/// Fail with `ShapeMismatch` unless `t` has exactly `expected` shape.
pub(crate) fn ensure_shape<T>(op: KernelOp, what: &str, t: &Tensor<T>, expected: &[usize]) -> Result<()>
where
    T: Copy + Default,
{
    if t.shape() == expected {
        Ok(())
    } else {
        Err(KernelError::shape(
            op.name(),
            format!("{what} has shape {:?}, expected {expected:?}", t.shape()),
        ))
    }
}

/// Fail with `InvalidConfiguration` if any of `values` is zero.
pub(crate) fn ensure_positive(op: KernelOp, what: &str, values: &[usize]) -> Result<()> {
    if values.iter().all(|&v| v > 0) {
        Ok(())
    } else {
        Err(KernelError::config(
            op.name(),
            format!("{what} must be positive, got {values:?}"),
        ))
    }
}
