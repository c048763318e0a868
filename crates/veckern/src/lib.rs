//! # veckern
//!
//! Width-polymorphic CPU kernels for neural-network operators, checked
//! against an independent golden reference.
//!
//! Every kernel has a scalar ground-truth body and one vector body generic
//! over the lane count; a [`Variant`](kernels::Variant) picks which runs.
//! The [`harness`] drives scenarios through a [`KernelBackend`](backend::KernelBackend),
//! compares each variant with an [`Oracle`](oracle::Oracle) and reports
//! max-abs-error, SNR and a verdict per variant.
//!
//! ## Modules
//!
//! - [`kernels`]: the operators, one submodule per family
//! - [`tensor`]: owned row-major tensors and the dynamically typed carrier
//! - [`oracle`]: golden evaluation of ONNX-style operator calls
//! - [`backend`]: executes one op in one variant from named tensors
//! - [`verify`]: accuracy metrics and verdict thresholds
//! - [`storage`]: raw little-endian tensor files
//! - [`harness`]: scenario parsing, validation, execution and reporting
//! - [`ffi`]: C ABI entry points, one per op and variant

pub mod backend;
pub mod error;
pub mod ffi;
pub mod harness;
pub mod kernels;
pub mod oracle;
pub mod storage;
pub mod tensor;
pub mod verify;

pub use error::{KernelError, Result};
pub use kernels::{KernelOp, Variant, Width};
pub use tensor::{DynTensor, IndexTensor, Tensor, TensorMap};
