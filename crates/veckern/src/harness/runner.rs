//! Scenario execution: materialize inputs, evaluate the oracle once, run
//! every requested variant and classify each output.

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::backend::{output_names, KernelBackend, OpSpec};
use crate::error::{KernelError, Result};
use crate::harness::report::{Report, Row};
use crate::harness::scenario::{DType, InputSpec, Scenario};
use crate::kernels::{KernelOp, Variant};
use crate::oracle::{AttrReader, AttrValue, Attributes, Oracle};
use crate::storage;
use crate::tensor::{DynTensor, IndexTensor, Tensor, TensorMap};
use crate::verify::{max_abs_error, snr_db, Thresholds};

/// Runs scenarios against an injected backend and oracle.
pub struct Harness<'a> {
    backend: &'a dyn KernelBackend,
    oracle: &'a dyn Oracle,
    dump_dir: Option<PathBuf>,
}

impl<'a> Harness<'a> {
    pub fn new(backend: &'a dyn KernelBackend, oracle: &'a dyn Oracle) -> Self {
        Self {
            backend,
            oracle,
            dump_dir: None,
        }
    }

    /// Also write the reference and every variant output as binaries into `dir`.
    #[must_use]
    pub fn with_dump(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Run one scenario.
    ///
    /// Variants the backend does not support, missing artifact files and
    /// kernel errors become rows; only scenario-level problems abort.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for an unknown op, a bad input source or a bad
    /// variant tag; any error the oracle reports.
    pub fn run(&self, scenario: &Scenario) -> Result<Report> {
        let op: KernelOp = scenario.op.parse()?;
        debug!(scenario = %scenario.name, %op, "materializing inputs");
        let inputs = materialize_inputs(scenario)?;

        let (onnx_op, onnx_inputs, onnx_attrs) = onnx_call(op, &inputs, &scenario.attributes)?;
        debug!(oracle = self.oracle.name(), onnx_op, "evaluating reference");
        let mut reference = self.oracle.evaluate(onnx_op, &onnx_inputs, &onnx_attrs)?;
        align_reference(op, &inputs, &mut reference)?;
        if let Some(dir) = &self.dump_dir {
            dump(dir, &scenario.name, "reference", op, &reference)?;
        }

        let mut report = Report {
            scenario: scenario.name.clone(),
            op: op.name().to_string(),
            oracle: self.oracle.name().to_string(),
            backend: self.backend.name().to_string(),
            rows: Vec::new(),
        };

        if let Some(dir) = &scenario.artifacts_dir {
            let expected = reference
                .first()
                .ok_or_else(|| KernelError::config(op.name(), "oracle returned no outputs"))?
                .to_f32();
            let tags: Vec<String> = if scenario.variants.is_empty() {
                op.variants().iter().map(|v| v.tag()).collect()
            } else {
                scenario.variants.clone()
            };
            let file_report = compare_artifacts(
                expected.data(),
                &scenario.resolve(dir),
                &scenario.name,
                &tags,
                scenario.thresholds,
            );
            report.rows = file_report.rows;
            return Ok(report);
        }

        let spec = OpSpec {
            op,
            attributes: scenario.attributes.clone(),
        };
        for variant in requested_variants(op, scenario)? {
            let tag = variant.tag();
            if !self.backend.supports(op, variant) {
                warn!(%op, variant = %tag, backend = self.backend.name(), "variant not available, skipping");
                report.rows.push(Row::skipped(tag, "not available"));
                continue;
            }
            debug!(%op, variant = %tag, "executing");
            match self.backend.execute(&spec, variant, &inputs) {
                Ok(outputs) => {
                    if let Some(dir) = &self.dump_dir {
                        dump(dir, &scenario.name, &tag, op, &outputs)?;
                    }
                    report.rows.extend(compare_outputs(op, &tag, &reference, &outputs, scenario.thresholds));
                }
                Err(e) => {
                    warn!(%op, variant = %tag, error = %e, "kernel failed");
                    report.rows.push(Row::failed(tag, e.to_string()));
                }
            }
        }
        for row in &report.rows {
            info!(implementation = %row.implementation, verdict = %row.verdict, max_abs_error = ?row.max_abs_error, "result");
        }
        Ok(report)
    }
}

fn requested_variants(op: KernelOp, scenario: &Scenario) -> Result<Vec<Variant>> {
    if scenario.variants.is_empty() {
        return Ok(op.variants());
    }
    scenario.variants.iter().map(|t| t.parse()).collect()
}

/// Compare `reference` with `<dir>/<name>_<variant>.bin` for every tag.
///
/// Absent files become skipped rows; unreadable or wrongly sized files fail
/// their row.
pub fn compare_artifacts(
    reference: &[f32],
    dir: &Path,
    name: &str,
    variants: &[String],
    thresholds: Thresholds,
) -> Report {
    let mut rows = Vec::with_capacity(variants.len());
    for tag in variants {
        let path = dir.join(format!("{name}_{tag}.bin"));
        let row = match storage::read_f32(&path, Some(reference.len())) {
            Ok(test) => metric_row(tag.clone(), reference, &test, thresholds),
            Err(KernelError::MissingResource { path }) => {
                warn!(path = %path.display(), "artifact missing, skipping");
                Row::skipped(tag.clone(), format!("missing {}", path.display()))
            }
            Err(e) => Row::failed(tag.clone(), e.to_string()),
        };
        info!(implementation = %row.implementation, verdict = %row.verdict, "result");
        rows.push(row);
    }
    Report {
        scenario: name.to_string(),
        op: "-".to_string(),
        oracle: "file".to_string(),
        backend: "file".to_string(),
        rows,
    }
}

fn metric_row(implementation: String, reference: &[f32], test: &[f32], thresholds: Thresholds) -> Row {
    match (max_abs_error(reference, test), snr_db(reference, test)) {
        (Ok(err), Ok(snr)) => Row {
            implementation,
            max_abs_error: Some(err),
            snr_db: Some(snr),
            verdict: thresholds.classify(err),
            note: None,
        },
        (Err(e), _) | (_, Err(e)) => Row::failed(implementation, e.to_string()),
    }
}

fn compare_outputs(
    op: KernelOp,
    tag: &str,
    reference: &[DynTensor],
    outputs: &[DynTensor],
    thresholds: Thresholds,
) -> Vec<Row> {
    let names = output_names(op);
    if outputs.len() != reference.len() {
        return vec![Row::failed(
            tag,
            format!("{} outputs, reference has {}", outputs.len(), reference.len()),
        )];
    }
    reference
        .iter()
        .zip(outputs)
        .enumerate()
        .map(|(i, (r, o))| {
            let label = if outputs.len() > 1 {
                format!("{tag}[{}]", names.get(i).copied().unwrap_or("?"))
            } else {
                tag.to_string()
            };
            if r.shape() != o.shape() {
                return Row::failed(label, format!("shape {:?}, reference {:?}", o.shape(), r.shape()));
            }
            metric_row(label, r.to_f32().data(), o.to_f32().data(), thresholds)
        })
        .collect()
}

fn dump(dir: &Path, name: &str, tag: &str, op: KernelOp, outputs: &[DynTensor]) -> Result<()> {
    let names = output_names(op);
    for (i, out) in outputs.iter().enumerate() {
        let file = if i == 0 {
            format!("{name}_{tag}.bin")
        } else {
            format!("{name}_{}_{tag}.bin", names.get(i).copied().unwrap_or("out"))
        };
        let path = dir.join(file);
        match out {
            DynTensor::F32(t) => storage::write_f32(&path, t.data())?,
            DynTensor::I64(t) => storage::write_i64(&path, t.data())?,
        }
    }
    Ok(())
}

// ── Inputs ─────────────────────────────────────────────────────────────────

/// Build every input tensor, drawing random inputs from one seeded stream
/// in input-name order.
///
/// # Errors
/// `InvalidConfiguration` for a missing or ambiguous source; storage errors
/// for `file` inputs.
pub fn materialize_inputs(scenario: &Scenario) -> Result<TensorMap> {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    scenario
        .inputs
        .iter()
        .map(|(name, spec)| Ok((name.clone(), materialize(scenario, name, spec, &mut rng)?)))
        .collect()
}

fn materialize(scenario: &Scenario, name: &str, spec: &InputSpec, rng: &mut StdRng) -> Result<DynTensor> {
    let what = format!("input {name}");
    if spec.source_count() != 1 {
        return Err(KernelError::config(
            &what,
            "exactly one of values, random, sequence or file is required",
        ));
    }
    let n = spec.numel();
    if let Some(path) = &spec.file {
        let path = scenario.resolve(path);
        return Ok(match spec.dtype {
            DType::F32 => Tensor::from_vec(&spec.shape, storage::read_f32(&path, Some(n))?)?.into(),
            DType::I64 => IndexTensor::from_vec(&spec.shape, storage::read_i64(&path, Some(n))?)?.into(),
        });
    }
    let values: Vec<f64> = if let Some(v) = &spec.values {
        v.clone()
    } else if let Some(s) = spec.sequence {
        (0..n).map(|i| s.start + s.step * i as f64).collect()
    } else if let Some(r) = spec.random {
        if !(r.low.is_finite() && r.high.is_finite() && r.low < r.high) {
            return Err(KernelError::config(&what, format!("empty random range [{}, {})", r.low, r.high)));
        }
        match spec.dtype {
            DType::F32 => (0..n).map(|_| rng.gen_range(r.low..r.high)).collect(),
            DType::I64 => {
                let (lo, hi) = (r.low.ceil() as i64, r.high.ceil() as i64);
                if lo >= hi {
                    return Err(KernelError::config(&what, format!("no integers in [{}, {})", r.low, r.high)));
                }
                (0..n).map(|_| rng.gen_range(lo..hi) as f64).collect()
            }
        }
    } else {
        Vec::new()
    };
    Ok(match spec.dtype {
        DType::F32 => Tensor::from_vec(&spec.shape, values.iter().map(|&v| v as f32).collect())?.into(),
        DType::I64 => IndexTensor::from_vec(&spec.shape, values.iter().map(|&v| v as i64).collect())?.into(),
    })
}

// ── Oracle translation ─────────────────────────────────────────────────────

fn input<'m>(op: KernelOp, inputs: &'m TensorMap, name: &str) -> Result<&'m DynTensor> {
    inputs
        .get(name)
        .ok_or_else(|| KernelError::config(op.name(), format!("missing input '{name}'")))
}

/// Translate a kernel call into the ONNX operator the oracle understands.
///
/// Kernel-only attributes (`tile`, `tiling`) are dropped, symmetric `pads`
/// expand to `[top, left, bottom, right]` and MaxPool gets explicit
/// `kernel_shape` and `strides`.
fn onnx_call(
    op: KernelOp,
    inputs: &TensorMap,
    attrs: &Attributes,
) -> Result<(&'static str, TensorMap, Attributes)> {
    let mut onnx_inputs = inputs.clone();
    let mut onnx_attrs = attrs.clone();
    onnx_attrs.remove("tile");
    onnx_attrs.remove("tiling");
    let reader = AttrReader::new(op.name(), attrs);
    if matches!(
        op,
        KernelOp::Conv2d
            | KernelOp::Conv2dIm2col
            | KernelOp::Conv2d3x3
            | KernelOp::ConvTranspose2d
            | KernelOp::MaxPool2d
    ) {
        let [ph, pw] = reader.usizes("pads", [0, 0])?;
        let (ph, pw) = (ph as i64, pw as i64);
        onnx_attrs.insert("pads".into(), AttrValue::Ints(vec![ph, pw, ph, pw]));
    }

    let name = match op {
        KernelOp::Relu => "Relu",
        KernelOp::LeakyRelu => "LeakyRelu",
        KernelOp::TensorAdd => "Add",
        KernelOp::BiasAdd => {
            let x = input(op, inputs, "X")?;
            let bias = input(op, inputs, "B")?.to_f32();
            let c = bias.numel();
            let shape = if x.shape().len() == 4 { vec![1, c, 1, 1] } else { vec![1, c] };
            onnx_inputs.remove("X");
            onnx_inputs.insert("A".into(), x.clone());
            onnx_inputs.insert("B".into(), bias.reshape(&shape)?.into());
            "Add"
        }
        KernelOp::Softmax => "Softmax",
        KernelOp::BatchNorm => "BatchNormalization",
        KernelOp::MatMul => "Gemm",
        KernelOp::Dense => {
            let x = input(op, inputs, "X")?.to_f32();
            let x = if x.rank() == 1 {
                let n = x.numel();
                x.reshape(&[1, n])?
            } else {
                x
            };
            onnx_inputs.remove("X");
            onnx_inputs.remove("W");
            onnx_inputs.insert("A".into(), x.into());
            onnx_inputs.insert("B".into(), input(op, inputs, "W")?.clone());
            if let Some(b) = inputs.get("B") {
                onnx_inputs.insert("C".into(), b.clone());
            }
            onnx_attrs.insert("transB".into(), AttrValue::Int(1));
            "Gemm"
        }
        KernelOp::Conv2d | KernelOp::Conv2dIm2col | KernelOp::Conv2d3x3 => "Conv",
        KernelOp::ConvTranspose2d => "ConvTranspose",
        KernelOp::MaxPool2d => {
            let [kh, kw] = reader.usizes("kernel_shape", [2, 2])?;
            let [sh, sw] = reader.usizes("strides", [kh, kw])?;
            onnx_attrs.insert("kernel_shape".into(), AttrValue::Ints(vec![kh as i64, kw as i64]));
            onnx_attrs.insert("strides".into(), AttrValue::Ints(vec![sh as i64, sw as i64]));
            "MaxPool"
        }
        KernelOp::GatherElements => "GatherElements",
        KernelOp::ScatterElements => "ScatterElements",
        KernelOp::NmsBoxes => "NonMaxSuppression",
        KernelOp::Nms1d => "LocalMaxSuppression",
    };
    Ok((name, onnx_inputs, onnx_attrs))
}

/// Undo shape changes [`onnx_call`] introduced.
fn align_reference(op: KernelOp, inputs: &TensorMap, reference: &mut [DynTensor]) -> Result<()> {
    if op == KernelOp::Dense && inputs.get("X").is_some_and(|x| x.shape().len() == 1) {
        if let Some(first) = reference.first_mut() {
            let flat = first.to_f32();
            let n = flat.numel();
            *first = flat.reshape(&[n])?.into();
        }
    }
    Ok(())
}
