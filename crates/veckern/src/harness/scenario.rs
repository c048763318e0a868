//! YAML scenario files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::oracle::Attributes;
use crate::verify::Thresholds;

/// One harness run: an operator, its inputs and the variants to check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    /// Kernel op name, e.g. `conv2d` or `max_pool2d`.
    pub op: String,
    /// Seed for every `random` input, drawn in input-name order.
    pub seed: u64,
    pub inputs: BTreeMap<String, InputSpec>,
    pub attributes: Attributes,
    /// Variant tags; empty means every variant the op supports.
    pub variants: Vec<String>,
    pub thresholds: Thresholds,
    /// Compare `<dir>/<name>_<variant>.bin` files instead of running kernels.
    pub artifacts_dir: Option<PathBuf>,
    /// Directory relative paths resolve against; set by [`parse_scenario`].
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Scenario {
    /// Resolve `path` against the scenario's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    #[serde(alias = "float32")]
    F32,
    #[serde(alias = "int64")]
    I64,
}

/// Where an input's elements come from. Exactly one source must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Option<Vec<f64>>,
    pub random: Option<RandomRange>,
    pub sequence: Option<Sequence>,
    /// Headerless binary file holding `shape.product()` elements.
    pub file: Option<PathBuf>,
}

impl InputSpec {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// How many of the four sources are set.
    pub fn source_count(&self) -> usize {
        usize::from(self.values.is_some())
            + usize::from(self.random.is_some())
            + usize::from(self.sequence.is_some())
            + usize::from(self.file.is_some())
    }
}

/// Uniform samples in `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomRange {
    pub low: f64,
    pub high: f64,
}

/// `start, start + step, start + 2 * step, ...`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(default)]
    pub start: f64,
    #[serde(default = "unit_step")]
    pub step: f64,
}

fn unit_step() -> f64 {
    1.0
}

/// Parse a scenario file; relative paths inside it resolve against its directory.
///
/// # Errors
///
/// Returns [`KernelError::Io`](crate::error::KernelError::Io) if the file
/// cannot be read, or [`KernelError::Yaml`](crate::error::KernelError::Yaml)
/// if the YAML is malformed.
pub fn parse_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)?;
    let mut scenario = parse_scenario_str(&content)?;
    scenario.base_dir = path.parent().map(Path::to_path_buf);
    Ok(scenario)
}

/// Parse a scenario from a string.
///
/// # Errors
/// `Yaml` if the text is not a valid scenario.
pub fn parse_scenario_str(yaml: &str) -> Result<Scenario> {
    Ok(serde_yaml::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::AttrValue;

    const EDGE: &str = r"
name: edge_pad1
op: conv2d
inputs:
  X:
    shape: [1, 1, 4, 4]
    sequence: { start: 1 }
  W:
    shape: [1, 1, 3, 3]
    values: [-1, -1, -1, 0, 0, 0, 1, 1, 1]
attributes:
  pads: [1, 1]
variants: [scalar, e32m1]
";

    #[test]
    fn test_parse_edge_scenario() {
        let s = parse_scenario_str(EDGE).unwrap();
        assert_eq!(s.name, "edge_pad1");
        assert_eq!(s.op, "conv2d");
        assert_eq!(s.inputs.len(), 2);
        let x = &s.inputs["X"];
        assert_eq!(x.numel(), 16);
        assert_eq!(x.sequence, Some(Sequence { start: 1.0, step: 1.0 }));
        assert_eq!(x.source_count(), 1);
        assert_eq!(s.inputs["W"].values.as_ref().unwrap().len(), 9);
        assert_eq!(s.attributes["pads"], AttrValue::Ints(vec![1, 1]));
        assert_eq!(s.variants, vec!["scalar", "e32m1"]);
    }

    #[test]
    fn test_defaults_fill_omitted_fields() {
        let s = parse_scenario_str("name: x\nop: relu\n").unwrap();
        assert_eq!(s.seed, 0);
        assert!(s.variants.is_empty());
        assert_eq!(s.thresholds, Thresholds::default());
        assert!(s.artifacts_dir.is_none());
    }

    #[test]
    fn test_dtype_aliases() {
        let s = parse_scenario_str(
            "op: gather_elements\ninputs:\n  indices: { shape: [2], dtype: int64, values: [0, 1] }\n",
        )
        .unwrap();
        assert_eq!(s.inputs["indices"].dtype, DType::I64);
    }

    #[test]
    fn test_partial_thresholds() {
        let s = parse_scenario_str("op: relu\nthresholds: { warn: 0.1 }\n").unwrap();
        assert_eq!(s.thresholds.pass, 1e-5);
        assert_eq!(s.thresholds.warn, 0.1);
    }

    #[test]
    fn test_malformed_yaml_is_yaml_error() {
        let err = parse_scenario_str("inputs: [unclosed").unwrap_err();
        assert!(matches!(err, crate::error::KernelError::Yaml(_)));
    }

    #[test]
    fn test_relative_paths_resolve_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.yaml");
        std::fs::write(&path, "name: s\nop: relu\n").unwrap();
        let s = parse_scenario(&path).unwrap();
        assert_eq!(s.resolve(Path::new("x.bin")), dir.path().join("x.bin"));
        assert_eq!(s.resolve(Path::new("/abs/x.bin")), PathBuf::from("/abs/x.bin"));
    }
}
