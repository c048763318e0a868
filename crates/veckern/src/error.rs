use std::path::PathBuf;

use thiserror::Error;

/// Failure of a kernel call, an oracle evaluation or a harness step.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Shape mismatch in {op}: {detail}")]
    ShapeMismatch { op: String, detail: String },

    #[error("Invalid configuration for {op}: {detail}")]
    InvalidConfiguration { op: String, detail: String },

    #[error("Index out of range in {op}: {index} not in [-{bound}, {bound})")]
    IndexOutOfRange { op: String, index: i64, bound: usize },

    #[error("Missing resource: {}", path.display())]
    MissingResource { path: PathBuf },

    #[error("Unsupported operator: {op}")]
    Unsupported { op: String },

    #[error("Failed to access file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl KernelError {
    pub fn shape(op: &str, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            op: op.to_string(),
            detail: detail.into(),
        }
    }

    pub fn config(op: &str, detail: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            op: op.to_string(),
            detail: detail.into(),
        }
    }

    /// Status code used at the C ABI edge.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            Self::ShapeMismatch { .. } => 1,
            Self::IndexOutOfRange { .. } => 3,
            Self::MissingResource { .. } | Self::Io(_) => 4,
            _ => 2,
        }
    }
}

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct Violation {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        write!(f, "[{prefix}] {}: {}", self.rule, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display_error() {
        let v = Violation {
            severity: Severity::Error,
            rule: "SCN-001".to_string(),
            message: "unknown op".to_string(),
            location: Some("op".to_string()),
        };
        let s = v.to_string();
        assert!(s.contains("[ERROR]"));
        assert!(s.contains("SCN-001"));
        assert!(s.contains("unknown op"));
    }

    #[test]
    fn test_violation_display_warning_and_info() {
        let w = Violation {
            severity: Severity::Warning,
            rule: "SCN-010".to_string(),
            message: "no variants".to_string(),
            location: None,
        };
        assert!(w.to_string().contains("[WARN]"));
        let i = Violation {
            severity: Severity::Info,
            ..w
        };
        assert!(i.to_string().contains("[INFO]"));
    }

    #[test]
    fn test_shape_mismatch_names_op() {
        let err = KernelError::shape("tensor_add", "[4, 4] vs [4, 5]");
        let s = err.to_string();
        assert!(s.contains("Shape mismatch"));
        assert!(s.contains("tensor_add"));
        assert!(s.contains("[4, 5]"));
        assert_eq!(err.status_code(), 1);
    }

    #[test]
    fn test_invalid_configuration_code() {
        let err = KernelError::config("matmul", "tile size must be positive");
        assert!(err.to_string().contains("Invalid configuration"));
        assert_eq!(err.status_code(), 2);
    }

    #[test]
    fn test_index_out_of_range_message() {
        let err = KernelError::IndexOutOfRange {
            op: "gather_elements".to_string(),
            index: 7,
            bound: 3,
        };
        assert!(err.to_string().contains("7 not in [-3, 3)"));
        assert_eq!(err.status_code(), 3);
    }

    #[test]
    fn test_missing_resource_shows_path() {
        let err = KernelError::MissingResource {
            path: PathBuf::from("out/relu_e32m1.bin"),
        };
        assert!(err.to_string().contains("relu_e32m1.bin"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: KernelError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found").into();
        assert!(err.to_string().contains("Failed to access"));
    }
}
