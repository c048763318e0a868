use std::fmt::Write as _;

use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::verify::Verdict;

/// One implementation compared against the reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Variant tag, suffixed with the output name for multi-output ops.
    pub implementation: String,
    #[serde(serialize_with = "metric")]
    pub max_abs_error: Option<f64>,
    #[serde(serialize_with = "metric")]
    pub snr_db: Option<f64>,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Row {
    pub fn skipped(implementation: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            max_abs_error: None,
            snr_db: None,
            verdict: Verdict::Skipped,
            note: Some(note.into()),
        }
    }

    pub fn failed(implementation: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            ..Self::skipped(implementation, note)
        }
    }
}

/// JSON has no infinity; non-finite metrics become `"inf"` / `"NaN"` strings.
fn metric<S: Serializer>(value: &Option<f64>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        None => s.serialize_none(),
        Some(v) if v.is_finite() => s.serialize_f64(*v),
        Some(v) => s.serialize_str(&v.to_string()),
    }
}

/// Outcome of one scenario or file comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub scenario: String,
    pub op: String,
    pub oracle: String,
    pub backend: String,
    pub rows: Vec<Row>,
}

impl Report {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.rows.iter().filter(|r| r.verdict == verdict).count()
    }

    /// True when no row failed. Skipped rows do not fail a report.
    pub fn passed(&self) -> bool {
        self.count(Verdict::Fail) == 0
    }

    /// Fixed-width text table, one line per row.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Scenario: {} ({}), oracle: {}, backend: {}",
            self.scenario, self.op, self.oracle, self.backend
        );
        let _ = writeln!(out, "{:<30}{:<20}{:<20}{}", "Implementation", "Max Abs Error", "SNR (dB)", "Verdict");
        let _ = writeln!(out, "{}", "-".repeat(78));
        for row in &self.rows {
            let err = row.max_abs_error.map_or_else(|| "-".to_string(), |e| format!("{e:.3e}"));
            let snr = row.snr_db.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"));
            let _ = write!(out, "{:<30}{:<20}{:<20}{}", row.implementation, err, snr, row.verdict);
            if let Some(note) = &row.note {
                let _ = write!(out, "  ({note})");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "\n{} passed, {} warned, {} failed, {} skipped",
            self.count(Verdict::Pass),
            self.count(Verdict::Warn),
            self.count(Verdict::Fail),
            self.count(Verdict::Skipped)
        );
        out
    }

    /// # Errors
    /// `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
