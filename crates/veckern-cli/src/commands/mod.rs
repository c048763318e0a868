use std::str::FromStr;

use veckern::harness::Report;

pub mod compare;
pub mod run;
pub mod validate;
pub mod variants;

/// How `run` and `compare` print their report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown format '{other}', expected text or json")),
        }
    }
}

/// Print `report` and fail if any row failed.
pub fn emit(report: &Report, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    let failed = report.count(veckern::verify::Verdict::Fail);
    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{failed} of {} row(s) failed", report.rows.len()).into())
    }
}
