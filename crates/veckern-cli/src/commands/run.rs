use std::path::Path;

use tracing::debug;
use veckern::backend::NativeBackend;
use veckern::error::Severity;
use veckern::harness::{parse_scenario, validate_scenario, Harness};
use veckern::oracle::ReferenceOracle;

use super::{emit, OutputFormat};

pub fn run(path: &Path, format: OutputFormat, dump: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = parse_scenario(path)?;
    let violations = validate_scenario(&scenario);
    let errors: Vec<_> = violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        for v in &errors {
            eprintln!("{v}");
        }
        return Err(format!("Scenario has {} validation error(s)", errors.len()).into());
    }
    for v in violations.iter().filter(|v| v.severity == Severity::Warning) {
        eprintln!("{v}");
    }

    let mut harness = Harness::new(&NativeBackend, &ReferenceOracle);
    if let Some(dir) = dump {
        debug!(dir = %dir.display(), "dumping outputs");
        harness = harness.with_dump(dir);
    }
    let report = harness.run(&scenario)?;
    emit(&report, format)
}
