use std::path::Path;

use veckern::error::Severity;
use veckern::harness::{parse_scenario, validate_scenario};

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = parse_scenario(path)?;
    let violations = validate_scenario(&scenario);

    let errors = violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .count();
    let warnings = violations
        .iter()
        .filter(|v| v.severity == Severity::Warning)
        .count();

    for v in &violations {
        println!("{v}");
    }

    println!("\n{errors} error(s), {warnings} warning(s)");

    if errors == 0 {
        println!("Scenario is valid.");
        Ok(())
    } else {
        Err(format!("Scenario has {errors} validation error(s)").into())
    }
}
