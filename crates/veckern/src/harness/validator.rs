use crate::backend::input_names;
use crate::error::{Severity, Violation};
use crate::harness::scenario::{DType, Scenario};
use crate::kernels::{KernelOp, Variant};

/// Validate a parsed scenario for completeness and consistency.
///
/// Returns a list of violations. If any violation has
/// [`Severity::Error`], the scenario cannot be run.
pub fn validate_scenario(scenario: &Scenario) -> Vec<Violation> {
    let mut violations = Vec::new();

    if scenario.name.trim().is_empty() {
        violations.push(error("SCN-001", "name must not be empty", "name"));
    }
    let op = match scenario.op.parse::<KernelOp>() {
        Ok(op) => Some(op),
        Err(_) => {
            violations.push(error(
                "SCN-002",
                &format!("unknown op '{}'", scenario.op),
                "op",
            ));
            None
        }
    };
    validate_inputs(scenario, op, &mut violations);
    validate_variants(scenario, op, &mut violations);
    validate_thresholds(scenario, &mut violations);

    violations
}

fn violation(severity: Severity, rule: &str, message: &str, location: &str) -> Violation {
    Violation {
        severity,
        rule: rule.to_string(),
        message: message.to_string(),
        location: Some(location.to_string()),
    }
}

fn error(rule: &str, message: &str, location: &str) -> Violation {
    violation(Severity::Error, rule, message, location)
}

fn validate_inputs(scenario: &Scenario, op: Option<KernelOp>, violations: &mut Vec<Violation>) {
    if scenario.inputs.is_empty() {
        violations.push(error("SCN-003", "inputs must not be empty", "inputs"));
    }

    for (name, spec) in &scenario.inputs {
        let loc = format!("inputs.{name}");
        match spec.source_count() {
            1 => {}
            0 => violations.push(error(
                "SCN-004",
                &format!("{loc} needs one of values, random, sequence or file"),
                &loc,
            )),
            n => violations.push(error(
                "SCN-004",
                &format!("{loc} sets {n} sources; exactly one is allowed"),
                &loc,
            )),
        }
        if let Some(values) = &spec.values {
            if values.len() != spec.numel() {
                violations.push(error(
                    "SCN-005",
                    &format!(
                        "{loc}.values has {} elements but shape {:?} needs {}",
                        values.len(),
                        spec.shape,
                        spec.numel()
                    ),
                    &format!("{loc}.values"),
                ));
            }
            if spec.dtype == DType::I64 && values.iter().any(|v| v.fract() != 0.0) {
                violations.push(error(
                    "SCN-005",
                    &format!("{loc}.values must be integers for dtype i64"),
                    &format!("{loc}.values"),
                ));
            }
        }
        if let Some(r) = &spec.random {
            if !(r.low.is_finite() && r.high.is_finite() && r.low < r.high) {
                violations.push(error(
                    "SCN-006",
                    &format!("{loc}.random needs finite low < high, got [{}, {})", r.low, r.high),
                    &format!("{loc}.random"),
                ));
            }
        }
    }

    let Some(op) = op else { return };
    let (required, optional) = input_names(op);
    for name in required {
        if !scenario.inputs.contains_key(*name) {
            violations.push(error(
                "SCN-007",
                &format!("{op} requires input '{name}'"),
                "inputs",
            ));
        }
    }
    for name in scenario.inputs.keys() {
        if !required.contains(&name.as_str()) && !optional.contains(&name.as_str()) {
            violations.push(violation(
                Severity::Warning,
                "SCN-008",
                &format!("input '{name}' is not used by {op}"),
                &format!("inputs.{name}"),
            ));
        }
    }
    let index_input = matches!(op, KernelOp::GatherElements | KernelOp::ScatterElements);
    if let Some(spec) = scenario.inputs.get("indices") {
        if index_input && spec.dtype != DType::I64 {
            violations.push(error(
                "SCN-009",
                "inputs.indices must have dtype i64",
                "inputs.indices.dtype",
            ));
        }
    }
}

fn validate_variants(scenario: &Scenario, op: Option<KernelOp>, violations: &mut Vec<Violation>) {
    if scenario.variants.is_empty() && scenario.artifacts_dir.is_none() {
        violations.push(violation(
            Severity::Info,
            "SCN-010",
            "no variants listed; every supported variant will run",
            "variants",
        ));
    }
    // File comparisons name variants freely.
    if scenario.artifacts_dir.is_some() {
        return;
    }
    for (i, tag) in scenario.variants.iter().enumerate() {
        let loc = format!("variants[{i}]");
        match tag.parse::<Variant>() {
            Err(_) => violations.push(error("SCN-011", &format!("unknown variant tag '{tag}'"), &loc)),
            Ok(v) => {
                if let Some(op) = op.filter(|op| !op.supports(v)) {
                    violations.push(violation(
                        Severity::Warning,
                        "SCN-012",
                        &format!("{op} has no {v} form; the row will be skipped"),
                        &loc,
                    ));
                }
            }
        }
    }
}

fn validate_thresholds(scenario: &Scenario, violations: &mut Vec<Violation>) {
    let t = scenario.thresholds;
    if !(t.pass > 0.0 && t.pass <= t.warn) {
        violations.push(error(
            "SCN-013",
            &format!("thresholds need 0 < pass <= warn, got pass {} warn {}", t.pass, t.warn),
            "thresholds",
        ));
    }
}
