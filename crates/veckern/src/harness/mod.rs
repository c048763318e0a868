//! Scenario-driven verification.
//!
//! A [`Scenario`] names an op, its inputs and the variants to check. The
//! [`Harness`] evaluates the oracle once, runs each variant through the
//! injected backend and turns every output into a [`Row`] of the [`Report`].

pub mod report;
pub mod runner;
pub mod scenario;
pub mod validator;

pub use report::{Report, Row};
pub use runner::{compare_artifacts, materialize_inputs, Harness};
pub use scenario::{parse_scenario, parse_scenario_str, DType, InputSpec, RandomRange, Scenario, Sequence};
pub use validator::validate_scenario;
