use std::path::Path;

use veckern::harness::compare_artifacts;
use veckern::storage;
use veckern::verify::Thresholds;
use veckern::Variant;

use super::{emit, OutputFormat};

pub fn run(
    reference: &Path,
    dir: &Path,
    name: &str,
    variants: &[String],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let expected = storage::read_f32(reference, None)?;
    let tags: Vec<String> = if variants.is_empty() {
        Variant::UNTILED.iter().map(|v| v.tag()).collect()
    } else {
        // Unknown tags fail before any file is read.
        for tag in variants {
            tag.parse::<Variant>()?;
        }
        variants.to_vec()
    };
    let report = compare_artifacts(&expected, dir, name, &tags, Thresholds::default());
    emit(&report, format)
}
