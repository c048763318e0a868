//! ULP (unit in the last place) distances between variant outputs.
//!
//! Variants whose accumulation order is fixed must agree at 0 ULP; those
//! that regroup a reduction are held to a small ULP budget instead.

/// Number of representable f32 values between `a` and `b`.
///
/// NaN on either side, or a sign change between non-zero values, gives
/// `u32::MAX`. `0.0` and `-0.0` are at distance 0.
#[must_use]
pub fn ulp_distance(a: f32, b: f32) -> u32 {
    if a.is_nan() || b.is_nan() {
        return u32::MAX;
    }
    if a == b {
        return 0;
    }
    let (ia, ib) = (a.to_bits() as i32, b.to_bits() as i32);
    if (ia < 0) != (ib < 0) {
        return u32::MAX;
    }
    ia.abs_diff(ib)
}

/// Largest pairwise ULP distance between two equally long slices.
///
/// # Panics
///
/// Panics if the slices differ in length.
#[must_use]
pub fn max_ulp_distance(a: &[f32], b: &[f32]) -> u32 {
    assert_eq!(a.len(), b.len(), "slice length mismatch");
    a.iter()
        .zip(b)
        .map(|(&x, &y)| ulp_distance(x, y))
        .max()
        .unwrap_or(0)
}

/// Assert that two outputs agree within `max_ulp` at every index.
///
/// # Panics
///
/// Panics on a length mismatch or the first index exceeding the budget.
pub fn assert_ulp_eq(a: &[f32], b: &[f32], max_ulp: u32) {
    assert_eq!(
        a.len(),
        b.len(),
        "slice length mismatch: {} vs {}",
        a.len(),
        b.len()
    );
    for (i, (&va, &vb)) in a.iter().zip(b).enumerate() {
        let dist = ulp_distance(va, vb);
        assert!(
            dist <= max_ulp,
            "ULP violation at index {i}: {va} vs {vb} (distance {dist}, max {max_ulp})"
        );
    }
}
