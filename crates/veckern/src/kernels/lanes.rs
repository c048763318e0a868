//! Portable vector register groups and strip mining.
//!
//! A [`Lanes<L>`] value models one register group of `L` f32 lanes. The
//! vector bodies of every kernel are written once, generic over `L`, and
//! instantiated for each [`Width`](super::Width). Loops walk their data in
//! strips obtained from [`strips`]: every strip is granted
//! `vl = min(remaining, L)` lanes, so the final partial strip runs the same
//! body with fewer active lanes instead of a separate scalar tail.

use std::ops::{Add, Div, Mul, Sub};

/// f32 lanes in one M1 register group (a 128-bit vector register).
pub const BASE_LANES: usize = 4;

/// Number of lanes granted for `remaining` elements when at most `vlmax` fit.
#[inline]
#[must_use]
pub const fn set_vl(remaining: usize, vlmax: usize) -> usize {
    if remaining < vlmax {
        remaining
    } else {
        vlmax
    }
}

/// One strip of a strip-mined loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strip {
    /// Index of the first element covered by this strip.
    pub offset: usize,
    /// Active lanes, `1..=vlmax`.
    pub vl: usize,
}

/// Iterator over the strips covering `0..len`.
#[derive(Debug, Clone)]
pub struct Strips {
    pos: usize,
    len: usize,
    vlmax: usize,
}

impl Iterator for Strips {
    type Item = Strip;

    #[inline]
    fn next(&mut self) -> Option<Strip> {
        if self.pos >= self.len {
            return None;
        }
        let vl = set_vl(self.len - self.pos, self.vlmax);
        let strip = Strip {
            offset: self.pos,
            vl,
        };
        self.pos += vl;
        Some(strip)
    }
}

/// Strips of at most `L` lanes covering `0..len`.
#[inline]
#[must_use]
pub fn strips<const L: usize>(len: usize) -> Strips {
    Strips {
        pos: 0,
        len,
        vlmax: L,
    }
}

/// A register group of `L` f32 lanes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lanes<const L: usize>(pub [f32; L]);

impl<const L: usize> Lanes<L> {
    #[inline]
    #[must_use]
    pub fn splat(v: f32) -> Self {
        Self([v; L])
    }

    /// Load `vl` contiguous elements; inactive lanes hold `fill`.
    #[inline]
    #[must_use]
    pub fn load(src: &[f32], vl: usize, fill: f32) -> Self {
        let mut r = [fill; L];
        r[..vl].copy_from_slice(&src[..vl]);
        Self(r)
    }

    /// Load `vl` elements `stride` apart starting at `src[0]`.
    #[inline]
    #[must_use]
    pub fn load_strided(src: &[f32], stride: usize, vl: usize, fill: f32) -> Self {
        let mut r = [fill; L];
        for (i, lane) in r[..vl].iter_mut().enumerate() {
            *lane = src[i * stride];
        }
        Self(r)
    }

    /// Load lanes `row[start + i * stride]` for `i < vl`, where `start` may
    /// fall outside `row`. Lanes whose position is out of bounds (or `>= vl`)
    /// hold `fill` and are cleared in the returned mask.
    #[inline]
    #[must_use]
    pub fn load_window(
        row: &[f32],
        start: isize,
        stride: usize,
        vl: usize,
        fill: f32,
    ) -> (Self, [bool; L]) {
        let mut r = [fill; L];
        let mut mask = [false; L];
        let mut pos = start;
        for i in 0..vl {
            if let Ok(p) = usize::try_from(pos) {
                if p < row.len() {
                    r[i] = row[p];
                    mask[i] = true;
                }
            }
            pos += stride as isize;
        }
        (Self(r), mask)
    }

    /// Store the first `vl` lanes contiguously.
    #[inline]
    pub fn store(self, dst: &mut [f32], vl: usize) {
        dst[..vl].copy_from_slice(&self.0[..vl]);
    }

    #[inline]
    #[must_use]
    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self(self.0.map(f))
    }

    #[inline]
    #[must_use]
    pub fn zip_map(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut r = self.0;
        for (a, b) in r.iter_mut().zip(other.0) {
            *a = f(*a, b);
        }
        Self(r)
    }

    #[inline]
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        self.zip_map(other, f32::max)
    }

    #[inline]
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        self.zip_map(other, f32::min)
    }

    /// `self * b + c` as two rounded operations (not fused).
    #[inline]
    #[must_use]
    pub fn mul_add(self, b: Self, c: Self) -> Self {
        self * b + c
    }

    /// Lane-wise choice: `on_true[i]` where `mask[i]`, else `self[i]`.
    #[inline]
    #[must_use]
    pub fn merge(self, mask: [bool; L], on_true: Self) -> Self {
        let mut r = self.0;
        for ((dst, m), t) in r.iter_mut().zip(mask).zip(on_true.0) {
            if m {
                *dst = t;
            }
        }
        Self(r)
    }

    /// Lanes where `self[i] > other[i]`.
    #[inline]
    #[must_use]
    pub fn gt(self, other: Self) -> [bool; L] {
        let mut m = [false; L];
        for ((dst, a), b) in m.iter_mut().zip(self.0).zip(other.0) {
            *dst = a > b;
        }
        m
    }

    /// Lanes where `self[i] < other[i]`.
    #[inline]
    #[must_use]
    pub fn lt(self, other: Self) -> [bool; L] {
        other.gt(self)
    }

    /// Indexed load: lane `i` reads `src[offsets[i]]` for `i < offsets.len()`.
    #[inline]
    #[must_use]
    pub fn gather(src: &[f32], offsets: &[usize], fill: f32) -> Self {
        let mut r = [fill; L];
        for (lane, &at) in r.iter_mut().zip(offsets) {
            *lane = src[at];
        }
        Self(r)
    }

    /// Lane-wise predicate.
    #[inline]
    #[must_use]
    pub fn mask(self, f: impl Fn(f32) -> bool) -> [bool; L] {
        self.0.map(f)
    }

    /// Sum of the first `vl` lanes as a pairwise tree.
    #[inline]
    #[must_use]
    pub fn reduce_sum(self, vl: usize) -> f32 {
        let mut buf = self.0;
        for lane in &mut buf[vl..] {
            *lane = 0.0;
        }
        let mut width = L;
        while width > 1 {
            let half = width / 2;
            for i in 0..half {
                buf[i] += buf[i + half];
            }
            width = half;
        }
        buf[0]
    }

    /// Maximum of the first `vl` lanes (`-inf` for `vl == 0`).
    #[inline]
    #[must_use]
    pub fn reduce_max(self, vl: usize) -> f32 {
        self.0[..vl].iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

impl<const L: usize> Add for Lanes<L> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl<const L: usize> Sub for Lanes<L> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl<const L: usize> Mul for Lanes<L> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl<const L: usize> Div for Lanes<L> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a / b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_vl_clamps_to_vlmax() {
        assert_eq!(set_vl(3, 8), 3);
        assert_eq!(set_vl(8, 8), 8);
        assert_eq!(set_vl(100, 16), 16);
        assert_eq!(set_vl(0, 4), 0);
    }

    #[test]
    fn test_strips_cover_every_index_once() {
        for len in 0..70 {
            let mut seen = vec![0u8; len];
            for s in strips::<16>(len) {
                assert!(s.vl >= 1 && s.vl <= 16);
                for i in s.offset..s.offset + s.vl {
                    seen[i] += 1;
                }
            }
            assert!(seen.iter().all(|&c| c == 1), "len={len}");
        }
    }

    #[test]
    fn test_strips_tail_is_narrow() {
        let v: Vec<Strip> = strips::<8>(19).collect();
        assert_eq!(v.len(), 3);
        assert_eq!(v[2], Strip { offset: 16, vl: 3 });
    }

    #[test]
    fn test_partial_load_uses_fill_and_partial_store_leaves_rest() {
        let src = [1.0, 2.0, 3.0];
        let v = Lanes::<4>::load(&src, 3, -7.0);
        assert_eq!(v.0, [1.0, 2.0, 3.0, -7.0]);

        let mut dst = [9.0_f32; 4];
        (v + Lanes::splat(1.0)).store(&mut dst, 2);
        assert_eq!(dst, [2.0, 3.0, 9.0, 9.0]);
    }

    #[test]
    fn test_strided_load_picks_every_stride() {
        let src: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let v = Lanes::<4>::load_strided(&src, 3, 4, 0.0);
        assert_eq!(v.0, [0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_reductions_ignore_inactive_lanes() {
        let v = Lanes::<8>([1.0, 2.0, 3.0, 4.0, 100.0, 100.0, 100.0, 100.0]);
        assert_eq!(v.reduce_sum(4), 10.0);
        assert_eq!(v.reduce_max(4), 4.0);
        assert_eq!(v.reduce_max(0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_window_masks_out_of_bounds_lanes() {
        let row = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (v, m) = Lanes::<8>::load_window(&row, -2, 2, 5, 0.0);
        // positions -2, 0, 2, 4, 6
        assert_eq!(&v.0[..5], &[0.0, 1.0, 3.0, 5.0, 0.0]);
        assert_eq!(m, [false, true, true, true, false, false, false, false]);
    }

    #[test]
    fn test_comparisons_and_gather() {
        let a = Lanes::<4>([1.0, 5.0, 3.0, f32::NAN]);
        let b = Lanes::<4>::splat(3.0);
        assert_eq!(a.gt(b), [false, true, false, false]);
        assert_eq!(a.lt(b), [true, false, false, false]);
        let src = [10.0, 20.0, 30.0];
        let g = Lanes::<4>::gather(&src, &[2, 0], -1.0);
        assert_eq!(g.0, [30.0, 10.0, -1.0, -1.0]);
    }

    #[test]
    fn test_merge_selects_masked_lanes() {
        let a = Lanes::<4>([1.0, 2.0, 3.0, 4.0]);
        let b = Lanes::splat(0.0);
        let m = a.mask(|x| x > 2.0);
        assert_eq!(a.merge(m, b).0, [1.0, 2.0, 0.0, 0.0]);
    }
}
