//! Non-max suppression: greedy box selection and 1D local maxima.
//!
//! Box NMS runs independently per `(batch, class)`: candidates scoring at
//! least `score_threshold` are ordered by descending score (ties by ascending
//! box index), then the best unsuppressed candidate is selected and every
//! later candidate overlapping it with IoU above `iou_threshold` is
//! suppressed. Boxes with non-positive area have IoU 0 with everything.
//!
//! The caller owns an [`NmsWorkspace`] holding the per-class buffers, so a
//! warmed-up workspace makes repeated calls allocation free.

use serde::{Deserialize, Serialize};

use super::lanes::{strips, Lanes};
use super::{ensure_shape, ensure_variant, KernelOp, Variant};
use crate::error::{KernelError, Result};
use crate::tensor::{IndexTensor, Tensor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsParams {
    /// Selections per `(batch, class)`; 0 selects nothing.
    pub max_output_boxes_per_class: usize,
    pub iou_threshold: f32,
    pub score_threshold: f32,
    /// Boxes are `[xc, yc, w, h]` instead of corners `[y1, x1, y2, x2]`.
    pub center_point_box: bool,
}

impl NmsParams {
    pub fn new(max_output_boxes_per_class: usize, iou_threshold: f32, score_threshold: f32) -> Self {
        Self {
            max_output_boxes_per_class,
            iou_threshold,
            score_threshold,
            center_point_box: false,
        }
    }
}

/// One selected box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectedIndex {
    pub batch: usize,
    pub class: usize,
    pub box_index: usize,
}

/// Selections as the `[k, 3]` i64 tensor `(batch, class, box_index)`.
///
/// # Errors
///
/// `InvalidConfiguration` if a position does not fit in an `i64`.
pub fn selected_to_tensor(selected: &[SelectedIndex]) -> Result<IndexTensor> {
    let op = KernelOp::NmsBoxes.name();
    let as_i64 = |v: usize| {
        i64::try_from(v).map_err(|_| KernelError::config(op, format!("position {v} overflows i64")))
    };
    let mut data = Vec::with_capacity(selected.len() * 3);
    for s in selected {
        data.extend([as_i64(s.batch)?, as_i64(s.class)?, as_i64(s.box_index)?]);
    }
    IndexTensor::from_vec(&[selected.len(), 3], data)
}

/// Caller-owned scratch for [`nms_boxes`].
///
/// Corner coordinates are kept per box of the current batch item; the
/// sorted candidates of the current class are kept in struct-of-arrays form.
#[derive(Debug, Default, Clone)]
pub struct NmsWorkspace {
    corners: Vec<[f32; 4]>,
    order: Vec<usize>,
    suppressed: Vec<bool>,
    y1: Vec<f32>,
    x1: Vec<f32>,
    y2: Vec<f32>,
    x2: Vec<f32>,
    area: Vec<f32>,
    selected: Vec<usize>,
}

impl NmsWorkspace {
    /// Workspace sized for `boxes` boxes per batch item.
    pub fn with_capacity(boxes: usize) -> Self {
        Self {
            corners: Vec::with_capacity(boxes),
            order: Vec::with_capacity(boxes),
            suppressed: Vec::with_capacity(boxes),
            y1: Vec::with_capacity(boxes),
            x1: Vec::with_capacity(boxes),
            y2: Vec::with_capacity(boxes),
            x2: Vec::with_capacity(boxes),
            area: Vec::with_capacity(boxes),
            selected: Vec::with_capacity(boxes),
        }
    }

    /// Load the `[M, 4]` boxes of one batch item as normalized corners.
    ///
    /// # Panics
    /// Panics if `boxes.len()` is not a multiple of 4.
    pub fn load_boxes(&mut self, boxes: &[f32], center_point_box: bool) {
        assert_eq!(boxes.len() % 4, 0, "boxes length must be a multiple of 4");
        self.corners.clear();
        for b in boxes.chunks_exact(4) {
            let [a0, a1, a2, a3] = [b[0], b[1], b[2], b[3]];
            let (ya, xa, yb, xb) = if center_point_box {
                // [xc, yc, w, h]
                (a1 - a3 / 2.0, a0 - a2 / 2.0, a1 + a3 / 2.0, a0 + a2 / 2.0)
            } else {
                (a0, a1, a2, a3)
            };
            self.corners.push([ya.min(yb), xa.min(xb), ya.max(yb), xa.max(xb)]);
        }
    }

    /// Box indices selected for the last class, in selection order.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Sort `order` by descending score (ties by index) and lay out the
    /// candidates' corners and areas.
    fn arrange(&mut self, scores: &[f32]) {
        self.order
            .sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let n = self.order.len();
        for buf in [&mut self.y1, &mut self.x1, &mut self.y2, &mut self.x2, &mut self.area] {
            buf.clear();
        }
        for &m in &self.order {
            let [y1, x1, y2, x2] = self.corners[m];
            self.y1.push(y1);
            self.x1.push(x1);
            self.y2.push(y2);
            self.x2.push(x2);
            self.area.push((y2 - y1) * (x2 - x1));
        }
        self.suppressed.clear();
        self.suppressed.resize(n, false);
        self.selected.clear();
    }
}

/// Intersection over union of two normalized boxes given as corners and
/// precomputed areas.
#[inline]
pub fn iou(a: [f32; 4], area_a: f32, b: [f32; 4], area_b: f32) -> f32 {
    let ih = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iw = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ih * iw;
    let union = area_a + area_b - inter;
    if area_a <= 0.0 || area_b <= 0.0 || union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy box suppression over every `(batch, class)`.
///
/// `boxes` is `[B, M, 4]`, `scores` is `[B, K, M]`. `selected` is cleared and
/// receives the selections batch-major, then class-major, then in selection
/// order.
///
/// # Errors
///
/// `ShapeMismatch` for disagreeing shapes; `InvalidConfiguration` for an
/// IoU threshold outside `[0, 1]` or a tiled variant.
pub fn nms_boxes(
    variant: Variant,
    boxes: &Tensor,
    scores: &Tensor,
    params: NmsParams,
    workspace: &mut NmsWorkspace,
    selected: &mut Vec<SelectedIndex>,
) -> Result<()> {
    let op = KernelOp::NmsBoxes;
    ensure_variant(op, variant)?;
    let [batch, num_boxes, four] = dims3(op, "boxes", boxes)?;
    if four != 4 {
        return Err(KernelError::shape(
            op.name(),
            format!("boxes must be [batch, M, 4], got {:?}", boxes.shape()),
        ));
    }
    let [_, classes, _] = dims3(op, "scores", scores)?;
    ensure_shape(op, "scores", scores, &[batch, classes, num_boxes])?;
    if !(0.0..=1.0).contains(&params.iou_threshold) {
        return Err(KernelError::config(
            op.name(),
            format!("iou_threshold {} outside [0, 1]", params.iou_threshold),
        ));
    }

    selected.clear();
    for b in 0..batch {
        workspace.load_boxes(&boxes.data()[b * num_boxes * 4..][..num_boxes * 4], params.center_point_box);
        for class in 0..classes {
            let s = &scores.data()[(b * classes + class) * num_boxes..][..num_boxes];
            match variant.width() {
                None => nms_class_scalar(s, &params, workspace),
                Some(w) => dispatch_width!(w, nms_class_vector(s, &params, workspace)),
            }
            selected.extend(workspace.selected.iter().map(|&box_index| SelectedIndex {
                batch: b,
                class,
                box_index,
            }));
        }
    }
    Ok(())
}

fn dims3(op: KernelOp, what: &str, t: &Tensor) -> Result<[usize; 3]> {
    match *t.shape() {
        [a, b, c] => Ok([a, b, c]),
        _ => Err(KernelError::shape(
            op.name(),
            format!("{what} must be rank 3, got {:?}", t.shape()),
        )),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Select boxes for one class from the boxes loaded in `ws`.
///
/// # Panics
/// Panics if `scores` does not have one entry per loaded box.
pub fn nms_class_scalar(scores: &[f32], params: &NmsParams, ws: &mut NmsWorkspace) {
    assert_eq!(scores.len(), ws.corners.len(), "one score per box");
    ws.order.clear();
    ws.order
        .extend((0..scores.len()).filter(|&m| scores[m] >= params.score_threshold));
    ws.arrange(scores);
    let n = ws.order.len();
    for i in 0..n {
        if ws.selected.len() >= params.max_output_boxes_per_class {
            break;
        }
        if ws.suppressed[i] {
            continue;
        }
        ws.selected.push(ws.order[i]);
        let a = [ws.y1[i], ws.x1[i], ws.y2[i], ws.x2[i]];
        for j in i + 1..n {
            if ws.suppressed[j] {
                continue;
            }
            let b = [ws.y1[j], ws.x1[j], ws.y2[j], ws.x2[j]];
            if iou(a, ws.area[i], b, ws.area[j]) > params.iou_threshold {
                ws.suppressed[j] = true;
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector implementation
// ────────────────────────────────────────────────────────────────────────────

/// Select boxes for one class; the score filter and the IoU sweep after each
/// selection run over `L`-lane strips of candidates.
///
/// # Panics
/// Panics if `scores` does not have one entry per loaded box.
pub fn nms_class_vector<const L: usize>(scores: &[f32], params: &NmsParams, ws: &mut NmsWorkspace) {
    assert_eq!(scores.len(), ws.corners.len(), "one score per box");
    ws.order.clear();
    for s in strips::<L>(scores.len()) {
        let v = Lanes::<L>::load(&scores[s.offset..], s.vl, f32::NEG_INFINITY);
        let keep = v.mask(|x| x >= params.score_threshold);
        for lane in 0..s.vl {
            if keep[lane] {
                ws.order.push(s.offset + lane);
            }
        }
    }
    ws.arrange(scores);
    let n = ws.order.len();
    for i in 0..n {
        if ws.selected.len() >= params.max_output_boxes_per_class {
            break;
        }
        if ws.suppressed[i] {
            continue;
        }
        ws.selected.push(ws.order[i]);
        let (ay1, ax1, ay2, ax2) = (
            Lanes::<L>::splat(ws.y1[i]),
            Lanes::<L>::splat(ws.x1[i]),
            Lanes::<L>::splat(ws.y2[i]),
            Lanes::<L>::splat(ws.x2[i]),
        );
        let area_a = ws.area[i];
        let rest = i + 1;
        for s in strips::<L>(n - rest) {
            let at = rest + s.offset;
            let by1 = Lanes::<L>::load(&ws.y1[at..], s.vl, 0.0);
            let bx1 = Lanes::<L>::load(&ws.x1[at..], s.vl, 0.0);
            let by2 = Lanes::<L>::load(&ws.y2[at..], s.vl, 0.0);
            let bx2 = Lanes::<L>::load(&ws.x2[at..], s.vl, 0.0);
            let area_b = Lanes::<L>::load(&ws.area[at..], s.vl, 0.0);
            let zero = Lanes::<L>::splat(0.0);
            let ih = (ay2.min(by2) - ay1.max(by1)).max(zero);
            let iw = (ax2.min(bx2) - ax1.max(bx1)).max(zero);
            let inter = ih * iw;
            let union = Lanes::splat(area_a) + area_b - inter;
            let ratio = inter / union;
            let mut degenerate = union.mask(|u| u <= 0.0);
            let empty_b = area_b.mask(|b| b <= 0.0);
            for lane in 0..L {
                degenerate[lane] |= empty_b[lane] || area_a <= 0.0;
            }
            let overlap = ratio.merge(degenerate, zero);
            let hit = overlap.mask(|o| o > params.iou_threshold);
            for lane in 0..s.vl {
                if hit[lane] {
                    ws.suppressed[at + lane] = true;
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 1D local-maximum suppression
// ────────────────────────────────────────────────────────────────────────────

/// Zero every element strictly smaller than one of its neighbors.
///
/// Boundary elements compare against their single neighbor; plateaus
/// survive. `output` must be shaped like the rank-1 `input`.
///
/// # Errors
///
/// `ShapeMismatch` unless `input` is rank 1 and `output` matches it;
/// `InvalidConfiguration` for a tiled variant.
pub fn nms_1d(variant: Variant, input: &Tensor, output: &mut Tensor) -> Result<()> {
    let op = KernelOp::Nms1d;
    ensure_variant(op, variant)?;
    if input.rank() != 1 {
        return Err(KernelError::shape(
            op.name(),
            format!("expected a rank-1 score array, got {:?}", input.shape()),
        ));
    }
    ensure_shape(op, "output", output, input.shape())?;
    match variant.width() {
        None => nms_1d_scalar(input.data(), output.data_mut()),
        Some(w) => dispatch_width!(w, nms_1d_vector(input.data(), output.data_mut())),
    }
    Ok(())
}

/// # Panics
/// Panics if `x.len() != y.len()`.
pub fn nms_1d_scalar(x: &[f32], y: &mut [f32]) {
    assert_eq!(x.len(), y.len(), "length mismatch");
    let n = x.len();
    for i in 0..n {
        let below_left = i > 0 && x[i] < x[i - 1];
        let below_right = i + 1 < n && x[i] < x[i + 1];
        y[i] = if below_left || below_right { 0.0 } else { x[i] };
    }
}

/// Neighbors are loaded as shifted windows; positions past either end read
/// `-inf`, which no element is smaller than.
///
/// # Panics
/// Panics if `x.len() != y.len()`.
pub fn nms_1d_vector<const L: usize>(x: &[f32], y: &mut [f32]) {
    assert_eq!(x.len(), y.len(), "length mismatch");
    for s in strips::<L>(x.len()) {
        let v = Lanes::<L>::load(&x[s.offset..], s.vl, 0.0);
        let start = s.offset as isize;
        let (left, _) = Lanes::<L>::load_window(x, start - 1, 1, s.vl, f32::NEG_INFINITY);
        let (right, _) = Lanes::<L>::load_window(x, start + 1, 1, s.vl, f32::NEG_INFINITY);
        let below_left = v.lt(left);
        let below_right = v.lt(right);
        let mut drop = [false; L];
        for i in 0..L {
            drop[i] = below_left[i] || below_right[i];
        }
        v.merge(drop, Lanes::splat(0.0)).store(&mut y[s.offset..], s.vl);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
