//! Edge Item
//! Transition curves: a chain of cubic Bézier segments between two state nodes
//!
//! Base point layout, `3k + 4` points for `k >= 1` segments:
//!
//! ```text
//! [label offset, source center, root, (ctrl A, ctrl B, knot) * k, target center]
//! ```
//!
//! The source center is the local origin. The knot of the last segment is the tip. Knots live
//! at indices `2 + 3j`, control A of segment `j` at `3 + 3j`, control B at `4 + 3j`. The label
//! base point is an offset from the middle of the curve.

use egui::{Pos2, Vec2};
use serde::{Deserialize, Serialize};

use crate::fsm::TransKey;
use crate::geometry::{
    distance_to_cubic, first_direction, normal, normalized, pull_out, CubicSegment, Shape,
};
use crate::spline;

pub const LABEL: usize = 0;
pub const SOURCE: usize = 1;
pub const ROOT: usize = 2;
/// Base point count of a single-segment edge.
pub const MIN_POINTS: usize = 7;

/// Propagation rule applied when one handle of an edge moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EditMode {
    /// Only the moved handle changes
    #[default]
    Free,
    /// One straight segment
    Line,
    /// Straight segments between knots
    Polygon,
    /// Controls stay collinear through every interior knot
    Smoothed,
    /// Controls derived by global spline interpolation through the knots
    Spline,
    /// Free geometry, label hidden
    Muted,
}

impl EditMode {
    pub const ALL: [EditMode; 6] = [
        EditMode::Free,
        EditMode::Line,
        EditMode::Polygon,
        EditMode::Smoothed,
        EditMode::Spline,
        EditMode::Muted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EditMode::Free => "Free",
            EditMode::Line => "Line",
            EditMode::Polygon => "Polygon",
            EditMode::Smoothed => "Smoothed",
            EditMode::Spline => "Spline",
            EditMode::Muted => "Muted",
        }
    }

    /// Case-insensitive tag lookup.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(tag))
    }

    pub fn hides_label(self) -> bool {
        self == EditMode::Muted
    }
}

impl std::fmt::Display for EditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant data of an edge item.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeItem {
    pub key: TransKey,
    pub mode: EditMode,
}

impl EdgeItem {
    pub fn new(key: TransKey, mode: EditMode) -> Self {
        Self { key, mode }
    }
}

// ============================================================================
// INDEXING
// ============================================================================

pub fn is_valid_len(len: usize) -> bool {
    len >= MIN_POINTS && (len - 4) % 3 == 0
}

pub fn segment_count(len: usize) -> usize {
    len.saturating_sub(4) / 3
}

pub fn tip(len: usize) -> usize {
    len - 2
}

pub fn target(len: usize) -> usize {
    len - 1
}

pub fn knot(j: usize) -> usize {
    2 + 3 * j
}

pub fn is_knot(len: usize, index: usize) -> bool {
    index >= ROOT && index <= tip(len) && (index - ROOT) % 3 == 0
}

pub fn is_interior_knot(len: usize, index: usize) -> bool {
    is_knot(len, index) && index != ROOT && index != tip(len)
}

/// Is handle `index` immovable under `mode`?
pub fn is_fixed(mode: EditMode, len: usize, index: usize) -> bool {
    if !is_valid_len(len) || index >= len {
        return true;
    }
    if index == SOURCE || index == target(len) {
        return true;
    }
    if index == LABEL {
        return mode.hides_label();
    }
    if index == ROOT || index == tip(len) {
        return false;
    }
    if is_knot(len, index) {
        return mode == EditMode::Line;
    }
    match mode {
        EditMode::Free | EditMode::Smoothed | EditMode::Muted => false,
        EditMode::Line | EditMode::Polygon => true,
        EditMode::Spline => !(index == 3 || index == len - 3),
    }
}

// ============================================================================
// DERIVED GEOMETRY
// ============================================================================

pub fn segments(base: &[Pos2]) -> Vec<CubicSegment> {
    if !is_valid_len(base.len()) {
        return Vec::new();
    }
    (0..segment_count(base.len()))
        .map(|j| {
            let s = knot(j);
            [base[s], base[s + 1], base[s + 2], base[s + 3]]
        })
        .collect()
}

pub fn knots(base: &[Pos2]) -> Vec<Pos2> {
    if !is_valid_len(base.len()) {
        return Vec::new();
    }
    (0..=segment_count(base.len())).map(|j| base[knot(j)]).collect()
}

/// Middle of the chain in segment parameter space.
pub fn midpoint(base: &[Pos2]) -> Pos2 {
    let segs = segments(base);
    if segs.is_empty() {
        return base.get(SOURCE).copied().unwrap_or(Pos2::ZERO);
    }
    let half = segs.len() as f32 / 2.0;
    let j = (half.floor() as usize).min(segs.len() - 1);
    crate::geometry::cubic_point(&segs[j], half - j as f32)
}

/// Handles are the base points, except the label handle which sits at `midpoint + offset`.
pub fn ctrls_from_base(base: &[Pos2]) -> Vec<Pos2> {
    let mut ctrls = base.to_vec();
    if let Some(label) = ctrls.get_mut(LABEL) {
        *label = midpoint(base) + base[LABEL].to_vec2();
    }
    ctrls
}

fn chain(label: Pos2, segs: &[CubicSegment], target: Pos2) -> Vec<Pos2> {
    let mut base = Vec::with_capacity(3 * segs.len() + 4);
    base.push(label);
    base.push(Pos2::ZERO);
    if let Some(first) = segs.first() {
        base.push(first[0]);
    }
    for seg in segs {
        base.extend_from_slice(&seg[1..]);
    }
    base.push(target);
    base
}

/// Straight single segment from the source center to `target` (both local).
pub fn default_straight(target: Pos2, label_offset: f32) -> Vec<Pos2> {
    let chord = target.to_vec2();
    let label = (normal(chord) * label_offset).to_pos2();
    let s = Pos2::ZERO;
    vec![
        label,
        s,
        s,
        s + chord / 3.0,
        s + chord * (2.0 / 3.0),
        target,
        target,
    ]
}

/// Loop above a node of the given half-extent, leaving to the upper left and returning from
/// the upper right.
pub fn default_self_loop(radius: Vec2, label_offset: f32) -> Vec<Pos2> {
    let r = radius.x.max(radius.y);
    let knots = [
        Pos2::new(-0.4 * r, -0.9 * r),
        Pos2::new(0.0, -2.6 * r),
        Pos2::new(0.4 * r, -0.9 * r),
    ];
    let segs = spline::interpolate(&knots, Vec2::new(-1.5 * r, -2.1 * r), Vec2::new(-1.5 * r, 2.1 * r));
    chain(Pos2::new(0.0, -label_offset), &segs, Pos2::ZERO)
}

/// Replace a base list that cannot describe an edge by the default for its key.
pub fn sanitize(points: Vec<Pos2>, fallback: impl FnOnce() -> Vec<Pos2>) -> Vec<Pos2> {
    if is_valid_len(points.len()) {
        points
    } else {
        fallback()
    }
}

// ============================================================================
// EDIT MODES
// ============================================================================

/// Controls of every segment at 1/3 and 2/3 of its chord.
pub fn straighten(base: &mut [Pos2]) {
    for j in 0..segment_count(base.len()) {
        let s = base[knot(j)];
        let e = base[knot(j + 1)];
        base[knot(j) + 1] = s + (e - s) / 3.0;
        base[knot(j) + 2] = s + (e - s) * (2.0 / 3.0);
    }
}

fn collapse(base: &mut Vec<Pos2>) {
    let len = base.len();
    if segment_count(len) <= 1 {
        return;
    }
    let root = base[ROOT];
    let tip_point = base[tip(len)];
    *base = vec![
        base[LABEL],
        base[SOURCE],
        root,
        root,
        tip_point,
        tip_point,
        base[target(len)],
    ];
}

fn smooth_knot(base: &mut [Pos2], index: usize) {
    let k = base[index];
    let before = base[index - 1];
    let after = base[index + 1];
    let Some(dir) = first_direction(&[after - before, after - k, k - before]) else {
        return;
    };
    let dir = normalized(dir);
    base[index - 1] = k - dir * (k - before).length();
    base[index + 1] = k + dir * (after - k).length();
}

fn smooth_all(base: &mut [Pos2]) {
    for j in 1..segment_count(base.len()) {
        smooth_knot(base, knot(j));
    }
}

/// Re-derive every control from the knots; the first and last controls give the end tangents.
pub fn reinterpolate(base: &mut [Pos2]) {
    let len = base.len();
    if !is_valid_len(len) {
        return;
    }
    let d0 = (base[ROOT + 1] - base[ROOT]) * 3.0;
    let d1 = (base[tip(len)] - base[len - 3]) * 3.0;
    let segs = spline::interpolate(&knots(base), d0, d1);
    for (j, seg) in segs.iter().enumerate() {
        base[knot(j) + 1] = seg[1];
        base[knot(j) + 2] = seg[2];
    }
}

/// Bring the base points in line with `mode` after switching into it or after a structural
/// change.
pub fn enter_mode(base: &mut Vec<Pos2>, mode: EditMode) {
    if !is_valid_len(base.len()) {
        return;
    }
    match mode {
        EditMode::Line => {
            collapse(base);
            straighten(base);
        }
        EditMode::Polygon => straighten(base),
        EditMode::Smoothed => smooth_all(base),
        EditMode::Spline => reinterpolate(base),
        EditMode::Free | EditMode::Muted => {}
    }
}

/// Re-derive dependent controls without touching knots; used after endpoints were re-synced.
/// `before` is the base as it was before re-anchoring.
pub fn rederive(base: &mut [Pos2], mode: EditMode, before: &[Pos2], spline_threshold: f32) {
    match mode {
        EditMode::Line | EditMode::Polygon => straighten(base),
        EditMode::Spline => follow_endpoints(base, before, spline_threshold),
        EditMode::Smoothed | EditMode::Free | EditMode::Muted => {}
    }
}

/// Carry the boundary controls along with root and tip, then re-interpolate once either end
/// moved by at least `spline_threshold`.
fn follow_endpoints(base: &mut [Pos2], before: &[Pos2], spline_threshold: f32) {
    let len = base.len();
    if before.len() != len {
        reinterpolate(base);
        return;
    }
    let root_delta = base[ROOT] - before[ROOT];
    let tip_delta = base[tip(len)] - before[tip(len)];
    base[ROOT + 1] += root_delta;
    // a control already pulled out of the target outline stays where it was put
    if base[len - 3] == before[len - 3] {
        base[len - 3] += tip_delta;
    }
    if root_delta.length().max(tip_delta.length()) >= spline_threshold {
        reinterpolate(base);
    }
}

fn move_smoothed(base: &mut [Pos2], index: usize, to: Pos2) {
    let len = base.len();
    let delta = to - base[index];
    base[index] = to;
    if is_knot(len, index) {
        if is_interior_knot(len, index) {
            base[index - 1] += delta;
            base[index + 1] += delta;
        }
        return;
    }
    let (pivot, opposite) = if (index - 3) % 3 == 0 {
        (index - 1, index - 2)
    } else {
        (index + 1, index + 2)
    };
    if !is_interior_knot(len, pivot) {
        return;
    }
    let k = base[pivot];
    let dir = normalized(to - k);
    if dir != Vec2::ZERO {
        base[opposite] = k - dir * (base[opposite] - k).length();
    }
}

/// Move handle `index` to the local point `to` and propagate per `mode`.
/// Returns false (and changes nothing) for fixed or out-of-range handles.
pub fn move_handle(
    base: &mut [Pos2],
    mode: EditMode,
    index: usize,
    to: Pos2,
    spline_threshold: f32,
) -> bool {
    let len = base.len();
    if is_fixed(mode, len, index) {
        return false;
    }
    if index == LABEL {
        base[LABEL] = (to - midpoint(base)).to_pos2();
        return true;
    }
    match mode {
        EditMode::Free | EditMode::Muted => base[index] = to,
        EditMode::Line | EditMode::Polygon => {
            base[index] = to;
            straighten(base);
        }
        EditMode::Smoothed => move_smoothed(base, index, to),
        EditMode::Spline => {
            let delta = to - base[index];
            base[index] = to;
            let endpoint = index == ROOT || index == tip(len);
            if index == ROOT {
                base[ROOT + 1] += delta;
            } else if index == tip(len) {
                base[len - 3] += delta;
            }
            if !endpoint || delta.length() >= spline_threshold {
                reinterpolate(base);
            }
        }
    }
    true
}

/// Split segment `segment` at the local point `at`, inserting `[B', at, A']`.
pub fn split_segment(base: &mut Vec<Pos2>, mode: EditMode, segment: usize, at: Pos2) -> bool {
    let len = base.len();
    if !is_valid_len(len) || mode == EditMode::Line || segment >= segment_count(len) {
        return false;
    }
    let s = base[knot(segment)];
    let e = base[knot(segment + 1)];
    let before = at - (at - s) / 3.0;
    let after = at + (e - at) / 3.0;
    let insert_at = knot(segment) + 2;
    base.splice(insert_at..insert_at, [before, at, after]);
    debug_assert!(is_valid_len(base.len()));
    enter_mode(base, mode);
    true
}

/// Merge the two segments meeting at interior knot `index`.
pub fn merge_at_knot(base: &mut Vec<Pos2>, mode: EditMode, index: usize) -> bool {
    let len = base.len();
    if !is_valid_len(len) || mode == EditMode::Line || !is_interior_knot(len, index) {
        return false;
    }
    base.drain(index - 1..=index + 1);
    debug_assert!(is_valid_len(base.len()));
    enter_mode(base, mode);
    true
}

/// Nearest segment within `tolerance` of the local point `p`, restricted to `lo..=hi`.
pub fn hit_segment(base: &[Pos2], p: Pos2, lo: usize, hi: usize, tolerance: f32) -> Option<usize> {
    segments(base)
        .iter()
        .enumerate()
        .filter(|(j, _)| *j >= lo && *j <= hi)
        .map(|(j, seg)| (j, distance_to_cubic(p, seg)))
        .filter(|(_, d)| *d <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(j, _)| j)
}

// ============================================================================
// ANCHORING
// ============================================================================

/// Put the root on the source outline and the tip on the target outline.
///
/// Outlines are in the edge's local frame. With no target outline (pending edge) the tip
/// tracks the target base point.
pub fn fix_root_and_tip(
    base: &mut [Pos2],
    source: &Shape,
    target_outline: Option<&Shape>,
    margin: f32,
) {
    let len = base.len();
    if !is_valid_len(len) {
        return;
    }
    let center = base[SOURCE];
    let goal = base[target(len)];

    let root_dir = first_direction(&[base[ROOT] - center, base[ROOT + 1] - center, goal - center])
        .unwrap_or(Vec2::X);
    base[ROOT] = pull_out(source, center, root_dir);

    let Some(target_shape) = target_outline else {
        base[tip(len)] = goal;
        return;
    };

    let ctrl = len - 3;
    if target_shape.contains(base[ctrl]) {
        let dir = first_direction(&[base[ctrl] - goal, base[ROOT] - goal, center - goal])
            .unwrap_or(Vec2::X);
        base[ctrl] = pull_out(target_shape, goal, dir) + normalized(dir) * margin;
    }
    let tip_dir = first_direction(&[base[ctrl] - goal, base[ROOT] - goal]).unwrap_or(-Vec2::X);
    base[tip(len)] = pull_out(target_shape, goal, tip_dir);
}
