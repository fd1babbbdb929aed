//! Node Item
//! A state drawn as an outline around its center, with an optional initial-state arrow
//!
//! Base points: `[center (0,0), radius corner, initial-arrow source, initial-arrow tip]`.
//! Handles: four corners (top-left, top-right, bottom-right, bottom-left), then the
//! initial-arrow source and tip.

use egui::{Pos2, Vec2};

use crate::fsm::StateId;
use crate::style::NodeFlags;

pub const CENTER: usize = 0;
pub const RADIUS: usize = 1;
pub const INIT_SOURCE: usize = 2;
pub const INIT_TIP: usize = 3;
pub const BASE_POINTS: usize = 4;

/// Handle index of the initial-arrow source.
pub const HANDLE_INIT_SOURCE: usize = 4;
/// Handle index of the initial-arrow tip (derived from the outline, never dragged).
pub const HANDLE_INIT_TIP: usize = 5;

const CORNER_SIGNS: [Vec2; 4] = [
    Vec2::new(-1.0, -1.0),
    Vec2::new(1.0, -1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(-1.0, 1.0),
];

/// Variant data of a node item.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeItem {
    pub state: StateId,
    pub flags: NodeFlags,
}

impl NodeItem {
    pub fn new(state: StateId, flags: NodeFlags) -> Self {
        Self { state, flags }
    }
}

pub fn default_base(radius: Vec2) -> Vec<Pos2> {
    vec![
        Pos2::ZERO,
        radius.to_pos2(),
        Pos2::new(-2.5 * radius.x, 0.0),
        Pos2::new(-radius.x, 0.0),
    ]
}

pub fn clamp_radius(radius: Vec2, min: f32) -> Vec2 {
    Vec2::new(radius.x.abs().max(min), radius.y.abs().max(min))
}

pub fn radius(base: &[Pos2]) -> Vec2 {
    base.get(RADIUS).map_or(Vec2::ZERO, |r| r.to_vec2().abs())
}

/// Fill a short or degenerate base list from the defaults.
pub fn sanitize(mut points: Vec<Pos2>, default_radius: Vec2, min: f32) -> Vec<Pos2> {
    let defaults = default_base(default_radius);
    points.truncate(BASE_POINTS);
    if points.len() < BASE_POINTS {
        points.extend_from_slice(&defaults[points.len()..]);
    }
    points[CENTER] = Pos2::ZERO;
    points[RADIUS] = clamp_radius(points[RADIUS].to_vec2(), min).to_pos2();
    points
}

pub fn ctrls_from_base(base: &[Pos2]) -> Vec<Pos2> {
    if base.len() < BASE_POINTS {
        return Vec::new();
    }
    let c = base[CENTER];
    let r = radius(base);
    let mut ctrls: Vec<Pos2> = CORNER_SIGNS.iter().map(|s| c + *s * r).collect();
    ctrls.push(base[INIT_SOURCE]);
    ctrls.push(base[INIT_TIP]);
    ctrls
}

pub fn is_fixed(flags: NodeFlags, index: usize) -> bool {
    match index {
        0..=3 => false,
        HANDLE_INIT_SOURCE => !flags.initial,
        _ => true,
    }
}

pub fn is_corner(index: usize) -> bool {
    index < 4
}

/// Drag corner `corner` to the local point `to`, keeping the diagonal corner in place.
///
/// Updates the radius and returns the shift of the center; the caller moves the origin by it
/// so the center stays at the local origin.
pub fn move_corner(base: &mut [Pos2], corner: usize, to: Pos2, min: f32) -> Vec2 {
    let ctrls = ctrls_from_base(base);
    let opposite = ctrls[(corner + 2) % 4];
    let span = to - opposite;
    let r = clamp_radius(span / 2.0, min);
    let natural = CORNER_SIGNS[corner];
    let sign = Vec2::new(
        if span.x != 0.0 { span.x.signum() } else { natural.x },
        if span.y != 0.0 { span.y.signum() } else { natural.y },
    );
    let center = opposite + sign * r;
    base[RADIUS] = r.to_pos2();
    center - base[CENTER]
}

/// Apply a new radius, e.g. one broadcast from another selected node.
pub fn set_radius(base: &mut [Pos2], r: Vec2, min: f32) {
    if let Some(slot) = base.get_mut(RADIUS) {
        *slot = clamp_radius(r, min).to_pos2();
    }
}
