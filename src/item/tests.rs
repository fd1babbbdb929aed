//! Unit tests for drawing items

use egui::{pos2, vec2, Pos2};

use crate::config::EngineConfig;
use crate::fsm::TransKey;
use crate::item::edge::{self, EdgeItem, EditMode};
use crate::item::node::{self, NodeItem};
use crate::item::{Dirty, ElementRef, Item};
use crate::style::NodeFlags;

fn node_at(origin: Pos2, flags: NodeFlags) -> Item {
    let config = EngineConfig::default();
    Item::node(
        NodeItem::new(1, flags),
        origin,
        node::default_base(config.default_radius()),
        &config,
    )
}

fn line_edge() -> Item {
    Item::edge(
        EdgeItem::new(TransKey::new(1, 1, 2), EditMode::Line),
        pos2(0.0, 0.0),
        edge::default_straight(pos2(90.0, 0.0), 10.0),
    )
}

fn free_edge_two_segments() -> Item {
    let mut base = edge::default_straight(pos2(90.0, 0.0), 10.0);
    assert!(edge::split_segment(&mut base, EditMode::Free, 0, pos2(45.0, 30.0)));
    Item::edge(
        EdgeItem::new(TransKey::new(1, 1, 2), EditMode::Free),
        Pos2::ZERO,
        base,
    )
}

// ============================================================================
// NODE BASE POINTS
// ============================================================================

#[test]
fn test_node_sanitize_fills_short_list() {
    let base = node::sanitize(vec![pos2(3.0, 4.0)], vec2(20.0, 20.0), 5.0);
    assert_eq!(base.len(), node::BASE_POINTS);
    assert_eq!(base[node::CENTER], Pos2::ZERO);
    assert_eq!(node::radius(&base), vec2(20.0, 20.0));
}

#[test]
fn test_node_radius_is_clamped() {
    let base = node::sanitize(
        vec![Pos2::ZERO, pos2(1.0, -2.0), pos2(-40.0, 0.0), pos2(-20.0, 0.0)],
        vec2(20.0, 20.0),
        5.0,
    );
    assert_eq!(node::radius(&base), vec2(5.0, 5.0));
}

#[test]
fn test_move_corner_keeps_opposite_corner() {
    let mut base = node::default_base(vec2(20.0, 20.0));
    // drag bottom-right corner from (20,20) to (40,30); top-left stays at (-20,-20)
    let shift = node::move_corner(&mut base, 2, pos2(40.0, 30.0), 5.0);
    assert_eq!(node::radius(&base), vec2(30.0, 25.0));
    assert_eq!(shift, vec2(10.0, 5.0));
    let ctrls = node::ctrls_from_base(&base);
    assert_eq!(ctrls[0] + shift, pos2(-20.0, -20.0));
}

#[test]
fn test_node_handles_and_mobility() {
    let plain = node_at(pos2(100.0, 100.0), NodeFlags::default());
    assert_eq!(plain.handles().len(), 6);
    assert!(!plain.is_fixed(0));
    assert!(plain.is_fixed(node::HANDLE_INIT_SOURCE));
    assert!(plain.is_fixed(node::HANDLE_INIT_TIP));

    let initial = node_at(
        pos2(100.0, 100.0),
        NodeFlags {
            initial: true,
            marked: false,
        },
    );
    assert!(!initial.is_fixed(node::HANDLE_INIT_SOURCE));
    assert!(initial.is_fixed(node::HANDLE_INIT_TIP));
}

#[test]
fn test_node_corner_drag_moves_origin() {
    let config = EngineConfig::default();
    let mut item = node_at(pos2(100.0, 100.0), NodeFlags::default());
    assert!(item.begin_handle_edit(2));
    assert!(item.update_handle_edit(pos2(140.0, 140.0), &config));
    assert_eq!(item.origin(), pos2(110.0, 110.0));
    assert_eq!(node::radius(item.base()), vec2(30.0, 30.0));
    assert_eq!(item.dirty(), Dirty::Full);
    assert!(item.end_handle_edit());
    assert!(!item.is_editing());
}

// ============================================================================
// DRAG PROTOCOL
// ============================================================================

#[test]
fn test_begin_refuses_fixed_handle() {
    let mut item = line_edge();
    assert!(!item.begin_handle_edit(edge::SOURCE));
    assert!(!item.begin_handle_edit(99));
    assert!(!item.is_editing());
}

#[test]
fn test_begin_refuses_second_drag() {
    let mut item = line_edge();
    assert!(item.begin_handle_edit(edge::ROOT));
    assert!(!item.begin_handle_edit(edge::LABEL));
    assert_eq!(item.drag_handle(), Some(edge::ROOT));
}

#[test]
fn test_update_without_begin_is_ignored() {
    let config = EngineConfig::default();
    let mut item = line_edge();
    let before = item.base().to_vec();
    assert!(!item.update_handle_edit(pos2(5.0, 5.0), &config));
    assert_eq!(item.base(), &before[..]);
}

#[test]
fn test_cancel_restores_geometry() {
    let config = EngineConfig::default();
    let mut item = free_edge_two_segments();
    let before = item.base().to_vec();
    assert!(item.begin_handle_edit(edge::knot(1)));
    item.update_handle_edit(pos2(45.0, 80.0), &config);
    assert_ne!(item.base(), &before[..]);
    item.cancel_handle_edit();
    assert_eq!(item.base(), &before[..]);
    assert!(!item.is_editing());
}

#[test]
fn test_end_reports_unchanged_drag() {
    let mut item = free_edge_two_segments();
    assert!(item.begin_handle_edit(edge::knot(1)));
    assert!(!item.end_handle_edit());
}

#[test]
fn test_update_snaps_to_grid() {
    let mut config = EngineConfig::default();
    config.grid_pitch = 10.0;
    let mut item = free_edge_two_segments();
    assert!(item.begin_handle_edit(edge::knot(1)));
    item.update_handle_edit(pos2(47.0, 62.0), &config);
    assert_eq!(item.base()[edge::knot(1)], pos2(50.0, 60.0));
}

#[test]
fn test_label_drag_stores_offset() {
    let config = EngineConfig::default();
    let mut item = line_edge();
    assert!(item.begin_handle_edit(edge::LABEL));
    item.update_handle_edit(pos2(45.0, -25.0), &config);
    // midpoint of the straight edge is (45, 0)
    assert_eq!(item.base()[edge::LABEL], pos2(0.0, -25.0));
    assert_eq!(item.handles()[edge::LABEL], pos2(45.0, -25.0));
}

// ============================================================================
// HIT TESTING
// ============================================================================

#[test]
fn test_hit_handle_requires_selection() {
    let mut item = line_edge();
    assert_eq!(item.hit_handle(pos2(30.0, 0.0), 0, usize::MAX, 5.0), None);
    item.set_selected(true);
    assert_eq!(item.hit_handle(pos2(31.0, 1.0), 0, usize::MAX, 5.0), Some(3));
}

#[test]
fn test_hit_handle_prefers_movable_neighbor() {
    let mut item = line_edge();
    item.set_selected(true);
    // source center (fixed) and root (movable) coincide at the origin
    assert_eq!(item.hit_handle(Pos2::ZERO, 0, usize::MAX, 5.0), Some(edge::ROOT));
}

#[test]
fn test_hit_handle_respects_range() {
    let mut item = line_edge();
    item.set_selected(true);
    assert_eq!(item.hit_handle(pos2(30.0, 0.0), 4, 6, 5.0), None);
}

#[test]
fn test_hit_segment() {
    let item = free_edge_two_segments();
    assert_eq!(item.hit_segment(pos2(80.0, 8.0), 0, usize::MAX, 10.0), Some(1));
    assert_eq!(item.hit_segment(pos2(80.0, 200.0), 0, usize::MAX, 10.0), None);
}

// ============================================================================
// MODE PROPAGATION
// ============================================================================

fn two_segments(mode: EditMode) -> Vec<Pos2> {
    let mut base = edge::default_straight(pos2(90.0, 0.0), 10.0);
    assert!(edge::split_segment(&mut base, EditMode::Free, 0, pos2(45.0, 30.0)));
    edge::enter_mode(&mut base, mode);
    base
}

fn assert_near(a: Pos2, b: Pos2) {
    assert!(a.distance(b) < 1e-4, "{:?} != {:?}", a, b);
}

#[test]
fn test_polygon_knot_drag_straightens_neighbors() {
    let mut base = two_segments(EditMode::Polygon);
    let k = edge::knot(1);
    assert!(edge::move_handle(&mut base, EditMode::Polygon, k, pos2(40.0, -20.0), 0.5));
    assert_eq!(base[k], pos2(40.0, -20.0));
    for j in 0..2 {
        let s = base[edge::knot(j)];
        let e = base[edge::knot(j + 1)];
        assert_near(base[edge::knot(j) + 1], s + (e - s) / 3.0);
        assert_near(base[edge::knot(j) + 2], s + (e - s) * (2.0 / 3.0));
    }
}

#[test]
fn test_smoothed_control_drag_mirrors_direction() {
    let mut base = two_segments(EditMode::Smoothed);
    let k = edge::knot(1);
    let opposite_len = (base[k - 1] - base[k]).length();
    assert!(edge::move_handle(&mut base, EditMode::Smoothed, k + 1, pos2(80.0, 60.0), 0.5));
    assert_eq!(base[k + 1], pos2(80.0, 60.0));
    let out = base[k + 1] - base[k];
    let back = base[k - 1] - base[k];
    assert!((out.x * back.y - out.y * back.x).abs() < 1e-3 * out.length() * back.length());
    assert!(out.x * back.x + out.y * back.y < 0.0);
    assert!((back.length() - opposite_len).abs() < 1e-3);
}

#[test]
fn test_smoothed_knot_drag_carries_controls() {
    let mut base = two_segments(EditMode::Smoothed);
    let before = base.clone();
    let k = edge::knot(1);
    let delta = vec2(5.0, -12.0);
    assert!(edge::move_handle(&mut base, EditMode::Smoothed, k, before[k] + delta, 0.5));
    assert_near(base[k - 1], before[k - 1] + delta);
    assert_near(base[k + 1], before[k + 1] + delta);
    assert_eq!(base[edge::ROOT], before[edge::ROOT]);
}

#[test]
fn test_spline_knot_drag_reinterpolates() {
    let mut base = two_segments(EditMode::Spline);
    let before = base.clone();
    let k = edge::knot(1);
    assert!(edge::move_handle(&mut base, EditMode::Spline, k, pos2(45.0, 60.0), 0.5));

    let mut expected = before.clone();
    expected[k] = pos2(45.0, 60.0);
    edge::reinterpolate(&mut expected);
    assert_eq!(base, expected);
    assert_ne!(base[k - 1], before[k - 1]);
    assert_ne!(base[k + 1], before[k + 1]);
}

#[test]
fn test_fixed_handles_refuse_drag() {
    let cases = [
        (EditMode::Polygon, 3),
        (EditMode::Polygon, 4),
        (EditMode::Spline, 4),
        (EditMode::Spline, 6),
        (EditMode::Muted, edge::LABEL),
        (EditMode::Free, edge::SOURCE),
        (EditMode::Smoothed, 9),
    ];
    for (mode, index) in cases {
        let mut base = two_segments(mode);
        let before = base.clone();
        assert!(
            !edge::move_handle(&mut base, mode, index, pos2(1.0, 2.0), 0.5),
            "{:?} handle {}",
            mode,
            index
        );
        assert_eq!(base, before);
    }
    let mut line = edge::default_straight(pos2(90.0, 0.0), 10.0);
    assert!(!edge::move_handle(&mut line, EditMode::Line, 3, pos2(1.0, 2.0), 0.5));
    let mut spline = two_segments(EditMode::Spline);
    assert!(edge::move_handle(&mut spline, EditMode::Spline, 3, pos2(10.0, 20.0), 0.5));
}

// ============================================================================
// STRUCTURAL EDITS
// ============================================================================

#[test]
fn test_insert_and_delete_handle() {
    let mut item = free_edge_two_segments();
    assert_eq!(edge::segment_count(item.base().len()), 2);
    assert!(item.insert_handle(0, pos2(20.0, 20.0)));
    assert_eq!(edge::segment_count(item.base().len()), 3);
    assert!(item.delete_handle(edge::knot(1)));
    assert_eq!(edge::segment_count(item.base().len()), 2);
    assert!(!item.delete_handle(edge::ROOT));
}

#[test]
fn test_insert_refused_in_line_mode() {
    let mut item = line_edge();
    assert!(!item.insert_handle(0, pos2(45.0, 5.0)));
    assert_eq!(item.base().len(), edge::MIN_POINTS);
}

#[test]
fn test_set_mode_line_collapses() {
    let mut item = free_edge_two_segments();
    assert!(item.set_mode(EditMode::Line));
    assert_eq!(item.base().len(), edge::MIN_POINTS);
    assert_eq!(item.as_edge().map(|e| e.mode), Some(EditMode::Line));
}

#[test]
fn test_set_mode_on_node_is_refused() {
    let mut item = node_at(Pos2::ZERO, NodeFlags::default());
    assert!(!item.set_mode(EditMode::Spline));
}

#[test]
fn test_translate_marks_full() {
    let mut item = node_at(Pos2::ZERO, NodeFlags::default());
    item.take_dirty();
    item.translate(vec2(5.0, -5.0));
    assert_eq!(item.origin(), pos2(5.0, -5.0));
    assert_eq!(item.take_dirty(), Dirty::Full);
    assert_eq!(item.dirty(), Dirty::Clean);
}

#[test]
fn test_element_ref() {
    assert_eq!(node_at(Pos2::ZERO, NodeFlags::default()).element(), ElementRef::State(1));
    assert_eq!(
        line_edge().element(),
        ElementRef::Transition(TransKey::new(1, 1, 2))
    );
}
