//! Unit tests for the geometry helpers

use egui::{pos2, vec2, Rect};

use crate::geometry::{
    arrow_head, cubic_point, distance_to_segment, flatten, normal, normalized, pull_out, snap,
    Shape,
};

#[test]
fn test_normalized_and_normal() {
    let n = normalized(vec2(3.0, 4.0));
    assert!((n.length() - 1.0).abs() < 1e-6);
    assert_eq!(normalized(vec2(0.0, 0.0)), vec2(0.0, 0.0));

    let perp = normal(vec2(10.0, 0.0));
    assert!((perp.x).abs() < 1e-6);
    assert!((perp.y + 1.0).abs() < 1e-6);
}

#[test]
fn test_snap() {
    assert_eq!(snap(pos2(12.0, 18.0), 10.0), pos2(10.0, 20.0));
    assert_eq!(snap(pos2(12.3, 18.7), 0.0), pos2(12.3, 18.7));
}

#[test]
fn test_cubic_endpoints() {
    let seg = [pos2(0.0, 0.0), pos2(1.0, 2.0), pos2(3.0, 2.0), pos2(4.0, 0.0)];
    assert_eq!(cubic_point(&seg, 0.0), seg[0]);
    assert_eq!(cubic_point(&seg, 1.0), seg[3]);
}

#[test]
fn test_flatten_includes_both_ends() {
    let seg = [pos2(0.0, 0.0), pos2(1.0, 0.0), pos2(2.0, 0.0), pos2(3.0, 0.0)];
    let pts = flatten(&seg, 4);
    assert_eq!(pts.len(), 5);
    assert_eq!(pts[0], seg[0]);
    assert_eq!(pts[4], seg[3]);
}

#[test]
fn test_distance_to_segment() {
    let d = distance_to_segment(pos2(5.0, 3.0), pos2(0.0, 0.0), pos2(10.0, 0.0));
    assert!((d - 3.0).abs() < 1e-6);
    let d = distance_to_segment(pos2(-4.0, 3.0), pos2(0.0, 0.0), pos2(10.0, 0.0));
    assert!((d - 5.0).abs() < 1e-6);
}

#[test]
fn test_shape_contains() {
    let square = Shape::rect(Rect::from_min_max(pos2(-10.0, -10.0), pos2(10.0, 10.0)));
    assert!(square.contains(pos2(0.0, 0.0)));
    assert!(!square.contains(pos2(20.0, 0.0)));

    let disk = Shape::ellipse(pos2(0.0, 0.0), vec2(20.0, 10.0), 64);
    assert!(disk.contains(pos2(15.0, 0.0)));
    assert!(!disk.contains(pos2(0.0, 15.0)));
}

#[test]
fn test_pull_out_lands_on_outline() {
    let disk = Shape::ellipse(pos2(50.0, 50.0), vec2(20.0, 20.0), 64);
    let p = pull_out(&disk, pos2(50.0, 50.0), vec2(1.0, 1.0));
    assert!(disk.distance_to_boundary(p) < 1e-3);
    assert!(p.x > 50.0 && p.y > 50.0);
}

#[test]
fn test_pull_out_misses_returns_origin() {
    let square = Shape::rect(Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0)));
    let from = pos2(20.0, 20.0);
    assert_eq!(pull_out(&square, from, vec2(1.0, 0.0)), from);
}

#[test]
fn test_arrow_head_points_back() {
    let head = arrow_head(pos2(10.0, 0.0), vec2(1.0, 0.0), 8.0, 3.0);
    assert_eq!(head[0], pos2(10.0, 0.0));
    assert!((head[1].x - 2.0).abs() < 1e-6);
    assert!((head[2].x - 2.0).abs() < 1e-6);
}
