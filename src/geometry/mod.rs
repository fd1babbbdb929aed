//! Geometry Utilities
//! Vector helpers, cubic Bézier evaluation and closed outlines used for anchoring

use egui::{Pos2, Rect, Vec2};

#[cfg(test)]
mod tests;

/// Lengths below this are treated as zero.
pub const EPSILON: f32 = 1e-6;

/// A cubic Bézier segment: start, control A, control B, end.
pub type CubicSegment = [Pos2; 4];

/// Unit vector along `v`, or zero if `v` is degenerate.
pub fn normalized(v: Vec2) -> Vec2 {
    let len = v.length();
    if len < EPSILON {
        Vec2::ZERO
    } else {
        v / len
    }
}

/// Unit normal of `v` (rotated a quarter turn counter-clockwise in screen coordinates).
pub fn normal(v: Vec2) -> Vec2 {
    let n = normalized(v);
    Vec2::new(n.y, -n.x)
}

pub fn dot(a: Vec2, b: Vec2) -> f32 {
    a.x * b.x + a.y * b.y
}

pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// First non-degenerate direction among the candidates.
pub fn first_direction(candidates: &[Vec2]) -> Option<Vec2> {
    candidates.iter().copied().find(|v| v.length() >= EPSILON)
}

/// Snap a point to a square grid. A pitch of zero (or less) disables snapping.
pub fn snap(p: Pos2, pitch: f32) -> Pos2 {
    if pitch <= 0.0 {
        return p;
    }
    Pos2::new((p.x / pitch).round() * pitch, (p.y / pitch).round() * pitch)
}

/// Point on a cubic Bézier segment at parameter `t` in `[0, 1]`.
pub fn cubic_point(seg: &CubicSegment, t: f32) -> Pos2 {
    let u = 1.0 - t;
    let w0 = u * u * u;
    let w1 = 3.0 * u * u * t;
    let w2 = 3.0 * u * t * t;
    let w3 = t * t * t;
    Pos2::new(
        w0 * seg[0].x + w1 * seg[1].x + w2 * seg[2].x + w3 * seg[3].x,
        w0 * seg[0].y + w1 * seg[1].y + w2 * seg[2].y + w3 * seg[3].y,
    )
}

/// Sample a segment into `steps + 1` points, both ends included.
pub fn flatten(seg: &CubicSegment, steps: usize) -> Vec<Pos2> {
    let steps = steps.max(1);
    (0..=steps)
        .map(|i| cubic_point(seg, i as f32 / steps as f32))
        .collect()
}

/// Distance from `p` to the closed segment `a`–`b`.
pub fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let len2 = dot(ab, ab);
    if len2 < EPSILON {
        return p.distance(a);
    }
    let t = (dot(p - a, ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Distance from `p` to an open polyline.
pub fn distance_to_polyline(p: Pos2, pts: &[Pos2]) -> f32 {
    match pts {
        [] => f32::INFINITY,
        [single] => p.distance(*single),
        _ => pts
            .windows(2)
            .map(|w| distance_to_segment(p, w[0], w[1]))
            .fold(f32::INFINITY, f32::min),
    }
}

/// Distance from `p` to a cubic segment, by flattening.
pub fn distance_to_cubic(p: Pos2, seg: &CubicSegment) -> f32 {
    distance_to_polyline(p, &flatten(seg, 24))
}

/// Arrow head triangle with its tip at `tip`, pointing along `dir`.
pub fn arrow_head(tip: Pos2, dir: Vec2, length: f32, half_width: f32) -> [Pos2; 3] {
    let d = normalized(dir);
    let d = if d == Vec2::ZERO { Vec2::new(1.0, 0.0) } else { d };
    let n = Vec2::new(-d.y, d.x);
    let back = tip - d * length;
    [tip, back + n * half_width, back - n * half_width]
}

// ============================================================================
// CLOSED OUTLINES
// ============================================================================

/// A closed polygonal outline. Curved node shapes are stored as dense polygons so that
/// anchoring is exact with respect to what is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    points: Vec<Pos2>,
}

impl Shape {
    pub fn polygon(points: Vec<Pos2>) -> Self {
        Self { points }
    }

    /// Axis-aligned ellipse approximated by `segments` vertices.
    pub fn ellipse(center: Pos2, radii: Vec2, segments: usize) -> Self {
        let segments = segments.max(8);
        let points = (0..segments)
            .map(|i| {
                let a = i as f32 / segments as f32 * std::f32::consts::TAU;
                Pos2::new(center.x + radii.x * a.cos(), center.y + radii.y * a.sin())
            })
            .collect();
        Self { points }
    }

    pub fn rect(rect: Rect) -> Self {
        Self {
            points: vec![
                rect.left_top(),
                rect.right_top(),
                rect.right_bottom(),
                rect.left_bottom(),
            ],
        }
    }

    pub fn points(&self) -> &[Pos2] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.len() < 3
    }

    fn edges(&self) -> impl Iterator<Item = (Pos2, Pos2)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Even-odd point containment.
    pub fn contains(&self, p: Pos2) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn distance_to_boundary(&self, p: Pos2) -> f32 {
        self.edges()
            .map(|(a, b)| distance_to_segment(p, a, b))
            .fold(f32::INFINITY, f32::min)
    }

    pub fn bounding_rect(&self) -> Rect {
        if self.points.is_empty() {
            return Rect::NOTHING;
        }
        Rect::from_points(&self.points)
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            points: self.points.iter().map(|p| *p + offset).collect(),
        }
    }

    /// All ray parameters `t >= 0` where `from + t * dir` crosses the outline.
    fn ray_hits(&self, from: Pos2, dir: Vec2) -> impl Iterator<Item = f32> + '_ {
        self.edges().filter_map(move |(a, b)| {
            let e = b - a;
            let denom = cross(dir, e);
            if denom.abs() < EPSILON {
                return None;
            }
            let ao = a - from;
            let t = cross(ao, e) / denom;
            let s = cross(ao, dir) / denom;
            (t >= 0.0 && (-EPSILON..=1.0 + EPSILON).contains(&s)).then_some(t)
        })
    }
}

/// Pull `from` out of `shape` along `dir`: the outline point with the largest ray parameter.
/// Returns `from` unchanged when the ray never meets the outline.
pub fn pull_out(shape: &Shape, from: Pos2, dir: Vec2) -> Pos2 {
    if shape.is_empty() || dir.length() < EPSILON {
        return from;
    }
    match shape.ray_hits(from, dir).fold(None, |best: Option<f32>, t| {
        Some(best.map_or(t, |b| b.max(t)))
    }) {
        Some(t) => from + dir * t,
        None => from,
    }
}
