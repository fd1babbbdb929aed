//! Curve Interpolator
//! Clamped cubic spline through a knot sequence, returned as Bézier segments

use egui::{Pos2, Vec2};

use crate::geometry::CubicSegment;

/// Interpolate `knots` with a C² cubic spline whose end derivatives are `d0` and `d1`.
///
/// The spline is parameterized by knot index, so segment `i` spans `t in [i, i+1]`. With that
/// parameterization a Bézier control point sits one third of the derivative away from its
/// knot, which is why edge tangents are passed in as three times the knot-to-control vector.
///
/// Fewer than two knots yield no segments.
pub fn interpolate(knots: &[Pos2], d0: Vec2, d1: Vec2) -> Vec<CubicSegment> {
    let n = knots.len();
    if n < 2 {
        return Vec::new();
    }

    let xs: Vec<f32> = knots.iter().map(|p| p.x).collect();
    let ys: Vec<f32> = knots.iter().map(|p| p.y).collect();
    let dx = clamped_derivatives(&xs, d0.x, d1.x);
    let dy = clamped_derivatives(&ys, d0.y, d1.y);

    (0..n - 1)
        .map(|i| {
            let a = Vec2::new(dx[i], dy[i]) / 3.0;
            let b = Vec2::new(dx[i + 1], dy[i + 1]) / 3.0;
            [knots[i], knots[i] + a, knots[i + 1] - b, knots[i + 1]]
        })
        .collect()
}

/// Knot derivatives of a clamped spline in one coordinate.
fn clamped_derivatives(values: &[f32], start: f32, end: f32) -> Vec<f32> {
    let n = values.len();
    let mut d = vec![0.0; n];
    d[0] = start;
    d[n - 1] = end;
    if n == 2 {
        return d;
    }

    // Interior unknowns D[1..n-1]: D[i-1] + 4 D[i] + D[i+1] = 3 (P[i+1] - P[i-1]).
    let m = n - 2;
    let mut rhs: Vec<f32> = (1..n - 1)
        .map(|i| 3.0 * (values[i + 1] - values[i - 1]))
        .collect();
    rhs[0] -= start;
    rhs[m - 1] -= end;

    let solved = solve_tridiagonal(1.0, 4.0, 1.0, &rhs);
    d[1..n - 1].copy_from_slice(&solved);
    d
}

/// Thomas algorithm for a constant-coefficient tridiagonal system.
fn solve_tridiagonal(lower: f32, diag: f32, upper: f32, rhs: &[f32]) -> Vec<f32> {
    let m = rhs.len();
    let mut c = vec![0.0f32; m];
    let mut r = vec![0.0f32; m];

    c[0] = upper / diag;
    r[0] = rhs[0] / diag;
    for i in 1..m {
        let w = diag - lower * c[i - 1];
        c[i] = upper / w;
        r[i] = (rhs[i] - lower * r[i - 1]) / w;
    }

    let mut x = vec![0.0f32; m];
    x[m - 1] = r[m - 1];
    for i in (0..m - 1).rev() {
        x[i] = r[i] - c[i] * x[i + 1];
    }
    x
}
