//! Geometry primitives.
//!
//! This module provides the geometric types shared by the bridge detector and
//! the clipper adapter:
//! - [`Point`] - 2D point with integer coordinates (scaled), [`PointF`] for unscaled vectors
//! - [`Line`] - Line segment between two points
//! - [`Polygon`] - Closed polygon (boundary)
//! - [`Polyline`] - Open polyline (path)
//! - [`ExPolygon`] - Polygon with holes (exterior + interior contours)
//! - [`BoundingBox`] - Axis-aligned bounding box
//!
//! ## Coordinate System
//!
//! Coordinates are scaled integers: `SCALING_FACTOR` (1,000,000) units per millimeter.
//! Rotations round back to the integer grid, so rotating a shape and rotating it back
//! may move vertices by one unit.

mod bounding_box;
mod expolygon;
mod line;
mod point;
mod polygon;
mod polyline;

pub use bounding_box::BoundingBox;
pub use expolygon::{expolygons_contain, expolygons_rotate, to_polygons, ExPolygon, ExPolygons};
pub use line::{Line, Lines};
pub use point::{Point, PointF, Points};
pub use polygon::{Polygon, Polygons};
pub use polyline::{to_lines, Polyline, Polylines};

use crate::CoordF;
use std::f64::consts::PI;

/// True if two directions are parallel within `max_diff` radians (plus `EPSILON`).
///
/// Directions that differ by `PI` are parallel.
pub fn directions_parallel(angle1: CoordF, angle2: CoordF, max_diff: CoordF) -> bool {
    let diff = (angle1 - angle2).abs();
    let max_diff = max_diff + crate::EPSILON;
    diff < max_diff || (diff - PI).abs() < max_diff
}

/// Bounding box of every vertex after rotating by `angle` around the origin.
pub fn get_extents_rotated(expolygons: &[ExPolygon], angle: CoordF) -> BoundingBox {
    let (s, c) = angle.sin_cos();
    let mut bb = BoundingBox::new();
    for ex in expolygons {
        for p in ex.contour.points() {
            let mut q = *p;
            q.rotate_sc(s, c);
            bb.merge_point(q);
        }
    }
    bb
}

/// Contours and holes as closed polylines.
pub fn to_polylines(expolygons: &[ExPolygon]) -> Polylines {
    let mut result = Vec::new();
    for ex in expolygons {
        result.push(Polyline::from_polygon(&ex.contour));
        for hole in &ex.holes {
            result.push(Polyline::from_polygon(hole));
        }
    }
    result
}

/// Cross product of two vectors given as floats.
#[inline]
pub fn cross2f(v1: PointF, v2: PointF) -> CoordF {
    v1.x * v2.y - v1.y * v2.x
}

#[inline]
pub fn dot2f(v1: PointF, v2: PointF) -> CoordF {
    v1.x * v2.x + v1.y * v2.y
}

/// Unsigned angle between two vectors, in `[0, PI]`.
///
/// Returns `0` when either vector has zero length.
pub fn angle_between(v1: PointF, v2: PointF) -> CoordF {
    if v1.length() == 0.0 || v2.length() == 0.0 {
        return 0.0;
    }
    cross2f(v1, v2).abs().atan2(dot2f(v1, v2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions_parallel() {
        assert!(directions_parallel(0.0, 0.0, 0.0));
        assert!(directions_parallel(0.0, PI, 0.0));
        assert!(directions_parallel(0.01, PI, 0.02));
        assert!(!directions_parallel(0.0, PI / 2.0, 0.1));
        assert!(!directions_parallel(0.0, 0.01, 0.0));
    }

    #[test]
    fn test_extents_rotated() {
        let sq: ExPolygon = Polygon::rectangle(Point::new(0, 0), Point::new(1000, 2000)).into();
        let bb = get_extents_rotated(&[sq], PI / 2.0);
        assert_eq!(bb.min, Point::new(-2000, 0));
        assert_eq!(bb.max, Point::new(0, 1000));
    }

    #[test]
    fn test_angle_between() {
        let a = PointF::new(1.0, 0.0);
        assert!((angle_between(a, PointF::new(-1.0, 0.0)) - PI).abs() < 1e-12);
        assert!((angle_between(a, PointF::new(0.0, -3.0)) - PI / 2.0).abs() < 1e-12);
        assert_eq!(angle_between(a, PointF::new(0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_to_polylines_closed() {
        let sq: ExPolygon = Polygon::rectangle(Point::new(0, 0), Point::new(10, 10)).into();
        let pls = to_polylines(&[sq]);
        assert_eq!(pls.len(), 1);
        assert_eq!(pls[0].len(), 5);
        assert_eq!(pls[0].first_point(), pls[0].last_point());
    }
}
