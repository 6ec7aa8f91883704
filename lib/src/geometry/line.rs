//! Line segment type.

use super::{Point, PointF};
use crate::{Coord, CoordF};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// A line segment defined by two endpoints.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Line {
    pub a: Point,
    pub b: Point,
}

impl Line {
    #[inline]
    pub const fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    #[inline]
    pub const fn from_coords(ax: Coord, ay: Coord, bx: Coord, by: Coord) -> Self {
        Self {
            a: Point::new(ax, ay),
            b: Point::new(bx, by),
        }
    }

    /// The vector from `a` to `b`.
    #[inline]
    pub fn vector(&self) -> Point {
        self.b - self.a
    }

    /// Direction angle folded into `[0, PI)`.
    ///
    /// A direction within `EPSILON` of `PI` is reported as `0`, so opposite
    /// segments share one angle.
    pub fn direction(&self) -> CoordF {
        let v = self.vector();
        let angle = (v.y as CoordF).atan2(v.x as CoordF);
        if (angle - PI).abs() < crate::EPSILON {
            0.0
        } else if angle < 0.0 {
            angle + PI
        } else {
            angle
        }
    }

    #[inline]
    pub fn midpoint(&self) -> Point {
        (self.a + self.b) / 2
    }

    #[inline]
    pub fn length_squared(&self) -> CoordF {
        self.a.distance_to_squared(&self.b)
    }

    #[inline]
    pub fn length(&self) -> CoordF {
        self.a.distance_to(&self.b)
    }

    #[inline]
    pub fn is_point(&self) -> bool {
        self.a == self.b
    }

    #[inline]
    pub fn reverse(&self) -> Self {
        Self::new(self.b, self.a)
    }

    /// Point at parameter `t` along the segment, rounded to the integer grid.
    pub fn point_at(&self, t: CoordF) -> Point {
        Point::new(
            (self.a.x as CoordF + (self.b.x - self.a.x) as CoordF * t).round() as Coord,
            (self.a.y as CoordF + (self.b.y - self.a.y) as CoordF * t).round() as Coord,
        )
    }

    /// Parameter along `self` where it crosses `other`, both treated as closed segments.
    ///
    /// Returns `None` for parallel or disjoint segments.
    pub fn intersection_param(&self, other: &Line) -> Option<CoordF> {
        let r = self.vector();
        let s = other.vector();
        let denom = r.x as CoordF * s.y as CoordF - r.y as CoordF * s.x as CoordF;
        if denom == 0.0 {
            return None;
        }
        let qp = other.a - self.a;
        let t = (qp.x as CoordF * s.y as CoordF - qp.y as CoordF * s.x as CoordF) / denom;
        let u = (qp.x as CoordF * r.y as CoordF - qp.y as CoordF * r.x as CoordF) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(t)
        } else {
            None
        }
    }

    /// Parameters along `self`, strictly between its ends, of the ends of `other`
    /// when both segments lie on the same line. Empty otherwise.
    pub fn collinear_params(&self, other: &Line) -> Vec<CoordF> {
        let r = self.vector();
        let (rx, ry) = (r.x as CoordF, r.y as CoordF);
        let len2 = rx * rx + ry * ry;
        let on_line = |p: Point| {
            let q = p - self.a;
            q.x as CoordF * ry - q.y as CoordF * rx == 0.0
        };
        if len2 == 0.0 || !on_line(other.a) || !on_line(other.b) {
            return Vec::new();
        }
        [other.a, other.b]
            .into_iter()
            .map(|p| {
                let q = p - self.a;
                (q.x as CoordF * rx + q.y as CoordF * ry) / len2
            })
            .filter(|t| *t > 0.0 && *t < 1.0)
            .collect()
    }

    pub fn to_f64(&self) -> (PointF, PointF) {
        (self.a.to_f64(), self.b.to_f64())
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line({:?} -> {:?})", self.a, self.b)
    }
}

impl From<(Point, Point)> for Line {
    fn from((a, b): (Point, Point)) -> Self {
        Line::new(a, b)
    }
}

pub type Lines = Vec<Line>;
