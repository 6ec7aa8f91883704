//! 2D point types.
//!
//! [`Point`] stores scaled integer coordinates, [`PointF`] unscaled floating-point ones.

use crate::{unscale, Coord, CoordF};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Neg, Sub};

/// A 2D point with integer (scaled) coordinates.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    #[inline]
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point, in scaled units squared.
    #[inline]
    pub fn distance_to_squared(&self, other: &Point) -> CoordF {
        let dx = (other.x - self.x) as CoordF;
        let dy = (other.y - self.y) as CoordF;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn distance_to(&self, other: &Point) -> CoordF {
        self.distance_to_squared(other).sqrt()
    }

    /// Rotate around the origin using a precomputed sine and cosine, rounding the
    /// result back to the integer grid.
    #[inline]
    pub fn rotate_sc(&mut self, s: CoordF, c: CoordF) {
        let x = self.x as CoordF;
        let y = self.y as CoordF;
        self.x = (c * x - s * y).round() as Coord;
        self.y = (c * y + s * x).round() as Coord;
    }

    pub fn to_f64(&self) -> PointF {
        PointF::new(unscale(self.x), unscale(self.y))
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", unscale(self.x), unscale(self.y))
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Div<Coord> for Point {
    type Output = Point;
    fn div(self, rhs: Coord) -> Point {
        Point::new(self.x / rhs, self.y / rhs)
    }
}

impl From<(Coord, Coord)> for Point {
    fn from((x, y): (Coord, Coord)) -> Self {
        Point::new(x, y)
    }
}

pub type Points = Vec<Point>;

/// A 2D point (or vector) with floating-point coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: CoordF,
    pub y: CoordF,
}

impl PointF {
    #[inline]
    pub const fn new(x: CoordF, y: CoordF) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn length(&self) -> CoordF {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_distance() {
        let a = Point::new(0, 0);
        let b = Point::new(3, 4);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
        assert!((a.distance_to_squared(&b) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let (s, c) = (PI / 2.0).sin_cos();
        let mut p = Point::new(1_000_000, 0);
        p.rotate_sc(s, c);
        assert_eq!(p, Point::new(0, 1_000_000));

        p.rotate_sc(-s, c);
        assert_eq!(p, Point::new(1_000_000, 0));
    }

    #[test]
    fn test_ops() {
        let a = Point::new(10, 20);
        let b = Point::new(4, 6);
        assert_eq!(a + b, Point::new(14, 26));
        assert_eq!(a - b, Point::new(6, 14));
        assert_eq!(-a, Point::new(-10, -20));
        assert_eq!((a + b) / 2, Point::new(7, 13));
    }
}
