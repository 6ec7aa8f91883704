//! Closed polygon type.

use super::{BoundingBox, Line, Lines, Point};
use crate::CoordF;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// A closed polygon. The closing edge from the last point back to the first is implicit.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle, counter-clockwise.
    pub fn rectangle(min: Point, max: Point) -> Self {
        Self::from_points(vec![
            min,
            Point::new(max.x, min.y),
            max,
            Point::new(min.x, max.y),
        ])
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut Vec<Point> {
        &mut self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Signed area (positive for counter-clockwise), in scaled units squared.
    pub fn area(&self) -> CoordF {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let p = self.points[i];
            let q = self.points[(i + 1) % n];
            sum += p.x as CoordF * q.y as CoordF - q.x as CoordF * p.y as CoordF;
        }
        sum * 0.5
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.area() > 0.0
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// Edges of the polygon, including the closing edge.
    pub fn lines(&self) -> Lines {
        let n = self.points.len();
        if n < 2 {
            return Vec::new();
        }
        (0..n)
            .map(|i| Line::new(self.points[i], self.points[(i + 1) % n]))
            .collect()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.points)
    }

    /// Even-odd ray crossing test.
    pub fn contains_point(&self, p: &Point) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.points[i];
            let pj = self.points[j];
            if (pi.y > p.y) != (pj.y > p.y) {
                let x_cross = (pj.x - pi.x) as CoordF * (p.y - pi.y) as CoordF
                    / (pj.y - pi.y) as CoordF
                    + pi.x as CoordF;
                if (p.x as CoordF) < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    pub fn rotate(&mut self, angle: CoordF) {
        let (s, c) = angle.sin_cos();
        for p in &mut self.points {
            p.rotate_sc(s, c);
        }
    }

    /// Remove consecutive duplicate points, including a duplicated closing point.
    pub fn remove_duplicate_points(&mut self) {
        self.points.dedup();
        while self.points.len() > 1 && self.points.first() == self.points.last() {
            self.points.pop();
        }
    }
}

impl fmt::Debug for Polygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polygon{:?}", self.points)
    }
}

impl Index<usize> for Polygon {
    type Output = Point;
    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

impl IndexMut<usize> for Polygon {
    fn index_mut(&mut self, index: usize) -> &mut Point {
        &mut self.points[index]
    }
}

impl From<Vec<Point>> for Polygon {
    fn from(points: Vec<Point>) -> Self {
        Self::from_points(points)
    }
}

pub type Polygons = Vec<Polygon>;

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: i64) -> Polygon {
        Polygon::rectangle(Point::new(0, 0), Point::new(size, size))
    }

    #[test]
    fn test_area_sign() {
        let mut sq = square(10);
        assert!((sq.area() - 100.0).abs() < 1e-9);
        assert!(sq.is_counter_clockwise());
        sq.reverse();
        assert!((sq.area() + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_lines_close_the_ring() {
        let lines = square(10).lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3].a, Point::new(0, 10));
        assert_eq!(lines[3].b, Point::new(0, 0));
    }

    #[test]
    fn test_contains_point() {
        let sq = square(10);
        assert!(sq.contains_point(&Point::new(5, 5)));
        assert!(!sq.contains_point(&Point::new(15, 5)));
        assert!(!sq.contains_point(&Point::new(-1, 5)));
    }

    #[test]
    fn test_remove_duplicate_points() {
        let mut p = Polygon::from_points(vec![
            Point::new(0, 0),
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 0),
        ]);
        p.remove_duplicate_points();
        assert_eq!(p.len(), 3);
    }
}
