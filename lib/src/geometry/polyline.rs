//! Polyline type for open paths.

use super::{Line, Lines, Point, Polygon};
use crate::CoordF;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// An open polyline defined by a sequence of points.
///
/// Unlike a Polygon, a Polyline is not implicitly closed - it's a path from
/// the first point to the last point.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Point>,
}

impl Polyline {
    #[inline]
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Create a polyline from a polygon (closes the polygon by repeating the first point).
    pub fn from_polygon(polygon: &Polygon) -> Self {
        let mut points = polygon.points().to_vec();
        if let Some(&first) = points.first() {
            if points.last() != Some(&first) {
                points.push(first);
            }
        }
        Self { points }
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn first_point(&self) -> Option<Point> {
        self.points.first().copied()
    }

    #[inline]
    pub fn last_point(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Consecutive segments of the path.
    pub fn lines(&self) -> Lines {
        self.points
            .windows(2)
            .map(|w| Line::new(w[0], w[1]))
            .collect()
    }

    pub fn length(&self) -> CoordF {
        self.points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
    }
}

impl fmt::Debug for Polyline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polyline({} points)", self.points.len())
    }
}

impl Deref for Polyline {
    type Target = [Point];

    fn deref(&self) -> &Self::Target {
        &self.points
    }
}

impl From<Line> for Polyline {
    fn from(line: Line) -> Self {
        Self::from_points(vec![line.a, line.b])
    }
}

pub type Polylines = Vec<Polyline>;

/// All segments of a set of polylines.
pub fn to_lines(polylines: &[Polyline]) -> Lines {
    polylines.iter().flat_map(|pl| pl.lines()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_polyline() -> Polyline {
        Polyline::from_points(vec![
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(100, 100),
            Point::new(0, 100),
        ])
    }

    #[test]
    fn test_length_and_lines() {
        let pl = make_polyline();
        assert!((pl.length() - 300.0).abs() < 1e-9);
        assert_eq!(pl.lines().len(), 3);
        assert_ne!(pl.first_point(), pl.last_point());
    }

    #[test]
    fn test_from_polygon_closes() {
        let poly = Polygon::rectangle(Point::new(0, 0), Point::new(10, 10));
        let pl = Polyline::from_polygon(&poly);
        assert_eq!(pl.len(), 5);
        assert_eq!(pl.first_point(), pl.last_point());
        assert_eq!(pl.lines().len(), 4);
    }

    #[test]
    fn test_endpoints() {
        let pl = make_polyline();
        assert_eq!(pl.first_point(), Some(Point::new(0, 0)));
        assert_eq!(pl.last_point(), Some(Point::new(0, 100)));
        assert_eq!(Polyline::default().first_point(), None);
    }
}
