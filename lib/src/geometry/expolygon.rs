//! Polygon with holes.

use super::{BoundingBox, Lines, Point, Polygon, Polygons};
use crate::CoordF;
use serde::{Deserialize, Serialize};

/// A polygon with holes: one outer contour and any number of inner contours.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExPolygon {
    pub contour: Polygon,
    #[serde(default)]
    pub holes: Vec<Polygon>,
}

impl ExPolygon {
    pub fn new(contour: Polygon) -> Self {
        Self {
            contour,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(contour: Polygon, holes: Vec<Polygon>) -> Self {
        Self { contour, holes }
    }

    /// Unsigned area: contour minus holes.
    pub fn area(&self) -> CoordF {
        let holes: CoordF = self.holes.iter().map(|h| h.area().abs()).sum();
        self.contour.area().abs() - holes
    }

    pub fn is_empty(&self) -> bool {
        self.contour.len() < 3
    }

    /// Inside the contour and outside every hole.
    pub fn contains_point(&self, p: &Point) -> bool {
        self.contour.contains_point(p) && !self.holes.iter().any(|h| h.contains_point(p))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.contour.bounding_box()
    }

    /// Edges of the contour followed by the edges of every hole.
    pub fn lines(&self) -> Lines {
        let mut lines = self.contour.lines();
        for hole in &self.holes {
            lines.extend(hole.lines());
        }
        lines
    }

    pub fn rotate(&mut self, angle: CoordF) {
        self.contour.rotate(angle);
        for hole in &mut self.holes {
            hole.rotate(angle);
        }
    }

    /// Contour and holes as plain polygons.
    pub fn to_polygons(&self) -> Polygons {
        let mut polygons = Vec::with_capacity(1 + self.holes.len());
        polygons.push(self.contour.clone());
        polygons.extend(self.holes.iter().cloned());
        polygons
    }

    /// Every vertex of the contour and the holes.
    pub fn all_points(&self) -> Vec<Point> {
        let mut points = self.contour.points().to_vec();
        for hole in &self.holes {
            points.extend_from_slice(hole.points());
        }
        points
    }
}

impl From<Polygon> for ExPolygon {
    fn from(contour: Polygon) -> Self {
        Self::new(contour)
    }
}

pub type ExPolygons = Vec<ExPolygon>;

/// True if any expolygon contains the point.
pub fn expolygons_contain(expolygons: &[ExPolygon], p: &Point) -> bool {
    expolygons.iter().any(|ex| ex.contains_point(p))
}

pub fn expolygons_rotate(expolygons: &mut [ExPolygon], angle: CoordF) {
    for ex in expolygons {
        ex.rotate(angle);
    }
}

pub fn to_polygons(expolygons: &[ExPolygon]) -> Polygons {
    expolygons.iter().flat_map(|ex| ex.to_polygons()).collect()
}
