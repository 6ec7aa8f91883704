//! Clipper polygon boolean operations module.
//!
//! This module provides polygon boolean operations (union, intersection, difference)
//! and offset operations using the geo-clipper library, plus exact clipping of
//! line segments and polylines against polygons with holes.
//!
//! Geometry is handed to Clipper in scaled integer units, so results land back on
//! the same grid as the inputs. Offset distances are given in millimeters.

use crate::geometry::{
    BoundingBox, ExPolygon, ExPolygons, Line, Lines, Point, Polygon,
    Polyline, Polylines,
};
use crate::{Coord, CoordF, SCALING_FACTOR};
use geo::{Coord as GeoCoord, LineString, MultiPolygon, Polygon as GeoPolygon};
use geo_clipper::{Clipper, EndType, JoinType};

/// Clipper works directly on scaled coordinates.
const CLIPPER_FACTOR: f64 = 1.0;

/// Safety offset applied before unions, in scaled units (10 nm).
pub const SAFETY_OFFSET: Coord = 10;

/// Join type for offset corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetJoinType {
    /// Square corners
    Square,
    /// Round corners
    Round,
    /// Mitered corners, limit 3
    #[default]
    Miter,
}

impl From<OffsetJoinType> for JoinType {
    fn from(jt: OffsetJoinType) -> Self {
        match jt {
            OffsetJoinType::Square => JoinType::Square,
            // Arc tolerance in scaled units (5 microns)
            OffsetJoinType::Round => JoinType::Round(5_000.0),
            OffsetJoinType::Miter => JoinType::Miter(3.0),
        }
    }
}

fn ring_to_geo(points: &[Point], ccw: bool) -> LineString<f64> {
    let mut ring: Vec<GeoCoord<f64>> = points
        .iter()
        .map(|p| GeoCoord {
            x: p.x as f64,
            y: p.y as f64,
        })
        .collect();

    if Polygon::from_points(points.to_vec()).is_counter_clockwise() != ccw {
        ring.reverse();
    }
    if let Some(&first) = ring.first() {
        if ring.last() != Some(&first) {
            ring.push(first);
        }
    }
    LineString::new(ring)
}

/// Convert our ExPolygon to geo's Polygon type, contour counter-clockwise and holes clockwise.
fn expolygon_to_geo(expoly: &ExPolygon) -> GeoPolygon<f64> {
    let exterior = ring_to_geo(expoly.contour.points(), true);
    let holes = expoly
        .holes
        .iter()
        .map(|hole| ring_to_geo(hole.points(), false))
        .collect();
    GeoPolygon::new(exterior, holes)
}

fn geo_ring_to_polygon(ring: &LineString<f64>) -> Polygon {
    let mut polygon: Polygon = ring
        .coords()
        .map(|c| Point::new(c.x.round() as Coord, c.y.round() as Coord))
        .collect::<Vec<_>>()
        .into();
    polygon.remove_duplicate_points();
    polygon
}

/// Convert geo's Polygon to our ExPolygon type (with holes).
fn geo_to_expolygon(geo_poly: &GeoPolygon<f64>) -> ExPolygon {
    let contour = geo_ring_to_polygon(geo_poly.exterior());
    let holes = geo_poly
        .interiors()
        .iter()
        .map(geo_ring_to_polygon)
        .filter(|h| h.len() >= 3)
        .collect();
    ExPolygon::with_holes(contour, holes)
}

fn geo_multi_to_expolygons(multi: &MultiPolygon<f64>) -> ExPolygons {
    multi
        .0
        .iter()
        .map(geo_to_expolygon)
        .filter(|ex| !ex.is_empty())
        .collect()
}

fn expolygons_to_geo_multi(expolys: &[ExPolygon]) -> MultiPolygon<f64> {
    MultiPolygon::new(
        expolys
            .iter()
            .filter(|ex| !ex.is_empty())
            .map(expolygon_to_geo)
            .collect(),
    )
}

// ============================================================================
// Boolean Operations
// ============================================================================

/// Compute the union of two sets of polygons.
pub fn union(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() {
        return union_ex(clip);
    }
    if clip.is_empty() {
        return union_ex(subject);
    }

    let subject_geo = expolygons_to_geo_multi(subject);
    let clip_geo = expolygons_to_geo_multi(clip);

    let result = subject_geo.union(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_expolygons(&result)
}

/// Compute the union of a single set of potentially overlapping polygons.
pub fn union_ex(polygons: &[ExPolygon]) -> ExPolygons {
    let mut iter = polygons.iter().filter(|ex| !ex.is_empty());
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut result = expolygons_to_geo_multi(std::slice::from_ref(first));
    for poly in iter {
        result = result.union(&expolygon_to_geo(poly), CLIPPER_FACTOR);
    }
    geo_multi_to_expolygons(&result)
}

/// Union after growing every input by [`SAFETY_OFFSET`], which merges touching neighbours.
pub fn union_safety_offset(polygons: &[ExPolygon]) -> ExPolygons {
    offset_expolygons(
        polygons,
        SAFETY_OFFSET as CoordF / SCALING_FACTOR,
        OffsetJoinType::Miter,
    )
}

/// Compute the intersection of two sets of polygons.
pub fn intersection(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() || clip.is_empty() {
        return Vec::new();
    }

    let subject_geo = expolygons_to_geo_multi(subject);
    let clip_geo = expolygons_to_geo_multi(clip);

    let result = subject_geo.intersection(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_expolygons(&result)
}

/// Compute the difference of two sets of polygons (subject - clip).
pub fn difference(subject: &[ExPolygon], clip: &[ExPolygon]) -> ExPolygons {
    if subject.is_empty() {
        return Vec::new();
    }
    if clip.is_empty() {
        return subject.to_vec();
    }

    let subject_geo = expolygons_to_geo_multi(subject);
    let clip_geo = expolygons_to_geo_multi(clip);

    let result = subject_geo.difference(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_expolygons(&result)
}

// ============================================================================
// Offset Operations
// ============================================================================

/// Offset multiple ExPolygons by a given distance in mm.
///
/// Positive delta inflates (grows) the polygons, negative delta deflates (shrinks) them.
/// Overlapping results are merged.
pub fn offset_expolygons(
    expolygons: &[ExPolygon],
    delta: CoordF,
    join_type: OffsetJoinType,
) -> ExPolygons {
    if expolygons.is_empty() {
        return Vec::new();
    }

    let geo_multi = expolygons_to_geo_multi(expolygons);
    let result = geo_multi.offset(
        delta * SCALING_FACTOR,
        join_type.into(),
        EndType::ClosedPolygon,
        CLIPPER_FACTOR,
    );
    geo_multi_to_expolygons(&result)
}

/// Offset a single ExPolygon by a given distance in mm.
pub fn offset_expolygon(
    expolygon: &ExPolygon,
    delta: CoordF,
    join_type: OffsetJoinType,
) -> ExPolygons {
    offset_expolygons(std::slice::from_ref(expolygon), delta, join_type)
}

/// Total unsigned area of a set of expolygons, in scaled units squared.
pub fn total_area(expolygons: &[ExPolygon]) -> CoordF {
    expolygons.iter().map(|e| e.area()).sum()
}

// ============================================================================
// Line and polyline clipping
// ============================================================================

const PARAM_EPSILON: f64 = 1e-12;

/// Parameter intervals of `line` lying inside (`inside == true`) or outside `clip`.
///
/// Crossings with every contour and hole edge split the segment, as do the ends of
/// edges it runs along; each piece is then classified by its midpoint.
fn clip_segment(line: &Line, clip: &[ExPolygon], bboxes: &[BoundingBox], inside: bool) -> Vec<(f64, f64)> {
    let params = split_params(line, clip, bboxes);

    let mut intervals: Vec<(f64, f64)> = Vec::new();
    for w in params.windows(2) {
        let (t0, t1) = (w[0], w[1]);
        let mid = line.point_at(0.5 * (t0 + t1));
        let is_inside = clip
            .iter()
            .zip(bboxes)
            .any(|(ex, bb)| bb.contains(&mid) && ex.contains_point(&mid));
        if is_inside != inside {
            continue;
        }
        match intervals.last_mut() {
            Some(last) if (last.1 - t0).abs() < PARAM_EPSILON => last.1 = t1,
            _ => intervals.push((t0, t1)),
        }
    }
    intervals
}

/// Sorted, deduplicated parameters in `[0, 1]` where `line` meets the clip edges.
fn split_params(line: &Line, clip: &[ExPolygon], bboxes: &[BoundingBox]) -> Vec<f64> {
    let mut seg_bb = BoundingBox::from_points(&[line.a, line.b]);
    seg_bb.offset(1);

    let mut params = vec![0.0, 1.0];
    for (ex, bb) in clip.iter().zip(bboxes) {
        if !bb.overlap(&seg_bb) {
            continue;
        }
        for edge in ex.lines() {
            match line.intersection_param(&edge) {
                Some(t) => params.push(t),
                None => params.extend(line.collinear_params(&edge)),
            }
        }
    }
    params.sort_by(f64::total_cmp);
    params.dedup_by(|a, b| (*a - *b).abs() < PARAM_EPSILON);
    params
}

fn bounding_boxes(clip: &[ExPolygon]) -> Vec<BoundingBox> {
    clip.iter().map(|ex| ex.bounding_box()).collect()
}

/// Clip line segments to the inside of `clip` (`intersection_ln`).
pub fn intersection_ln(lines: &[Line], clip: &[ExPolygon]) -> Lines {
    if lines.is_empty() || clip.is_empty() {
        return Vec::new();
    }
    let bboxes = bounding_boxes(clip);
    let mut result = Vec::new();
    for line in lines {
        for (t0, t1) in clip_segment(line, clip, &bboxes, true) {
            let piece = Line::new(line.point_at(t0), line.point_at(t1));
            if !piece.is_point() {
                result.push(piece);
            }
        }
    }
    result
}

fn clip_polylines(polylines: &[Polyline], clip: &[ExPolygon], inside: bool) -> Polylines {
    let bboxes = bounding_boxes(clip);
    let mut result = Vec::new();

    for polyline in polylines {
        let mut current: Vec<Point> = Vec::new();
        for segment in polyline.lines() {
            if segment.is_point() {
                continue;
            }
            for (t0, t1) in clip_segment(&segment, clip, &bboxes, inside) {
                let a = segment.point_at(t0);
                let b = segment.point_at(t1);
                let continues = t0 < PARAM_EPSILON && current.last() == Some(&a);
                if !continues {
                    if current.len() >= 2 {
                        result.push(Polyline::from_points(std::mem::take(&mut current)));
                    }
                    current.clear();
                    current.push(a);
                }
                current.push(b);
                if t1 < 1.0 - PARAM_EPSILON {
                    if current.len() >= 2 {
                        result.push(Polyline::from_points(std::mem::take(&mut current)));
                    }
                    current.clear();
                }
            }
        }
        if current.len() >= 2 {
            result.push(Polyline::from_points(current));
        }
    }
    result
}

/// Portions of the polylines inside `clip` (`intersection_pl`).
pub fn intersection_pl(polylines: &[Polyline], clip: &[ExPolygon]) -> Polylines {
    if polylines.is_empty() || clip.is_empty() {
        return Vec::new();
    }
    clip_polylines(polylines, clip, true)
}

/// Portions of the polylines outside `clip` (`diff_pl`).
pub fn diff_pl(polylines: &[Polyline], clip: &[ExPolygon]) -> Polylines {
    if polylines.is_empty() {
        return Vec::new();
    }
    if clip.is_empty() {
        return polylines.to_vec();
    }
    clip_polylines(polylines, clip, false)
}
