//! Bridgeable area and unsupported edges for a chosen angle.
//!
//! Everything is rotated by `PI/2 - angle` so the bridge runs vertically, cut into
//! vertical trapezoids, and a trapezoid is kept only if it reaches two anchors.

use super::debug::{DebugShape, DebugSink, DiagnosticContext, NoopSink};
use super::BridgeDetector;
use crate::clipper::{
    self, diff_pl, intersection, intersection_ln, union_ex, union_safety_offset, OffsetJoinType,
};
use crate::geometry::{
    directions_parallel, expolygons_rotate, to_lines, to_polylines, BoundingBox, ExPolygon,
    ExPolygons, Point, Polygon, Polylines,
};
use crate::{unscale, Coord, CoordF};
use log::trace;
use std::f64::consts::FRAC_PI_2;
use std::slice;

impl BridgeDetector {
    /// Area that can be bridged at `angle`, or at the detected angle with `None`.
    ///
    /// Empty when no angle is known. `precise` slices fixed spacing-wide columns
    /// instead of cutting at every vertex; `straight_bridges` only prefilters the
    /// anchors by bounding box.
    pub fn coverage(&self, angle: Option<CoordF>, precise: bool, straight_bridges: bool) -> ExPolygons {
        self.coverage_traced(
            angle,
            precise,
            straight_bridges,
            &mut NoopSink,
            &mut DiagnosticContext::default(),
        )
    }

    /// [`Self::coverage`], reporting intermediate shapes to `sink`.
    pub fn coverage_traced(
        &self,
        angle: Option<CoordF>,
        precise: bool,
        straight_bridges: bool,
        sink: &mut dyn DebugSink,
        ctx: &mut DiagnosticContext,
    ) -> ExPolygons {
        let Some(angle) = angle.or(self.angle) else {
            return Vec::new();
        };
        let rotation = FRAC_PI_2 - angle;

        let mut anchors = self.anchor_regions.clone();
        expolygons_rotate(&mut anchors, rotation);
        let anchor_bboxes: Option<Vec<BoundingBox>> =
            straight_bridges.then(|| anchors.iter().map(|a| a.contour.bounding_box()).collect());

        let mut covered = Vec::new();
        for expolygon in &self.expolygons {
            let mut unsupported = expolygon.clone();
            unsupported.rotate(rotation);

            let Some(region) = self.grow_into_anchors(&unsupported, &anchors) else {
                continue;
            };
            if sink.enabled() {
                sink.on_debug_shape(
                    ctx,
                    "bridges_create_area",
                    &[
                        DebugShape::Area(slice::from_ref(&unsupported), "grey"),
                        DebugShape::Area(&anchors, "green"),
                        DebugShape::Outline(&to_polylines(slice::from_ref(&region)), "yellow"),
                    ],
                );
            }

            let trapezoids = if precise {
                self.fine_trapezoids(&region, &anchors)
            } else {
                self.coarse_trapezoids(&region, &anchors, anchor_bboxes.as_deref())
            };
            covered.extend(trapezoids);
        }

        // Union before rotating back: rotation opens tiny gaps between neighbours.
        let mut covered = union_ex(&covered);
        expolygons_rotate(&mut covered, -rotation);

        if sink.enabled() {
            sink.on_debug_shape(
                ctx,
                "bridges_finished",
                &[
                    DebugShape::Area(&self.expolygons, "grey"),
                    DebugShape::Area(&self.anchor_regions, "green"),
                    DebugShape::Outline(&to_polylines(&covered), "blue"),
                ],
            );
        }
        covered
    }

    /// The rotated region plus the bits of anchor within half a spacing of it.
    fn grow_into_anchors(&self, unsupported: &ExPolygon, anchors: &[ExPolygon]) -> Option<ExPolygon> {
        let bigger =
            clipper::offset_expolygon(unsupported, 0.5 * unscale(self.spacing), OffsetJoinType::Miter);
        debug_assert!(bigger.len() <= 1, "growing split a bridge region into {}", bigger.len());
        let grown = bigger.first()?;

        let mut parts = intersection(slice::from_ref(grown), anchors);
        parts.push(unsupported.clone());
        let mut merged = union_safety_offset(&parts);

        if merged.len() > 1 {
            // Anchor bits only touching through a gap; keep the main piece.
            let biggest = merged.iter().map(ExPolygon::area).fold(0.0, CoordF::max);
            let before = merged.len();
            merged.retain(|ex| ex.area() >= biggest - 1.0);
            trace!("dropped {} detached anchor piece(s)", before - merged.len());
        }
        merged.into_iter().next()
    }

    /// Cut at every distinct vertex x.
    fn coarse_trapezoids(
        &self,
        region: &ExPolygon,
        anchors: &[ExPolygon],
        anchor_bboxes: Option<&[BoundingBox]>,
    ) -> ExPolygons {
        let points = region.all_points();
        let bb = BoundingBox::from_points(&points);
        let mut xs: Vec<Coord> = points.iter().map(|p| p.x).collect();
        xs.sort_unstable();
        xs.dedup();

        let half = self.spacing / 2;
        let mut result = Vec::new();
        for w in xs.windows(2) {
            let rect = Polygon::rectangle(
                Point::new(w[0], bb.min.y - half),
                Point::new(w[1], bb.max.y + half),
            );
            for trapezoid in intersection(slice::from_ref(region), &[ExPolygon::from(rect)]) {
                if self.count_supported_edges(&trapezoid, anchors, anchor_bboxes) >= 2 {
                    result.extend(finish_trapezoid(trapezoid));
                }
            }
        }
        result
    }

    /// Pieces of the trapezoid outline at least one spacing long inside anchors.
    fn count_supported_edges(
        &self,
        trapezoid: &ExPolygon,
        anchors: &[ExPolygon],
        anchor_bboxes: Option<&[BoundingBox]>,
    ) -> usize {
        let lines = trapezoid.lines();
        let supported = match anchor_bboxes {
            Some(bboxes) => {
                let bb = trapezoid.bounding_box();
                let near: ExPolygons = anchors
                    .iter()
                    .zip(bboxes)
                    .filter(|(_, abb)| abb.overlap(&bb))
                    .map(|(anchor, _)| anchor.clone())
                    .collect();
                intersection_ln(&lines, &near)
            }
            None => intersection_ln(&lines, anchors),
        };
        let min_length = self.spacing as CoordF;
        supported.iter().filter(|l| l.length() >= min_length).count()
    }

    /// Spacing-wide columns, inset by a quarter spacing on each side.
    fn fine_trapezoids(&self, region: &ExPolygon, anchors: &[ExPolygon]) -> ExPolygons {
        if region.contour.is_empty() {
            return Vec::new();
        }
        let bb = region.contour.bounding_box();
        let spacing = self.spacing;

        let mut xs = Vec::new();
        let mut x = bb.min.x;
        while x < bb.max.x - spacing / 2 {
            xs.push(x);
            x += spacing;
        }
        xs.push(bb.max.x);

        let mut result = Vec::new();
        for w in xs.windows(2) {
            if w[0] == w[1] {
                continue;
            }
            let rect = Polygon::rectangle(
                Point::new(w[0] + spacing / 4, bb.min.y - spacing / 2),
                Point::new(w[1] - spacing / 4, bb.max.y + spacing / 2),
            );
            for mut trapezoid in intersection(slice::from_ref(region), &[ExPolygon::from(rect)]) {
                let hits = intersection(anchors, slice::from_ref(&trapezoid));
                if hits.len() >= 2 {
                    clamp_to_anchors(&mut trapezoid, &hits, spacing);
                    result.extend(finish_trapezoid(trapezoid));
                }
            }
        }
        result
    }

    /// Outline edges left without support at `angle` (or the detected angle),
    /// ignoring those running along the bridge.
    pub fn unsupported_edges(&self, angle: Option<CoordF>) -> Polylines {
        let Some(angle) = angle.or(self.angle) else {
            return Vec::new();
        };
        let grown_lower =
            clipper::offset_expolygons(&self.lower_slices, unscale(self.spacing), OffsetJoinType::Miter);

        let mut unsupported = Vec::new();
        for expolygon in &self.expolygons {
            let outline = to_polylines(slice::from_ref(expolygon));
            for line in to_lines(&diff_pl(&outline, &grown_lower)) {
                if !directions_parallel(line.direction(), angle, self.config.parallel_tolerance) {
                    unsupported.push(line.into());
                }
            }
        }
        unsupported
    }
}

/// Pull a column back to the span between its anchors and out to its full width.
fn clamp_to_anchors(trapezoid: &mut ExPolygon, hits: &[ExPolygon], spacing: Coord) {
    let centers = hits.iter().map(|h| h.bounding_box().center().y);
    let (min_y, max_y) = centers.fold((Coord::MAX, Coord::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));

    let bb = trapezoid.contour.bounding_box();
    // Undo the quarter-spacing inset, plus one unit so columns overlap.
    let min_x = bb.min.x - (spacing / 4 + 1);
    let max_x = bb.max.x + (spacing / 4 + 1);
    let mid_x = (min_x + max_x) / 2;

    for p in trapezoid.contour.points_mut() {
        p.y = p.y.clamp(min_y, max_y);
        if p.x > min_x && p.x < mid_x {
            p.x = min_x;
        } else if p.x < max_x && p.x > mid_x {
            p.x = max_x;
        }
    }
}

fn finish_trapezoid(mut trapezoid: ExPolygon) -> Option<ExPolygon> {
    trapezoid.contour.remove_duplicate_points();
    (trapezoid.contour.len() > 3).then_some(trapezoid)
}
