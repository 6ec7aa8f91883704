//! Anchors, scan lines and angle selection.

use super::candidates::{bridge_direction_candidates, score_candidates, BridgeDirection};
use super::BridgeDetectorConfig;
use crate::clipper::{
    self, intersection, intersection_ln, intersection_pl, union_safety_offset, OffsetJoinType,
};
use crate::geometry::{
    expolygons_contain, get_extents_rotated, to_polylines, BoundingBox, ExPolygon, ExPolygons,
    Line, Lines, Point, Polylines,
};
use crate::{scale, unscale, Coord, CoordF, Error, Result};
use log::debug;
use std::f64::consts::PI;

/// Finds the bridging direction of an unsupported region and the part of it
/// that can be bridged.
///
/// Anchors and supporting edges are computed once, at construction. The
/// detected angle is the only state that changes afterwards.
#[derive(Debug, Clone)]
pub struct BridgeDetector {
    /// The regions to bridge.
    pub(super) expolygons: ExPolygons,
    /// Slices of the layer below.
    pub(super) lower_slices: ExPolygons,
    /// Extrusion spacing (scaled).
    pub(super) spacing: Coord,
    pub(super) config: BridgeDetectorConfig,
    /// Detected angle in `[0, PI)`, `None` until [`Self::detect_angle`] succeeds.
    pub(super) angle: Option<CoordF>,
    /// Outline of the grown region where it lies over the lower slices.
    pub(super) edges: Polylines,
    /// Grown region intersected with the lower slices.
    pub(super) anchor_regions: ExPolygons,
}

impl BridgeDetector {
    /// Detector for one region, spacing in mm.
    pub fn new(expolygon: ExPolygon, lower_slices: &[ExPolygon], spacing: CoordF) -> Result<Self> {
        Self::with_config(vec![expolygon], lower_slices, spacing, BridgeDetectorConfig::default())
    }

    /// Detector for several regions bridged in the same direction.
    pub fn new_multi(
        expolygons: ExPolygons,
        lower_slices: &[ExPolygon],
        spacing: CoordF,
    ) -> Result<Self> {
        Self::with_config(expolygons, lower_slices, spacing, BridgeDetectorConfig::default())
    }

    pub fn with_config(
        expolygons: ExPolygons,
        lower_slices: &[ExPolygon],
        spacing: CoordF,
        config: BridgeDetectorConfig,
    ) -> Result<Self> {
        if !spacing.is_finite() || spacing <= 0.0 || scale(spacing) <= 0 {
            return Err(Error::Geometry(format!(
                "bridge spacing must be positive, got {}",
                spacing
            )));
        }
        let mut detector = Self {
            expolygons,
            lower_slices: lower_slices.to_vec(),
            spacing: scale(spacing),
            config,
            angle: None,
            edges: Vec::new(),
            anchor_regions: Vec::new(),
        };
        detector.initialize();
        Ok(detector)
    }

    fn initialize(&mut self) {
        // Outset the bridge by the spacing so that anchors overlap the support.
        let grown = clipper::offset_expolygons(
            &self.expolygons,
            unscale(self.spacing),
            OffsetJoinType::Miter,
        );

        // Supporting edges: the grown outline over lower contours (holes ignored).
        let contours: ExPolygons = self
            .lower_slices
            .iter()
            .map(|ex| ExPolygon::new(ex.contour.clone()))
            .collect();
        self.edges = intersection_pl(&to_polylines(&grown), &contours);
        debug!("bridge has {} support(s)", self.edges.len());

        self.anchor_regions = intersection(&grown, &union_safety_offset(&self.lower_slices));
    }

    /// Detected angle in radians, in `[0, PI)`.
    pub fn angle(&self) -> Option<CoordF> {
        self.angle
    }

    /// Spacing in scaled units.
    pub fn spacing(&self) -> Coord {
        self.spacing
    }

    pub fn config(&self) -> &BridgeDetectorConfig {
        &self.config
    }

    pub fn expolygons(&self) -> &ExPolygons {
        &self.expolygons
    }

    pub fn anchor_regions(&self) -> &ExPolygons {
        &self.anchor_regions
    }

    pub fn edges(&self) -> &Polylines {
        &self.edges
    }

    /// Pick the bridging angle.
    ///
    /// A non-zero `bridge_direction_override` is scored as the only candidate.
    /// Returns `false` when the region has no anchor or no supporting edge, or
    /// when no candidate anchors a single scan line; the region is then not
    /// bridgeable and the stored angle is left untouched.
    pub fn detect_angle(&mut self, bridge_direction_override: CoordF) -> bool {
        if self.edges.is_empty() || self.anchor_regions.is_empty() {
            // Completely in the air.
            return false;
        }

        let clip_area = self.clip_area();
        let anchor_bboxes: Vec<BoundingBox> =
            self.anchor_regions.iter().map(ExPolygon::bounding_box).collect();

        let mut candidates = self.candidates(bridge_direction_override, false);
        for candidate in &mut candidates {
            self.score_anchored(candidate, &clip_area, &anchor_bboxes);
        }

        if !candidates.iter().any(BridgeDirection::has_coverage) {
            // Nothing spans two anchors: accept lines touching any anchor, along the contour.
            candidates = self.candidates(bridge_direction_override, true);
            for candidate in &mut candidates {
                self.score_touching(candidate, &clip_area);
            }
            if !candidates.iter().any(BridgeDirection::has_coverage) {
                return false;
            }
        }

        let best = score_candidates(&mut candidates);
        let angle = normalize_angle(candidates[best].angle);
        debug!(
            "bridge angle {:.2}° ({} candidate(s), score {:.2})",
            angle.to_degrees(),
            candidates.len(),
            candidates[best].coverage
        );
        self.angle = Some(angle);
        true
    }

    /// Scan-line statistics of a single angle, using the two-anchor rule.
    pub fn evaluate(&self, angle: CoordF) -> BridgeDirection {
        let mut direction = BridgeDirection::new(angle);
        if self.anchor_regions.is_empty() {
            return direction;
        }
        let anchor_bboxes: Vec<BoundingBox> =
            self.anchor_regions.iter().map(ExPolygon::bounding_box).collect();
        self.score_anchored(&mut direction, &self.clip_area(), &anchor_bboxes);
        direction
    }

    fn candidates(&self, bridge_direction_override: CoordF, only_from_polygon: bool) -> Vec<BridgeDirection> {
        if bridge_direction_override != 0.0 {
            vec![BridgeDirection::new(bridge_direction_override)]
        } else {
            bridge_direction_candidates(&self.expolygons, &self.edges, &self.config, only_from_polygon)
        }
    }

    /// Region grown by half a spacing and merged with the grown anchors, shrunk
    /// back, then limited to the grown region. Scan lines ending in an anchor
    /// end strictly inside it instead of on its outline.
    fn clip_area(&self) -> ExPolygons {
        let half = 0.5 * unscale(self.spacing);
        let grown = clipper::offset_expolygons(&self.expolygons, half, OffsetJoinType::Miter);
        let grown_anchors =
            clipper::offset_expolygons(&self.anchor_regions, half, OffsetJoinType::Miter);
        let merged = clipper::union(&grown, &grown_anchors);
        let shrunk = clipper::offset_expolygons(&merged, -half, OffsetJoinType::Miter);
        intersection(&shrunk, &grown)
    }

    /// Parallel lines at `angle` covering the box of `extents`, one spacing
    /// apart and starting half a spacing in.
    fn scan_lines(&self, angle: CoordF, extents: &[ExPolygon]) -> Lines {
        let bbox = get_extents_rotated(extents, -angle);
        if !bbox.defined {
            return Vec::new();
        }
        let (s, c) = angle.sin_cos();
        let rotate_back = |x: Coord, y: Coord| {
            Point::new(
                (c * x as CoordF - s * y as CoordF).round() as Coord,
                (c * y as CoordF + s * x as CoordF).round() as Coord,
            )
        };

        let mut lines = Vec::new();
        let mut y = bbox.min.y + self.spacing / 2;
        while y <= bbox.max.y {
            lines.push(Line::new(rotate_back(bbox.min.x, y), rotate_back(bbox.max.x, y)));
            y += self.spacing;
        }
        lines
    }

    /// Index of the anchor holding `p`; the last one wins on overlap.
    fn anchor_index(&self, p: &Point, bboxes: &[BoundingBox]) -> Option<usize> {
        self.anchor_regions
            .iter()
            .zip(bboxes)
            .rposition(|(anchor, bb)| bb.contains(p) && anchor.contains_point(p))
    }

    /// Whether a line with both ends in anchor `idx` leaves it somewhere.
    ///
    /// Cheap checks first: the midpoint, then the quarter points for long
    /// lines, then exact clipping for very long ones.
    fn crosses_free_space(&self, line: &Line, idx: usize) -> bool {
        let anchor = &self.anchor_regions[idx];
        let mid = line.midpoint();
        if !anchor.contains_point(&mid) {
            return true;
        }
        let length = line.length();
        let spacing = self.spacing as CoordF;
        if length > self.config.midpoint_recheck_factor * spacing {
            let quarters = [Line::new(line.a, mid).midpoint(), Line::new(mid, line.b).midpoint()];
            if quarters.iter().any(|q| !anchor.contains_point(q)) {
                return true;
            }
            if length > self.config.exact_recheck_factor * spacing {
                let pieces = intersection_ln(std::slice::from_ref(line), std::slice::from_ref(anchor));
                return pieces.len() >= 2;
            }
        }
        false
    }

    /// Lines over the anchor box; anchored when the ends sit in two anchors,
    /// or in one anchor with free space in between.
    fn score_anchored(
        &self,
        candidate: &mut BridgeDirection,
        clip_area: &[ExPolygon],
        anchor_bboxes: &[BoundingBox],
    ) {
        let lines = intersection_ln(&self.scan_lines(candidate.angle, &self.anchor_regions), clip_area);
        let mut anchored_lengths = Vec::new();
        for line in &lines {
            let anchored = match (
                self.anchor_index(&line.a, anchor_bboxes),
                self.anchor_index(&line.b, anchor_bboxes),
            ) {
                (Some(a), Some(b)) if a == b => self.crosses_free_space(line, a),
                (Some(_), Some(_)) => true,
                _ => false,
            };
            let length = line.length();
            if anchored {
                anchored_lengths.push(length);
            }
            candidate.record(length, anchored);
        }
        candidate.set_median(anchored_lengths);
    }

    /// Lines over the clip area box; anchored when either end touches an anchor.
    fn score_touching(&self, candidate: &mut BridgeDirection, clip_area: &[ExPolygon]) {
        let lines = intersection_ln(&self.scan_lines(candidate.angle, clip_area), clip_area);
        let mut anchored_lengths = Vec::new();
        for line in &lines {
            let anchored = expolygons_contain(&self.anchor_regions, &line.a)
                || expolygons_contain(&self.anchor_regions, &line.b);
            let length = line.length();
            if anchored {
                anchored_lengths.push(length);
            }
            candidate.record(length, anchored);
        }
        candidate.set_median(anchored_lengths);
    }
}

/// Fold any angle into `[0, PI)`.
pub(super) fn normalize_angle(angle: CoordF) -> CoordF {
    let folded = angle.rem_euclid(PI);
    if folded >= PI {
        0.0
    } else {
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use std::f64::consts::FRAC_PI_2;

    fn make_rect_mm(x0: CoordF, y0: CoordF, x1: CoordF, y1: CoordF) -> ExPolygon {
        Polygon::rectangle(Point::new(scale(x0), scale(y0)), Point::new(scale(x1), scale(y1))).into()
    }

    fn make_square_mm(size: CoordF) -> ExPolygon {
        make_rect_mm(0.0, 0.0, size, size)
    }

    /// 10x10 bridge between two supports of the same height on its left and right.
    fn two_sided(spacing: CoordF) -> BridgeDetector {
        let lower = vec![
            make_rect_mm(-10.0, 0.0, 0.0, 10.0),
            make_rect_mm(10.0, 0.0, 20.0, 10.0),
        ];
        BridgeDetector::new(make_square_mm(10.0), &lower, spacing).unwrap()
    }

    fn is_horizontal(angle: CoordF) -> bool {
        angle < 0.05 || angle > PI - 0.05
    }

    #[test]
    fn test_rejects_bad_spacing() {
        let lower = vec![make_rect_mm(-10.0, 0.0, 0.0, 10.0)];
        for spacing in [0.0, -0.4, CoordF::NAN, 1e-9] {
            let err = BridgeDetector::new(make_square_mm(10.0), &lower, spacing).unwrap_err();
            assert!(matches!(err, Error::Geometry(_)));
        }
    }

    #[test]
    fn test_anchors_and_edges() {
        let detector = two_sided(0.4);
        assert_eq!(detector.anchor_regions().len(), 2);
        assert!(!detector.edges().is_empty());
        assert_eq!(detector.spacing(), 400_000);
        assert_eq!(detector.angle(), None);

        // Each anchor is a 0.4 mm strip along one side.
        for anchor in detector.anchor_regions() {
            let bb = anchor.bounding_box();
            assert!((unscale(bb.width()) - 0.4).abs() < 1e-3);
            assert!((unscale(bb.height()) - 10.0).abs() < 1e-3);
            assert!(anchor.area() > 0.0);
        }
    }

    #[test]
    fn test_floating_region_has_no_angle() {
        let lower = vec![make_rect_mm(30.0, 30.0, 40.0, 40.0)];
        let mut detector = BridgeDetector::new(make_square_mm(10.0), &lower, 0.4).unwrap();
        assert!(detector.anchor_regions().is_empty());
        assert!(detector.edges().is_empty());
        assert!(!detector.detect_angle(0.0));
        assert_eq!(detector.angle(), None);

        let mut detector = BridgeDetector::new(make_square_mm(10.0), &[], 0.4).unwrap();
        assert!(!detector.detect_angle(0.0));
    }

    #[test]
    fn test_two_sided_bridge_spans_supports() {
        let mut detector = two_sided(0.4);
        assert!(detector.detect_angle(0.0));
        let angle = detector.angle().unwrap();
        assert!(is_horizontal(angle), "angle {}", angle);

        let horizontal = detector.evaluate(0.0);
        let vertical = detector.evaluate(FRAC_PI_2);
        assert_eq!(horizontal.nb_lines_anchored, 25);
        assert_eq!(vertical.nb_lines_anchored, 0);
        assert!(horizontal.median_length_anchor > scale(10.0) as CoordF);
    }

    #[test]
    fn test_one_sided_support_uses_contour_angles() {
        let lower = vec![make_rect_mm(-10.0, 0.0, 0.0, 10.0)];
        let mut detector = BridgeDetector::new(make_square_mm(10.0), &lower, 0.4).unwrap();
        assert_eq!(detector.anchor_regions().len(), 1);
        // No line spans two anchors, the touching rule still finds an angle.
        assert_eq!(detector.evaluate(0.0).nb_lines_anchored, 0);
        assert!(detector.detect_angle(0.0));
        let angle = detector.angle().unwrap();
        assert!(is_horizontal(angle) || (angle - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_same_anchor_lines_are_not_bridges() {
        // A U-shaped support: both ends of a horizontal line land in the same anchor.
        let lower = vec![ExPolygon::new(Polygon::from_points(
            [
                (-5.0, -5.0),
                (15.0, -5.0),
                (15.0, 10.0),
                (10.0, 10.0),
                (10.0, 0.0),
                (0.0, 0.0),
                (0.0, 10.0),
                (-5.0, 10.0),
            ]
            .iter()
            .map(|&(x, y)| Point::new(scale(x), scale(y)))
            .collect(),
        ))];
        let detector = BridgeDetector::new(make_square_mm(10.0), &lower, 0.4).unwrap();
        assert_eq!(detector.anchor_regions().len(), 1);
        let horizontal = detector.evaluate(0.0);
        assert!(horizontal.nb_lines_anchored > 20);
        // Vertical lines inside the side strips never leave the anchor.
        let vertical = detector.evaluate(FRAC_PI_2);
        assert!(vertical.nb_lines_anchored < horizontal.nb_lines_anchored);
    }

    #[test]
    fn test_long_lines_are_clipped_exactly() {
        // Support everywhere but a slot at x 4..4.5, away from the midpoint and
        // the quarter points of the horizontal lines.
        let mut support = make_rect_mm(-5.0, -5.0, 15.0, 15.0);
        let slot = Polygon::rectangle(Point::new(scale(4.0), scale(2.0)), Point::new(scale(4.5), scale(8.0)));
        support.holes.push(slot);
        let lower = vec![support];

        // 10.2 mm lines are over 40 spacings at 0.2 mm: clipping finds the slot
        // under the 30 lines between y = 2.1 and y = 7.9.
        let fine = BridgeDetector::new(make_square_mm(10.0), &lower, 0.2).unwrap();
        assert_eq!(fine.anchor_regions().len(), 1);
        assert_eq!(fine.evaluate(0.0).nb_lines_anchored, 30);

        let config = BridgeDetectorConfig {
            exact_recheck_factor: 1000.0,
            ..BridgeDetectorConfig::default()
        };
        let unclipped = BridgeDetector::with_config(vec![make_square_mm(10.0)], &lower, 0.2, config).unwrap();
        assert_eq!(unclipped.evaluate(0.0).nb_lines_anchored, 0);

        // At 0.4 mm the same lines only get the midpoint and quarter checks.
        let coarse = BridgeDetector::new(make_square_mm(10.0), &lower, 0.4).unwrap();
        assert_eq!(coarse.evaluate(0.0).nb_lines_anchored, 0);
    }

    #[test]
    fn test_detected_angle_is_normalized() {
        for angle_override in [0.0, 0.3, FRAC_PI_2, 3.5, -0.5, 2.0 * PI] {
            let mut detector = two_sided(0.4);
            if detector.detect_angle(angle_override) {
                let angle = detector.angle().unwrap();
                assert!((0.0..PI).contains(&angle), "override {} gave {}", angle_override, angle);
            }
        }

        let mut detector = two_sided(0.4);
        assert!(detector.detect_angle(3.5));
        assert!((detector.angle().unwrap() - (3.5 - PI)).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(0.0), 0.0);
        assert!((normalize_angle(PI + 0.25) - 0.25).abs() < 1e-12);
        assert!((normalize_angle(-0.25) - (PI - 0.25)).abs() < 1e-12);
        assert!(normalize_angle(PI) < 1e-12);
    }

    #[test]
    fn test_coarser_spacing_never_anchors_more_lines() {
        let mut previous = usize::MAX;
        for spacing in [0.4, 0.5, 0.8, 1.0] {
            let count = two_sided(spacing).evaluate(0.0).nb_lines_anchored;
            assert!(count <= previous, "spacing {} anchored {} > {}", spacing, count, previous);
            assert!(count > 0);
            previous = count;
        }
    }

    #[test]
    fn test_new_multi() {
        let lower = vec![
            make_rect_mm(-10.0, 0.0, 0.0, 30.0),
            make_rect_mm(10.0, 0.0, 20.0, 30.0),
        ];
        let regions = vec![make_rect_mm(0.0, 0.0, 10.0, 10.0), make_rect_mm(0.0, 20.0, 10.0, 30.0)];
        let mut detector = BridgeDetector::new_multi(regions, &lower, 0.4).unwrap();
        assert_eq!(detector.expolygons().len(), 2);
        assert_eq!(detector.anchor_regions().len(), 4);
        assert!(detector.detect_angle(0.0));
        assert!(is_horizontal(detector.angle().unwrap()));
    }
}
