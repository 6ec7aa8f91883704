//! Candidate bridging directions and their scores.

use super::BridgeDetectorConfig;
use crate::geometry::{directions_parallel, ExPolygon, Line, Polyline};
use crate::CoordF;
use std::f64::consts::PI;

/// One candidate bridging angle and the statistics of its scan lines.
///
/// Lengths are in scaled units.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgeDirection {
    pub angle: CoordF,
    pub total_length_anchored: CoordF,
    pub total_length_free: CoordF,
    pub max_length_anchored: CoordF,
    pub max_length_free: CoordF,
    pub nb_lines_anchored: usize,
    pub nb_lines_free: usize,
    pub median_length_anchor: CoordF,
    /// Squared length of the contour edge this angle comes from, `0` otherwise.
    pub along_perimeter_length: CoordF,
    /// Composite score in `[0, 105]`.
    pub coverage: CoordF,
}

impl BridgeDirection {
    pub fn new(angle: CoordF) -> Self {
        Self {
            angle,
            ..Self::default()
        }
    }

    pub fn along_perimeter(angle: CoordF, along_perimeter_length: CoordF) -> Self {
        Self {
            angle,
            along_perimeter_length,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_perimeter(&self) -> bool {
        self.along_perimeter_length > 0.0
    }

    /// At least one scan line was anchored.
    #[inline]
    pub fn has_coverage(&self) -> bool {
        self.nb_lines_anchored > 0 && self.total_length_anchored > 0.0
    }

    /// Account one clipped scan line.
    pub fn record(&mut self, length: CoordF, anchored: bool) {
        if anchored {
            self.total_length_anchored += length;
            self.max_length_anchored = self.max_length_anchored.max(length);
            self.nb_lines_anchored += 1;
        } else {
            self.total_length_free += length;
            self.max_length_free = self.max_length_free.max(length);
            self.nb_lines_free += 1;
        }
    }

    /// Store the median of the anchored line lengths (upper median).
    pub fn set_median(&mut self, mut anchored_lengths: Vec<CoordF>) {
        if anchored_lengths.is_empty() {
            return;
        }
        anchored_lengths.sort_by(CoordF::total_cmp);
        self.median_length_anchor = anchored_lengths[anchored_lengths.len() / 2];
    }

    fn anchored_ratio(&self) -> CoordF {
        let total = self.total_length_anchored + self.total_length_free;
        if total > 0.0 {
            self.total_length_anchored / total
        } else {
            0.0
        }
    }
}

/// Remove neighbours parallel within `tolerance`, keeping the one with the longer
/// perimeter edge (the later one on a tie).
fn dedup_parallel(angles: &mut Vec<BridgeDirection>, tolerance: CoordF) {
    let mut i = 1;
    while i < angles.len() {
        if directions_parallel(angles[i].angle, angles[i - 1].angle, tolerance) {
            if angles[i].along_perimeter_length < angles[i - 1].along_perimeter_length {
                angles.remove(i);
            } else {
                angles.remove(i - 1);
                i = (i - 1).max(1);
            }
        } else {
            i += 1;
        }
    }
}

/// Candidate angles for a bridge.
///
/// A uniform sweep (skipped with `only_from_polygon`), the direction of every
/// contour edge and the chord of every anchoring edge, pruned so that perimeter
/// directions win over nearby sweep angles and at most `max_candidates` remain.
pub fn bridge_direction_candidates(
    expolygons: &[ExPolygon],
    edges: &[Polyline],
    config: &BridgeDetectorConfig,
    only_from_polygon: bool,
) -> Vec<BridgeDirection> {
    let resolution = config.resolution;
    let mut angles = Vec::new();

    if !only_from_polygon {
        let steps = (PI / resolution + crate::EPSILON).floor() as usize;
        angles.extend((0..=steps).map(|i| BridgeDirection::new(i as CoordF * resolution)));
    }

    let lines: Vec<Line> = expolygons.iter().flat_map(|ex| ex.lines()).collect();
    let sample = config.contour_sample_size;
    if sample > 0 && lines.len() > sample {
        // Many short edges: only the longer ones are worth a try.
        let mean = lines[..sample].iter().map(Line::length_squared).sum::<CoordF>() / sample as CoordF;
        angles.extend(
            lines
                .iter()
                .filter(|l| l.length_squared() > mean)
                .map(|l| BridgeDirection::along_perimeter(l.direction(), l.length_squared())),
        );
    } else {
        angles.extend(
            lines
                .iter()
                .filter(|l| !l.is_point())
                .map(|l| BridgeDirection::along_perimeter(l.direction(), l.length_squared())),
        );
    }

    // Open anchoring edges, for C-shaped supports.
    for edge in edges {
        if let (Some(first), Some(last)) = (edge.first_point(), edge.last_point()) {
            if first != last {
                angles.push(BridgeDirection::new(Line::new(first, last).direction()));
            }
        }
    }

    angles.sort_by(|a, b| a.angle.total_cmp(&b.angle));

    let mut i = 1;
    while i < angles.len() {
        let (prev, cur) = (&angles[i - 1], &angles[i]);
        if prev.is_perimeter() != cur.is_perimeter()
            && directions_parallel(cur.angle, prev.angle, resolution)
        {
            let drop = if prev.is_perimeter() { i } else { i - 1 };
            angles.remove(drop);
            // Compare the survivor with the element that moved next to it.
            i = drop.max(1);
            continue;
        }
        i += 1;
    }

    let mut tolerance = resolution / 8.0;
    dedup_parallel(&mut angles, tolerance);
    while angles.len() > config.max_candidates.max(1) {
        tolerance *= 2.0;
        dedup_parallel(&mut angles, tolerance);
    }

    // 0 and PI are the same direction.
    if angles.len() > 1 {
        if let (Some(front), Some(back)) = (angles.first(), angles.last()) {
            if directions_parallel(front.angle, back.angle, tolerance) {
                angles.pop();
            }
        }
    }
    angles
}

/// Composite score of every candidate; returns the index of the best one.
///
/// 70 points for the anchored length ratio, 15 for a short median anchored
/// line, 15 for a short longest anchored line, 5 for a perimeter direction.
/// The first candidate wins a tie.
pub fn score_candidates(candidates: &mut [BridgeDirection]) -> usize {
    if candidates.is_empty() {
        return 0;
    }
    let bounds = |f: fn(&BridgeDirection) -> CoordF| {
        candidates.iter().map(f).fold((CoordF::INFINITY, CoordF::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (min_median, max_median) = bounds(|c| c.median_length_anchor);
    let (min_max, max_max) = bounds(|c| c.max_length_anchored);

    for c in candidates.iter_mut() {
        let ratio_median =
            1.0 - (c.median_length_anchor - min_median) / (max_median - min_median).max(1.0);
        let ratio_max = 1.0 - (c.max_length_anchored - min_max) / (max_max - min_max).max(1.0);
        c.coverage = 70.0 * c.anchored_ratio() + 15.0 * ratio_median + 15.0 * ratio_max;
        if c.is_perimeter() {
            c.coverage += 5.0;
        }
        log::trace!(
            "candidate {:.2}°: anchored {}/{} lines, score {:.2}",
            c.angle.to_degrees(),
            c.nb_lines_anchored,
            c.nb_lines_anchored + c.nb_lines_free,
            c.coverage
        );
    }

    // Keep the first maximum.
    let mut best = 0;
    for (i, c) in candidates.iter().enumerate().skip(1) {
        if c.coverage > candidates[best].coverage {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon};
    use crate::scale;
    use std::f64::consts::FRAC_PI_2;

    fn make_square_mm(size: CoordF) -> ExPolygon {
        Polygon::rectangle(Point::new(0, 0), Point::new(scale(size), scale(size))).into()
    }

    fn make_circle_mm(radius: CoordF, segments: usize) -> ExPolygon {
        let points = (0..segments)
            .map(|i| {
                let a = 2.0 * PI * i as CoordF / segments as CoordF;
                Point::new(scale(radius * a.cos()), scale(radius * a.sin()))
            })
            .collect();
        Polygon::from_points(points).into()
    }

    fn assert_pruned(angles: &[BridgeDirection], config: &BridgeDetectorConfig) {
        assert!(angles.len() <= config.max_candidates);
        for pair in angles.windows(2) {
            assert!(pair[0].angle <= pair[1].angle);
            assert!(!directions_parallel(pair[0].angle, pair[1].angle, config.resolution / 8.0));
        }
    }

    #[test]
    fn test_square_candidates() {
        let config = BridgeDetectorConfig::default();
        let angles = bridge_direction_candidates(&[make_square_mm(10.0)], &[], &config, false);
        assert_pruned(&angles, &config);

        // Perimeter directions replace the sweep angles they coincide with.
        let zero = angles.iter().find(|c| c.angle.abs() < 1e-9).unwrap();
        assert!(zero.is_perimeter());
        let right = angles.iter().find(|c| (c.angle - FRAC_PI_2).abs() < 1e-9).unwrap();
        assert!(right.is_perimeter());
        assert_eq!(angles.iter().filter(|c| c.is_perimeter()).count(), 2);

        // The sweep ends below PI since PI duplicates 0.
        assert!(angles.last().unwrap().angle < PI - 1e-6);
        assert!(angles.len() > 80);
    }

    #[test]
    fn test_only_from_polygon() {
        let config = BridgeDetectorConfig::default();
        let angles = bridge_direction_candidates(&[make_square_mm(10.0)], &[], &config, true);
        assert_eq!(angles.len(), 2);
        assert!(angles.iter().all(BridgeDirection::is_perimeter));
    }

    #[test]
    fn test_edge_chords_are_candidates() {
        let config = BridgeDetectorConfig::default();
        let edge = Polyline::from_points(vec![
            Point::new(0, 0),
            Point::new(scale(5.0), scale(1.0)),
            Point::new(scale(10.0), scale(10.0)),
        ]);
        let angles = bridge_direction_candidates(&[make_square_mm(10.0)], &[edge], &config, true);
        assert!(angles.iter().any(|c| (c.angle - PI / 4.0).abs() < 1e-6 && !c.is_perimeter()));
    }

    #[test]
    fn test_candidate_cap() {
        let config = BridgeDetectorConfig::default();
        let circle = make_circle_mm(20.0, 720);
        let angles = bridge_direction_candidates(&[circle], &[], &config, false);
        assert_pruned(&angles, &config);

        let config = BridgeDetectorConfig {
            max_candidates: 20,
            ..BridgeDetectorConfig::default()
        };
        let angles = bridge_direction_candidates(&[make_circle_mm(20.0, 720)], &[], &config, false);
        assert!(angles.len() <= 20);
        assert!(!angles.is_empty());
    }

    #[test]
    fn test_record_and_median() {
        let mut dir = BridgeDirection::new(0.0);
        dir.record(10.0, true);
        dir.record(30.0, true);
        dir.record(20.0, true);
        dir.record(5.0, false);
        dir.set_median(vec![10.0, 30.0, 20.0]);
        assert_eq!(dir.nb_lines_anchored, 3);
        assert_eq!(dir.nb_lines_free, 1);
        assert_eq!(dir.max_length_anchored, 30.0);
        assert_eq!(dir.median_length_anchor, 20.0);
        assert!(dir.has_coverage());
    }

    #[test]
    fn test_score_prefers_anchored_then_perimeter() {
        let mut a = BridgeDirection::new(0.1);
        a.record(100.0, true);
        a.record(100.0, false);
        a.set_median(vec![100.0]);

        let mut b = BridgeDirection::new(0.2);
        b.record(100.0, true);
        b.set_median(vec![100.0]);

        let mut c = BridgeDirection::along_perimeter(0.3, 4.0);
        c.record(100.0, true);
        c.set_median(vec![100.0]);

        let mut candidates = vec![a, b, c];
        let best = score_candidates(&mut candidates);
        assert_eq!(best, 2);
        assert!((candidates[0].coverage - 65.0).abs() < 1e-9);
        assert!((candidates[1].coverage - 100.0).abs() < 1e-9);
        assert!((candidates[2].coverage - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_tie_keeps_first() {
        let mut candidates: Vec<_> = [0.5, 0.7]
            .iter()
            .map(|&angle| {
                let mut c = BridgeDirection::new(angle);
                c.record(50.0, true);
                c.set_median(vec![50.0]);
                c
            })
            .collect();
        assert_eq!(score_candidates(&mut candidates), 0);
    }

    #[test]
    fn test_score_empty_candidate_is_finite() {
        let mut candidates = vec![BridgeDirection::new(0.0), BridgeDirection::new(1.0)];
        candidates[1].record(10.0, true);
        candidates[1].set_median(vec![10.0]);
        let best = score_candidates(&mut candidates);
        assert!(candidates.iter().all(|c| c.coverage.is_finite()));
        assert_eq!(best, 1);
    }
}
