//! Bridge detection.
//!
//! Given an unsupported region and the slices of the layer below, find the
//! direction in which to bridge it and the part of it that bridge lines can span.
//!
//! # Algorithm Overview
//!
//! 1. **Anchors**: grow the region by the extrusion spacing and intersect it with
//!    the lower slices. The grown outline over the lower contours gives the
//!    supporting edges.
//!
//! 2. **Candidates**: a uniform angle sweep, the direction of every contour edge
//!    and the chord of every supporting edge, deduplicated so that contour
//!    directions win over nearby sweep angles.
//!
//! 3. **Scoring**: for every candidate, clip parallel scan lines to the region and
//!    count those whose ends land in two anchors (or leave a single anchor and come
//!    back). The score mixes the anchored length ratio with short median and
//!    maximum spans, plus a bonus for contour directions.
//!
//! 4. **Coverage**: rotate so the bridge runs vertically, cut into trapezoids and
//!    keep those reaching two anchors.

mod candidates;
mod coverage;
mod debug;
mod detector;

pub use candidates::BridgeDirection;
pub use debug::{DebugShape, DebugSink, DiagnosticContext, NoopSink, SvgDebugSink};
pub use detector::BridgeDetector;

use crate::geometry::{ExPolygons, PointF, Polylines};
use crate::{CoordF, Error, Result, SCALING_FACTOR};
use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Tuning of the bridge detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeDetectorConfig {
    /// Step of the uniform angle sweep (radians).
    pub resolution: CoordF,
    /// Upper bound on the number of scored angles.
    pub max_candidates: usize,
    /// Above this many contour edges, only edges longer than the mean of the
    /// first `contour_sample_size` become candidates.
    pub contour_sample_size: usize,
    /// Lines longer than this many spacings also check their quarter points.
    pub midpoint_recheck_factor: CoordF,
    /// Lines longer than this many spacings are clipped exactly.
    pub exact_recheck_factor: CoordF,
    /// Edges closer than this to the bridge angle are not reported as unsupported (radians).
    pub parallel_tolerance: CoordF,
    /// Slice coverage into spacing-wide columns.
    pub precise: bool,
    /// Prefilter anchors by bounding box when counting trapezoid supports.
    pub straight_bridges: bool,
}

impl Default for BridgeDetectorConfig {
    fn default() -> Self {
        Self {
            resolution: PI / 90.0,
            max_candidates: 200,
            contour_sample_size: 200,
            midpoint_recheck_factor: 10.0,
            exact_recheck_factor: 40.0,
            parallel_tolerance: 1e-4,
            precise: false,
            straight_bridges: false,
        }
    }
}

impl BridgeDetectorConfig {
    pub fn resolution(mut self, resolution: CoordF) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    pub fn precise(mut self, precise: bool) -> Self {
        self.precise = precise;
        self
    }

    pub fn straight_bridges(mut self, straight: bool) -> Self {
        self.straight_bridges = straight;
        self
    }

    /// Reject values the detector cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution > 0.0 && self.resolution < PI) {
            return Err(Error::Config(format!(
                "bridge resolution must be in (0, PI), got {}",
                self.resolution
            )));
        }
        if self.max_candidates == 0 {
            return Err(Error::Config("max_candidates must be at least 1".into()));
        }
        if self.parallel_tolerance < 0.0 {
            return Err(Error::Config(format!(
                "parallel_tolerance must not be negative, got {}",
                self.parallel_tolerance
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BridgeDetectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BridgeDetectorConfig({:.1}° steps, {} candidates max, {}{})",
            self.resolution.to_degrees(),
            self.max_candidates,
            if self.precise { "precise" } else { "coarse" },
            if self.straight_bridges { ", straight" } else { "" }
        )
    }
}

/// One region to bridge, as read from a batch description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRegion {
    pub expolygons: ExPolygons,
    pub lower_slices: ExPolygons,
    /// Extrusion spacing in mm.
    pub spacing: CoordF,
    #[serde(default)]
    pub layer_index: usize,
    /// Forced angle in radians, `0` to detect.
    #[serde(default)]
    pub angle_override: CoordF,
}

/// Detection result for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct Bridge {
    pub layer_index: usize,
    /// Bridging angle in `[0, PI)`, `None` when the region cannot be bridged.
    pub angle: Option<CoordF>,
    /// Area spanned between two anchors.
    pub coverage: ExPolygons,
    /// Outline edges that would need support at this angle.
    pub unsupported_edges: Polylines,
}

impl Bridge {
    /// Unit vector along the bridge.
    pub fn direction(&self) -> Option<PointF> {
        self.angle.map(|a| PointF::new(a.cos(), a.sin()))
    }

    pub fn area_mm2(&self) -> CoordF {
        crate::clipper::total_area(&self.coverage) / (SCALING_FACTOR * SCALING_FACTOR)
    }
}

/// Run detection and coverage over many independent regions.
///
/// `cancel` is polled before each region; when it returns `true` the batch
/// stops with [`Error::Cancelled`]. Regions without an angle are returned
/// with empty coverage.
pub fn detect_layer_bridges(
    regions: &[BridgeRegion],
    config: &BridgeDetectorConfig,
    mut cancel: impl FnMut() -> bool,
    sink: &mut dyn DebugSink,
) -> Result<Vec<Bridge>> {
    config.validate()?;
    let mut ctx = DiagnosticContext::default();
    let mut bridges = Vec::with_capacity(regions.len());

    for region in regions {
        if cancel() {
            return Err(Error::Cancelled);
        }
        ctx.layer = region.layer_index;

        let mut detector = BridgeDetector::with_config(
            region.expolygons.clone(),
            &region.lower_slices,
            region.spacing,
            config.clone(),
        )?;
        if sink.enabled() {
            sink.on_debug_shape(
                &mut ctx,
                "init_bridges",
                &[
                    DebugShape::Area(&region.expolygons, "grey"),
                    DebugShape::Area(&region.lower_slices, "green"),
                    DebugShape::Area(detector.anchor_regions(), "orange"),
                ],
            );
        }

        let angle = if detector.detect_angle(region.angle_override) {
            detector.angle()
        } else {
            None
        };
        let bridge = match angle {
            Some(_) => Bridge {
                layer_index: region.layer_index,
                angle,
                coverage: detector.coverage_traced(
                    None,
                    config.precise,
                    config.straight_bridges,
                    sink,
                    &mut ctx,
                ),
                unsupported_edges: detector.unsupported_edges(None),
            },
            None => {
                debug!("layer {}: no bridging direction", region.layer_index);
                Bridge {
                    layer_index: region.layer_index,
                    angle: None,
                    coverage: Vec::new(),
                    unsupported_edges: Vec::new(),
                }
            }
        };
        bridges.push(bridge);
    }
    Ok(bridges)
}
