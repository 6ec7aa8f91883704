//! # Slicer post-processing
//!
//! Geometry and toolpath post-processing stages of a 3D-printing slicer.
//!
//! This library provides two independent pipelines:
//! - Bridge detection: choose the fill direction over an unsupported region and
//!   compute the trapezoidal area that can be bridged between anchors
//! - Pressure-advance re-timing: rebuild per-segment velocity profiles of a G-code
//!   stream and rewrite extrusion amounts to compensate for nozzle pressure
//!
//! ## Example
//!
//! ```rust,ignore
//! use slicer_post::{BridgeDetector, PressureAdvance, PressureAdvanceConfig};
//!
//! let mut detector = BridgeDetector::new(region, &lower_slices, spacing)?;
//! if detector.detect_angle(0.0) {
//!     let area = detector.coverage(None, false, false);
//! }
//!
//! let mut pa = PressureAdvance::new(PressureAdvanceConfig::default(), 0);
//! let out = pa.process_gcode(&gcode, true);
//! ```

// Core modules
pub mod bridge;
pub mod clipper;
pub mod config;
pub mod gcode;
pub mod geometry;

// Re-export commonly used types
pub use config::{GCodeFlavor, MachineLimits, PressureAdvanceConfig};
pub use geometry::{BoundingBox, ExPolygon, Line, Point, Polygon, Polyline};

// Re-export bridge detection
pub use bridge::{
    detect_layer_bridges, Bridge, BridgeDetector, BridgeDetectorConfig, BridgeDirection,
    BridgeRegion, DebugSink, DiagnosticContext, NoopSink, SvgDebugSink,
};

// Re-export G-code processing
pub use gcode::pressure_advance::{MotionBuffer, MotionSegment, PressureAdvance, PropagationOutcome};
pub use gcode::{GCodeLine, GCodeReader};

// Re-export clipper operations
pub use clipper::{
    diff_pl, difference, intersection, intersection_ln, intersection_pl, offset_expolygon,
    offset_expolygons, union, union_ex, union_safety_offset, OffsetJoinType,
};

/// Coordinate type used throughout the library.
/// Using i64 for integer coordinates (scaled by SCALING_FACTOR) to avoid floating-point issues.
pub type Coord = i64;

/// Floating-point coordinate type for unscaled values.
pub type CoordF = f64;

/// Scaling factor: coordinates are stored as integers scaled by this factor.
/// 1 unit = 1 nanometer, so 1mm = 1_000_000 units.
pub const SCALING_FACTOR: f64 = 1_000_000.0;

/// Angular and speed comparison tolerance.
pub const EPSILON: f64 = 1e-4;

/// Scale a floating-point coordinate to integer.
#[inline]
pub fn scale(v: CoordF) -> Coord {
    (v * SCALING_FACTOR).round() as Coord
}

/// Unscale an integer coordinate to floating-point.
#[inline]
pub fn unscale(v: Coord) -> CoordF {
    v as CoordF / SCALING_FACTOR
}

/// Scale a floating-point coordinate to integer (same as scale, for compatibility).
#[inline]
pub fn scaled(v: CoordF) -> Coord {
    scale(v)
}

/// Unscale an integer coordinate to floating-point (same as unscale, for compatibility).
#[inline]
pub fn unscaled(v: Coord) -> CoordF {
    unscale(v)
}

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for post-processing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("G-code error: {0}")]
    GCode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling() {
        // 1mm should scale to 1_000_000
        assert_eq!(scale(1.0), 1_000_000);

        // And back
        assert!((unscale(1_000_000) - 1.0).abs() < 1e-10);

        // Test sub-millimeter precision
        assert_eq!(scale(0.001), 1_000); // 1 micron
        assert_eq!(scale(0.0001), 100); // 100 nanometers
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
        assert_eq!(
            Error::Geometry("spacing must be positive".into()).to_string(),
            "Invalid geometry: spacing must be positive"
        );
    }
}
