//! Optional geometry dumps for inspecting bridge detection.
//!
//! The detector reports intermediate shapes to a [`DebugSink`]. The default
//! [`NoopSink`] ignores them; [`SvgDebugSink`] writes one SVG file per call.

use crate::geometry::{BoundingBox, ExPolygon, Point, Polygon, Polyline};
use crate::unscale;
use log::warn;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Caller-owned naming state for debug output: the layer being processed and a
/// counter that makes every dump name unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    pub layer: usize,
    pub counter: usize,
}

impl DiagnosticContext {
    pub fn new(layer: usize) -> Self {
        Self { layer, counter: 0 }
    }

    /// Current counter value, then advance it.
    pub fn next_id(&mut self) -> usize {
        let id = self.counter;
        self.counter += 1;
        id
    }
}

/// A shape handed to a sink, with the color it should be drawn in.
#[derive(Clone, Copy, Debug)]
pub enum DebugShape<'a> {
    /// Filled areas.
    Area(&'a [ExPolygon], &'static str),
    /// Open or closed outlines.
    Outline(&'a [Polyline], &'static str),
}

/// Receiver of intermediate bridge geometry.
pub trait DebugSink {
    /// Whether shapes are wanted at all. Callers skip building them otherwise.
    fn enabled(&self) -> bool {
        true
    }

    fn on_debug_shape(&mut self, ctx: &mut DiagnosticContext, tag: &str, shapes: &[DebugShape<'_>]);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn enabled(&self) -> bool {
        false
    }

    fn on_debug_shape(&mut self, _ctx: &mut DiagnosticContext, _tag: &str, _shapes: &[DebugShape<'_>]) {}
}

/// Writes `<layer>_<tag>_<counter>.svg` into a directory.
#[derive(Clone, Debug)]
pub struct SvgDebugSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl SvgDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl DebugSink for SvgDebugSink {
    fn on_debug_shape(&mut self, ctx: &mut DiagnosticContext, tag: &str, shapes: &[DebugShape<'_>]) {
        let id = ctx.next_id();
        let name = format!("{}_{}_{}.svg", ctx.layer, tag, id);
        let path = self.dir.join(name);
        match std::fs::write(&path, render_svg(shapes)) {
            Ok(()) => self.written.push(path),
            Err(e) => warn!("cannot write debug shape {}: {}", path.display(), e),
        }
    }
}

fn push_ring(d: &mut String, points: &[Point], close: bool) {
    for (i, p) in points.iter().enumerate() {
        let cmd = if i == 0 { 'M' } else { 'L' };
        // SVG y grows downwards.
        let _ = write!(d, "{}{:.4} {:.4} ", cmd, unscale(p.x), -unscale(p.y));
    }
    if close && !points.is_empty() {
        d.push('Z');
    }
}

/// Render shapes in millimeters, y up.
pub(crate) fn render_svg(shapes: &[DebugShape<'_>]) -> String {
    let mut bb = BoundingBox::new();
    for shape in shapes {
        match shape {
            DebugShape::Area(areas, _) => {
                for ex in *areas {
                    bb.merge(&ex.bounding_box());
                }
            }
            DebugShape::Outline(lines, _) => {
                for pl in *lines {
                    bb.merge(&BoundingBox::from_points(pl.points()));
                }
            }
        }
    }
    let (min_x, min_y, width, height) = if bb.defined {
        (
            unscale(bb.min.x),
            -unscale(bb.max.y),
            unscale(bb.width()).max(1e-3),
            unscale(bb.height()).max(1e-3),
        )
    } else {
        (0.0, 0.0, 1.0, 1.0)
    };
    let margin = 0.05 * width.max(height);
    let stroke = 0.005 * width.max(height);

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="{:.4} {:.4} {:.4} {:.4}">"#,
        min_x - margin,
        min_y - margin,
        width + 2.0 * margin,
        height + 2.0 * margin
    );
    for shape in shapes {
        match shape {
            DebugShape::Area(areas, color) => {
                for ex in *areas {
                    let mut d = String::new();
                    for ring in std::iter::once(&ex.contour).chain(ex.holes.iter()) {
                        push_ring(&mut d, Polygon::points(ring), true);
                    }
                    let _ = writeln!(
                        svg,
                        r#"  <path d="{}" fill="{}" fill-opacity="0.5" fill-rule="evenodd" stroke="none"/>"#,
                        d.trim_end(),
                        color
                    );
                }
            }
            DebugShape::Outline(lines, color) => {
                for pl in *lines {
                    let mut d = String::new();
                    push_ring(&mut d, pl.points(), false);
                    let _ = writeln!(
                        svg,
                        r#"  <path d="{}" fill="none" stroke="{}" stroke-width="{:.4}"/>"#,
                        d.trim_end(),
                        color,
                        stroke
                    );
                }
            }
        }
    }
    svg.push_str("</svg>\n");
    svg
}
