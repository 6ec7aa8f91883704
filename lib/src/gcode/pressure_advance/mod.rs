//! Pressure-advance re-timing.
//!
//! The processor reads a G-code stream line by line and keeps every line in a
//! [`MotionBuffer`] until enough travel has been seen after it. Each new move
//! fixes the junction speed with the move before it; the [`JunctionSolver`]
//! then reshapes the buffered velocity profiles (splitting moves where needed)
//! so every move can reach that speed within its acceleration limits.
//!
//! When a line leaves the buffer its axis words are rewritten to the possibly
//! split end position, and its extrusion gets the pressure term:
//! `pressure_factor * (speed_end - speed_start)` in relative mode, the end
//! extruder speed times the factor folded into the position in absolute mode.
//!
//! Non-motion lines (tool changes, `M204`, comments) only have side effects and
//! pass through in order.

mod buffer;
mod junction;

pub use buffer::{MotionBuffer, MotionSegment, ProfileNote};
pub use junction::{accel_distance, delta_speed, junction_speed, JunctionSolver, PropagationOutcome};

use crate::config::{EffectiveLimits, GCodeFlavor, PressureAdvanceConfig};
use crate::gcode::reader::{leading_f64, Axis, GCodeLine, GCodeReader};
use crate::CoordF;
use log::{debug, error, warn};

/// Speed differences below this (mm/s) are treated as equal.
pub const SPEED_EPSILON: CoordF = 1e-6;

/// Comment setting the pressure factor for the following moves.
const PRESSURE_FACTOR_TAG: &str = "; PRESSURE_FACTOR=";

/// Re-timing pass for one extruder stream.
#[derive(Debug)]
pub struct PressureAdvance {
    config: PressureAdvanceConfig,
    limits: EffectiveLimits,
    solver: JunctionSolver,
    reader: GCodeReader,
    buffer: MotionBuffer,

    // Modal state at the back of the buffer.
    current_speed: CoordF,
    current_acceleration: CoordF,
    current_deceleration: CoordF,
    current_retract_acceleration: CoordF,
    current_extruder: usize,
    pressure_factor_override: Option<CoordF>,
    e_reset_pending: bool,
    arc_warned: bool,

    partial_propagations: usize,
    output: String,
    collected: Option<Vec<MotionSegment>>,
}

impl PressureAdvance {
    pub fn new(config: PressureAdvanceConfig, current_extruder: usize) -> Self {
        let limits = config.machine_limits.effective();
        let min_split_length = 10f64.powi(-(config.gcode_precision_xyz as i32));
        Self {
            solver: JunctionSolver::new(config.split_ratio_threshold, min_split_length),
            reader: GCodeReader::new(config.extrusion_axis),
            buffer: MotionBuffer::new(),
            current_speed: limits.max_speed_x,
            current_acceleration: limits.max_acceleration_x,
            current_deceleration: limits.max_acceleration_x,
            current_retract_acceleration: limits.max_acceleration_x,
            current_extruder,
            pressure_factor_override: None,
            e_reset_pending: false,
            arc_warned: false,
            partial_propagations: 0,
            output: String::new(),
            collected: None,
            limits,
            config,
        }
    }

    pub fn config(&self) -> &PressureAdvanceConfig {
        &self.config
    }

    pub fn buffer(&self) -> &MotionBuffer {
        &self.buffer
    }

    pub fn current_extruder(&self) -> usize {
        self.current_extruder
    }

    /// Select the extruder for the next call. A change flushes the buffer first.
    pub fn set_current_extruder(&mut self, extruder: usize) {
        if extruder != self.current_extruder {
            self.flush();
        }
        self.current_extruder = extruder;
    }

    pub fn current_acceleration(&self) -> CoordF {
        self.current_acceleration
    }

    pub fn current_retract_acceleration(&self) -> CoordF {
        self.current_retract_acceleration
    }

    /// Number of backward walks that ran out of buffer so far.
    pub fn partial_propagations(&self) -> usize {
        self.partial_propagations
    }

    /// Pressure factor currently applied to new moves.
    pub fn pressure_factor(&self) -> CoordF {
        self.pressure_factor_override
            .unwrap_or_else(|| self.config.pressure_factor(self.current_extruder))
    }

    /// Process a chunk of G-code and return the lines that left the buffer.
    ///
    /// With `flush`, the last move is brought to a stop and the whole buffer is written.
    /// Lines written by a [`flush`](Self::flush) between calls come first.
    pub fn process_gcode(&mut self, gcode: &str, flush: bool) -> String {
        self.buffer.recompute_totals();

        let mut reader = std::mem::take(&mut self.reader);
        reader.parse_buffer(gcode, |reader, line| self.process_line(reader, line));
        self.reader = reader;

        if flush {
            self.flush();
        }
        std::mem::take(&mut self.output)
    }

    /// Like [`process_gcode`](Self::process_gcode), returning the written segments
    /// with their final speeds instead of the text.
    pub fn process_segments(&mut self, gcode: &str, flush: bool) -> Vec<MotionSegment> {
        self.collected = Some(Vec::new());
        self.process_gcode(gcode, flush);
        self.collected.take().unwrap_or_default()
    }

    /// Stop at the last move and write out the whole buffer.
    pub fn flush(&mut self) {
        if let Some(last) = self.buffer.last_useful_before(self.buffer.len()) {
            if self.buffer.get(last).is_some_and(|s| s.speed_end > 0.0) {
                self.propagate(last, 0.0);
            }
        }
        while !self.buffer.is_empty() {
            self.write_front();
        }
    }

    fn propagate(&mut self, last_idx: usize, junction: CoordF) {
        if self.solver.update_last_move(&mut self.buffer, last_idx, junction)
            == PropagationOutcome::PartialWarning
        {
            self.partial_propagations += 1;
        }
    }

    fn write_front(&mut self) {
        let Some(mut segment) = self.buffer.pop_front() else {
            return;
        };
        if segment.is_motion && segment.is_useful_move() {
            segment.update_axis_values(
                self.config.gcode_precision_xyz,
                self.config.gcode_precision_e,
                self.config.use_relative_e,
            );
        }
        self.output.push_str(&segment.raw);
        if self.config.gcode_comments {
            if let Some(comment) = segment.timing_comment() {
                self.output.push_str("; ");
                self.output.push_str(&comment);
            }
        }
        self.output.push('\n');
        if let Some(collected) = self.collected.as_mut() {
            collected.push(segment);
        }
    }

    fn process_line(&mut self, reader: &GCodeReader, line: &GCodeLine) {
        let raw = line.raw();
        let mut cmd = line.cmd().to_string();
        // Commented-out M commands (";M204 S800") still carry settings.
        if raw.len() > 3 && raw.starts_with(";M") {
            let end = raw.find(' ').unwrap_or(raw.len());
            cmd = raw[1..end].to_string();
        }

        let mut written_speed = 0.0;
        let mut distances = None;
        if cmd.len() > 1 {
            if let Some(f) = line.f() {
                self.current_speed = f / 60.0;
            }
            written_speed = self.current_speed;

            match cmd.as_bytes()[0].to_ascii_uppercase() {
                b'A' if cmd.contains("ACTIVATE_EXTRUDER") => self.process_activate_extruder(raw),
                b'T' => self.process_t(&cmd),
                b'G' if line.is_motion() => {
                    if line.command_number().is_some_and(|n| n >= 2) && !self.arc_warned {
                        warn!("Pressure advance doesn't support arcs (G2/G3).");
                        self.arc_warned = true;
                    }
                    distances = Some(self.axis_distances(reader, line));
                }
                b'G' if line.command_number() == Some(92) => {
                    if line.has(Axis::E) {
                        self.e_reset_pending = true;
                    }
                }
                b'M' if cmd[1..].starts_with("204") => self.process_m204(line),
                _ => {}
            }
        } else if line.is_comment() {
            self.process_comment(raw);
        }

        let (max_axle, max_axle_xyz) = distances.map_or((0.0, 0.0), |d| (d.max_axle, d.max_axle_xyz));
        let mut segment = MotionSegment::new(
            raw,
            max_axle,
            max_axle_xyz,
            written_speed,
            self.current_acceleration,
            self.current_deceleration,
        );
        segment.pressure_factor = self.pressure_factor();
        if let Some(d) = distances {
            self.fill_motion(&mut segment, reader, line, &d);
        }
        let is_motion = segment.is_motion;
        let index = self.buffer.push_back(segment);

        if is_motion {
            self.chain_new_segment(index);
        }

        while !self.buffer.is_empty()
            && self.buffer.distance_size() > self.config.buffer_distance_span
            && self.buffer.useful_size() > self.config.buffer_useful_size_span
        {
            self.write_front();
        }
    }

    /// Per-axis distances of a motion line, measured between positions rounded
    /// the way they are written out.
    fn axis_distances(&self, reader: &GCodeReader, line: &GCodeLine) -> AxisDistances {
        let distance = |axis: Axis, decimals: u8| {
            if !line.has(axis) {
                return 0.0;
            }
            let from = reader.position(axis);
            on_grid(from + line.dist(axis, reader), decimals) - on_grid(from, decimals)
        };
        let xyz = self.config.gcode_precision_xyz;
        let dx = distance(Axis::X, xyz);
        let dy = distance(Axis::Y, xyz);
        let dz = distance(Axis::Z, xyz);
        let de = if self.config.use_relative_e {
            line.e().map_or(0.0, |e| on_grid(e, self.config.gcode_precision_e))
        } else {
            distance(Axis::E, self.config.gcode_precision_e)
        };

        let mut max_axle_xyz = if self.config.speed_xy_combined {
            dx.hypot(dy)
        } else {
            dx.abs().max(dy.abs())
        };
        max_axle_xyz = max_axle_xyz.max(dz.abs());
        AxisDistances {
            dx,
            dy,
            dz,
            de,
            max_axle_xyz,
            max_axle: max_axle_xyz.max(de.abs()),
        }
    }

    /// Positions, deltas and per-axis limits of a motion line.
    fn fill_motion(
        &mut self,
        segment: &mut MotionSegment,
        reader: &GCodeReader,
        line: &GCodeLine,
        d: &AxisDistances,
    ) {
        segment.is_motion = true;
        let xyz = self.config.gcode_precision_xyz;
        if line.has(Axis::X) {
            segment.x = Some(on_grid(reader.x(), xyz));
            segment.dx = d.dx;
        }
        if line.has(Axis::Y) {
            segment.y = Some(on_grid(reader.y(), xyz));
            segment.dy = d.dy;
        }
        if self.config.speed_xy_combined && (line.has(Axis::X) || line.has(Axis::Y)) {
            segment.dxy = segment.dx.hypot(segment.dy);
        }
        if line.has(Axis::Z) {
            segment.z = Some(on_grid(reader.z(), xyz));
            segment.dz = d.dz;
        }
        if line.has(Axis::E) {
            segment.e_char = line.e_char();
            segment.de = d.de;
            if self.config.use_relative_e {
                segment.e = Some(0.0);
            } else {
                segment.e = Some(on_grid(reader.e(), self.config.gcode_precision_e));
                if self.e_reset_pending {
                    self.e_reset_pending = false;
                    segment.after_e_reset = true;
                }
            }
        }
        if line.has(Axis::F) {
            segment.f = Some(segment.written_speed * 60.0);
        }

        let time = if segment.max_axle > 0.0 && segment.written_speed > 0.0 {
            segment.max_axle / segment.written_speed
        } else {
            0.0
        };
        self.apply_axis_limits(segment, time);

        if segment.is_non_extruding() {
            segment.speed_start = 0.0;
            segment.speed_end = 0.0;
            segment.acceleration = 0.0;
            segment.deceleration = 0.0;
        }
    }

    /// Slow the segment down when an axis would exceed its own speed limit, and
    /// bound its acceleration by every moving axis.
    fn apply_axis_limits(&self, segment: &mut MotionSegment, time: CoordF) {
        let l = &self.limits;
        let axle = if segment.max_axle != 0.0 {
            segment.max_axle.abs()
        } else {
            1.0
        };
        let mut real_time = time;
        let mut accel_s2 = segment.acceleration / axle;
        let mut decel_s2 = segment.deceleration / axle;
        let mut constrain = |delta: CoordF, min_time: CoordF, axis_accel: CoordF| {
            if min_time > 0.0 {
                real_time = real_time.max(min_time);
                accel_s2 = accel_s2.min(axis_accel / delta.abs());
                decel_s2 = decel_s2.min(axis_accel / delta.abs());
            }
        };

        if self.config.speed_xy_combined {
            let xy_min_time = segment.dxy.abs() / l.max_speed_x;
            if xy_min_time > 0.0 {
                let axis_accel = (l.max_acceleration_x / segment.dx.abs())
                    .min(l.max_acceleration_y / segment.dy.abs());
                constrain(1.0, xy_min_time, axis_accel);
            }
        } else {
            constrain(segment.dx, segment.dx.abs() / l.max_speed_x, l.max_acceleration_x);
            constrain(segment.dy, segment.dy.abs() / l.max_speed_y, l.max_acceleration_y);
        }
        constrain(segment.dz, segment.dz.abs() / l.max_speed_z, l.max_acceleration_z);
        constrain(segment.de, segment.de.abs() / l.max_speed_e, l.max_acceleration_e);

        segment.max_axle_acceleration = accel_s2 * axle;
        segment.max_axle_deceleration = decel_s2 * axle;
        if real_time > time {
            let scale = if real_time > 0.0 { time / real_time } else { 0.0 };
            segment.speed_start *= scale;
            segment.speed_end *= scale;
        }
    }

    /// Link the segment just pushed at `index` to the last useful move before it.
    fn chain_new_segment(&mut self, index: usize) {
        let last_idx = self.buffer.last_useful_before(index);
        let Some(new) = self.buffer.get(index) else {
            return;
        };
        let useful = new.is_useful_move();
        if new.max_axle_xyz == 0.0 || new.is_non_extruding() {
            if let Some(new) = self.buffer.get_mut(index) {
                new.speed_start = 0.0;
                new.speed_end = 0.0;
            }
        }
        let Some(new) = self.buffer.get(index) else {
            return;
        };
        let junction = junction_speed(last_idx.and_then(|i| self.buffer.get(i)), new);
        if !useful {
            return;
        }
        if let Some(new) = self.buffer.get_mut(index) {
            new.speed_start = junction.min(new.speed_end);
        }
        if let Some(last_idx) = last_idx {
            self.propagate(last_idx, junction);
        }

        // Earlier splits shifted the new segment to the back.
        let back = self.buffer.len() - 1;
        self.solver.resolve_new_segment(&mut self.buffer, back);
    }

    fn process_comment(&mut self, raw: &str) {
        if let Some(value) = raw.strip_prefix(PRESSURE_FACTOR_TAG) {
            self.pressure_factor_override = leading_f64(value).filter(|v| *v >= 0.0);
            debug!("pressure factor override: {:?}", self.pressure_factor_override);
        }
    }

    /// `T<n>`: a new tool flushes the buffer.
    fn process_t(&mut self, cmd: &str) {
        let Some(number) = cmd.get(1..) else { return };
        match number.parse::<i32>() {
            Ok(id) if (0..=255).contains(&id) => self.set_current_extruder(id as usize),
            parsed => {
                let flavor = self.config.gcode_flavor;
                if flavor.is_marlin() && matches!(cmd, "Tx" | "Tc" | "T?") {
                    return;
                }
                let deselect = parsed == Ok(-1);
                if matches!(flavor, GCodeFlavor::RepRap | GCodeFlavor::Sprinter) && deselect {
                    return;
                }
                self.set_current_extruder(0);
            }
        }
    }

    /// `M204`: `S` sets acceleration and deceleration (legacy form), otherwise `P`
    /// sets the printing acceleration and `R` the retraction one.
    fn process_m204(&mut self, line: &GCodeLine) {
        let raw = line.raw();
        if raw.starts_with(';') {
            if let Some(value) = raw.find('S').and_then(|pos| leading_f64(&raw[pos + 1..])) {
                if value > 0.0 {
                    self.current_acceleration = value;
                    self.current_deceleration = value;
                }
            }
        } else if let Some(value) = line.value('S') {
            if value > 0.0 {
                self.current_acceleration = value;
                self.current_deceleration = value;
            }
        } else {
            if let Some(value) = line.value('P').filter(|v| *v > 0.0) {
                self.current_acceleration = value;
            }
            self.current_deceleration = self.current_acceleration;
            self.current_retract_acceleration = self.current_acceleration;
            if let Some(value) = line.value('R').filter(|v| *v > 0.0) {
                self.current_retract_acceleration = value;
            }
        }
    }

    /// `ACTIVATE_EXTRUDER EXTRUDER=<name>` (Klipper).
    fn process_activate_extruder(&mut self, raw: &str) {
        const COMMAND: &str = "ACTIVATE_EXTRUDER";
        const KEY: &str = "EXTRUDER";
        let name = raw.find(COMMAND).and_then(|pos| {
            let rest = &raw[pos + COMMAND.len()..];
            let key = rest.find(KEY)?;
            let value = rest[key + KEY.len()..].trim_start_matches([' ', '=', '\t']);
            value.split_whitespace().next()
        });

        if let Some(name) = name {
            let count = self
                .config
                .tool_name
                .len()
                .max(self.config.extruder_pressure_factor.len())
                .max(1);
            if let Some(id) = self.config.tool_name.iter().position(|t| t == name) {
                self.set_current_extruder(id);
                return;
            }
            if name == "extruder" {
                self.set_current_extruder(0);
                return;
            }
            if let Some(id) = (0..count).find(|id| name == format!("extruder{}", id)) {
                self.set_current_extruder(id);
                return;
            }
        }
        error!(
            "invalid ACTIVATE_EXTRUDER gcode command: '{}', ignored by the pressure advance post-process.",
            raw
        );
    }
}

/// Round `value` to `decimals` digits, as [`to_string_nozero`](crate::gcode::to_string_nozero) writes it.
fn on_grid(value: CoordF, decimals: u8) -> CoordF {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

#[derive(Clone, Copy, Debug)]
struct AxisDistances {
    dx: CoordF,
    dy: CoordF,
    dz: CoordF,
    de: CoordF,
    max_axle_xyz: CoordF,
    max_axle: CoordF,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineLimits;

    const ACC: f64 = 1000.0;

    fn make_config() -> PressureAdvanceConfig {
        PressureAdvanceConfig::new().machine_limits(MachineLimits::unlimited())
    }

    fn moves(segments: &[MotionSegment]) -> Vec<&MotionSegment> {
        segments.iter().filter(|s| s.is_motion && s.is_useful_move()).collect()
    }

    fn g1_count(text: &str) -> usize {
        text.lines().filter(|l| l.starts_with("G1")).count()
    }

    fn assert_within_limits(segments: &[MotionSegment], accel: f64) {
        for seg in moves(segments) {
            if seg.is_non_extruding() {
                continue;
            }
            assert!(
                seg.implied_acceleration() <= accel * (1.0 + 1e-3),
                "{} implies {} mm/s²",
                seg,
                seg.implied_acceleration()
            );
        }
    }

    const STRAIGHT_LINE: &str = "M204 S1000\nG1 X0 Y0 F3000\nG1 X20 E1\nG1 X40 E1\nG1 X60 E1\n";

    #[test]
    fn test_straight_line_profile() {
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(STRAIGHT_LINE, true);
        let m = moves(&segments);

        // accel piece, steady, steady, steady, decel piece
        assert_eq!(m.len(), 5);
        assert!((m[0].max_axle - 1.25).abs() < 1e-9);
        assert_eq!(m[0].speed_start, 0.0);
        assert!((m[0].speed_end - 50.0).abs() < 1e-9);
        assert!((m[4].max_axle - 1.25).abs() < 1e-9);
        assert_eq!(m[4].speed_end, 0.0);
        assert_eq!(pa.partial_propagations(), 0);
    }

    #[test]
    fn test_retiming_is_a_fixed_point() {
        let mut first = PressureAdvance::new(make_config(), 0);
        let once = first.process_gcode(STRAIGHT_LINE, true);
        assert!(once.contains("G1 X1.25 E0.0625"));
        assert!(once.contains("G1 X58.75 E0.9375"));

        let mut second = PressureAdvance::new(make_config(), 0);
        let twice = second.process_gcode(&once, true);
        assert_eq!(g1_count(&once), g1_count(&twice));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_retiming_corners_is_a_fixed_point() {
        // Two 135° corners, one diagonal with no grid point on its line, then a
        // sharp turn back.
        let gcode = "M204 S800\nG1 X0 Y0 F6000\nG1 X30 E1\nG1 X50 Y20 E0.7\nG1 X50 Y35 E0.5\n\
                     G1 X63.457 Y36.001 E0.45\nG1 X40 Y36.001 E0.8\n";
        let mut first = PressureAdvance::new(make_config(), 0);
        let once = first.process_gcode(gcode, true);
        assert!(g1_count(&once) > g1_count(gcode));
        // Corner slow-downs split the diagonals at grid points on their line.
        assert!(once.contains("G1 X34.688 Y4.688 "));
        assert!(once.contains("G1 X45.312 Y15.312 "));
        assert!(once.contains("G1 X63.457 Y36.001 E0.45\n"));

        let mut second = PressureAdvance::new(make_config(), 0);
        let twice = second.process_gcode(&once, true);
        assert_eq!(g1_count(&once), g1_count(&twice));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_accelerations_within_limits() {
        let gcode = "M204 S1000\nG1 X0 Y0 F6000\nG1 X30 E1\nG1 X30.5 Y0.2 E0.02\nG1 X31 E0.02\n\
                     G1 X31 Y10 E0.4 F1200\nG1 X5 Y10 E1 F9000\nG1 X5 Y12 E0.1\n";
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(gcode, true);
        assert_within_limits(&segments, ACC);
    }

    #[test]
    fn test_speed_continuity() {
        // Increasing then decreasing requested speed along a straight line.
        let gcode = "M204 S1000\nG1 X0 Y0\nG1 X20 E1 F1800\nG1 X40 E1 F3600\nG1 X60 E1 F1200\n";
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(gcode, true);
        let m = moves(&segments);
        for pair in m.windows(2) {
            assert!(
                (pair[0].speed_end - pair[1].speed_start).abs() < 1e-6,
                "{} then {}",
                pair[0],
                pair[1]
            );
        }
        for seg in &m {
            assert!(seg.speed_end <= 60.0 + 1e-9);
        }
        assert_within_limits(&segments, ACC);
    }

    #[test]
    fn test_short_move_end_speed_capped() {
        let gcode = "M204 S1000\nG1 X0 Y0\nG1 X1 E0.05 F6000\n";
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(gcode, true);
        let m = moves(&segments);
        assert!(!m.is_empty());
        for seg in &m {
            assert!(seg.speed_end < 100.0);
            assert!(seg.speed_start < 100.0);
        }
        assert_eq!(m.last().unwrap().speed_end, 0.0);
        assert_within_limits(&segments, ACC);
    }

    #[test]
    fn test_flush_empties_buffer_and_stops() {
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(STRAIGHT_LINE, false);
        assert!(segments.is_empty());
        assert!(!pa.buffer().is_empty());

        let segments = pa.process_segments("", true);
        assert!(pa.buffer().is_empty());
        assert_eq!(moves(&segments).last().unwrap().speed_end, 0.0);
    }

    #[test]
    fn test_lines_pass_through_in_order() {
        let gcode = ";LAYER:1\nM106 S255\nG1 X10 E0.5 F3000\n; end\n";
        let mut pa = PressureAdvance::new(make_config(), 0);
        let out = pa.process_gcode(gcode, true);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], ";LAYER:1");
        assert_eq!(lines[1], "M106 S255");
        assert!(lines.iter().any(|l| l.starts_with("G1")));
        assert_eq!(lines.last(), Some(&"; end"));
    }

    #[test]
    fn test_buffer_spans_trigger_writes() {
        let config = make_config().buffer_spans(5.0, 2);
        let mut pa = PressureAdvance::new(config, 0);
        let out = pa.process_gcode(STRAIGHT_LINE, false);
        assert!(!out.is_empty());
        assert!(pa.buffer().len() < 8);
    }

    #[test]
    fn test_pressure_factor_relative() {
        let config = make_config().pressure_factors(vec![0.01]);
        let mut pa = PressureAdvance::new(config, 0);
        let segments = pa.process_segments(STRAIGHT_LINE, true);
        let m = moves(&segments);
        // The acceleration piece pushes 0.01 * 50 mm/s extra, the deceleration pulls it back.
        assert!(m[0].raw.contains("E0.5625"));
        assert!(m[4].raw.contains("E-0.4375"));
    }

    #[test]
    fn test_pressure_factor_override_comment() {
        let config = make_config().pressure_factors(vec![0.01]);
        let mut pa = PressureAdvance::new(config, 0);
        pa.process_gcode("; PRESSURE_FACTOR=0.05\n", false);
        assert!((pa.pressure_factor() - 0.05).abs() < 1e-12);
        pa.process_gcode("; PRESSURE_FACTOR=\n", false);
        assert!((pa.pressure_factor() - 0.01).abs() < 1e-12);
        pa.process_gcode("; PRESSURE_FACTOR=abc\n", false);
        assert!((pa.pressure_factor() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_absolute_extrusion() {
        let config = make_config().relative_e(false).pressure_factors(vec![0.1]);
        let gcode = "M204 S1000\nG1 X0 Y0 F3000\nG1 X20 E1\nG1 X40 E2\n";
        let mut pa = PressureAdvance::new(config, 0);
        let segments = pa.process_segments(gcode, true);
        let m = moves(&segments);
        // Steady middle part at 50 mm/s extrudes 2.5 mm/s: 0.25 mm held as pressure.
        let steady = m.iter().find(|s| s.raw.starts_with("G1 X20 ")).unwrap();
        assert!(steady.raw.contains("E1.25"), "{}", steady.raw);
        assert!(m.last().unwrap().raw.ends_with("E2"));
    }

    #[test]
    fn test_m204_forms() {
        let mut pa = PressureAdvance::new(make_config(), 0);
        pa.process_gcode("M204 S800\n", false);
        assert_eq!(pa.current_acceleration(), 800.0);
        pa.process_gcode("M204 P1500 R700\n", false);
        assert_eq!(pa.current_acceleration(), 1500.0);
        assert_eq!(pa.current_retract_acceleration(), 700.0);
        pa.process_gcode(";M204 S1200\n", false);
        assert_eq!(pa.current_acceleration(), 1200.0);
        pa.process_gcode("M204 P0\n", false);
        assert_eq!(pa.current_acceleration(), 1200.0);
    }

    #[test]
    fn test_tool_change_flushes() {
        let mut pa = PressureAdvance::new(make_config(), 0);
        let out = pa.process_gcode("M204 S1000\nG1 X10 E0.5 F3000\nT1\nG1 X20 E0.5\n", false);
        assert_eq!(pa.current_extruder(), 1);
        assert!(out.contains("G1 X"));
        // Only the line after the tool change is still buffered.
        assert!(pa.buffer().iter().any(|s| s.raw == "T1"));
        assert!(!pa.buffer().iter().any(|s| s.raw.starts_with("G1 X10")));
    }

    #[test]
    fn test_tool_change_flavor_exceptions() {
        let mut pa = PressureAdvance::new(make_config(), 2);
        pa.process_gcode("Tx\nTc\nT?\n", false);
        assert_eq!(pa.current_extruder(), 2);

        let mut reprap =
            PressureAdvance::new(make_config().flavor(GCodeFlavor::RepRap), 2);
        reprap.process_gcode("T-1\n", false);
        assert_eq!(reprap.current_extruder(), 2);

        let mut marlin = PressureAdvance::new(make_config(), 2);
        marlin.process_gcode("T-1\n", false);
        assert_eq!(marlin.current_extruder(), 0);
    }

    #[test]
    fn test_activate_extruder() {
        let config = make_config().tool_names(vec!["left".into(), "right".into()]);
        let mut pa = PressureAdvance::new(config, 0);
        pa.process_gcode("ACTIVATE_EXTRUDER EXTRUDER=right\n", false);
        assert_eq!(pa.current_extruder(), 1);
        pa.process_gcode("ACTIVATE_EXTRUDER EXTRUDER=extruder\n", false);
        assert_eq!(pa.current_extruder(), 0);
        pa.process_gcode("ACTIVATE_EXTRUDER EXTRUDER=extruder1\n", false);
        assert_eq!(pa.current_extruder(), 1);
        pa.process_gcode("ACTIVATE_EXTRUDER EXTRUDER=nozzle9\n", false);
        assert_eq!(pa.current_extruder(), 1);
    }

    #[test]
    fn test_travel_forces_stop() {
        let gcode = "M204 S1000\nG1 X0 Y0 F3000\nG1 X20 E1\nG0 X40\nG1 X60 E1\n";
        let mut pa = PressureAdvance::new(make_config(), 0);
        let segments = pa.process_segments(gcode, true);
        let m = moves(&segments);
        let travel = m.iter().position(|s| s.raw.starts_with("G0")).unwrap();
        assert_eq!(m[travel].speed_end, 0.0);
        assert_eq!(m[travel - 1].speed_end, 0.0);
        assert_eq!(m[travel + 1].speed_start, 0.0);
    }

    #[test]
    fn test_g92_marks_reset() {
        let config = make_config().relative_e(false);
        let mut pa = PressureAdvance::new(config, 0);
        let segments = pa.process_segments("G1 X10 E5 F3000\nG92 E0\nG1 X20 E0.5\n", true);
        let reset: Vec<_> = segments.iter().filter(|s| s.after_e_reset).collect();
        assert!(!reset.is_empty());
        assert!(reset.iter().all(|s| s.raw.starts_with("G1 X1") || s.raw.starts_with("G1 X20")));
        let de: f64 = reset.iter().map(|s| s.de).sum();
        assert!((de - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_verbose_comments() {
        let mut pa = PressureAdvance::new(make_config().comments(true), 0);
        let out = pa.process_gcode(STRAIGHT_LINE, true);
        assert!(out.contains("; steady 3000"));
        assert!(out.lines().any(|l| l.contains(";F3000") && l.contains("; accel 0 -> 3000")));
    }

    #[test]
    fn test_machine_speed_limit_slows_segment() {
        let limits = MachineLimits {
            max_feedrate_x: 20.0,
            ..MachineLimits::default()
        };
        let mut pa = PressureAdvance::new(make_config().machine_limits(limits), 0);
        let segments = pa.process_segments("M204 S1000\nG1 X50 E1 F6000\n", true);
        for seg in moves(&segments) {
            assert!(seg.speed_start <= 20.0 + 1e-9);
            assert!(seg.speed_end <= 20.0 + 1e-9);
        }
    }
}
