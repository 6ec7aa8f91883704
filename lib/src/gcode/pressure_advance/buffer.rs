//! Motion segments and the buffer holding them until their speeds are final.

use crate::gcode::{change_axis_value, to_string_nozero};
use crate::CoordF;
use std::collections::VecDeque;
use std::fmt;

/// How the solver last shaped a segment's velocity profile. Drives the verbose comment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfileNote {
    /// Untouched by the solver.
    #[default]
    None,
    Steady,
    Accel,
    Decel,
    /// The whole segment decelerates because a split would leave a sliver.
    DecelDirect,
}

/// One buffered G-code line with its kinematic state.
///
/// Speeds are along the largest moving axis ("max axle"), in mm/s. Positions are the
/// start of the segment; `None` marks an axis the line does not move.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionSegment {
    pub raw: String,
    /// G0 to G3.
    pub is_motion: bool,
    /// Largest absolute displacement over every axis, extrusion included.
    pub max_axle: CoordF,
    /// Largest absolute displacement over X, Y and Z.
    pub max_axle_xyz: CoordF,
    /// Speed written in (or inherited by) the line.
    pub written_speed: CoordF,
    pub speed_start: CoordF,
    pub speed_end: CoordF,
    /// Acceleration in effect when the line was read (`M204`).
    pub acceleration: CoordF,
    pub deceleration: CoordF,
    /// Acceleration along the max axle after per-axis limits.
    pub max_axle_acceleration: CoordF,
    /// Deceleration along the max axle after per-axis limits.
    pub max_axle_deceleration: CoordF,
    /// First extrusion after a `G92` position reset.
    pub after_e_reset: bool,
    pub x: Option<CoordF>,
    pub y: Option<CoordF>,
    pub z: Option<CoordF>,
    pub e: Option<CoordF>,
    /// Feedrate written on the line, mm/min.
    pub f: Option<CoordF>,
    pub dx: CoordF,
    pub dy: CoordF,
    pub dxy: CoordF,
    pub dz: CoordF,
    pub de: CoordF,
    pub e_char: char,
    /// Pressure factor in effect when the line was read.
    pub pressure_factor: CoordF,
    pub note: ProfileNote,
}

impl MotionSegment {
    pub fn new(
        raw: impl Into<String>,
        max_axle: CoordF,
        max_axle_xyz: CoordF,
        speed: CoordF,
        acceleration: CoordF,
        deceleration: CoordF,
    ) -> Self {
        Self {
            raw: raw.into(),
            is_motion: false,
            max_axle,
            max_axle_xyz,
            written_speed: speed,
            speed_start: speed,
            speed_end: speed,
            acceleration,
            deceleration,
            max_axle_acceleration: acceleration,
            max_axle_deceleration: deceleration,
            after_e_reset: false,
            x: None,
            y: None,
            z: None,
            e: None,
            f: None,
            dx: 0.0,
            dy: 0.0,
            dxy: 0.0,
            dz: 0.0,
            de: 0.0,
            e_char: 'E',
            pressure_factor: 0.0,
            note: ProfileNote::None,
        }
    }

    /// Moves an axis or extrudes.
    pub fn is_useful_move(&self) -> bool {
        self.dx != 0.0
            || self.dy != 0.0
            || self.dz != 0.0
            || self.de != 0.0
            || self.e.is_some_and(|e| e != 0.0)
    }

    /// Neither an extruder position nor an extrusion amount.
    pub fn is_non_extruding(&self) -> bool {
        match self.e {
            None => true,
            Some(e) => e == 0.0 && self.de == 0.0,
        }
    }

    /// Scale every delta and length by `ratio`.
    pub fn ratio(&mut self, ratio: CoordF) {
        debug_assert!(ratio > 0.0);
        self.dx *= ratio;
        self.dy *= ratio;
        self.dxy *= ratio;
        self.dz *= ratio;
        self.de *= ratio;
        self.max_axle *= ratio;
        self.max_axle_xyz *= ratio;
    }

    /// Number of equal steps between grid points lying exactly on the segment,
    /// for a grid of `quantum` mm. Zero when the segment does not move in XYZ.
    pub fn grid_steps(&self, quantum: CoordF) -> u64 {
        if quantum <= 0.0 {
            return 0;
        }
        [self.dx, self.dy, self.dz]
            .iter()
            .map(|d| (d.abs() / quantum).round() as u64)
            .fold(0, gcd)
    }

    /// Move the start position past `previous`, which ends where this segment starts.
    fn advance_start(&mut self, previous: &MotionSegment) {
        self.x = self.x.map(|v| v + previous.dx);
        self.y = self.y.map(|v| v + previous.dy);
        self.z = self.z.map(|v| v + previous.dz);
        self.e = self.e.map(|v| v + previous.de);
    }

    /// Extruder speed at the end of the segment, mm/s.
    pub fn e_speed_end(&self) -> CoordF {
        if self.speed_end <= 0.0 || self.max_axle <= 0.0 {
            0.0
        } else {
            self.speed_end * self.de / self.max_axle
        }
    }

    /// Rewrite the end position of every known axis in `raw`.
    ///
    /// The extrusion axis carries the pressure term: the change of speed across the
    /// segment in relative mode, the end extruder speed folded into the position in
    /// absolute mode.
    pub fn update_axis_values(&mut self, xyz_decimals: u8, e_decimals: u8, relative_e: bool) {
        if let Some(x) = self.x {
            change_axis_value(&mut self.raw, 'X', x + self.dx, xyz_decimals);
        }
        if let Some(y) = self.y {
            change_axis_value(&mut self.raw, 'Y', y + self.dy, xyz_decimals);
        }
        if let Some(z) = self.z {
            change_axis_value(&mut self.raw, 'Z', z + self.dz, xyz_decimals);
        }
        if let Some(e) = self.e {
            let pressure = self.pressure_factor;
            let value = if relative_e {
                self.de + (self.speed_end - self.speed_start) * pressure
            } else {
                e + self.de + self.e_speed_end() * pressure
            };
            change_axis_value(&mut self.raw, self.e_char, value, e_decimals);
        }
    }

    /// Seconds spent in the segment.
    pub fn duration(&self) -> CoordF {
        if (self.speed_end - self.speed_start).abs() > super::SPEED_EPSILON {
            let accel = if self.speed_end > self.speed_start {
                self.max_axle_acceleration
            } else {
                self.max_axle_deceleration
            };
            if accel > 0.0 {
                (self.speed_end - self.speed_start).abs() / accel
            } else {
                0.0
            }
        } else if self.speed_end > 0.0 {
            self.max_axle / self.speed_end
        } else {
            0.0
        }
    }

    /// Verbose annotation: end feedrate, extruder feedrate, duration in µs and profile.
    pub fn timing_comment(&self) -> Option<String> {
        let profile = match self.note {
            ProfileNote::None => return None,
            ProfileNote::Steady => format!("steady {}", (self.speed_start * 60.0) as i64),
            ProfileNote::Accel => format!(
                "accel {} -> {}",
                (self.speed_start * 60.0) as i64,
                (self.speed_end * 60.0) as i64
            ),
            ProfileNote::Decel => format!(
                "decel {}->{}",
                (self.speed_start * 60.0) as i64,
                (self.speed_end * 60.0) as i64
            ),
            ProfileNote::DecelDirect => "decel direct".to_string(),
        };
        Some(format!(
            " ;F{} ;H{} ;T{} ; {}",
            (self.speed_end * 60.0) as i64,
            to_string_nozero(self.e_speed_end() * 60.0, 3),
            (self.duration() * 1_000_000.0) as i64,
            profile
        ))
    }

    /// Acceleration implied by going from `speed_start` to `speed_end` over `max_axle`.
    pub fn implied_acceleration(&self) -> CoordF {
        if self.max_axle <= 0.0 {
            return 0.0;
        }
        (self.speed_end * self.speed_end - self.speed_start * self.speed_start).abs()
            / (2.0 * self.max_axle)
    }
}

impl fmt::Display for MotionSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:.1}mm {:.2}->{:.2}mm/s]",
            self.raw, self.max_axle, self.speed_start, self.speed_end
        )
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Ordered segments waiting for their final speeds, with running totals.
#[derive(Clone, Debug, Default)]
pub struct MotionBuffer {
    segments: VecDeque<MotionSegment>,
    distance_size: CoordF,
    useful_size: usize,
}

impl MotionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of `max_axle_xyz` over the buffer, in mm.
    #[inline]
    pub fn distance_size(&self) -> CoordF {
        self.distance_size
    }

    /// Number of useful moves in the buffer.
    #[inline]
    pub fn useful_size(&self) -> usize {
        self.useful_size
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&MotionSegment> {
        self.segments.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MotionSegment> {
        self.segments.get_mut(index)
    }

    pub fn back(&self) -> Option<&MotionSegment> {
        self.segments.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MotionSegment> {
        self.segments.iter()
    }

    pub fn push_back(&mut self, segment: MotionSegment) -> usize {
        self.count_in(&segment);
        self.segments.push_back(segment);
        self.segments.len() - 1
    }

    pub fn pop_front(&mut self) -> Option<MotionSegment> {
        let segment = self.segments.pop_front()?;
        self.count_out(&segment);
        Some(segment)
    }

    /// Index of the last useful move strictly before `end`.
    pub fn last_useful_before(&self, end: usize) -> Option<usize> {
        (0..end.min(self.segments.len()))
            .rev()
            .find(|&i| self.segments[i].is_useful_move())
    }

    /// Replace the segment at `index` by two consecutive parts, the first covering
    /// `ratio` of its length. Speeds are copied to both parts unchanged.
    ///
    /// Returns the indices of the two parts. Segments before `index` keep their index,
    /// later ones shift by one.
    pub fn split_at(&mut self, index: usize, ratio: CoordF) -> Option<(usize, usize)> {
        if !(ratio > 0.0 && ratio < 1.0) {
            return None;
        }
        let original = self.segments.get(index)?.clone();
        self.count_out(&original);

        let mut first = original.clone();
        first.ratio(ratio);
        let mut second = original;
        second.ratio(1.0 - ratio);
        second.advance_start(&first);

        self.count_in(&first);
        self.count_in(&second);
        self.segments[index] = first;
        self.segments.insert(index + 1, second);
        Some((index, index + 1))
    }

    /// Recompute the running totals from the contents.
    pub fn recompute_totals(&mut self) {
        self.distance_size = self.segments.iter().map(|s| s.max_axle_xyz).sum();
        self.useful_size = self.segments.iter().filter(|s| s.is_useful_move()).count();
    }

    fn count_in(&mut self, segment: &MotionSegment) {
        self.distance_size += segment.max_axle_xyz;
        if segment.is_useful_move() {
            self.useful_size += 1;
        }
    }

    fn count_out(&mut self, segment: &MotionSegment) {
        self.distance_size -= segment.max_axle_xyz;
        if segment.is_useful_move() {
            self.useful_size = self.useful_size.saturating_sub(1);
        }
    }
}
