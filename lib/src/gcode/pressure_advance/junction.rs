//! Junction speeds and velocity-profile reconciliation.
//!
//! A junction speed is the speed two consecutive segments share at their common
//! point. Lowering it means the segment before must decelerate in time, which can
//! ripple further back through the buffer.

use super::buffer::{MotionBuffer, MotionSegment, ProfileNote};
use super::SPEED_EPSILON;
use crate::geometry::{angle_between, PointF};
use crate::CoordF;
use std::f64::consts::FRAC_PI_2;

/// Result of a backward propagation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// Every touched segment reaches the required junction speed.
    Resolved,
    /// The buffer ran out before the required speed could be reached; the
    /// best-effort profile is kept.
    PartialWarning,
}

/// Speed gained after accelerating at `accel` from `initial_speed` over `distance`.
pub fn delta_speed(accel: CoordF, initial_speed: CoordF, distance: CoordF) -> CoordF {
    debug_assert!(accel > 0.0);
    if distance <= 0.0 {
        return 0.0;
    }
    (initial_speed * initial_speed + 2.0 * accel * distance).sqrt() - initial_speed
}

/// Distance needed to go from `initial_speed` up to `final_speed` at `accel`.
pub fn accel_distance(accel: CoordF, initial_speed: CoordF, final_speed: CoordF) -> CoordF {
    debug_assert!(accel > 0.0);
    debug_assert!(final_speed >= initial_speed);
    (final_speed * final_speed - initial_speed * initial_speed) / (2.0 * accel)
}

/// Speed allowed at the joint between `last` and `next`.
///
/// Zero when either side does not extrude or does not move in XYZ, or when the
/// path turns by more than 90°. Otherwise it ramps linearly from zero at 90° to
/// the slower neighbour's speed for a straight continuation.
pub fn junction_speed(last: Option<&MotionSegment>, next: &MotionSegment) -> CoordF {
    if next.max_axle_xyz == 0.0 || next.is_non_extruding() {
        return 0.0;
    }
    let Some(last) = last else {
        return 0.0;
    };
    if last.is_non_extruding() || last.max_axle_xyz == 0.0 {
        return 0.0;
    }

    let incoming = PointF::new(-last.dx, -last.dy);
    let outgoing = PointF::new(next.dx, next.dy);
    let angle = angle_between(incoming, outgoing);
    if angle < FRAC_PI_2 {
        0.0
    } else {
        last.speed_end.min(next.speed_end) * ((angle - FRAC_PI_2) / FRAC_PI_2).min(1.0)
    }
}

/// Side of a wanted split point the written one may move to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Snap {
    /// Towards the end of the segment: the first part only gets longer.
    Up,
    /// Towards the start of the segment: the second part only gets longer.
    Down,
}

/// Reconciles segment speeds inside a [`MotionBuffer`].
///
/// Split points are only placed where the written G-code can represent them
/// exactly on the segment: on the XYZ output grid and on the segment's line.
/// Reading the output back therefore gives the same geometry, and the same
/// profile without further splits.
#[derive(Clone, Copy, Debug)]
pub struct JunctionSolver {
    /// A speed change needing more than this fraction of a segment is applied to
    /// the whole segment.
    pub split_ratio_threshold: CoordF,
    /// Written XYZ resolution (mm). Pieces shorter than this are never split off
    /// and split points land on this grid.
    pub min_split_length: CoordF,
}

impl Default for JunctionSolver {
    fn default() -> Self {
        Self {
            split_ratio_threshold: 0.99,
            min_split_length: 0.001,
        }
    }
}

/// Relative slack when checking whether a deceleration fits a segment.
const FIT_TOLERANCE: CoordF = 1e-4;

/// Slack, in grid steps, when rounding a split point onto the grid.
const GRID_TOLERANCE: CoordF = 1e-6;

impl JunctionSolver {
    pub fn new(split_ratio_threshold: CoordF, min_split_length: CoordF) -> Self {
        Self {
            split_ratio_threshold,
            min_split_length,
        }
    }

    /// True when a split at `piece` out of `length` would leave a sliver on either side.
    fn too_thin(&self, piece: CoordF, length: CoordF) -> bool {
        piece >= length * self.split_ratio_threshold
            || piece < self.min_split_length
            || length - piece < self.min_split_length
    }

    /// Move a split `ratio` onto the nearest grid point of the segment on the
    /// `snap` side. `None` when that point is one of the segment's ends.
    fn grid_ratio(&self, seg: &MotionSegment, ratio: CoordF, snap: Snap) -> Option<CoordF> {
        let steps = seg.grid_steps(self.min_split_length);
        if steps < 2 {
            return None;
        }
        let n = steps as CoordF;
        let k = match snap {
            Snap::Up => (ratio * n - GRID_TOLERANCE).ceil(),
            Snap::Down => (ratio * n + GRID_TOLERANCE).floor(),
        };
        (k > 0.0 && k < n).then(|| k / n)
    }

    /// Lower the end speed of the segment at `last_idx` to `junction`, walking back
    /// through earlier useful segments while their end speeds must drop too.
    ///
    /// The walk is bounded by the buffer length.
    pub fn update_last_move(
        &self,
        buffer: &mut MotionBuffer,
        last_idx: usize,
        junction: CoordF,
    ) -> PropagationOutcome {
        let mut idx = last_idx;
        let mut target = junction.max(0.0);
        let max_iterations = buffer.len() + 1;

        for _ in 0..max_iterations {
            let Some(seg) = buffer.get(idx) else {
                return PropagationOutcome::Resolved;
            };
            if seg.speed_end <= target + SPEED_EPSILON {
                return PropagationOutcome::Resolved;
            }
            let (start, end) = (seg.speed_start, seg.speed_end);
            let flat = (start - end).abs() <= SPEED_EPSILON;

            if flat || (start < end && start >= target) {
                match self.decelerate_within(buffer, idx, target) {
                    Some(next_target) => {
                        let Some(previous) = buffer.last_useful_before(idx) else {
                            log::warn!("Not enough buffer for pressure control.");
                            return PropagationOutcome::PartialWarning;
                        };
                        idx = previous;
                        target = next_target;
                    }
                    None => return PropagationOutcome::Resolved,
                }
            } else if start > end {
                // Already decelerating: shift the whole ramp down.
                let delta = end - target;
                let Some(seg) = buffer.get_mut(idx) else {
                    return PropagationOutcome::Resolved;
                };
                seg.speed_start -= delta;
                seg.speed_end = target;
                seg.note = ProfileNote::Decel;
                let next_target = seg.speed_start;
                let Some(previous) = buffer.last_useful_before(idx) else {
                    log::warn!("Not enough buffer for pressure control.");
                    return PropagationOutcome::PartialWarning;
                };
                idx = previous;
                target = next_target;
            } else {
                self.climb_then_descend(buffer, idx, target);
                return PropagationOutcome::Resolved;
            }
        }
        log::warn!("Not enough buffer for pressure control.");
        PropagationOutcome::PartialWarning
    }

    /// A flat or accelerating segment starting at or above `target` must end at
    /// `target`. Returns the new start speed when the segment is too short, in
    /// which case the previous segment has to slow down to it.
    fn decelerate_within(
        &self,
        buffer: &mut MotionBuffer,
        idx: usize,
        target: CoordF,
    ) -> Option<CoordF> {
        let seg = buffer.get_mut(idx)?;
        let length = seg.max_axle;
        let decel = seg.max_axle_deceleration;
        if length <= 0.0 || decel <= 0.0 {
            seg.speed_start = seg.speed_start.min(target);
            seg.speed_end = target;
            return None;
        }

        let needed = accel_distance(decel, target, seg.speed_start.max(target));
        if needed > length * (1.0 + FIT_TOLERANCE) {
            // Too short: start lower and let the previous segment slow down first.
            let start = target + delta_speed(decel, target, length);
            seg.speed_start = start;
            seg.speed_end = target;
            seg.note = ProfileNote::Decel;
            return Some(start);
        }
        let flat = (seg.speed_start - seg.speed_end).abs() <= SPEED_EPSILON;
        if !flat {
            self.climb_then_descend(buffer, idx, target);
            return None;
        }

        let ratio = if self.too_thin(needed, length) {
            None
        } else {
            self.grid_ratio(seg, 1.0 - needed / length, Snap::Down)
        };
        let Some(ratio) = ratio else {
            seg.speed_end = target;
            seg.note = ProfileNote::DecelDirect;
            return None;
        };
        let (first, second) = buffer.split_at(idx, ratio)?;
        if let Some(part) = buffer.get_mut(first) {
            part.note = ProfileNote::Steady;
        }
        if let Some(part) = buffer.get_mut(second) {
            part.speed_end = target;
            part.note = ProfileNote::Decel;
        }
        None
    }

    /// An accelerating segment has to end at `target`, below its end speed:
    /// climb from its start speed, then come back down to `target`.
    ///
    /// The climb stops where accelerating from the start meets decelerating to
    /// `target`, or earlier once the end speed is reached. Moving that point onto
    /// the grid towards the start keeps the climb as the limiting side.
    fn climb_then_descend(&self, buffer: &mut MotionBuffer, idx: usize, target: CoordF) {
        let Some(seg) = buffer.get_mut(idx) else { return };
        let length = seg.max_axle;
        let accel = seg.max_axle_acceleration;
        let decel = seg.max_axle_deceleration;
        let (start, end) = (seg.speed_start, seg.speed_end);
        if length <= 0.0 || accel <= 0.0 || decel <= 0.0 {
            seg.speed_end = target;
            return;
        }

        let meet = ((target * target - start * start + 2.0 * decel * length)
            / (2.0 * (accel + decel)))
            .clamp(0.0, length);
        let top = (start * start + 2.0 * accel * meet).sqrt();
        let climb = if top > end {
            length - accel_distance(decel, target, end)
        } else {
            meet
        };

        let ratio = if self.too_thin(length - climb, length) {
            None
        } else {
            self.grid_ratio(seg, climb / length, Snap::Down)
        };
        let Some(ratio) = ratio else {
            seg.speed_end = target;
            seg.note = if start > target {
                ProfileNote::DecelDirect
            } else {
                ProfileNote::Accel
            };
            return;
        };
        let peak = (start + delta_speed(accel, start, ratio * length)).min(end);
        let Some((first, second)) = buffer.split_at(idx, ratio) else {
            return;
        };
        if let Some(part) = buffer.get_mut(second) {
            part.speed_start = peak;
            part.speed_end = target;
            part.note = ProfileNote::Decel;
        }
        if let Some(part) = buffer.get_mut(first) {
            part.speed_end = peak;
            part.note = ProfileNote::Accel;
        }
        if peak >= end {
            // The climb holds its end speed before descending.
            self.resolve_new_segment(buffer, first);
        }
    }

    /// Shape the freshly appended segment at `idx` once its start speed is known:
    /// cap the end speed when the acceleration does not fit, or split it into an
    /// acceleration and a steady part.
    pub fn resolve_new_segment(&self, buffer: &mut MotionBuffer, idx: usize) {
        let Some(seg) = buffer.get_mut(idx) else { return };
        if seg.speed_start >= seg.speed_end - SPEED_EPSILON {
            return;
        }
        let length = seg.max_axle;
        let accel = seg.max_axle_acceleration;
        if length <= 0.0 || accel <= 0.0 {
            seg.speed_end = seg.speed_start;
            return;
        }

        // Any acceleration part the grid can hold is split off. Capping a move that
        // reaches its speed a little before its end would let a later split of it
        // leave a part that accelerates again when read back.
        let needed = accel_distance(accel, seg.speed_start, seg.speed_end);
        let ratio = if needed >= length || needed < self.min_split_length {
            None
        } else {
            self.grid_ratio(seg, needed / length, Snap::Up)
        };
        let Some(ratio) = ratio else {
            let reachable = seg.speed_start + delta_speed(accel, seg.speed_start, length);
            seg.speed_end = seg.speed_end.min(reachable);
            seg.note = ProfileNote::Accel;
            return;
        };

        let Some((first, second)) = buffer.split_at(idx, ratio) else {
            return;
        };
        if let Some(part) = buffer.get_mut(first) {
            part.note = ProfileNote::Accel;
        }
        if let Some(part) = buffer.get_mut(second) {
            part.speed_start = part.speed_end;
            part.note = ProfileNote::Steady;
        }
    }
}
