//! G-code post-processing module.
//!
//! This module provides a line reader for machine-code streams and the
//! pressure-advance re-timing pass built on top of it.

pub mod pressure_advance;
mod reader;

pub use pressure_advance::{
    MotionBuffer, MotionSegment, PressureAdvance, ProfileNote, PropagationOutcome,
};
pub use reader::{leading_f64, Axis, GCodeLine, GCodeReader};

use crate::CoordF;

/// Format a number with at most `decimals` digits, dropping trailing zeros.
///
/// `1.500` becomes `1.5`, `2.000` becomes `2` and `-0.0001` at three digits becomes `0`.
pub fn to_string_nozero(value: CoordF, decimals: u8) -> String {
    let mut s = format!("{:.*}", decimals as usize, value);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// Replace the value of an axis word (`" X12.3"`) in the code part of a line.
///
/// Returns `false` and leaves the line untouched when the axis is not present.
pub fn change_axis_value(line: &mut String, axis: char, new_value: CoordF, decimals: u8) -> bool {
    let code_end = line.find(';').unwrap_or(line.len());
    let pattern = format!(" {}", axis);
    let Some(found) = line[..code_end].find(&pattern) else {
        return false;
    };

    let start = found + pattern.len();
    let end = line[start..code_end]
        .find(|c: char| c.is_whitespace() || c == ';')
        .map_or(code_end, |i| start + i);
    line.replace_range(start..end, &to_string_nozero(new_value, decimals));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_nozero() {
        assert_eq!(to_string_nozero(1.5, 3), "1.5");
        assert_eq!(to_string_nozero(2.0, 3), "2");
        assert_eq!(to_string_nozero(0.12345678, 5), "0.12346");
        assert_eq!(to_string_nozero(-0.0001, 3), "0");
        assert_eq!(to_string_nozero(120.0, 0), "120");
    }

    #[test]
    fn test_change_axis_value() {
        let mut line = String::from("G1 X10 Y20.5 E0.3 ; wall");
        assert!(change_axis_value(&mut line, 'X', 12.25, 3));
        assert!(change_axis_value(&mut line, 'E', 0.123456, 5));
        assert_eq!(line, "G1 X12.25 Y20.5 E0.12346 ; wall");
    }

    #[test]
    fn test_change_axis_value_end_of_line() {
        let mut line = String::from("G1 X1 E2");
        assert!(change_axis_value(&mut line, 'E', 2.5, 5));
        assert_eq!(line, "G1 X1 E2.5");
    }

    #[test]
    fn test_change_axis_value_missing_axis() {
        let mut line = String::from("G1 X1 ; E is only in the comment");
        assert!(!change_axis_value(&mut line, 'E', 1.0, 5));
        assert_eq!(line, "G1 X1 ; E is only in the comment");
    }
}
