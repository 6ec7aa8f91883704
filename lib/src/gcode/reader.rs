//! G-code line reader.
//!
//! Splits a text buffer into [`GCodeLine`] records and tracks the machine position
//! across motion and `G92` commands, so each line can report its per-axis distance
//! from the position before it.

use crate::CoordF;

/// Machine axes tracked by the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    E = 3,
    F = 4,
}

const AXIS_COUNT: usize = 5;

/// One parsed line. The raw text is kept verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct GCodeLine {
    raw: String,
    cmd: String,
    axes: [Option<CoordF>; AXIS_COUNT],
    params: Vec<(char, CoordF)>,
    extrusion_axis: char,
}

impl GCodeLine {
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The command word (`G1`, `M204`, `T0`, ...). Empty for comments and blank lines.
    #[inline]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn is_comment(&self) -> bool {
        self.raw.trim_start().starts_with(';')
    }

    /// Value of an axis word. `None` when absent or unparsable.
    #[inline]
    pub fn axis(&self, axis: Axis) -> Option<CoordF> {
        self.axes[axis as usize]
    }

    #[inline]
    pub fn has(&self, axis: Axis) -> bool {
        self.axes[axis as usize].is_some()
    }

    #[inline]
    pub fn f(&self) -> Option<CoordF> {
        self.axis(Axis::F)
    }

    #[inline]
    pub fn e(&self) -> Option<CoordF> {
        self.axis(Axis::E)
    }

    /// Letter used for the extrusion axis.
    #[inline]
    pub fn e_char(&self) -> char {
        self.extrusion_axis
    }

    /// Value of any parameter word, e.g. `S` or `P` on `M204`.
    pub fn value(&self, letter: char) -> Option<CoordF> {
        let letter = letter.to_ascii_uppercase();
        self.params
            .iter()
            .find(|(c, _)| *c == letter)
            .map(|(_, v)| *v)
    }

    /// Distance along `axis` from the reader's current position, `0` if the axis is absent.
    pub fn dist(&self, axis: Axis, reader: &GCodeReader) -> CoordF {
        match self.axis(axis) {
            Some(v) => v - reader.position(axis),
            None => 0.0,
        }
    }

    /// Numeric part of a `G` or `M` command word, e.g. `92` for `G92`.
    pub fn command_number(&self) -> Option<i32> {
        leading_int(self.cmd.get(1..)?)
    }

    fn is_command(&self, letter: char) -> bool {
        self.cmd
            .chars()
            .next()
            .is_some_and(|c| c.eq_ignore_ascii_case(&letter))
    }

    /// `G0`, `G1`, `G2` or `G3`.
    pub fn is_motion(&self) -> bool {
        self.is_command('G') && matches!(self.command_number(), Some(0..=3))
    }
}

/// Integer prefix of a string, like C's `atoi` but `None` when there is no digit.
fn leading_int(s: &str) -> Option<i32> {
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

/// Float prefix of a string, like C's `atof` but `None` when nothing parses.
pub fn leading_f64(s: &str) -> Option<CoordF> {
    let s = s.trim_start();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        let sign = (c == '-' || c == '+') && i == 0;
        if c.is_ascii_digit() || c == '.' || sign {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    // Shrink until it parses, so "1.2.3" yields 1.2.
    (1..=end).rev().find_map(|n| s[..n].parse().ok())
}

/// Stateful reader tracking the machine position.
#[derive(Clone, Debug)]
pub struct GCodeReader {
    position: [CoordF; AXIS_COUNT],
    extrusion_axis: char,
}

impl Default for GCodeReader {
    fn default() -> Self {
        Self::new('E')
    }
}

impl GCodeReader {
    pub fn new(extrusion_axis: char) -> Self {
        Self {
            position: [0.0; AXIS_COUNT],
            extrusion_axis: extrusion_axis.to_ascii_uppercase(),
        }
    }

    #[inline]
    pub fn position(&self, axis: Axis) -> CoordF {
        self.position[axis as usize]
    }

    #[inline]
    pub fn x(&self) -> CoordF {
        self.position(Axis::X)
    }

    #[inline]
    pub fn y(&self) -> CoordF {
        self.position(Axis::Y)
    }

    #[inline]
    pub fn z(&self) -> CoordF {
        self.position(Axis::Z)
    }

    #[inline]
    pub fn e(&self) -> CoordF {
        self.position(Axis::E)
    }

    /// Parse one line without touching the reader state.
    ///
    /// Words whose number does not parse are left out, so a malformed axis reads
    /// as absent rather than zero.
    pub fn parse_line(&self, raw: &str) -> GCodeLine {
        let code = match raw.find(';') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let mut words = code.split_whitespace();
        let cmd = words.next().unwrap_or_default().to_string();

        let mut line = GCodeLine {
            raw: raw.to_string(),
            cmd,
            axes: [None; AXIS_COUNT],
            params: Vec::new(),
            extrusion_axis: self.extrusion_axis,
        };

        for word in words {
            let mut chars = word.chars();
            let Some(letter) = chars.next() else { continue };
            if !letter.is_ascii_alphabetic() {
                continue;
            }
            let letter = letter.to_ascii_uppercase();
            let Ok(value) = chars.as_str().parse::<CoordF>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let axis = match letter {
                'X' => Some(Axis::X),
                'Y' => Some(Axis::Y),
                'Z' => Some(Axis::Z),
                'F' => Some(Axis::F),
                c if c == self.extrusion_axis => Some(Axis::E),
                _ => None,
            };
            if let Some(axis) = axis {
                line.axes[axis as usize] = Some(value);
            }
            line.params.push((letter, value));
        }
        line
    }

    /// Advance the position past a line.
    pub fn update(&mut self, line: &GCodeLine) {
        if line.is_motion() {
            for axis in [Axis::X, Axis::Y, Axis::Z, Axis::E, Axis::F] {
                if let Some(v) = line.axis(axis) {
                    self.position[axis as usize] = v;
                }
            }
        } else if line.is_command('G') && line.command_number() == Some(92) {
            let axes = [Axis::X, Axis::Y, Axis::Z, Axis::E];
            if axes.iter().all(|a| !line.has(*a)) {
                for axis in axes {
                    self.position[axis as usize] = 0.0;
                }
            } else {
                for axis in axes {
                    if let Some(v) = line.axis(axis) {
                        self.position[axis as usize] = v;
                    }
                }
            }
        }
    }

    /// Parse every line of `text`, calling `on_line` before the position moves past it.
    pub fn parse_buffer<F>(&mut self, text: &str, mut on_line: F)
    where
        F: FnMut(&GCodeReader, &GCodeLine),
    {
        for raw in text.lines() {
            let line = self.parse_line(raw);
            on_line(self, &line);
            self.update(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_motion_line() {
        let reader = GCodeReader::default();
        let line = reader.parse_line("G1 X10.5 Y-2 E0.25 F1800 ; perimeter");
        assert_eq!(line.cmd(), "G1");
        assert!(line.is_motion());
        assert_eq!(line.axis(Axis::X), Some(10.5));
        assert_eq!(line.axis(Axis::Y), Some(-2.0));
        assert_eq!(line.e(), Some(0.25));
        assert_eq!(line.f(), Some(1800.0));
        assert!(!line.has(Axis::Z));
        assert_eq!(line.raw(), "G1 X10.5 Y-2 E0.25 F1800 ; perimeter");
    }

    #[test]
    fn test_malformed_axis_is_unknown() {
        let reader = GCodeReader::default();
        let line = reader.parse_line("G1 X1.2.3 Y4 E0.1");
        assert!(!line.has(Axis::X));
        assert_eq!(line.axis(Axis::Y), Some(4.0));
    }

    #[test]
    fn test_comment_and_blank() {
        let reader = GCodeReader::default();
        let line = reader.parse_line("; PRESSURE_FACTOR=0.1");
        assert!(line.cmd().is_empty());
        assert!(line.is_comment());
        assert!(reader.parse_line("").cmd().is_empty());
    }

    #[test]
    fn test_dist_and_update() {
        let mut reader = GCodeReader::default();
        let first = reader.parse_line("G1 X10 Y5");
        reader.update(&first);
        let second = reader.parse_line("G1 X12 Z0.2");
        assert_eq!(second.dist(Axis::X, &reader), 2.0);
        assert_eq!(second.dist(Axis::Y, &reader), 0.0);
        assert!((second.dist(Axis::Z, &reader) - 0.2).abs() < 1e-12);
        reader.update(&second);
        assert_eq!(reader.x(), 12.0);
        assert_eq!(reader.y(), 5.0);
    }

    #[test]
    fn test_g92_sets_position() {
        let mut reader = GCodeReader::default();
        reader.update(&reader.parse_line("G1 X10 E5"));
        reader.update(&reader.parse_line("G92 E0"));
        assert_eq!(reader.e(), 0.0);
        assert_eq!(reader.x(), 10.0);
        reader.update(&reader.parse_line("G92"));
        assert_eq!(reader.x(), 0.0);
    }

    #[test]
    fn test_custom_extrusion_axis() {
        let reader = GCodeReader::new('A');
        let line = reader.parse_line("G1 X1 A0.5");
        assert_eq!(line.e(), Some(0.5));
        assert_eq!(line.e_char(), 'A');
    }

    #[test]
    fn test_leading_numbers() {
        assert_eq!(leading_f64("1000 ; comment"), Some(1000.0));
        assert_eq!(leading_f64("1.2.3"), Some(1.2));
        assert_eq!(leading_f64("abc"), None);
        assert_eq!(leading_int("92"), Some(92));
        assert_eq!(leading_int("1.5"), Some(1));
        assert_eq!(leading_int("-1"), Some(-1));
    }

    #[test]
    fn test_parse_buffer_order() {
        let mut reader = GCodeReader::default();
        let mut seen = Vec::new();
        reader.parse_buffer("G1 X1\nG1 X3\n", |r, line| {
            seen.push((line.dist(Axis::X, r), r.x()));
        });
        assert_eq!(seen, vec![(1.0, 0.0), (2.0, 1.0)]);
    }
}
