//! Post-processing configuration types.
//!
//! These mirror the printer settings the pressure-advance pass reads: extrusion
//! mode, firmware flavor, output precision, per-extruder pressure factors and
//! machine limits.

use crate::{CoordF, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Limit substituted for any machine limit that is unset or non-positive.
pub const UNLIMITED: CoordF = 100_000.0;

/// Machine kinematic limits.
///
/// Feedrates are in mm/s, accelerations in mm/s².
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineLimits {
    /// Apply the limits below. When false every limit is treated as unset.
    pub use_limits: bool,
    pub max_feedrate_x: CoordF,
    pub max_feedrate_y: CoordF,
    pub max_feedrate_z: CoordF,
    pub max_feedrate_e: CoordF,
    pub max_acceleration_x: CoordF,
    pub max_acceleration_y: CoordF,
    pub max_acceleration_z: CoordF,
    pub max_acceleration_e: CoordF,
    /// Acceleration cap while extruding, applied on top of the X/Y/Z limits.
    pub max_acceleration_extruding: CoordF,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            use_limits: true,
            max_feedrate_x: 500.0,
            max_feedrate_y: 500.0,
            max_feedrate_z: 12.0,
            max_feedrate_e: 120.0,
            max_acceleration_x: 20_000.0,
            max_acceleration_y: 20_000.0,
            max_acceleration_z: 500.0,
            max_acceleration_e: 5_000.0,
            max_acceleration_extruding: 20_000.0,
        }
    }
}

/// Limits after defaulting, as used by the kinematic model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveLimits {
    pub max_speed_x: CoordF,
    pub max_speed_y: CoordF,
    pub max_speed_z: CoordF,
    pub max_speed_e: CoordF,
    pub max_acceleration_x: CoordF,
    pub max_acceleration_y: CoordF,
    pub max_acceleration_z: CoordF,
    pub max_acceleration_e: CoordF,
}

impl MachineLimits {
    /// Limits with no constraint at all.
    pub fn unlimited() -> Self {
        Self {
            use_limits: false,
            ..Self::default()
        }
    }

    /// Resolve unset limits to [`UNLIMITED`] and apply the extruding acceleration cap.
    pub fn effective(&self) -> EffectiveLimits {
        let pick = |v: CoordF| {
            if self.use_limits && v > 0.0 {
                v
            } else {
                UNLIMITED
            }
        };
        let mut limits = EffectiveLimits {
            max_speed_x: pick(self.max_feedrate_x),
            max_speed_y: pick(self.max_feedrate_y),
            max_speed_z: pick(self.max_feedrate_z),
            max_speed_e: pick(self.max_feedrate_e),
            max_acceleration_x: pick(self.max_acceleration_x),
            max_acceleration_y: pick(self.max_acceleration_y),
            max_acceleration_z: pick(self.max_acceleration_z),
            max_acceleration_e: pick(self.max_acceleration_e),
        };
        if self.use_limits && self.max_acceleration_extruding > 0.0 {
            let cap = self.max_acceleration_extruding;
            limits.max_acceleration_x = limits.max_acceleration_x.min(cap);
            limits.max_acceleration_y = limits.max_acceleration_y.min(cap);
            limits.max_acceleration_z = limits.max_acceleration_z.min(cap);
        }
        limits
    }
}

/// Configuration of the pressure-advance re-timing pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureAdvanceConfig {
    // === Extrusion Mode ===
    /// Use relative extrusion mode (M83).
    /// When true, E values are relative (incremental) rather than absolute.
    pub use_relative_e: bool,
    /// G-code dialect of the stream.
    pub gcode_flavor: GCodeFlavor,

    // === Output ===
    /// Append timing and speed annotations to every re-timed line.
    pub gcode_comments: bool,
    /// Decimals written for X, Y and Z.
    pub gcode_precision_xyz: u8,
    /// Decimals written for the extrusion axis.
    pub gcode_precision_e: u8,

    // === Extruders ===
    /// Extra filament (mm) per mm/s of speed change, per extruder.
    /// An extruder without an entry uses the last one.
    pub extruder_pressure_factor: Vec<CoordF>,
    /// Names accepted by `ACTIVATE_EXTRUDER EXTRUDER=<name>`, per extruder.
    pub tool_name: Vec<String>,
    /// Letter of the extrusion axis.
    pub extrusion_axis: char,

    // === Kinematics ===
    /// Treat X and Y as one combined axis for speed and acceleration.
    pub speed_xy_combined: bool,
    pub machine_limits: MachineLimits,

    // === Buffer ===
    /// Travel distance (mm) kept in the buffer before lines are written.
    pub buffer_distance_span: CoordF,
    /// Number of useful moves kept in the buffer before lines are written.
    pub buffer_useful_size_span: usize,
    /// Fraction of a segment above which a required slow-down is applied
    /// to the whole segment instead of splitting it.
    pub split_ratio_threshold: CoordF,
}

impl Default for PressureAdvanceConfig {
    fn default() -> Self {
        Self {
            use_relative_e: true,
            gcode_flavor: GCodeFlavor::Marlin,
            gcode_comments: false,
            gcode_precision_xyz: 3,
            gcode_precision_e: 5,
            extruder_pressure_factor: vec![0.0],
            tool_name: Vec::new(),
            extrusion_axis: 'E',
            speed_xy_combined: false,
            machine_limits: MachineLimits::default(),
            buffer_distance_span: 100.0,
            buffer_useful_size_span: 100,
            split_ratio_threshold: 0.99,
        }
    }
}

impl PressureAdvanceConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields take their default value.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builder: set relative extrusion mode (M83).
    pub fn relative_e(mut self, relative: bool) -> Self {
        self.use_relative_e = relative;
        self
    }

    pub fn flavor(mut self, flavor: GCodeFlavor) -> Self {
        self.gcode_flavor = flavor;
        self
    }

    pub fn comments(mut self, enabled: bool) -> Self {
        self.gcode_comments = enabled;
        self
    }

    /// Builder: pressure factor for every extruder.
    pub fn pressure_factors(mut self, factors: Vec<CoordF>) -> Self {
        self.extruder_pressure_factor = factors;
        self
    }

    pub fn tool_names(mut self, names: Vec<String>) -> Self {
        self.tool_name = names;
        self
    }

    pub fn machine_limits(mut self, limits: MachineLimits) -> Self {
        self.machine_limits = limits;
        self
    }

    pub fn speed_xy_combined(mut self, combined: bool) -> Self {
        self.speed_xy_combined = combined;
        self
    }

    /// Builder: set both buffer spans.
    pub fn buffer_spans(mut self, distance: CoordF, useful_moves: usize) -> Self {
        self.buffer_distance_span = distance;
        self.buffer_useful_size_span = useful_moves;
        self
    }

    /// Pressure factor of an extruder, falling back to the last configured value.
    pub fn pressure_factor(&self, extruder: usize) -> CoordF {
        self.extruder_pressure_factor
            .get(extruder)
            .or_else(|| self.extruder_pressure_factor.last())
            .copied()
            .unwrap_or(0.0)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.gcode_precision_xyz == 0 || self.gcode_precision_e == 0 {
            return Err(Error::Config("G-code precision must be positive".into()));
        }
        if self.buffer_distance_span <= 0.0 {
            return Err(Error::Config("Buffer distance span must be positive".into()));
        }
        if self.buffer_useful_size_span == 0 {
            return Err(Error::Config("Buffer move span must be positive".into()));
        }
        if self.extruder_pressure_factor.iter().any(|f| *f < 0.0 || !f.is_finite()) {
            return Err(Error::Config("Pressure factors must be finite and non-negative".into()));
        }
        if !(self.split_ratio_threshold > 0.0 && self.split_ratio_threshold <= 1.0) {
            return Err(Error::Config("Split ratio threshold must be in (0, 1]".into()));
        }
        if !self.extrusion_axis.is_ascii_alphabetic() {
            return Err(Error::Config(format!(
                "Invalid extrusion axis '{}'",
                self.extrusion_axis
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PressureAdvanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PressureAdvanceConfig({}, {} E, factors={:?}, buffer={:.0}mm/{} moves)",
            self.gcode_flavor,
            if self.use_relative_e { "relative" } else { "absolute" },
            self.extruder_pressure_factor,
            self.buffer_distance_span,
            self.buffer_useful_size_span
        )
    }
}

/// G-code flavor/dialect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GCodeFlavor {
    /// Marlin 2 firmware (most common).
    #[default]
    Marlin,
    /// Marlin 1.x and the Prusa MK2/MK3 firmware.
    MarlinLegacy,
    /// RepRap firmware.
    RepRap,
    /// Sprinter firmware.
    Sprinter,
    /// Klipper firmware.
    Klipper,
}

impl GCodeFlavor {
    pub fn is_marlin(&self) -> bool {
        matches!(self, GCodeFlavor::Marlin | GCodeFlavor::MarlinLegacy)
    }
}

impl fmt::Display for GCodeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GCodeFlavor::Marlin => "marlin2",
            GCodeFlavor::MarlinLegacy => "marlin",
            GCodeFlavor::RepRap => "reprap",
            GCodeFlavor::Sprinter => "sprinter",
            GCodeFlavor::Klipper => "klipper",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PressureAdvanceConfig::default();
        assert!(config.use_relative_e);
        assert_eq!(config.gcode_precision_xyz, 3);
        assert_eq!(config.buffer_useful_size_span, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PressureAdvanceConfig::new()
            .relative_e(false)
            .flavor(GCodeFlavor::RepRap)
            .pressure_factors(vec![0.02, 0.04])
            .buffer_spans(50.0, 10);

        assert!(!config.use_relative_e);
        assert_eq!(config.gcode_flavor, GCodeFlavor::RepRap);
        assert!((config.pressure_factor(1) - 0.04).abs() < 1e-12);
        assert!((config.pressure_factor(5) - 0.04).abs() < 1e-12);
        assert_eq!(config.buffer_useful_size_span, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PressureAdvanceConfig::default();
        config.buffer_distance_span = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.buffer_distance_span = 100.0;
        config.extruder_pressure_factor = vec![-0.1];
        assert!(config.validate().is_err());

        config.extruder_pressure_factor = vec![0.1];
        config.split_ratio_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_partial() {
        let config: PressureAdvanceConfig =
            serde_json::from_str(r#"{"use_relative_e": false, "extruder_pressure_factor": [0.05]}"#)
                .unwrap();
        assert!(!config.use_relative_e);
        assert_eq!(config.gcode_precision_e, 5);
        assert!((config.pressure_factor(0) - 0.05).abs() < 1e-12);

        let text = config.to_json().unwrap();
        let back: PressureAdvanceConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_effective_limits() {
        let mut limits = MachineLimits {
            max_acceleration_x: 3000.0,
            max_acceleration_y: 0.0,
            max_acceleration_extruding: 1500.0,
            ..MachineLimits::default()
        };
        let eff = limits.effective();
        assert_eq!(eff.max_acceleration_x, 1500.0);
        assert_eq!(eff.max_acceleration_y, 1500.0);
        assert_eq!(eff.max_acceleration_e, 5000.0);

        limits.use_limits = false;
        let eff = limits.effective();
        assert_eq!(eff.max_acceleration_x, UNLIMITED);
        assert_eq!(eff.max_speed_z, UNLIMITED);
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = PressureAdvanceConfig::from_json_file("/nonexistent/pa.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
