//! Configuration module.
//!
//! Serde-backed settings for the G-code post-processing passes.

mod print_config;

pub use print_config::{
    EffectiveLimits, GCodeFlavor, MachineLimits, PressureAdvanceConfig, UNLIMITED,
};
