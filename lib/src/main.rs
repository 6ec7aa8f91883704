//! slicer-post - command-line driver for the post-processing passes
//!
//! Usage:
//!   slicer-post pressure-advance <input.gcode> -o <output.gcode> [--config cfg.json]
//!   slicer-post bridge <regions.json> [--precise] [--limit n] [--svg-dir dir]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use slicer_post::bridge::{
    detect_layer_bridges, BridgeDetectorConfig, BridgeRegion, DebugSink, NoopSink, SvgDebugSink,
};
use slicer_post::{PressureAdvance, PressureAdvanceConfig};
use std::fs;
use std::path::PathBuf;

/// Lines handed to the re-timing pass per call.
const CHUNK_LINES: usize = 4096;

/// G-code and geometry post-processing for 3D printing
#[derive(Parser, Debug)]
#[command(name = "slicer-post")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-time moves and apply pressure advance to a G-code file
    PressureAdvance {
        /// Input G-code file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output G-code file (default: <input>.pa.gcode)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Configuration file (JSON format)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Extruder active at the start of the file
        #[arg(long, default_value = "0")]
        extruder: usize,
    },

    /// Detect bridging directions and coverage for regions described in JSON
    Bridge {
        /// JSON array of regions
        #[arg(value_name = "REGIONS")]
        regions: PathBuf,

        /// Bridge detector configuration (JSON format)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Slice coverage into spacing-wide columns
        #[arg(long)]
        precise: bool,

        /// Stop after this many regions
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Write intermediate shapes as SVG files into this directory
        #[arg(long, value_name = "DIR")]
        svg_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::PressureAdvance {
            input,
            output,
            config,
            extruder,
        } => cmd_pressure_advance(input, output, config, extruder),
        Commands::Bridge {
            regions,
            config,
            precise,
            limit,
            svg_dir,
        } => cmd_bridge(regions, config, precise, limit, svg_dir),
    }
}

fn cmd_pressure_advance(
    input: PathBuf,
    output: Option<PathBuf>,
    config_file: Option<PathBuf>,
    extruder: usize,
) -> Result<()> {
    let config = match &config_file {
        Some(path) => PressureAdvanceConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PressureAdvanceConfig::default(),
    };
    info!("{}", config);

    let output_path = output.unwrap_or_else(|| input.with_extension("pa.gcode"));
    let text = fs::read_to_string(&input)
        .with_context(|| format!("Failed to read G-code file {}", input.display()))?;

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let chunks: Vec<String> = lines.chunks(CHUNK_LINES).map(|c| c.concat()).collect();

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);

    let mut pa = PressureAdvance::new(config, extruder);
    let mut result = String::with_capacity(text.len() + text.len() / 8);
    for (i, chunk) in chunks.iter().enumerate() {
        result.push_str(&pa.process_gcode(chunk, false));
        progress.set_message(format!("{} / {} lines", ((i + 1) * CHUNK_LINES).min(lines.len()), lines.len()));
        progress.tick();
    }
    result.push_str(&pa.process_gcode("", true));
    progress.finish_with_message("Done!");

    fs::write(&output_path, &result)
        .with_context(|| format!("Failed to write G-code file {}", output_path.display()))?;

    println!();
    println!("Pressure advance complete!");
    println!("  Output: {}", output_path.display());
    println!("  Lines: {}", lines.len());
    if pa.partial_propagations() > 0 {
        println!("  Short buffer warnings: {}", pa.partial_propagations());
    }
    Ok(())
}

fn cmd_bridge(
    regions_file: PathBuf,
    config_file: Option<PathBuf>,
    precise: bool,
    limit: Option<usize>,
    svg_dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = match &config_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<BridgeDetectorConfig>(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => BridgeDetectorConfig::default(),
    };
    if precise {
        config = config.precise(true);
    }
    info!("{}", config);

    let text = fs::read_to_string(&regions_file)
        .with_context(|| format!("Failed to read regions {}", regions_file.display()))?;
    let regions: Vec<BridgeRegion> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse regions {}", regions_file.display()))?;

    let mut svg_sink;
    let mut noop_sink = NoopSink;
    let sink: &mut dyn DebugSink = match &svg_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            svg_sink = SvgDebugSink::new(dir);
            &mut svg_sink
        }
        None => &mut noop_sink,
    };

    let selected = first_regions(&regions, limit);
    if selected.len() < regions.len() {
        info!("Limited to the first {} of {} region(s)", selected.len(), regions.len());
    }

    let progress = ProgressBar::new(selected.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    progress.set_message("Detecting bridges...");

    let mut started = 0u64;
    let cancel = || {
        progress.set_position(started);
        started += 1;
        false
    };

    let bridges = detect_layer_bridges(selected, &config, cancel, sink)
        .context("Bridge detection failed")?;
    progress.set_position(selected.len() as u64);
    progress.finish_with_message("Done!");

    println!("Processed {} of {} region(s)", bridges.len(), regions.len());
    println!();
    for (i, bridge) in bridges.iter().enumerate() {
        match bridge.angle {
            Some(angle) => println!(
                "  region {} (layer {}): angle {:.2}°, coverage {:.3} mm², {} unsupported edge(s)",
                i,
                bridge.layer_index,
                angle.to_degrees(),
                bridge.area_mm2(),
                bridge.unsupported_edges.len()
            ),
            None => println!("  region {} (layer {}): not bridgeable", i, bridge.layer_index),
        }
    }
    Ok(())
}

/// The regions a `--limit` run looks at.
fn first_regions(regions: &[BridgeRegion], limit: Option<usize>) -> &[BridgeRegion] {
    match limit {
        Some(n) => &regions[..n.min(regions.len())],
        None => regions,
    }
}
