//! CLI module - Command line interface definitions

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::detector::DataFormat;

/// Stream Drill - Resynchronizing H.264 and ASF carver
///
/// Scans raw, fragmented disk images for video streams and reports the
/// byte ranges they occupy. All operations are READ-ONLY.
#[derive(Parser, Debug)]
#[command(name = "stream-drill")]
#[command(author = "Ryan Cashmoney <tunclon@proton.me>")]
#[command(version)]
#[command(about = "Carve H.264 and ASF streams from raw disk images", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output (debug logging)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a raw image for streams
    Scan(ScanArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct ScanArgs {
    /// Raw image to scan (dd, img, memory dump, or block device)
    #[arg(required = true)]
    pub image: PathBuf,

    /// Formats to detect
    #[arg(long, short, value_enum, default_value = "all")]
    pub format: FormatFilter,

    /// Reference header file with SPS/PPS for headerless fragments (repeatable)
    #[arg(long, short)]
    pub reference: Vec<PathBuf>,

    /// Config file (default: platform config directory)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Number of parallel workers (default: from config, then CPU count)
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Hash every block with blake3
    #[arg(long)]
    pub hash: bool,

    /// Maximum gap between two NAL units in bytes
    #[arg(long)]
    pub max_gap: Option<u64>,

    /// Keep slice runs that fail the continuity checks
    #[arg(long)]
    pub no_false_hit_reduction: bool,
}

impl ScanArgs {
    /// Apply command line overrides on top of the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(formats) = self.format.formats() {
            config.scan.formats = formats;
        }
        if let Some(workers) = self.workers {
            config.scan.workers = workers;
        }
        if self.hash {
            config.scan.hash_blocks = true;
        }
        if let Some(gap) = self.max_gap {
            config.h264.max_gap_between_nal_units = gap;
        }
        if self.no_false_hit_reduction {
            config.h264.false_hit_reduction = false;
        }
    }
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct ConfigArgs {
    /// Write a commented default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print the effective configuration
    #[arg(long)]
    pub print: bool,

    /// Print the config file location
    #[arg(long)]
    pub path: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FormatFilter {
    /// H.264 elementary streams
    H264,
    /// ASF / WMV containers
    Asf,
    /// Every supported format (as configured)
    #[default]
    All,
}

impl FormatFilter {
    /// Formats selected on the command line; `None` keeps the config's list.
    pub fn formats(&self) -> Option<Vec<DataFormat>> {
        match self {
            FormatFilter::H264 => Some(vec![DataFormat::H264]),
            FormatFilter::Asf => Some(vec![DataFormat::Asf]),
            FormatFilter::All => None,
        }
    }
}
