//! Configuration Module - Carver settings from ~/.stream-drill/config.toml
//!
//! Supports:
//! - Scan workers and enabled formats
//! - H.264 gap thresholds, unit length bounds and false-hit reduction
//! - ASF container tolerance

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detector::DataFormat;

/// Stream Drill Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan settings
    pub scan: ScanConfig,
    /// H.264 detector settings
    pub h264: H264Config,
    /// ASF detector settings
    pub asf: AsfConfig,
}

/// Scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of parallel workers (0 = auto)
    pub workers: usize,
    /// Formats to detect
    pub formats: Vec<DataFormat>,
    /// Compute a blake3 digest of every carved block
    pub hash_blocks: bool,
    /// Drop blocks longer than this many bytes (0 = unlimited)
    pub max_block_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 0, // auto-detect
            formats: vec![DataFormat::H264, DataFormat::Asf],
            hash_blocks: false,
            max_block_size: 0,
        }
    }
}

impl ScanConfig {
    /// Worker count with 0 resolved to the number of CPUs.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// H.264 detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct H264Config {
    /// Bytes tolerated between two NAL units
    pub max_gap_between_nal_units: u64,
    /// Bytes tolerated between an SPS and the PPS that follows it
    pub max_gap_sps_to_pps: u64,
    /// Bytes tolerated between a PPS and the slice that follows it
    pub max_gap_pps_to_slice: u64,
    /// Slice units must be longer than this (length-prefixed framing)
    pub min_slice_nal_unit_length: u64,
    /// Any unit must be shorter than this
    pub max_slice_nal_unit_length: u64,
    /// Inclusive SPS length bounds (length-prefixed framing)
    pub min_sps_length: u64,
    pub max_sps_length: u64,
    /// Inclusive PPS length bounds (length-prefixed framing)
    pub min_pps_length: u64,
    pub max_pps_length: u64,
    /// Flag and reject slice runs that look like false hits
    pub false_hit_reduction: bool,
    /// Zero bytes tolerated after a unit before the stream is considered over
    pub max_trailing_zero_bytes: u64,
    /// Reference header substitutions tried per fragment
    pub max_reference_header_retries: u32,
    /// Units a block needs before any other acceptance rule applies
    pub min_headers_for_acceptance: usize,
    /// Plausible slices that accept a block on their own
    pub min_slices_for_acceptance: usize,
    /// Plausible slices that accept a block when none is a likely false hit
    pub min_clean_slices_for_acceptance: usize,
    /// Unresolved slices above this picture parameter set id are suspicious
    pub false_hit_pps_id_threshold: u32,
    /// Upper bound on first_mb_in_slice when the picture size is unknown
    pub max_first_mb_in_slice: u32,
    /// Slices examined by the first_mb_in_slice continuity check
    pub first_mb_history: usize,
    /// Bytes searched for the first unit of a block (0 = to the scan limit)
    pub max_first_header_search: u64,
}

impl Default for H264Config {
    fn default() -> Self {
        Self {
            max_gap_between_nal_units: 256,
            max_gap_sps_to_pps: 16,
            max_gap_pps_to_slice: 64,
            min_slice_nal_unit_length: 4,
            max_slice_nal_unit_length: 4 * 1024 * 1024,
            min_sps_length: 5,
            max_sps_length: 100,
            min_pps_length: 2,
            max_pps_length: 20,
            false_hit_reduction: true,
            max_trailing_zero_bytes: 64,
            max_reference_header_retries: 8,
            min_headers_for_acceptance: 2,
            min_slices_for_acceptance: 4,
            min_clean_slices_for_acceptance: 2,
            false_hit_pps_id_threshold: 10,
            max_first_mb_in_slice: 139_264,
            first_mb_history: 16,
            max_first_header_search: 0,
        }
    }
}

/// ASF detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsfConfig {
    /// Bytes a container object may leave unparsed before its declared end
    pub max_unparsed_bytes: u64,
    /// Objects required before a block is reported
    pub min_headers: usize,
}

impl Default for AsfConfig {
    fn default() -> Self {
        Self {
            max_unparsed_bytes: 8,
            min_headers: 2,
        }
    }
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path()).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "tunclon", "stream-drill")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".stream-drill")
                    .join("config.toml")
            })
    }

    /// Create default config file if it doesn't exist
    pub fn ensure_exists() -> Result<PathBuf> {
        let path = Self::default_path();
        if !path.exists() {
            fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
            fs::write(&path, generate_sample_config())
                .with_context(|| format!("Failed to write config: {}", path.display()))?;
            tracing::info!("Created default config at {}", path.display());
        }
        Ok(path)
    }
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# Stream Drill Configuration
# Location: ~/.stream-drill/config.toml (or the platform config directory)

[scan]
# Number of parallel workers (0 = auto-detect CPU count)
workers = 0

# Formats to carve: "h264", "asf"
formats = ["h264", "asf"]

# Compute a blake3 digest of every carved block
hash_blocks = false

# Drop blocks longer than this many bytes (0 = unlimited)
max_block_size = 0

[h264]
# Maximum bytes between two NAL units before the stream is considered broken
max_gap_between_nal_units = 256

# Tighter bounds for the parameter set -> slice hand-off
max_gap_sps_to_pps = 16
max_gap_pps_to_slice = 64

# Slice unit length bounds (exclusive)
min_slice_nal_unit_length = 4
max_slice_nal_unit_length = 4194304

# Parameter set length bounds for length-prefixed streams (inclusive)
min_sps_length = 5
max_sps_length = 100
min_pps_length = 2
max_pps_length = 20

# Reject runs of slices that only look like H.264
false_hit_reduction = true

# Zero bytes tolerated after a unit
max_trailing_zero_bytes = 64

# Reference header substitutions tried per fragment
max_reference_header_retries = 8

# Units every block needs
min_headers_for_acceptance = 2

# Acceptance thresholds for blocks without parameter sets
min_slices_for_acceptance = 4
min_clean_slices_for_acceptance = 2
false_hit_pps_id_threshold = 10
max_first_mb_in_slice = 139264
first_mb_history = 16

# Bytes searched for the first unit of a block (0 = unlimited)
max_first_header_search = 0

[asf]
# Bytes a container object may leave unparsed
max_unparsed_bytes = 8

# Objects required before a block is reported
min_headers = 2
"#
    .to_string()
}
