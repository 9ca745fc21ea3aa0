//! Carve driver - Run format detectors across a raw image.
//!
//! Scans raw disk images (dd, img, memory dumps) for H.264 and ASF
//! fragments and reports each recognised byte range as a [`DataBlock`].
//!
//! # Design
//!
//! - **mmap**: Zero-copy access to multi-GB images via [`DataSource`]
//! - **Parallel regions**: Image split into N regions (one per worker),
//!   each scanned independently with rayon. A region bounds where blocks
//!   may *start*; a block is followed past the region end, so blocks that
//!   straddle a boundary are found whole by the earlier region
//! - **Detector loop**: Every detector walks its region on its own cursor,
//!   skipping past accepted blocks and resuming where a rejected attempt
//!   left the cursor
//! - **Merge**: Same-format blocks that overlap (a boundary-straddling
//!   block seen again as a suffix by the next region) keep the earliest

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::asf::AsfDetector;
use crate::config::Config;
use crate::cursor::Cursor;
use crate::detector::{DataBlock, DataBlockBuilder, DataFormat, Detector, ScanContext};
use crate::h264::{H264Detector, ReferenceHeader};
use crate::source::DataSource;

/// Bytes between progress reports from a worker.
const PROGRESS_INTERVAL: u64 = 1024 * 1024;

/// A block found in a raw image
#[derive(Debug, Clone, Serialize)]
pub struct CarvedBlock {
    #[serde(flatten)]
    pub block: DataBlock,
    /// Blake3 hash of the block bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Options for a carve operation
#[derive(Debug, Clone)]
pub struct CarveOptions {
    /// Number of parallel workers
    pub workers: usize,
    /// Hash every block with blake3
    pub hash_blocks: bool,
    /// Drop blocks longer than this (0 = unlimited)
    pub max_block_size: u64,
}

impl Default for CarveOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            hash_blocks: false,
            max_block_size: 0,
        }
    }
}

impl CarveOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.scan.effective_workers(),
            hash_blocks: config.scan.hash_blocks,
            max_block_size: config.scan.max_block_size,
        }
    }
}

/// Summary of a carve operation
#[derive(Debug, Clone, Serialize)]
pub struct CarveSummary {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub image_size: u64,
    pub blocks_found: usize,
    pub bytes_covered: u64,
    pub by_format: BTreeMap<String, usize>,
    pub duration_ms: u64,
    /// The scan stopped early; blocks found before that are kept
    pub cancelled: bool,
}

/// Blocks plus their summary
#[derive(Debug, Clone, Serialize)]
pub struct CarveReport {
    pub summary: CarveSummary,
    pub blocks: Vec<CarvedBlock>,
}

/// Progress updates emitted during carving
#[derive(Debug, Clone)]
pub enum CarveProgress {
    /// Scanning phase: bytes_scanned out of total. Every detector walks the
    /// whole image, so the total is the image size times the detector count.
    Scanning { bytes_scanned: u64, total_bytes: u64 },
    /// Scan complete, N blocks found
    ScanComplete { blocks_found: usize },
    /// Done
    Done,
}

/// The stream carver engine
pub struct Carver {
    options: CarveOptions,
    detectors: Vec<Box<dyn Detector>>,
    references: Vec<Arc<ReferenceHeader>>,
}

impl Carver {
    /// Carver with one detector per format enabled in `config`.
    pub fn new(config: &Config) -> Self {
        let detectors = config
            .scan
            .formats
            .iter()
            .map(|format| -> Box<dyn Detector> {
                match format {
                    DataFormat::H264 => Box::new(H264Detector::new(config.h264.clone())),
                    DataFormat::Asf => Box::new(AsfDetector::new(config.asf.clone())),
                }
            })
            .collect();
        Self::with_detectors(CarveOptions::from_config(config), detectors)
    }

    pub fn with_detectors(options: CarveOptions, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            options,
            detectors,
            references: Vec::new(),
        }
    }

    /// Reference headers offered to detectors for fragments without
    /// parameter sets.
    pub fn with_references(mut self, references: Vec<Arc<ReferenceHeader>>) -> Self {
        self.references = references;
        self
    }

    pub fn formats(&self) -> Vec<DataFormat> {
        self.detectors.iter().map(|d| d.format()).collect()
    }

    /// Convenience wrapper without progress (for tests and non-interactive use)
    pub fn scan(&self, source: &DataSource) -> CarveReport {
        self.scan_with_progress(source, |_| {})
    }

    /// Scan with a progress callback. Scanning updates arrive from worker
    /// threads.
    pub fn scan_with_progress<F>(&self, source: &DataSource, on_progress: F) -> CarveReport
    where
        F: Fn(CarveProgress) + Send + Sync,
    {
        let start = Instant::now();
        let started_at = Utc::now();
        let image_size = source.len();

        let num_regions = self.options.workers.max(1) as u64;
        let region_size = image_size.div_ceil(num_regions).max(1);

        tracing::info!(
            source = source.name(),
            image_size,
            detectors = self.detectors.len(),
            references = self.references.len(),
            workers = num_regions,
            "Starting stream carve"
        );

        let total_bytes = image_size * self.detectors.len() as u64;
        let scanned = AtomicU64::new(0);
        let report = |bytes: u64| {
            let bytes_scanned = scanned.fetch_add(bytes, Ordering::Relaxed) + bytes;
            on_progress(CarveProgress::Scanning {
                bytes_scanned,
                total_bytes,
            });
        };

        let found: Vec<DataBlock> = (0..num_regions)
            .into_par_iter()
            .flat_map_iter(|i| {
                let region_start = (i * region_size).min(image_size);
                let region_end = ((i + 1) * region_size).min(image_size);
                let mut blocks = Vec::new();
                for detector in &self.detectors {
                    blocks.extend(self.scan_region(source, detector.as_ref(), region_start, region_end, &report));
                }
                blocks
            })
            .collect();

        let cancelled = source.is_cancelled();
        let merged = merge_blocks(found);
        let blocks: Vec<CarvedBlock> = merged
            .into_iter()
            .filter(|b| {
                let keep = self.options.max_block_size == 0 || b.len() <= self.options.max_block_size;
                if !keep {
                    tracing::debug!(start = b.start_offset, len = b.len(), "Block exceeds max_block_size");
                }
                keep
            })
            .map(|block| {
                let hash = self
                    .options
                    .hash_blocks
                    .then(|| hex::encode(blake3::hash(source.slice(block.start_offset..block.end_offset)).as_bytes()));
                CarvedBlock { block, hash }
            })
            .collect();

        on_progress(CarveProgress::ScanComplete {
            blocks_found: blocks.len(),
        });

        let mut by_format = BTreeMap::new();
        for b in &blocks {
            *by_format.entry(b.block.data_format.name().to_string()).or_insert(0) += 1;
        }
        let summary = CarveSummary {
            source: source.name().to_string(),
            started_at,
            image_size,
            blocks_found: blocks.len(),
            bytes_covered: blocks.iter().map(|b| b.block.len()).sum(),
            by_format,
            duration_ms: start.elapsed().as_millis() as u64,
            cancelled,
        };

        on_progress(CarveProgress::Done);

        tracing::info!(
            blocks_found = summary.blocks_found,
            bytes_covered = summary.bytes_covered,
            duration_ms = summary.duration_ms,
            cancelled,
            "Carve complete"
        );

        CarveReport { summary, blocks }
    }

    /// Run one detector over blocks starting in `start..end`, reporting the
    /// bytes covered through `report`.
    fn scan_region(
        &self,
        source: &DataSource,
        detector: &dyn Detector,
        start: u64,
        end: u64,
        report: &(dyn Fn(u64) + Sync),
    ) -> Vec<DataBlock> {
        let mut blocks = Vec::new();
        let mut cursor = Cursor::new(source);
        let mut builder = DataBlockBuilder::new(detector.format());
        let ctx = ScanContext::new(end, &self.references);

        let mut pos = start;
        let mut last_report = start;
        while pos < end {
            if source.is_cancelled() {
                tracing::debug!(pos, format = %detector.format(), "Region scan cancelled");
                break;
            }
            cursor.set_position(pos);
            builder.reset();
            match detector.detect(&mut cursor, &mut builder, &ctx) {
                Some(block) => {
                    pos = block.end_offset.max(pos + 1);
                    blocks.push(block);
                }
                None => pos = cursor.position().max(pos + 1),
            }
            let reached = pos.min(end);
            if reached - last_report >= PROGRESS_INTERVAL {
                tracing::trace!(pos, format = %detector.format(), "Region progress");
                report(reached - last_report);
                last_report = reached;
            }
        }
        if !source.is_cancelled() && end > last_report {
            report(end - last_report);
        }
        blocks
    }
}

/// Sort by offset and drop same-format blocks that overlap an earlier one.
/// Blocks of different formats may overlap (a stream inside a container).
fn merge_blocks(mut blocks: Vec<DataBlock>) -> Vec<DataBlock> {
    blocks.sort_by(|a, b| {
        a.start_offset
            .cmp(&b.start_offset)
            .then(b.end_offset.cmp(&a.end_offset))
    });
    let mut kept: Vec<DataBlock> = Vec::with_capacity(blocks.len());
    let mut last_end: BTreeMap<DataFormat, u64> = BTreeMap::new();
    for block in blocks {
        let end = last_end.entry(block.data_format).or_insert(0);
        if block.start_offset < *end {
            continue;
        }
        *end = block.end_offset;
        kept.push(block);
    }
    kept
}
