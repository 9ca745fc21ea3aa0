//! Detector interface shared by every carvable format.
//!
//! A detector is handed a cursor and a scan limit. It searches forward for
//! the first header it recognises before the limit and, if the headers that
//! follow are convincing, reports the byte range they cover as a
//! [`DataBlock`]. Detectors never fail: every parse error is absorbed and
//! turned into "no block here".

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::h264::ReferenceHeader;

/// Formats the carver can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    H264,
    Asf,
}

impl DataFormat {
    pub const ALL: [DataFormat; 2] = [DataFormat::H264, DataFormat::Asf];

    pub fn name(&self) -> &'static str {
        match self {
            DataFormat::H264 => "h264",
            DataFormat::Asf => "asf",
        }
    }

    /// File extension used when exporting a carved block.
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::H264 => "264",
            DataFormat::Asf => "asf",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "h.264" | "avc" => Ok(DataFormat::H264),
            "asf" | "wmv" | "wma" => Ok(DataFormat::Asf),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// The reference header that made a fragment decodable.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceHeaderUse {
    pub name: String,
    /// Length of the parameter set bytes a decoder must prepend.
    pub length: u64,
    #[serde(skip)]
    pub header: Arc<ReferenceHeader>,
}

impl ReferenceHeaderUse {
    pub fn new(header: Arc<ReferenceHeader>) -> Self {
        Self {
            name: header.name().to_string(),
            length: header.bytes().len() as u64,
            header,
        }
    }

    /// Parameter set bytes to prepend when exporting the block.
    pub fn payload(&self) -> &[u8] {
        self.header.bytes()
    }
}

/// A contiguous byte range recognised as one format.
#[derive(Debug, Clone, Serialize)]
pub struct DataBlock {
    pub data_format: DataFormat,
    pub start_offset: u64,
    /// Exclusive.
    pub end_offset: u64,
    /// Headers the detector linked inside the block.
    pub header_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_header: Option<ReferenceHeaderUse>,
}

impl DataBlock {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &DataBlock) -> bool {
        self.start_offset < other.end_offset && other.start_offset < self.end_offset
    }
}

/// Collects the pieces of a block while a detector works.
#[derive(Debug, Clone)]
pub struct DataBlockBuilder {
    data_format: DataFormat,
    start_offset: Option<u64>,
    end_offset: Option<u64>,
    header_count: usize,
    reference_header: Option<ReferenceHeaderUse>,
}

impl DataBlockBuilder {
    pub fn new(data_format: DataFormat) -> Self {
        Self {
            data_format,
            start_offset: None,
            end_offset: None,
            header_count: 0,
            reference_header: None,
        }
    }

    pub fn start_offset(&mut self, offset: u64) -> &mut Self {
        self.start_offset = Some(offset);
        self
    }

    pub fn end_offset(&mut self, offset: u64) -> &mut Self {
        self.end_offset = Some(offset);
        self
    }

    pub fn header_count(&mut self, count: usize) -> &mut Self {
        self.header_count = count;
        self
    }

    pub fn reference_header(&mut self, header: Option<ReferenceHeaderUse>) -> &mut Self {
        self.reference_header = header;
        self
    }

    /// Finish the block. `None` unless both ends are set and the range is
    /// non-empty. The builder is reset for the next detection.
    pub fn build(&mut self) -> Option<DataBlock> {
        let start = self.start_offset.take()?;
        let end = self.end_offset.take()?;
        let reference_header = self.reference_header.take();
        let header_count = std::mem::take(&mut self.header_count);
        (end > start).then_some(DataBlock {
            data_format: self.data_format,
            start_offset: start,
            end_offset: end,
            header_count,
            reference_header,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.data_format);
    }
}

/// Scan-wide inputs available to every detection.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    /// A block must start before this offset.
    pub scan_limit: u64,
    /// Externally supplied parameter sets for headerless fragments.
    pub reference_headers: &'a [Arc<ReferenceHeader>],
}

impl<'a> ScanContext<'a> {
    pub fn new(scan_limit: u64, reference_headers: &'a [Arc<ReferenceHeader>]) -> Self {
        Self {
            scan_limit,
            reference_headers,
        }
    }
}

/// A format recogniser.
pub trait Detector: Send + Sync {
    fn format(&self) -> DataFormat;

    /// Find the next block at or after the cursor.
    ///
    /// On success the cursor is left at the block's end. Otherwise it is left
    /// beyond the region that was examined, so a repeated call with the same
    /// limit always makes progress or returns `None` immediately.
    fn detect(
        &self,
        cursor: &mut Cursor<'_>,
        builder: &mut DataBlockBuilder,
        ctx: &ScanContext<'_>,
    ) -> Option<DataBlock>;
}
