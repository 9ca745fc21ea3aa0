//! Stream Drill Library
//!
//! Resynchronizing carver for H.264 and ASF streams in raw, fragmented
//! disk images. A generic header-tree parser drives per-format grammars;
//! H.264 gets a dedicated NAL unit chain validator that tracks parameter
//! sets, recovers headerless fragments and filters false hits.
//!
//! # Features
//!
//! - **Bit-exact cursor**: Byte and bit reads over one position, overflow-safe
//! - **Resynchronizing parser**: Skips garbage between headers, rolls back
//!   rejected candidates
//! - **H.264**: Annex B and length-prefixed framing, SPS/PPS/slice header
//!   validation, reference header substitution
//! - **ASF**: GUID object grammar with data packet sync-loss recovery
//! - **Parallel scan**: rayon regions over a memory-mapped image
//!
//! # Example
//!
//! ```no_run
//! use stream_drill::{Carver, Config, DataSource};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let source = DataSource::open(Path::new("disk.img"))?;
//!     let report = Carver::new(&Config::default()).scan(&source);
//!
//!     for carved in &report.blocks {
//!         println!("{} at {:#x}", carved.block.data_format, carved.block.start_offset);
//!     }
//!     Ok(())
//! }
//! ```

pub mod asf;
pub mod bitwriter;
pub mod carve;
pub mod cli;
pub mod config;
pub mod cursor;
pub mod detector;
pub mod error;
pub mod grammar;
pub mod h264;
pub mod parser;
pub mod source;
pub mod tree;

// Re-export commonly used types
pub use asf::{AsfDetector, AsfGrammar, AsfObject};
pub use carve::{CarveOptions, CarveProgress, CarveReport, CarveSummary, CarvedBlock, Carver};
pub use config::{AsfConfig, Config, H264Config, ScanConfig};
pub use cursor::{Cursor, Endian};
pub use detector::{DataBlock, DataBlockBuilder, DataFormat, Detector, ReferenceHeaderUse, ScanContext};
pub use error::{ParseError, ParseResult};
pub use h264::{H264Detector, NalFraming, ReferenceHeader};
pub use parser::TreeParser;
pub use source::{CancelToken, DataSource};
pub use tree::{AttrValue, Attribute, HeaderNode, HeaderTree, NodeId};
