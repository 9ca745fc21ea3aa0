//! H.264 elementary stream detection.
//!
//! Features:
//! - Annex B byte streams and length-prefixed units
//! - Full SPS/PPS/slice header validation with parameter set tracking
//! - Partial slice recovery for fragments without parameter sets
//! - Reference header substitution
//! - False-hit reduction via slice continuity

pub mod continuity;
pub mod framing;
pub mod golomb;
pub mod nal;
pub mod pps;
pub mod rbsp;
pub mod reference;
pub mod sei;
pub mod slice;
pub mod sps;
pub mod state;
pub mod syntax;
pub mod unit;
pub mod validator;
pub mod writer;

use std::sync::Arc;

pub use framing::NalFraming;
pub use nal::{NalHeader, NalUnitType};
pub use reference::ReferenceHeader;
pub use unit::{HeaderOnlySliceDecoder, SliceDataDecoder};
pub use validator::{CarvedStream, StreamValidator};

use crate::config::H264Config;
use crate::cursor::Cursor;
use crate::detector::{DataBlock, DataBlockBuilder, DataFormat, Detector, ReferenceHeaderUse, ScanContext};

/// Detector for H.264 streams.
pub struct H264Detector {
    config: H264Config,
    decoder: Arc<dyn SliceDataDecoder>,
}

impl H264Detector {
    pub fn new(config: H264Config) -> Self {
        Self {
            config,
            decoder: Arc::new(HeaderOnlySliceDecoder),
        }
    }

    /// Replace the slice data decoder run after every resolved slice header.
    pub fn with_slice_decoder(mut self, decoder: Arc<dyn SliceDataDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &H264Config {
        &self.config
    }

    /// Carve the next stream, exposing the unit tree.
    pub fn carve(&self, cursor: &mut Cursor<'_>, ctx: &ScanContext<'_>) -> Option<CarvedStream> {
        let validator = StreamValidator::new(&self.config, self.decoder.as_ref());
        match validator.carve(cursor, ctx) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!(offset = cursor.position(), %err, "H.264 detection stopped");
                None
            }
        }
    }
}

impl Default for H264Detector {
    fn default() -> Self {
        Self::new(H264Config::default())
    }
}

impl Detector for H264Detector {
    fn format(&self) -> DataFormat {
        DataFormat::H264
    }

    fn detect(
        &self,
        cursor: &mut Cursor<'_>,
        builder: &mut DataBlockBuilder,
        ctx: &ScanContext<'_>,
    ) -> Option<DataBlock> {
        let stream = self.carve(cursor, ctx)?;
        builder
            .start_offset(stream.start)
            .end_offset(stream.end)
            .header_count(stream.tree.header_count())
            .reference_header(stream.reference.map(ReferenceHeaderUse::new));
        builder.build()
    }
}
