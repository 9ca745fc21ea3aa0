//! Reference headers: parameter sets taken from a known-good file.
//!
//! Fragments recovered without their SPS/PPS can still be validated by
//! borrowing the parameter sets of another stream from the same device.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::H264Config;
use crate::error::{ParseError, ParseResult};
use crate::h264::framing::{NalFraming, UnitLocator};
use crate::h264::state::ParameterSets;
use crate::h264::unit::{parse_unit, HeaderOnlySliceDecoder, UnitPayload};

/// Parameter sets parsed from a reference file.
pub struct ReferenceHeader {
    name: String,
    framing: NalFraming,
    bytes: Vec<u8>,
    sets: ParameterSets,
}

impl ReferenceHeader {
    /// Parse every SPS and PPS in `bytes`. At least one usable pair is
    /// required.
    pub fn parse(name: impl Into<String>, bytes: Vec<u8>, config: &H264Config) -> ParseResult<Self> {
        let locator = UnitLocator::new(config);
        let len = bytes.len() as u64;
        let first = locator
            .find_in(&bytes, 0..len, None)
            .ok_or(ParseError::StructuralInvalid("no nal unit in reference header"))?;
        let framing = first.framing;

        let mut sets = ParameterSets::new();
        let mut next = Some(first);
        while let Some(loc) = next {
            match parse_unit(&loc, &bytes, &sets, &HeaderOnlySliceDecoder) {
                Ok(parsed) => match parsed.payload {
                    UnitPayload::Sps(sps) => {
                        sets.insert_sequence(sps);
                    }
                    UnitPayload::Pps(pps) => {
                        sets.insert_picture(pps);
                    }
                    _ => {}
                },
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => tracing::debug!(offset = loc.offset, %err, "Skipping reference unit"),
            }
            next = locator
                .search_window(&bytes, loc.end, framing, config.max_gap_between_nal_units)
                .and_then(|window| locator.find_in(&bytes, window, Some(framing)));
        }

        if !sets.has_pair() {
            return Err(ParseError::StructuralInvalid(
                "reference header has no sequence and picture parameter set pair",
            ));
        }
        Ok(Self {
            name: name.into(),
            framing,
            bytes,
            sets,
        })
    }

    /// Wrap already decoded parameter sets. The result carries no raw bytes,
    /// so blocks resolved with it export without a prepended header.
    pub fn from_parameter_sets(name: impl Into<String>, framing: NalFraming, sets: ParameterSets) -> ParseResult<Self> {
        if !sets.has_pair() {
            return Err(ParseError::StructuralInvalid(
                "reference header has no sequence and picture parameter set pair",
            ));
        }
        Ok(Self {
            name: name.into(),
            framing,
            bytes: Vec::new(),
            sets,
        })
    }

    /// Read and parse a reference header file.
    pub fn load(path: &Path, config: &H264Config) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read reference header: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(name, bytes, config)
            .with_context(|| format!("Invalid reference header: {}", path.display()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn framing(&self) -> NalFraming {
        self.framing
    }

    /// The raw reference file.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.sets
    }
}

impl fmt::Debug for ReferenceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHeader")
            .field("name", &self.name)
            .field("framing", &self.framing)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h264::writer::{PpsParams, SpsParams, StreamWriter};
    use tempfile::TempDir;

    fn parameter_sets(framing: NalFraming) -> Vec<u8> {
        let mut w = StreamWriter::new(framing);
        w.sps(&SpsParams::default()).pps(&PpsParams {
            pps_id: 2,
            ..Default::default()
        });
        w.finish()
    }

    #[test]
    fn parses_byte_stream_reference() {
        let reference =
            ReferenceHeader::parse("cam.264", parameter_sets(NalFraming::ByteStream), &H264Config::default())
                .unwrap();
        assert_eq!(reference.framing(), NalFraming::ByteStream);
        assert!(reference.parameter_sets().picture(2).is_some());
        assert!(reference.parameter_sets().sequence(0).is_some());
    }

    #[test]
    fn parses_length_prefixed_reference() {
        let reference = ReferenceHeader::parse(
            "cam.avc",
            parameter_sets(NalFraming::LengthPrefixed),
            &H264Config::default(),
        )
        .unwrap();
        assert_eq!(reference.framing(), NalFraming::LengthPrefixed);
        assert!(reference.parameter_sets().has_pair());
    }

    #[test]
    fn sps_only_is_rejected() {
        let mut w = StreamWriter::new(NalFraming::ByteStream);
        w.sps(&SpsParams::default());
        assert!(ReferenceHeader::parse("sps", w.finish(), &H264Config::default()).is_err());
    }

    #[test]
    fn wraps_decoded_sets() {
        let parsed =
            ReferenceHeader::parse("cam.264", parameter_sets(NalFraming::ByteStream), &H264Config::default())
                .unwrap();
        let wrapped =
            ReferenceHeader::from_parameter_sets("copy", NalFraming::ByteStream, parsed.parameter_sets().clone())
                .unwrap();
        assert!(wrapped.bytes().is_empty());
        assert!(wrapped.parameter_sets().picture(2).is_some());
        assert!(ReferenceHeader::from_parameter_sets("empty", NalFraming::ByteStream, ParameterSets::new()).is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ref.264");
        std::fs::write(&path, parameter_sets(NalFraming::ByteStream)).unwrap();
        let reference = ReferenceHeader::load(&path, &H264Config::default()).unwrap();
        assert_eq!(reference.name(), "ref.264");
    }
}
