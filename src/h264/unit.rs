//! Parse one located NAL unit.
//!
//! The payload is unescaped into an RBSP buffer and dispatched on the unit
//! type. Parsing never mutates the active parameter sets; the caller commits
//! a parsed SPS or PPS only once the unit is accepted.

use crate::cursor::Cursor;
use crate::error::{ParseError, ParseResult};
use crate::h264::framing::UnitLocation;
use crate::h264::nal::NalUnitType;
use crate::h264::pps::parse_pps;
use crate::h264::rbsp::Rbsp;
use crate::h264::sei::{parse_access_unit_delimiter, parse_empty, parse_filler_data, parse_sei};
use crate::h264::slice::parse_slice_header;
use crate::h264::sps::parse_sps;
use crate::h264::state::{ParameterSets, PictureState, SequenceState, SliceState};
use crate::h264::syntax::SyntaxReader;
use crate::tree::{AttrValue, Attribute, HeaderNode};

/// Hook for decoding macroblock data after a fully resolved slice header.
///
/// The cursor is positioned at the first bit of `slice_data()` in the
/// unescaped payload.
pub trait SliceDataDecoder: Send + Sync {
    fn decode(&self, data: &mut Cursor<'_>, slice: &SliceState) -> ParseResult<()>;
}

/// Accepts every slice after its header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOnlySliceDecoder;

impl SliceDataDecoder for HeaderOnlySliceDecoder {
    fn decode(&self, _data: &mut Cursor<'_>, _slice: &SliceState) -> ParseResult<()> {
        Ok(())
    }
}

/// Decoded content of a unit.
#[derive(Debug, Clone)]
pub enum UnitPayload {
    Sps(SequenceState),
    Pps(PictureState),
    Slice(SliceState),
    Sei,
    AccessUnitDelimiter,
    FillerData,
    EndOfSequence,
    EndOfStream,
}

/// A unit that parsed successfully.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub location: UnitLocation,
    pub payload: UnitPayload,
    pub attributes: Vec<Attribute>,
}

impl ParsedUnit {
    pub fn unit_type(&self) -> NalUnitType {
        self.location.header.unit_type
    }

    pub fn is_valid(&self) -> bool {
        self.attributes.iter().all(|a| a.valid)
    }

    pub fn slice(&self) -> Option<&SliceState> {
        match &self.payload {
            UnitPayload::Slice(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_partial_slice(&self) -> bool {
        self.slice().is_some_and(SliceState::is_partial)
    }

    /// Tree node spanning the whole unit, framing included.
    pub fn to_node(&self) -> HeaderNode<NalUnitType> {
        let loc = &self.location;
        let mut node = HeaderNode::new(loc.header.unit_type, loc.offset);
        node.length = loc.end - loc.offset;
        node.valid = self.is_valid();
        node.push_attribute("nal_ref_idc", AttrValue::Unsigned(u64::from(loc.header.nal_ref_idc)), true);
        node.attributes.extend(self.attributes.iter().cloned());
        node
    }
}

/// Parameter sets must end exactly at their trailing bits.
fn parameter_set_end(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    if r.cursor().more_rbsp_data() {
        return Err(ParseError::StructuralInvalid("unparsed parameter set data"));
    }
    r.cursor().rbsp_trailing_bits()
}

/// Parse the unit at `location` in `data` against `sets`.
pub fn parse_unit(
    location: &UnitLocation,
    data: &[u8],
    sets: &ParameterSets,
    decoder: &dyn SliceDataDecoder,
) -> ParseResult<ParsedUnit> {
    let raw = data
        .get(location.payload_range())
        .ok_or(ParseError::Overflow)?;
    let rbsp = Rbsp::from_raw(raw);
    let mut cursor = Cursor::from_bytes(rbsp.bytes());
    let mut r = SyntaxReader::new(&mut cursor);

    let header = location.header;
    let payload = match header.unit_type {
        NalUnitType::Sps => {
            let sps = parse_sps(&mut r)?;
            parameter_set_end(&mut r)?;
            UnitPayload::Sps(sps)
        }
        NalUnitType::Pps => {
            let pps = parse_pps(&mut r, sets)?;
            parameter_set_end(&mut r)?;
            UnitPayload::Pps(pps)
        }
        NalUnitType::NonIdrSlice | NalUnitType::IdrSlice => {
            let slice = parse_slice_header(&mut r, header, sets)?;
            if !slice.is_partial() {
                let rbsp_pos = (r.cursor().bit_position() / 8) as usize;
                let raw_pos = location.payload_range().start + rbsp.raw_offset(rbsp_pos);
                r.note("slice_data_offset", AttrValue::Unsigned(raw_pos as u64), true);
                decoder.decode(r.cursor(), &slice)?;
            }
            UnitPayload::Slice(slice)
        }
        NalUnitType::Sei => {
            parse_sei(&mut r)?;
            UnitPayload::Sei
        }
        NalUnitType::AccessUnitDelimiter => {
            parse_access_unit_delimiter(&mut r)?;
            UnitPayload::AccessUnitDelimiter
        }
        NalUnitType::FillerData => {
            parse_filler_data(&mut r)?;
            UnitPayload::FillerData
        }
        NalUnitType::EndOfSequence => {
            parse_empty(&mut r)?;
            UnitPayload::EndOfSequence
        }
        NalUnitType::EndOfStream => {
            parse_empty(&mut r)?;
            UnitPayload::EndOfStream
        }
        NalUnitType::SliceDataA | NalUnitType::SliceDataB | NalUnitType::SliceDataC => {
            return Err(ParseError::UnsupportedConstruct("slice data partitioning"));
        }
        NalUnitType::Unspecified | NalUnitType::Other(_) => {
            return Err(ParseError::UnsupportedConstruct("nal unit type"));
        }
    };

    let mut attributes = r.into_attributes();
    if rbsp.removed_count() > 0 {
        attributes.push(Attribute::new(
            "emulation_prevention_bytes",
            AttrValue::Unsigned(rbsp.removed_count() as u64),
        ));
    }
    Ok(ParsedUnit {
        location: *location,
        payload,
        attributes,
    })
}
