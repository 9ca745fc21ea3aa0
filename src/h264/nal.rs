//! NAL unit header and the allow-list of header bytes worth parsing.

use std::fmt;

use serde::Serialize;

use crate::error::{ParseError, ParseResult};

/// NAL unit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NalUnitType {
    /// Type 0; also tags the synthetic root of a unit tree.
    Unspecified,
    /// Coded slice of a non-IDR picture.
    NonIdrSlice,
    SliceDataA,
    SliceDataB,
    SliceDataC,
    /// Coded slice of an IDR picture.
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    FillerData,
    Other(u8),
}

impl NalUnitType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x1f {
            0 => Self::Unspecified,
            1 => Self::NonIdrSlice,
            2 => Self::SliceDataA,
            3 => Self::SliceDataB,
            4 => Self::SliceDataC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            n => Self::Other(n),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::NonIdrSlice => 1,
            Self::SliceDataA => 2,
            Self::SliceDataB => 3,
            Self::SliceDataC => 4,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::AccessUnitDelimiter => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::Other(n) => n,
        }
    }

    pub fn is_slice(self) -> bool {
        matches!(self, Self::NonIdrSlice | Self::IdrSlice)
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

impl fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(n) => write!(f, "type {n}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Whether a header byte names a unit the carver can parse with a legal
/// `nal_ref_idc` for its type.
const fn header_allowed(byte: u8) -> bool {
    if byte & 0x80 != 0 {
        return false;
    }
    let ref_idc = (byte >> 5) & 0x03;
    match byte & 0x1f {
        1 => true,
        5 | 7 | 8 => ref_idc != 0,
        6 | 9 | 10 | 11 | 12 => ref_idc == 0,
        _ => false,
    }
}

static ALLOWED_HEADERS: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = header_allowed(i as u8);
        i += 1;
    }
    table
};

/// Cheap pre-filter for the first byte of a candidate unit.
#[inline]
pub fn is_allowed_header(byte: u8) -> bool {
    ALLOWED_HEADERS[byte as usize]
}

/// The one-byte NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub unit_type: NalUnitType,
}

impl NalHeader {
    pub fn parse(byte: u8) -> ParseResult<Self> {
        if byte & 0x80 != 0 {
            return Err(ParseError::StructuralInvalid("forbidden_zero_bit"));
        }
        Ok(Self {
            nal_ref_idc: (byte >> 5) & 0x03,
            unit_type: NalUnitType::from_u8(byte),
        })
    }

    pub fn to_u8(self) -> u8 {
        (self.nal_ref_idc << 5) | self.unit_type.to_u8()
    }
}
