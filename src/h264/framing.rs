//! NAL unit framing: Annex B byte streams and length-prefixed units.
//!
//! Length-prefixed streams use a 2-byte big-endian length for parameter
//! sets and a 4-byte length for every other unit, as found in carved
//! container payloads. Byte-stream units run until the next `00 00 00`,
//! `00 00 01` or `00 00 02`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::H264Config;
use crate::error::{ParseError, ParseResult};
use crate::h264::nal::{is_allowed_header, NalHeader, NalUnitType};
use crate::h264::sps::is_known_profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NalFraming {
    ByteStream,
    LengthPrefixed,
}

/// Where one NAL unit sits in the raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitLocation {
    pub framing: NalFraming,
    /// First byte of the start code or length field.
    pub offset: u64,
    pub header_offset: u64,
    /// Exclusive end of the unit payload.
    pub end: u64,
    pub header: NalHeader,
}

impl UnitLocation {
    /// Raw (escaped) payload after the header byte.
    pub fn payload_range(&self) -> Range<usize> {
        (self.header_offset + 1) as usize..self.end as usize
    }

    /// Unit length from the header byte on.
    pub fn unit_len(&self) -> u64 {
        self.end - self.header_offset
    }
}

fn be_u16(data: &[u8], at: usize) -> Option<u64> {
    let b = data.get(at..at + 2)?;
    Some(u64::from(u16::from_be_bytes([b[0], b[1]])))
}

fn be_u32(data: &[u8], at: usize) -> Option<u64> {
    let b = data.get(at..at + 4)?;
    Some(u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
}

/// Finds NAL units under the configured length bounds.
#[derive(Debug, Clone, Copy)]
pub struct UnitLocator<'c> {
    config: &'c H264Config,
}

impl<'c> UnitLocator<'c> {
    pub fn new(config: &'c H264Config) -> Self {
        Self { config }
    }

    /// Header byte passes the allow-list and, for an SPS, the byte after it
    /// is a known profile.
    fn plausible_header(data: &[u8], header_offset: usize) -> Option<NalHeader> {
        let &byte = data.get(header_offset)?;
        if !is_allowed_header(byte) {
            return None;
        }
        let header = NalHeader::parse(byte).ok()?;
        if header.unit_type == NalUnitType::Sps {
            if let Some(&profile) = data.get(header_offset + 1) {
                if !is_known_profile(profile) {
                    return None;
                }
            }
        }
        Some(header)
    }

    /// Try to read a unit at exactly `offset`.
    ///
    /// `Ok(None)` means nothing recognisable starts here. A length-prefixed
    /// unit whose declared length runs past the data is an
    /// [`ParseError::Overflow`].
    pub fn locate(
        &self,
        data: &[u8],
        offset: u64,
        framing: Option<NalFraming>,
    ) -> ParseResult<Option<UnitLocation>> {
        if offset >= data.len() as u64 {
            return Ok(None);
        }
        match framing {
            Some(NalFraming::ByteStream) => Ok(self.locate_byte_stream(data, offset)),
            Some(NalFraming::LengthPrefixed) => self.locate_length_prefixed(data, offset),
            None => match self.locate_byte_stream(data, offset) {
                Some(found) => Ok(Some(found)),
                None => self.locate_length_prefixed(data, offset),
            },
        }
    }

    fn locate_byte_stream(&self, data: &[u8], offset: u64) -> Option<UnitLocation> {
        let at = offset as usize;
        let rest = &data[at..];
        let prefix = if rest.starts_with(&[0, 0, 1]) {
            3
        } else if rest.starts_with(&[0, 0, 0, 1]) {
            4
        } else {
            return None;
        };
        let header_offset = at + prefix;
        let header = Self::plausible_header(data, header_offset)?;
        let end = self.byte_stream_end(data, header_offset)?;
        let len = (end - header_offset) as u64;
        if header.unit_type.is_slice() && len <= self.config.min_slice_nal_unit_length {
            return None;
        }
        Some(UnitLocation {
            framing: NalFraming::ByteStream,
            offset,
            header_offset: header_offset as u64,
            end: end as u64,
            header,
        })
    }

    /// End of a byte-stream unit, or `None` if it would reach the maximum
    /// unit length before the data ends.
    fn byte_stream_end(&self, data: &[u8], header_offset: usize) -> Option<usize> {
        let max_len = usize::try_from(self.config.max_slice_nal_unit_length).unwrap_or(usize::MAX);
        let limit = header_offset.saturating_add(max_len).min(data.len());
        let mut i = header_offset + 1;
        while i < limit {
            if data[i] == 0 && data.get(i + 1) == Some(&0) && data.get(i + 2).is_some_and(|&b| b <= 2) {
                return Some(i);
            }
            i += 1;
        }
        (limit == data.len()).then_some(limit)
    }

    fn locate_length_prefixed(&self, data: &[u8], offset: u64) -> ParseResult<Option<UnitLocation>> {
        let cfg = self.config;
        let at = offset as usize;

        if let Some(len) = be_u16(data, at) {
            if let Some(header) = Self::plausible_header(data, at + 2) {
                let bounds = match header.unit_type {
                    NalUnitType::Sps => Some(cfg.min_sps_length..=cfg.max_sps_length),
                    NalUnitType::Pps => Some(cfg.min_pps_length..=cfg.max_pps_length),
                    _ => None,
                };
                if bounds.is_some_and(|b| b.contains(&len)) {
                    return self.finish_length_prefixed(data, offset, 2, len, header);
                }
            }
        }

        if let Some(len) = be_u32(data, at) {
            if let Some(header) = Self::plausible_header(data, at + 4) {
                let ok = match header.unit_type {
                    t if t.is_slice() => {
                        len > cfg.min_slice_nal_unit_length && len < cfg.max_slice_nal_unit_length
                    }
                    NalUnitType::EndOfSequence | NalUnitType::EndOfStream => len == 1,
                    NalUnitType::AccessUnitDelimiter => len == 2,
                    NalUnitType::Sei | NalUnitType::FillerData => {
                        len >= 2 && len < cfg.max_slice_nal_unit_length
                    }
                    _ => false,
                };
                if ok {
                    return self.finish_length_prefixed(data, offset, 4, len, header);
                }
            }
        }
        Ok(None)
    }

    fn finish_length_prefixed(
        &self,
        data: &[u8],
        offset: u64,
        prefix: u64,
        len: u64,
        header: NalHeader,
    ) -> ParseResult<Option<UnitLocation>> {
        let header_offset = offset + prefix;
        let end = header_offset + len;
        if end > data.len() as u64 {
            return Err(ParseError::Overflow);
        }
        Ok(Some(UnitLocation {
            framing: NalFraming::LengthPrefixed,
            offset,
            header_offset,
            end,
            header,
        }))
    }

    /// Offsets where the unit after one ending at `prev_end` may start.
    ///
    /// In a byte stream, zero bytes right after the unit are skipped first;
    /// a run longer than the configured tolerance ends the stream.
    pub fn search_window(&self, data: &[u8], prev_end: u64, framing: NalFraming, max_gap: u64) -> Option<Range<u64>> {
        let len = data.len() as u64;
        if prev_end >= len {
            return None;
        }
        let mut start = prev_end;
        if framing == NalFraming::ByteStream {
            let zeros = data[prev_end as usize..].iter().take_while(|&&b| b == 0).count() as u64;
            if zeros > self.config.max_trailing_zero_bytes + 3 {
                return None;
            }
            start += zeros.saturating_sub(3);
        }
        Some(start..(start + max_gap + 1).min(len))
    }

    /// First unit inside `window`.
    pub fn find_in(&self, data: &[u8], window: Range<u64>, framing: Option<NalFraming>) -> Option<UnitLocation> {
        window
            .into_iter()
            .find_map(|p| self.locate(data, p, framing).ok().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator_test(data: &[u8], offset: u64, framing: Option<NalFraming>) -> ParseResult<Option<UnitLocation>> {
        let config = H264Config::default();
        UnitLocator::new(&config).locate(data, offset, framing)
    }

    #[test]
    fn byte_stream_unit_ends_at_next_start_code() {
        let data = [0, 0, 0, 1, 0x09, 0xf0, 0, 0, 1, 0x09, 0x10];
        let loc = locator_test(&data, 0, None).unwrap().unwrap();
        assert_eq!(loc.framing, NalFraming::ByteStream);
        assert_eq!(loc.header_offset, 4);
        assert_eq!(loc.end, 6);
        assert_eq!(loc.header.unit_type, NalUnitType::AccessUnitDelimiter);

        let next = locator_test(&data, 6, Some(NalFraming::ByteStream)).unwrap().unwrap();
        assert_eq!(next.header_offset, 9);
        assert_eq!(next.end, 11);
    }

    #[test]
    fn rejects_disallowed_header() {
        // SPS with nal_ref_idc 0
        let data = [0, 0, 1, 0x07, 66, 0, 30, 0x80];
        assert_eq!(locator_test(&data, 0, None).unwrap(), None);
    }

    #[test]
    fn rejects_sps_with_unknown_profile() {
        let data = [0, 0, 1, 0x67, 13, 0, 30, 0x80];
        assert_eq!(locator_test(&data, 0, None).unwrap(), None);
    }

    #[test]
    fn length_prefixed_parameter_set() {
        let mut data = vec![0x00, 0x06, 0x67, 66, 0, 30, 0xf4, 0x80];
        data.extend_from_slice(&[0xaa; 4]);
        let loc = locator_test(&data, 0, None).unwrap().unwrap();
        assert_eq!(loc.framing, NalFraming::LengthPrefixed);
        assert_eq!(loc.header_offset, 2);
        assert_eq!(loc.end, 8);
    }

    #[test]
    fn length_prefixed_slice_past_end_overflows() {
        let mut data = vec![0x00, 0x00, 0x10, 0x00, 0x65];
        data.extend_from_slice(&[0x88; 64]);
        assert_eq!(
            locator_test(&data, 0, Some(NalFraming::LengthPrefixed)),
            Err(ParseError::Overflow)
        );
    }

    #[test]
    fn short_length_prefixed_slice_is_not_a_unit() {
        let data = [0x00, 0x00, 0x00, 0x04, 0x65, 0x88, 0x84, 0x00];
        assert_eq!(locator_test(&data, 0, Some(NalFraming::LengthPrefixed)).unwrap(), None);
    }

    #[test]
    fn search_window_skips_trailing_zeros() {
        let config = H264Config::default();
        let locator = UnitLocator::new(&config);
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&[0, 0, 0, 1, 0x09, 0xf0]);
        let window = locator.search_window(&data, 0, NalFraming::ByteStream, 4).unwrap();
        assert_eq!(window.start, 10);
        let loc = locator.find_in(&data, window, Some(NalFraming::ByteStream)).unwrap();
        assert_eq!(loc.offset, 10);
    }

    #[test]
    fn long_zero_run_ends_the_stream() {
        let config = H264Config {
            max_trailing_zero_bytes: 4,
            ..Default::default()
        };
        let locator = UnitLocator::new(&config);
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0, 0, 1, 0x09, 0xf0]);
        assert!(locator.search_window(&data, 0, NalFraming::ByteStream, 256).is_none());
    }
}
