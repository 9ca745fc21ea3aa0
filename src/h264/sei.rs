//! SEI, access unit delimiter, filler data and end-of-sequence payloads.
//!
//! Each parser consumes the payload up to and including the RBSP trailing
//! bits.

use crate::cursor::Cursor;
use crate::error::{ParseError, ParseResult};
use crate::h264::syntax::{Severity, SyntaxReader};
use crate::tree::AttrValue;

/// Highest SEI payload type defined so far; anything above is noise.
const MAX_SEI_PAYLOAD_TYPE: u32 = 205;

fn read_ff_coded(cursor: &mut Cursor<'_>) -> ParseResult<u32> {
    let mut value = 0u32;
    loop {
        let byte = cursor.read_u8()?;
        value = value.saturating_add(u32::from(byte));
        if byte != 0xff {
            return Ok(value);
        }
    }
}

/// `sei_rbsp()`: one or more messages followed by trailing bits.
pub fn parse_sei(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    let mut messages = 0u64;
    loop {
        let payload_type = read_ff_coded(r.cursor())?;
        if payload_type > MAX_SEI_PAYLOAD_TYPE {
            return Err(ParseError::semantic("sei_payload_type", payload_type));
        }
        let payload_size = read_ff_coded(r.cursor())?;
        r.cursor().read_bytes(u64::from(payload_size))?;
        r.note("sei_payload_type", AttrValue::Unsigned(u64::from(payload_type)), true);
        messages += 1;
        if !r.cursor().more_rbsp_data() {
            break;
        }
    }
    r.note("sei_messages", AttrValue::Unsigned(messages), true);
    r.cursor().rbsp_trailing_bits()
}

/// `access_unit_delimiter_rbsp()`.
pub fn parse_access_unit_delimiter(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    r.bits_max("primary_pic_type", 3, 7, Severity::Fatal)?;
    r.cursor().rbsp_trailing_bits()
}

/// `filler_data_rbsp()`: `0xff` bytes then trailing bits.
pub fn parse_filler_data(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    let c = r.cursor();
    let mut count = 0u64;
    while c.peek_u8() == Some(0xff) {
        c.read_u8()?;
        count += 1;
    }
    r.note("filler_bytes", AttrValue::Unsigned(count), true);
    r.cursor().rbsp_trailing_bits()
}

/// End of sequence and end of stream units have an empty payload.
pub fn parse_empty(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    if r.cursor().bytes_left() != 0 {
        return Err(ParseError::StructuralInvalid("payload in end-of-sequence unit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h264::writer::{aud_rbsp, filler_rbsp, sei_rbsp};

    fn run(rbsp: &[u8], f: fn(&mut SyntaxReader<'_, '_>) -> ParseResult<()>) -> ParseResult<()> {
        let mut cursor = Cursor::from_bytes(rbsp);
        let mut r = SyntaxReader::new(&mut cursor);
        f(&mut r)
    }

    #[test]
    fn sei_with_one_message() {
        assert!(run(&sei_rbsp(5, &[0x11; 20]), parse_sei).is_ok());
    }

    #[test]
    fn sei_with_long_payload_size() {
        assert!(run(&sei_rbsp(1, &[0x22; 300]), parse_sei).is_ok());
    }

    #[test]
    fn sei_payload_past_end_overflows() {
        let rbsp = [0x05, 0x40, 0x11, 0x80];
        assert_eq!(run(&rbsp, parse_sei), Err(ParseError::Overflow));
    }

    #[test]
    fn aud_requires_stop_bit() {
        assert!(run(&aud_rbsp(2), parse_access_unit_delimiter).is_ok());
        assert!(run(&[0b0100_0000], parse_access_unit_delimiter).is_err());
    }

    #[test]
    fn filler_data() {
        assert!(run(&filler_rbsp(12), parse_filler_data).is_ok());
        assert!(run(&[0xff, 0xfe], parse_filler_data).is_err());
    }

    #[test]
    fn end_of_sequence_is_empty() {
        assert!(run(&[], parse_empty).is_ok());
        assert!(run(&[0x80], parse_empty).is_err());
    }
}
