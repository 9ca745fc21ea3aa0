//! Field reader that records decoded syntax elements as node attributes.
//!
//! Each read names its field and legal range. A value outside the range is
//! either fatal (the unit is rejected with
//! [`ParseError::SemanticInvalid`]) or soft (the attribute is kept and
//! marked invalid).

use crate::cursor::Cursor;
use crate::error::{ParseError, ParseResult};
use crate::h264::golomb::ExpGolomb;
use crate::tree::{AttrValue, Attribute};

/// What an out-of-range value does to the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Soft,
}

/// Reads syntax elements from an RBSP cursor.
pub struct SyntaxReader<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    attributes: Vec<Attribute>,
}

impl<'c, 'a> SyntaxReader<'c, 'a> {
    pub fn new(cursor: &'c mut Cursor<'a>) -> Self {
        Self {
            cursor,
            attributes: Vec::new(),
        }
    }

    /// Direct access for loops whose elements are not worth recording.
    pub fn cursor(&mut self) -> &mut Cursor<'a> {
        self.cursor
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn into_attributes(self) -> Vec<Attribute> {
        self.attributes
    }

    pub fn has_invalid(&self) -> bool {
        self.attributes.iter().any(|a| !a.valid)
    }

    fn check(&mut self, name: &'static str, value: AttrValue, in_range: bool, raw: i64, severity: Severity) -> ParseResult<()> {
        if !in_range && severity == Severity::Fatal {
            return Err(ParseError::semantic(name, raw));
        }
        self.attributes.push(Attribute {
            name,
            value,
            valid: in_range,
        });
        Ok(())
    }

    /// Record a derived value without reading anything.
    pub fn note(&mut self, name: &'static str, value: AttrValue, valid: bool) {
        self.attributes.push(Attribute { name, value, valid });
    }

    /// Fixed-width unsigned field with no range restriction.
    pub fn bits(&mut self, name: &'static str, n: u32) -> ParseResult<u32> {
        let v = self.cursor.read_bits(n)?;
        self.note(name, AttrValue::Unsigned(u64::from(v)), true);
        Ok(v)
    }

    /// Fixed-width unsigned field limited to `max`.
    pub fn bits_max(&mut self, name: &'static str, n: u32, max: u32, severity: Severity) -> ParseResult<u32> {
        let v = self.cursor.read_bits(n)?;
        self.check(name, AttrValue::Unsigned(u64::from(v)), v <= max, i64::from(v), severity)?;
        Ok(v)
    }

    pub fn flag(&mut self, name: &'static str) -> ParseResult<bool> {
        let v = self.cursor.read_flag()?;
        self.note(name, AttrValue::Flag(v), true);
        Ok(v)
    }

    /// A bit that must have a fixed value.
    pub fn fixed_bit(&mut self, name: &'static str, expected: bool) -> ParseResult<()> {
        if self.cursor.read_flag()? != expected {
            return Err(ParseError::StructuralInvalid(name));
        }
        Ok(())
    }

    pub fn ue(&mut self, name: &'static str, max: u32, severity: Severity) -> ParseResult<u32> {
        self.ue_range(name, 0, max, severity)
    }

    pub fn ue_range(&mut self, name: &'static str, min: u32, max: u32, severity: Severity) -> ParseResult<u32> {
        let v = self.cursor.read_ue()?;
        self.check(name, AttrValue::Unsigned(u64::from(v)), (min..=max).contains(&v), i64::from(v), severity)?;
        Ok(v)
    }

    pub fn se(&mut self, name: &'static str, min: i32, max: i32, severity: Severity) -> ParseResult<i32> {
        let v = self.cursor.read_se()?;
        self.check(name, AttrValue::Signed(i64::from(v)), (min..=max).contains(&v), i64::from(v), severity)?;
        Ok(v)
    }

    pub fn te(&mut self, name: &'static str, max: u32, severity: Severity) -> ParseResult<u32> {
        let (v, in_range) = self.cursor.read_te(max)?;
        self.check(name, AttrValue::Unsigned(u64::from(v)), in_range, i64::from(v), severity)?;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitwriter::BitWriter;

    #[test]
    fn soft_violation_is_recorded() {
        let mut w = BitWriter::new();
        w.write_ue(40);
        w.write_ue(2);
        let data = w.finish();
        let mut cursor = Cursor::from_bytes(&data);
        let mut r = SyntaxReader::new(&mut cursor);
        assert_eq!(r.ue("num_ref_idx", 31, Severity::Soft).unwrap(), 40);
        assert_eq!(r.ue("pps_id", 255, Severity::Fatal).unwrap(), 2);
        assert!(r.has_invalid());
        let attrs = r.into_attributes();
        assert!(!attrs[0].valid);
        assert!(attrs[1].valid);
    }

    #[test]
    fn fatal_violation_rejects() {
        let mut w = BitWriter::new();
        w.write_ue(12);
        let data = w.finish();
        let mut cursor = Cursor::from_bytes(&data);
        let mut r = SyntaxReader::new(&mut cursor);
        assert_eq!(
            r.ue("slice_type", 9, Severity::Fatal),
            Err(ParseError::semantic("slice_type", 12))
        );
    }

    #[test]
    fn signed_range() {
        let mut w = BitWriter::new();
        w.write_se(-30);
        let data = w.finish();
        let mut cursor = Cursor::from_bytes(&data);
        let mut r = SyntaxReader::new(&mut cursor);
        assert!(r.se("pic_init_qp_minus26", -26, 25, Severity::Fatal).is_err());
    }
}
