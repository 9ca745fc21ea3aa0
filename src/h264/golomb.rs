//! Exp-Golomb codes: `ue(v)`, `se(v)` and `te(v)`.

use crate::cursor::Cursor;
use crate::error::{ParseError, ParseResult};

/// Leading zero bits of every byte value; 8 for zero.
static LEADING_ZEROS: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).leading_zeros() as u8;
        i += 1;
    }
    table
};

/// Leading zeros of a left-aligned 16-bit window via two table lookups.
#[inline]
fn leading_zeros_16(window: u32) -> u32 {
    let hi = (window >> 8) as usize & 0xff;
    if hi != 0 {
        u32::from(LEADING_ZEROS[hi])
    } else {
        8 + u32::from(LEADING_ZEROS[window as usize & 0xff])
    }
}

/// Exp-Golomb decoding on top of [`Cursor`].
pub trait ExpGolomb {
    /// Unsigned code. More than 31 leading zeros is malformed.
    fn read_ue(&mut self) -> ParseResult<u32>;

    /// Signed code mapped as 1, -1, 2, -2, ...
    fn read_se(&mut self) -> ParseResult<i32>;

    /// Truncated code with `max` as the largest legal value. Returns the value
    /// clamped to `max` and whether it was in range.
    fn read_te(&mut self, max: u32) -> ParseResult<(u32, bool)>;
}

impl ExpGolomb for Cursor<'_> {
    fn read_ue(&mut self) -> ParseResult<u32> {
        let avail = self.bits_left().min(16) as u32;
        if avail == 0 {
            return Err(ParseError::Overflow);
        }
        let window = self.peek_bits(avail)? << (16 - avail);
        if window != 0 {
            let zeros = leading_zeros_16(window);
            let code_len = 2 * zeros + 1;
            if u64::from(code_len) > self.bits_left() {
                return Err(ParseError::Overflow);
            }
            return Ok(self.read_bits(code_len)? - 1);
        }
        if avail < 16 {
            return Err(ParseError::Overflow);
        }

        // Long code: at least 16 leading zeros.
        let avail = self.bits_left().min(32) as u32;
        let window = self.peek_bits(avail)?;
        if window == 0 {
            return Err(if avail == 32 {
                ParseError::StructuralInvalid("exp-golomb prefix longer than 31 bits")
            } else {
                ParseError::Overflow
            });
        }
        let zeros = window.leading_zeros() - (32 - avail);
        if u64::from(2 * zeros + 1) > self.bits_left() {
            return Err(ParseError::Overflow);
        }
        self.skip_bits(u64::from(zeros))?;
        let info = self.read_bits(zeros + 1)?;
        Ok(info - 1)
    }

    fn read_se(&mut self) -> ParseResult<i32> {
        let code = self.read_ue()?;
        let magnitude = code.div_ceil(2) as i32;
        Ok(if code % 2 == 1 { magnitude } else { -magnitude })
    }

    fn read_te(&mut self, max: u32) -> ParseResult<(u32, bool)> {
        match max {
            0 => Ok((0, true)),
            1 => Ok((u32::from(!self.read_flag()?), true)),
            _ => {
                let value = self.read_ue()?;
                Ok((value.min(max), value <= max))
            }
        }
    }
}
