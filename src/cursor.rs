//! Seekable byte/bit cursor.
//!
//! Byte reads and bit reads share one buffered position. Bits are pulled
//! MSB-first into a small cache; byte-level reads first discard any partial
//! byte left in the cache. Every read that would run past the end of the
//! input fails with [`ParseError::Overflow`] and leaves the position unchanged.

use crate::error::{ParseError, ParseResult};
use crate::source::{CancelToken, DataSource};

/// Byte order for multi-byte reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

const CANCEL_CHECK_INTERVAL: usize = 64 * 1024;

#[inline]
fn mask(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Byte/bit reader over a finite buffer.
///
/// One cursor belongs to exactly one parse in progress.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    /// Next byte to load into the cache.
    pos: usize,
    /// Valid bits live in the low `cache_bits` bits.
    cache: u64,
    cache_bits: u32,
    cancel: Option<CancelToken>,
}

impl<'a> Cursor<'a> {
    /// Cursor over a data source, observing its cancel token.
    pub fn new(source: &'a DataSource) -> Self {
        Self {
            data: source.bytes(),
            pos: 0,
            cache: 0,
            cache_bits: 0,
            cancel: Some(source.cancel_token()),
        }
    }

    /// Cursor over a plain buffer (no cancellation).
    pub fn from_bytes(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cache: 0,
            cache_bits: 0,
            cancel: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Current byte position (the byte holding the next unread bit).
    pub fn position(&self) -> u64 {
        self.bit_position() / 8
    }

    /// Seek to `offset`, clamped to `[0, len]`. Clears the bit cache.
    pub fn set_position(&mut self, offset: u64) {
        self.pos = offset.min(self.len()) as usize;
        self.cache = 0;
        self.cache_bits = 0;
    }

    pub fn bit_position(&self) -> u64 {
        self.pos as u64 * 8 - u64::from(self.cache_bits)
    }

    pub fn bits_left(&self) -> u64 {
        self.len() * 8 - self.bit_position()
    }

    pub fn bytes_left(&self) -> u64 {
        self.len() - self.position()
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.cache_bits % 8 == 0
    }

    pub fn at_end(&self) -> bool {
        self.bits_left() == 0
    }

    /// Drop any partially consumed byte from the cache.
    pub fn byte_align(&mut self) {
        self.cache_bits -= self.cache_bits % 8;
    }

    /// Fails with [`ParseError::Cancelled`] once the source has been cancelled.
    pub fn check_cancel(&self) -> ParseResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ParseError::Cancelled),
            _ => Ok(()),
        }
    }

    fn fill(&mut self, n: u32) -> ParseResult<()> {
        if self.cache_bits >= n {
            return Ok(());
        }
        self.check_cancel()?;
        let needed = (n - self.cache_bits).div_ceil(8) as usize;
        if self.pos + needed > self.data.len() {
            return Err(ParseError::Overflow);
        }
        while self.cache_bits < n {
            self.cache = (self.cache << 8) | u64::from(self.data[self.pos]);
            self.pos += 1;
            self.cache_bits += 8;
        }
        Ok(())
    }

    /// Look at the next `n` bits (n <= 32) without consuming them.
    pub fn peek_bits(&mut self, n: u32) -> ParseResult<u32> {
        debug_assert!(n <= 32, "peek_bits: n={n} exceeds 32");
        if n == 0 {
            return Ok(0);
        }
        self.fill(n)?;
        Ok(((self.cache >> (self.cache_bits - n)) & mask(n)) as u32)
    }

    /// Consume the next `n` bits (n <= 32).
    pub fn read_bits(&mut self, n: u32) -> ParseResult<u32> {
        let value = self.peek_bits(n)?;
        self.cache_bits -= n;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> ParseResult<u32> {
        self.read_bits(1)
    }

    pub fn read_flag(&mut self) -> ParseResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn skip_bits(&mut self, n: u64) -> ParseResult<()> {
        if n > self.bits_left() {
            return Err(ParseError::Overflow);
        }
        let target = self.bit_position() + n;
        self.set_position(target / 8);
        let rem = (target % 8) as u32;
        if rem > 0 {
            self.read_bits(rem)?;
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> ParseResult<[u8; N]> {
        self.byte_align();
        self.check_cancel()?;
        let start = self.position() as usize;
        let end = start + N;
        if end > self.data.len() {
            return Err(ParseError::Overflow);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[start..end]);
        self.set_position(end as u64);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ParseResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self, endian: Endian) -> ParseResult<u16> {
        let b = self.read_array::<2>()?;
        Ok(match endian {
            Endian::Big => u16::from_be_bytes(b),
            Endian::Little => u16::from_le_bytes(b),
        })
    }

    pub fn read_u32(&mut self, endian: Endian) -> ParseResult<u32> {
        let b = self.read_array::<4>()?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(b),
            Endian::Little => u32::from_le_bytes(b),
        })
    }

    pub fn read_u64(&mut self, endian: Endian) -> ParseResult<u64> {
        let b = self.read_array::<8>()?;
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(b),
            Endian::Little => u64::from_le_bytes(b),
        })
    }

    /// 16 raw GUID bytes, in stored order.
    pub fn read_guid(&mut self) -> ParseResult<[u8; 16]> {
        self.read_array::<16>()
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn read_bytes(&mut self, n: u64) -> ParseResult<&'a [u8]> {
        self.byte_align();
        self.check_cancel()?;
        let start = self.position();
        if n > self.len() - start {
            return Err(ParseError::Overflow);
        }
        let data = self.data;
        let out = &data[start as usize..(start + n) as usize];
        self.set_position(start + n);
        Ok(out)
    }

    /// Up to `n` bytes at the current byte position, without advancing.
    pub fn peek_bytes(&self, n: usize) -> &'a [u8] {
        let start = self.position() as usize;
        let end = start.saturating_add(n).min(self.data.len());
        &self.data[start..end]
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.peek_bytes(1).first().copied()
    }

    /// Advance to the next byte-aligned position whose first `prefix_bits`
    /// bits equal `prefix_value`, returning the `prefix_bits + suffix_bits`
    /// bit value found there. The cursor is left at the start of the match.
    ///
    /// Returns `Ok(None)` with the cursor at the end of input if no match
    /// exists.
    pub fn next_start_code(
        &mut self,
        prefix_bits: u32,
        prefix_value: u32,
        suffix_bits: u32,
    ) -> ParseResult<Option<u32>> {
        let total = prefix_bits + suffix_bits;
        debug_assert!(total > 0 && total <= 32, "start code of {total} bits");
        self.byte_align();
        let mut p = self.position() as usize;
        let need = total.div_ceil(8) as usize;
        let prefix_mask = mask(prefix_bits) as u32;
        let mut since_check = 0usize;

        while p + need <= self.data.len() {
            if since_check >= CANCEL_CHECK_INTERVAL {
                self.check_cancel()?;
                since_check = 0;
            }
            let mut window = 0u64;
            for &b in &self.data[p..p + need] {
                window = (window << 8) | u64::from(b);
            }
            let value = (window >> (need as u32 * 8 - total)) & mask(total);
            if ((value >> suffix_bits) as u32) & prefix_mask == prefix_value {
                self.set_position(p as u64);
                return Ok(Some(value as u32));
            }
            p += 1;
            since_check += 1;
        }

        let end = self.len();
        self.set_position(end);
        Ok(None)
    }

    /// True while data remains before the final rbsp stop bit.
    pub fn more_rbsp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };
        let stop_bit = last as u64 * 8 + 7 - u64::from(self.data[last].trailing_zeros());
        self.bit_position() < stop_bit
    }

    /// `rbsp_stop_one_bit` followed by zero bits up to the next byte boundary.
    pub fn rbsp_trailing_bits(&mut self) -> ParseResult<()> {
        if self.read_bit()? != 1 {
            return Err(ParseError::StructuralInvalid("rbsp_stop_one_bit"));
        }
        while !self.is_byte_aligned() {
            if self.read_bit()? != 0 {
                return Err(ParseError::StructuralInvalid("rbsp_alignment_zero_bit"));
            }
        }
        Ok(())
    }
}
