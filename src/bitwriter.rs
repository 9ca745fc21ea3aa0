//! MSB-first bit writer, the mirror of [`Cursor`](crate::cursor::Cursor).
//!
//! Used to synthesize parameter sets for reference headers and to build test
//! and benchmark streams.

/// Bit writer with Exp-Golomb and emulation-prevention support.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    data: Vec<u8>,
    current: u8,
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    pub fn write_bit(&mut self, bit: u32) {
        self.current = (self.current << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.data.push(self.current);
            self.current = 0;
            self.bit_count = 0;
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// Write the low `n` bits of `value` (n <= 32).
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={n} exceeds 32");
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u32::from(value), 8);
    }

    /// Unsigned Exp-Golomb `ue(v)`.
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        for _ in 0..len - 1 {
            self.write_bit(0);
        }
        for i in (0..len).rev() {
            self.write_bit(((code >> i) & 1) as u32);
        }
    }

    /// Signed Exp-Golomb `se(v)`.
    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(code);
    }

    /// `rbsp_stop_one_bit` plus alignment zero bits.
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        while !self.is_byte_aligned() {
            self.write_bit(0);
        }
    }

    /// Pad the current byte with `bit` until aligned.
    pub fn align_with(&mut self, bit: u32) {
        while !self.is_byte_aligned() {
            self.write_bit(bit);
        }
    }

    /// Finish, zero-padding any partial byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            let pad = 8 - self.bit_count;
            self.data.push(self.current << pad);
        }
        self.data
    }
}

/// Insert emulation-prevention bytes so `payload` is safe inside a byte stream.
pub fn add_emulation_prevention(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 64);
    let mut zeros = 0usize;
    for &b in payload {
        if zeros >= 2 && b <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_msb_first() {
        let mut w = BitWriter::new();
        w.write_bits(0b1011, 4);
        w.write_bits(0b0001, 4);
        w.write_u8(0x55);
        assert_eq!(w.finish(), vec![0b1011_0001, 0x55]);
    }

    #[test]
    fn exp_golomb_codes() {
        let mut w = BitWriter::new();
        w.write_ue(0); // 1
        w.write_ue(1); // 010
        w.write_ue(2); // 011
        w.write_se(-1); // ue(2) = 011
        assert_eq!(w.bits_written(), 10);
        assert_eq!(w.finish(), vec![0b1010_0110, 0b1100_0000]);
    }

    #[test]
    fn emulation_prevention_escapes_short_codes() {
        assert_eq!(
            add_emulation_prevention(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x00]),
            vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]
        );
        assert_eq!(add_emulation_prevention(&[0x00, 0x00, 0x04]), vec![0x00, 0x00, 0x04]);
    }
}
