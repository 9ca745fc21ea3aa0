//! Emulation prevention removal with a map back to raw offsets.

/// Unescaped payload of one NAL unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rbsp {
    data: Vec<u8>,
    /// RBSP positions at which a `0x03` byte was dropped from the raw input.
    removed: Vec<usize>,
}

impl Rbsp {
    /// Drop every `0x03` that follows two zero bytes.
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut data = Vec::with_capacity(raw.len());
        let mut removed = Vec::new();
        let mut zeros = 0usize;
        for &b in raw {
            if zeros >= 2 && b == 0x03 {
                removed.push(data.len());
                zeros = 0;
                continue;
            }
            data.push(b);
            zeros = if b == 0 { zeros + 1 } else { 0 };
        }
        Self { data, removed }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    /// Offset in the raw input of the RBSP byte at `pos`.
    pub fn raw_offset(&self, pos: usize) -> usize {
        pos + self.removed.partition_point(|&r| r <= pos)
    }
}
