// LSB-first bit reader over a byte slice (RFC 1951, Section 3.1.1).
//
// The reader tracks an absolute bit position so the inflater can checkpoint
// before a block and roll back when the buffered input runs out mid-block.
// Running out of bits is reported as `BlockRead::NeedMore`, distinct from
// corruption, which the caller maps to a rollback rather than an error.

/// Outcome of a read attempt against buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRead {
    /// More input is required to make progress; roll back to the checkpoint.
    NeedMore,
}

pub struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute position in bits from the start of `data`.
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], bit_pos: usize) -> Self {
        Self { data, bit_pos }
    }

    pub fn bit_pos(&self) -> usize {
        self.bit_pos
    }

    /// Number of whole bytes consumed so far (partial bytes round up).
    pub fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    /// Read `n` bits (n <= 16), LSB-first.
    #[inline]
    pub fn bits(&mut self, n: u32) -> Result<u32, BlockRead> {
        debug_assert!(n <= 16);
        let end = self.bit_pos + n as usize;
        if end > self.data.len() * 8 {
            return Err(BlockRead::NeedMore);
        }
        let mut val: u32 = 0;
        for i in 0..n as usize {
            let pos = self.bit_pos + i;
            let byte = self.data[pos / 8];
            let bit = (byte >> (pos % 8)) & 1;
            val |= u32::from(bit) << i;
        }
        self.bit_pos = end;
        Ok(val)
    }

    /// Read a single bit.
    #[inline]
    pub fn bit(&mut self) -> Result<u32, BlockRead> {
        self.bits(1)
    }

    /// Discard bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        self.bit_pos = self.bit_pos.next_multiple_of(8);
    }

    /// Read `len` whole bytes. Only valid on a byte boundary.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], BlockRead> {
        debug_assert!(self.bit_pos % 8 == 0);
        let start = self.bit_pos / 8;
        let end = match start.checked_add(len) {
            Some(e) if e <= self.data.len() => e,
            _ => return Err(BlockRead::NeedMore),
        };
        self.bit_pos = end * 8;
        Ok(&self.data[start..end])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
