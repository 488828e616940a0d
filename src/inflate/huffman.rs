// Canonical Huffman decoding (RFC 1951, Section 3.2.2).
//
// Uses the count/symbol two-array scheme: `count[len]` is the number of codes
// of each bit length, `symbol` lists symbols sorted by (length, symbol).
// Decoding walks one bit at a time, comparing the accumulated code against
// the first code of each length. Slow per symbol but branch-simple, and this
// decoder's job is boundary instrumentation, not throughput.

use super::bits::{BitReader, BlockRead};

pub const MAX_BITS: usize = 15;

/// Outcome of a symbol decode against buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRead {
    /// Input exhausted mid-code.
    NeedMore,
    /// The bit pattern matches no code in the table.
    InvalidCode,
}

impl From<BlockRead> for SymbolRead {
    fn from(_: BlockRead) -> Self {
        SymbolRead::NeedMore
    }
}

pub struct Huffman {
    /// `count[len]` = number of codes of bit length `len` (index 0 unused).
    count: [u16; MAX_BITS + 1],
    /// Symbols ordered canonically by (code length, symbol value).
    symbol: Vec<u16>,
}

impl Huffman {
    /// Build a decoding table from per-symbol code lengths (0 = unused).
    ///
    /// Returns `None` if the lengths oversubscribe the code space. Incomplete
    /// codes are accepted; deflate permits them (e.g. a distance alphabet
    /// with a single code) and decoding simply rejects unreachable patterns.
    pub fn new(lengths: &[u8]) -> Option<Self> {
        let mut count = [0u16; MAX_BITS + 1];
        for &len in lengths {
            if len as usize > MAX_BITS {
                return None;
            }
            count[len as usize] += 1;
        }
        if count[0] as usize == lengths.len() {
            // No codes at all; decoding will always fail, but the table is
            // well formed (deflate allows an empty distance alphabet).
            return Some(Self {
                count,
                symbol: Vec::new(),
            });
        }

        // Check for an oversubscribed code space.
        let mut left: i32 = 1;
        for len in 1..=MAX_BITS {
            left <<= 1;
            left -= count[len] as i32;
            if left < 0 {
                return None;
            }
        }

        // Offsets of the first symbol of each length within `symbol`.
        let mut offset = [0usize; MAX_BITS + 1];
        for len in 1..MAX_BITS {
            offset[len + 1] = offset[len] + count[len] as usize;
        }

        let mut symbol = vec![0u16; lengths.len() - count[0] as usize];
        for (sym, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbol[offset[len as usize]] = sym as u16;
                offset[len as usize] += 1;
            }
        }

        Some(Self { count, symbol })
    }

    /// Decode one symbol from the bit stream.
    pub fn decode(&self, r: &mut BitReader<'_>) -> Result<u16, SymbolRead> {
        let mut code: u32 = 0;
        let mut first: u32 = 0;
        let mut index: usize = 0;
        for len in 1..=MAX_BITS {
            code |= r.bit()?;
            let count = u32::from(self.count[len]);
            if code < first + count {
                return Ok(self.symbol[index + (code - first) as usize]);
            }
            index += count as usize;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(SymbolRead::InvalidCode)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode `code` (already in canonical MSB-first order) as LSB-first bits.
    fn bits_of(code: u32, len: usize) -> Vec<u8> {
        // Canonical Huffman codes are written MSB-first into the stream.
        let mut bytes = vec![0u8; 2];
        for i in 0..len {
            let bit = (code >> (len - 1 - i)) & 1;
            bytes[i / 8] |= (bit as u8) << (i % 8);
        }
        bytes
    }

    #[test]
    fn decodes_two_symbol_alphabet() {
        // Lengths [1, 1]: symbol 0 = code 0, symbol 1 = code 1.
        let h = Huffman::new(&[1, 1]).unwrap();
        let data = bits_of(0b0, 1);
        assert_eq!(h.decode(&mut BitReader::new(&data, 0)).unwrap(), 0);
        let data = bits_of(0b1, 1);
        assert_eq!(h.decode(&mut BitReader::new(&data, 0)).unwrap(), 1);
    }

    #[test]
    fn decodes_mixed_lengths() {
        // Lengths [2, 1, 2]: canonical codes: sym1=0, sym0=10, sym2=11.
        let h = Huffman::new(&[2, 1, 2]).unwrap();
        assert_eq!(
            h.decode(&mut BitReader::new(&bits_of(0b0, 1), 0)).unwrap(),
            1
        );
        assert_eq!(
            h.decode(&mut BitReader::new(&bits_of(0b10, 2), 0)).unwrap(),
            0
        );
        assert_eq!(
            h.decode(&mut BitReader::new(&bits_of(0b11, 2), 0)).unwrap(),
            2
        );
    }

    #[test]
    fn rejects_oversubscribed_lengths() {
        assert!(Huffman::new(&[1, 1, 1]).is_none());
    }

    #[test]
    fn accepts_incomplete_code() {
        // Single 1-bit code: valid (deflate allows it for distances).
        let h = Huffman::new(&[1]).unwrap();
        let data = bits_of(0b0, 1);
        assert_eq!(h.decode(&mut BitReader::new(&data, 0)).unwrap(), 0);
    }

    #[test]
    fn invalid_pattern_in_incomplete_code() {
        let h = Huffman::new(&[1]).unwrap();
        // Code "1" is unassigned; the walk exhausts all lengths.
        let data = vec![0xFF, 0xFF];
        assert_eq!(
            h.decode(&mut BitReader::new(&data, 0)),
            Err(SymbolRead::InvalidCode)
        );
    }

    #[test]
    fn underflow_reports_need_more() {
        let h = Huffman::new(&[3, 3, 3, 3, 3, 3, 3, 3]).unwrap();
        let data = [0x00];
        let mut r = BitReader::new(&data, 7);
        assert_eq!(h.decode(&mut r), Err(SymbolRead::NeedMore));
    }
}
