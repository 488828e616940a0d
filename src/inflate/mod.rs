// Instrumented raw-deflate decoder (RFC 1951).
//
// Beyond plain decompression, the decoder records the pair
// (compressed bytes consumed, uncompressed bytes produced) at every internal
// deflate block boundary. Those pairs seed the compressed-offset ->
// uncompressed-offset interval map the archive tree builder composes with an
// embedded archive's file table. Stock inflate crates cannot do this: none of
// them expose where one deflate block ends and the next begins.
//
// The decoder is driven incrementally. `feed()` accepts arbitrary slices
// (byte-at-a-time is legal) and decodes every block that is complete in the
// buffered input; an input underrun mid-block rolls back to the checkpoint
// taken at the block's start and waits for more data. `finish()` fails unless
// a final block has been decoded.

pub mod bits;
pub mod huffman;

use thiserror::Error;

use crate::interval::IntervalMap;

use bits::{BitReader, BlockRead};
use huffman::{Huffman, SymbolRead};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InflateError {
    #[error("truncated deflate stream")]
    Truncated,
    #[error("reserved deflate block type")]
    BadBlockType,
    #[error("stored block length check failed")]
    BadStoredLength,
    #[error("invalid huffman code lengths")]
    BadHuffmanTable,
    #[error("invalid symbol in compressed data")]
    BadSymbol,
    #[error("back-reference distance exceeds produced output")]
    BadDistance,
}

/// Internal per-block outcome: underrun (roll back) vs. corruption (abort).
enum Step {
    NeedMore,
    Corrupt(InflateError),
}

impl From<BlockRead> for Step {
    fn from(_: BlockRead) -> Self {
        Step::NeedMore
    }
}

impl From<SymbolRead> for Step {
    fn from(s: SymbolRead) -> Self {
        match s {
            SymbolRead::NeedMore => Step::NeedMore,
            SymbolRead::InvalidCode => Step::Corrupt(InflateError::BadSymbol),
        }
    }
}

// ---------------------------------------------------------------------------
// Length/distance symbol tables (RFC 1951, Section 3.2.5)
// ---------------------------------------------------------------------------

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Order in which code-length code lengths appear in a dynamic header.
const CLEN_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

const END_OF_BLOCK: u16 = 256;

fn fixed_tables() -> (Huffman, Huffman) {
    let mut litlen = [0u8; 288];
    litlen[0..144].fill(8);
    litlen[144..256].fill(9);
    litlen[256..280].fill(7);
    litlen[280..288].fill(8);
    let dist = [5u8; 30];
    // The fixed tables are defined by the RFC and always build.
    let litlen = Huffman::new(&litlen).unwrap_or_else(|| unreachable!());
    let dist = Huffman::new(&dist).unwrap_or_else(|| unreachable!());
    (litlen, dist)
}

// ---------------------------------------------------------------------------
// Inflater
// ---------------------------------------------------------------------------

/// Decoded stream plus the block-boundary interval map.
#[derive(Debug)]
pub struct InflateOutput {
    /// Full uncompressed byte buffer.
    pub data: Vec<u8>,
    /// Compressed byte offset -> uncompressed byte offset at each block
    /// boundary, seeded with `(0, 0)`.
    pub boundaries: IntervalMap<u64>,
}

pub struct Inflater {
    input: Vec<u8>,
    /// Bit position of the next undecoded block in `input`.
    bit_pos: usize,
    out: Vec<u8>,
    /// Strictly increasing (compressed, uncompressed) boundary pairs.
    pairs: Vec<(u64, u64)>,
    done: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            input: Vec::new(),
            bit_pos: 0,
            out: Vec::new(),
            pairs: vec![(0, 0)],
            done: false,
        }
    }

    /// Total uncompressed bytes produced so far.
    pub fn bytes_out(&self) -> u64 {
        self.out.len() as u64
    }

    /// Whether the final block has been decoded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed more compressed bytes, decoding every block that completes.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), InflateError> {
        self.input.extend_from_slice(data);
        self.drain_blocks()
    }

    /// Flush the final block and return the output buffer plus the
    /// compressed-offset -> uncompressed-offset map.
    pub fn finish(mut self) -> Result<InflateOutput, InflateError> {
        self.drain_blocks()?;
        if !self.done {
            return Err(InflateError::Truncated);
        }
        Ok(InflateOutput {
            data: self.out,
            boundaries: IntervalMap::from_sorted(self.pairs),
        })
    }

    fn drain_blocks(&mut self) -> Result<(), InflateError> {
        while !self.done {
            let checkpoint_out = self.out.len();
            let mut reader = BitReader::new(&self.input, self.bit_pos);
            match decode_block(&mut reader, &mut self.out) {
                Ok(is_final) => {
                    self.bit_pos = reader.bit_pos();
                    self.done = is_final;
                    if !is_final {
                        self.record_boundary(reader.bytes_consumed() as u64);
                    }
                }
                Err(Step::NeedMore) => {
                    // Roll back to the block start; wait for more input.
                    self.out.truncate(checkpoint_out);
                    break;
                }
                Err(Step::Corrupt(e)) => return Err(e),
            }
        }
        Ok(())
    }

    /// Record a block boundary unless it lands in the same compressed byte
    /// as the previous one (two tiny blocks can end within one byte; the
    /// first record wins, keeping keys strictly increasing).
    fn record_boundary(&mut self, compressed: u64) {
        let last = self.pairs.last().map(|&(c, _)| c).unwrap_or(0);
        if compressed > last {
            self.pairs.push((compressed, self.out.len() as u64));
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience over a complete raw deflate stream.
pub fn inflate_with_boundaries(data: &[u8]) -> Result<InflateOutput, InflateError> {
    let mut inflater = Inflater::new();
    inflater.feed(data)?;
    inflater.finish()
}

// ---------------------------------------------------------------------------
// Block decoding
// ---------------------------------------------------------------------------

/// Decode one deflate block. Returns `Ok(true)` when it was the final block.
fn decode_block(r: &mut BitReader<'_>, out: &mut Vec<u8>) -> Result<bool, Step> {
    let is_final = r.bit()? == 1;
    match r.bits(2)? {
        0b00 => stored_block(r, out)?,
        0b01 => {
            let (litlen, dist) = fixed_tables();
            compressed_block(r, out, &litlen, &dist)?;
        }
        0b10 => {
            let (litlen, dist) = dynamic_tables(r)?;
            compressed_block(r, out, &litlen, &dist)?;
        }
        _ => return Err(Step::Corrupt(InflateError::BadBlockType)),
    }
    Ok(is_final)
}

fn stored_block(r: &mut BitReader<'_>, out: &mut Vec<u8>) -> Result<(), Step> {
    r.align_to_byte();
    let len = r.bits(16)?;
    let nlen = r.bits(16)?;
    if len != !nlen & 0xFFFF {
        return Err(Step::Corrupt(InflateError::BadStoredLength));
    }
    let data = r.bytes(len as usize)?;
    out.extend_from_slice(data);
    Ok(())
}

fn dynamic_tables(r: &mut BitReader<'_>) -> Result<(Huffman, Huffman), Step> {
    let hlit = r.bits(5)? as usize + 257;
    let hdist = r.bits(5)? as usize + 1;
    let hclen = r.bits(4)? as usize + 4;
    if hlit > 286 || hdist > 30 {
        return Err(Step::Corrupt(InflateError::BadHuffmanTable));
    }

    let mut clen_lengths = [0u8; 19];
    for &idx in CLEN_ORDER.iter().take(hclen) {
        clen_lengths[idx] = r.bits(3)? as u8;
    }
    let clen_table =
        Huffman::new(&clen_lengths).ok_or(Step::Corrupt(InflateError::BadHuffmanTable))?;

    // Literal/length and distance lengths share one coded sequence.
    let mut lengths = vec![0u8; hlit + hdist];
    let mut i = 0;
    while i < lengths.len() {
        let sym = clen_table.decode(r)?;
        match sym {
            0..=15 => {
                lengths[i] = sym as u8;
                i += 1;
            }
            16 => {
                if i == 0 {
                    return Err(Step::Corrupt(InflateError::BadHuffmanTable));
                }
                let prev = lengths[i - 1];
                let repeat = r.bits(2)? as usize + 3;
                if i + repeat > lengths.len() {
                    return Err(Step::Corrupt(InflateError::BadHuffmanTable));
                }
                lengths[i..i + repeat].fill(prev);
                i += repeat;
            }
            17 => {
                let repeat = r.bits(3)? as usize + 3;
                if i + repeat > lengths.len() {
                    return Err(Step::Corrupt(InflateError::BadHuffmanTable));
                }
                i += repeat;
            }
            18 => {
                let repeat = r.bits(7)? as usize + 11;
                if i + repeat > lengths.len() {
                    return Err(Step::Corrupt(InflateError::BadHuffmanTable));
                }
                i += repeat;
            }
            _ => return Err(Step::Corrupt(InflateError::BadHuffmanTable)),
        }
    }

    if lengths[END_OF_BLOCK as usize] == 0 {
        // A block with no end-of-block code can never terminate.
        return Err(Step::Corrupt(InflateError::BadHuffmanTable));
    }

    let litlen =
        Huffman::new(&lengths[..hlit]).ok_or(Step::Corrupt(InflateError::BadHuffmanTable))?;
    let dist =
        Huffman::new(&lengths[hlit..]).ok_or(Step::Corrupt(InflateError::BadHuffmanTable))?;
    Ok((litlen, dist))
}

fn compressed_block(
    r: &mut BitReader<'_>,
    out: &mut Vec<u8>,
    litlen: &Huffman,
    dist: &Huffman,
) -> Result<(), Step> {
    loop {
        let sym = litlen.decode(r)?;
        match sym {
            0..=255 => out.push(sym as u8),
            END_OF_BLOCK => return Ok(()),
            257..=285 => {
                let idx = (sym - 257) as usize;
                let len = LENGTH_BASE[idx] as usize + r.bits(LENGTH_EXTRA[idx])? as usize;

                let dsym = dist.decode(r)? as usize;
                if dsym >= 30 {
                    return Err(Step::Corrupt(InflateError::BadSymbol));
                }
                let distance = DIST_BASE[dsym] as usize + r.bits(DIST_EXTRA[dsym])? as usize;
                if distance > out.len() {
                    return Err(Step::Corrupt(InflateError::BadDistance));
                }

                // Overlapping copy: the source may include bytes written by
                // this same copy.
                let start = out.len() - distance;
                for j in 0..len {
                    let b = out[start + j];
                    out.push(b);
                }
            }
            _ => return Err(Step::Corrupt(InflateError::BadSymbol)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
