// Block-level diff between two installer files.
//
// Matches blocks of the new file against blocks of the old file by SHA-256
// checksum and emits a minimal instruction list: `Copy` ranges served from
// the old file on disk, `Download` ranges fetched from the new file.
// Instructions are ordered by write offset and tile the new file exactly.
//
// A checksum collision between blocks of different sizes is treated as
// corruption, not as a mismatch to download around: it invalidates every
// assumption the block matching rests on.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::blockmap::{BlockDescriptor, hex};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Fetch `size` bytes at `read_offset` in the new file.
    Download,
    /// Reuse `size` bytes at `read_offset` in the old file.
    Copy,
}

/// One step of the reconstruction plan for the new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffInstruction {
    pub action: DiffAction,
    pub read_offset: u64,
    pub write_offset: u64,
    pub size: u64,
}

/// Compute the instruction list that rebuilds the file described by
/// `new_blocks` from the file described by `old_blocks`.
pub fn compute_diff(
    old_blocks: &[BlockDescriptor],
    new_blocks: &[BlockDescriptor],
) -> Result<Vec<DiffInstruction>> {
    // Old blocks indexed by checksum. Duplicates queue up in block order and
    // are consumed front-first, so repeated content copies from successive
    // source offsets. Each old block is consumed by exactly one match: once a
    // queue runs dry, further blocks with that checksum are downloaded.
    let mut by_checksum: HashMap<[u8; 32], VecDeque<&BlockDescriptor>> = HashMap::new();
    for block in old_blocks {
        by_checksum.entry(block.checksum).or_default().push_back(block);
    }

    let mut instructions: Vec<DiffInstruction> = Vec::new();
    for new in new_blocks {
        let matched = by_checksum
            .get_mut(&new.checksum)
            .and_then(VecDeque::pop_front);
        let step = match matched {
            Some(old) => {
                if old.size != new.size {
                    return Err(Error::ChecksumSizeMismatch {
                        checksum: hex(&new.checksum),
                        old_size: old.size,
                        new_size: new.size,
                    });
                }
                DiffInstruction {
                    action: DiffAction::Copy,
                    read_offset: old.offset,
                    write_offset: new.offset,
                    size: u64::from(new.size),
                }
            }
            None => DiffInstruction {
                action: DiffAction::Download,
                read_offset: new.offset,
                write_offset: new.offset,
                size: u64::from(new.size),
            },
        };
        push_coalescing(&mut instructions, step);
    }
    Ok(instructions)
}

/// Append `step`, merging it into the previous instruction when both reads
/// and writes continue contiguously with the same action.
fn push_coalescing(instructions: &mut Vec<DiffInstruction>, step: DiffInstruction) {
    if let Some(last) = instructions.last_mut()
        && last.action == step.action
        && last.read_offset + last.size == step.read_offset
        && last.write_offset + last.size == step.write_offset
    {
        last.size += step.size;
        return;
    }
    instructions.push(step);
}

/// Total bytes the plan fetches from the new file.
pub fn download_size(instructions: &[DiffInstruction]) -> u64 {
    instructions
        .iter()
        .filter(|i| i.action == DiffAction::Download)
        .map(|i| i.size)
        .sum()
}

/// The `Download` ranges of the plan, as `(read_offset, size)` pairs.
pub fn download_ranges(instructions: &[DiffInstruction]) -> Vec<(u64, u64)> {
    instructions
        .iter()
        .filter(|i| i.action == DiffAction::Download)
        .map(|i| (i.read_offset, i.size))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
