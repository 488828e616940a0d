// Block-checksum generation for installer files.
//
// Splits a file into fixed-size blocks, additionally cut at container entry
// data boundaries when the file parses as a zip, and hashes each block with
// SHA-256. Boundary cuts keep block edges stable across versions when only
// some entries change, which is what lets the diff engine recognize unchanged
// regions. Descriptors are contiguous and offset-ordered by construction.
//
// `write_manifest` emits the gzip-compressed JSON manifest that accompanies
// an optimized container, for servers that prefer a precomputed block list.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::container::Container;
use crate::error::Result;

/// Default block size. Small enough that a one-file change stays local,
/// large enough to keep manifests compact.
pub const BLOCK_SIZE: u32 = 32 * 1024;

/// One content-addressed chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub offset: u64,
    pub size: u32,
    pub checksum: [u8; 32],
}

/// Chunk a byte stream into checksummed blocks, cutting at `boundaries`
/// (absolute offsets, sorted) in addition to the fixed block size.
pub fn blocks_with_boundaries(data: &[u8], boundaries: &[u64]) -> Vec<BlockDescriptor> {
    let mut blocks = Vec::new();
    let len = data.len() as u64;
    let mut offset = 0u64;
    let mut next_boundary = boundaries.iter().copied().filter(|&b| b > 0 && b < len);
    let mut boundary = next_boundary.next();

    while offset < len {
        // Skip boundaries we've already passed.
        while let Some(b) = boundary {
            if b > offset {
                break;
            }
            boundary = next_boundary.next();
        }
        let mut end = (offset + u64::from(BLOCK_SIZE)).min(len);
        if let Some(b) = boundary {
            end = end.min(b);
        }

        let size = (end - offset) as u32;
        let checksum: [u8; 32] =
            Sha256::digest(&data[offset as usize..end as usize]).into();
        blocks.push(BlockDescriptor {
            offset,
            size,
            checksum,
        });
        offset = end;
    }
    blocks
}

/// Chunk a byte stream. When it parses as a zip container, every entry's
/// data start and end become cut points; otherwise plain fixed-size blocks
/// are used.
pub fn data_blocks(data: &[u8]) -> Vec<BlockDescriptor> {
    blocks_with_boundaries(data, &container_boundaries(data))
}

/// Chunk a whole file, see [`data_blocks`].
pub fn file_blocks(path: &Path) -> Result<Vec<BlockDescriptor>> {
    let data = std::fs::read(path)?;
    Ok(data_blocks(&data))
}

/// Cut points for a parsed container: every non-directory entry's data start
/// and end, sorted and deduplicated.
pub fn entry_boundaries(container: &Container<'_>) -> Vec<u64> {
    let mut cuts: Vec<u64> = container
        .entries()
        .iter()
        .filter(|e| !e.is_dir())
        .flat_map(|e| [e.data_start, e.data_start + e.compressed_size])
        .collect();
    cuts.sort_unstable();
    cuts.dedup();
    cuts
}

fn container_boundaries(data: &[u8]) -> Vec<u64> {
    match Container::parse(data) {
        Ok(container) => entry_boundaries(&container),
        Err(e) => {
            log::debug!("not chunking on container boundaries: {e}");
            Vec::new()
        }
    }
}

/// Write the gzip-compressed JSON block manifest for a container file.
pub fn write_manifest(container_path: &Path, manifest_path: &Path) -> Result<()> {
    let blocks = file_blocks(container_path)?;
    let total: u64 = blocks.iter().map(|b| u64::from(b.size)).sum();

    let json = serde_json::json!({
        "version": "2",
        "files": [{
            "name": "file",
            "offset": 0,
            "checksums": blocks.iter().map(|b| hex(&b.checksum)).collect::<Vec<_>>(),
            "sizes": blocks.iter().map(|b| b.size).collect::<Vec<_>>(),
        }],
        "size": total,
    });

    let file = std::fs::File::create(manifest_path)?;
    let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::best());
    serde_json::to_writer(&mut enc, &json).map_err(std::io::Error::from)?;
    enc.finish()?;
    Ok(())
}

pub fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
