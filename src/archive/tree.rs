// Archive tree builder: compressed entry offsets -> logical file paths.
//
// For a nested-archive entry the builder runs the instrumented inflater over
// the stored bytes, parses the embedded archive's manifest into an
// uncompressed-offset -> path map, and composes the two layers with `floor`
// lookups (block boundaries rarely align with file boundaries, so exact-match
// composition would be wrong). Stored entries synthesize a trivial identity
// map in place of the inflater output. Entries that are not nested archives
// degenerate to a single interval owning the whole stream.
//
// The empty path marks bytes owned by the embedded archive's own header
// rather than any stored file.

use crate::archive::asar;
use crate::error::{Error, Result};
use crate::inflate;
use crate::interval::IntervalMap;

/// Maximum depth of archives-within-archives the builder will descend.
const MAX_NESTING: u8 = 4;

// ---------------------------------------------------------------------------
// Entry classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Asar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Raw,
    NestedArchive(ArchiveFormat),
}

/// Classify a container entry by name. Only ASAR archives are recognized.
pub fn entry_kind(name: &str) -> EntryKind {
    if name.ends_with(".asar") {
        EntryKind::NestedArchive(ArchiveFormat::Asar)
    } else {
        EntryKind::Raw
    }
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

/// Build the offset tree for one container entry.
///
/// The resulting map's keys are offsets into the entry's stored bytes; the
/// domain spans `[0, raw.len())`. Failures carry `name` as the offending
/// entry path.
pub fn build_entry_tree(name: &str, raw: &[u8], is_compressed: bool) -> Result<IntervalMap<String>> {
    let kind = entry_kind(name);

    let format = match kind {
        EntryKind::NestedArchive(format) => format,
        EntryKind::Raw => {
            let mut tree = IntervalMap::with_capacity(1);
            tree.insert(0, String::new())?;
            return Ok(tree);
        }
    };
    let ArchiveFormat::Asar = format;

    // A stored entry needs no translation layer: stored offsets are the
    // uncompressed offsets, so the path map is already the finished tree.
    if !is_compressed {
        return build_path_map(name, raw);
    }

    // Layer 1: compressed offset -> uncompressed offset.
    let out = inflate::inflate_with_boundaries(raw).map_err(|e| Error::corrupt(name, e))?;
    let (data, boundaries) = (out.data, out.boundaries);

    // Layer 2: uncompressed offset -> path.
    let path_map = build_path_map(name, &data)?;

    // Compose via floor: each block boundary is owned by whichever file
    // contains the uncompressed offset it maps to.
    let mut tree = IntervalMap::with_capacity(boundaries.len());
    let mut last_path: Option<&str> = None;
    for (compressed_offset, uncompressed_offset) in boundaries.iter() {
        let path = match path_map.floor(*uncompressed_offset) {
            Some((_, path)) => path.as_str(),
            None => "",
        };
        // Adjacent blocks inside one file collapse into a single interval.
        if last_path != Some(path) || compressed_offset == 0 {
            tree.insert(compressed_offset, path.to_string())?;
            last_path = Some(path);
        }
    }
    Ok(tree)
}

/// Parse an embedded archive into an uncompressed-offset -> path map,
/// descending into archives stored within it.
fn build_path_map(name: &str, data: &[u8]) -> Result<IntervalMap<String>> {
    let mut entries = Vec::new();
    collect_paths(data, "", 0, MAX_NESTING, &mut entries)
        .map_err(|e| Error::corrupt(name, e))?;

    let mut map = IntervalMap::with_capacity(entries.len() + 1);
    map.insert(0, String::new())?;
    let mut last_key = 0u64;
    for (offset, path) in entries {
        // Zero-length files share an offset with their successor; the first
        // record wins and the empty file contributes no interval.
        if offset > last_key {
            map.insert(offset, path)?;
            last_key = offset;
        }
    }
    Ok(map)
}

fn collect_paths(
    data: &[u8],
    prefix: &str,
    base: u64,
    depth: u8,
    out: &mut Vec<(u64, String)>,
) -> std::result::Result<(), asar::AsarError> {
    let files = asar::file_table(data)?;
    for file in files {
        let path = if prefix.is_empty() {
            file.path.clone()
        } else {
            format!("{prefix}/{}", file.path)
        };
        let abs = base + file.offset;
        out.push((abs, path.clone()));

        // An archive stored inside this one: resolve its members too.
        if depth > 0
            && let EntryKind::NestedArchive(ArchiveFormat::Asar) = entry_kind(&file.path)
            && let Some(size) = file.size
        {
            let start = file.offset as usize;
            if let Some(end) = start.checked_add(size as usize)
                && end <= data.len()
            {
                // A malformed inner archive is treated as an opaque file.
                let _ = collect_paths(&data[start..end], &path, abs, depth - 1, out);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
