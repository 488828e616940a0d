// Installer comparison: block diff plus download attribution.
//
// The diff engine decides WHICH byte ranges of the new installer must be
// downloaded; this module answers WHY, resolving each download range through
// the container layer (offset -> entry) and, for nested-archive entries,
// through the entry's own offset tree (compressed offset -> stored file
// path). Nested paths are reported as `entry/inner/path`.
//
// Attribution is best-effort: a nested archive that fails to parse is
// reported as an opaque entry and its error collected, and bytes that
// precede the first entry's data (the leading local header) stay
// unattributed. The download total always covers every range regardless.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use crate::archive::{EntryKind, build_entry_tree, entry_kind};
use crate::blockmap;
use crate::container::Container;
use crate::diff::{self, compute_diff};
use crate::error::{Error, Result};
use crate::interval::IntervalMap;

/// Bytes to download attributed to one logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub path: String,
    pub bytes: u64,
}

/// Outcome of comparing two installers.
#[derive(Debug)]
pub struct CompareReport {
    pub old_size: u64,
    pub new_size: u64,
    /// Total bytes a differential update would fetch.
    pub download_size: u64,
    /// Attributed downloads, ascending by byte count (ties by path).
    pub modified_files: Vec<FileDownload>,
    /// Non-fatal per-entry failures hit during attribution.
    pub entry_errors: Vec<Error>,
}

/// Compare two installer files on disk.
pub fn compare_files(old_path: &Path, new_path: &Path) -> Result<CompareReport> {
    let old = std::fs::read(old_path)?;
    let new = std::fs::read(new_path)?;
    compare_data(&old, &new)
}

/// Compare two installers held in memory.
pub fn compare_data(old: &[u8], new: &[u8]) -> Result<CompareReport> {
    let old_blocks = blockmap::data_blocks(old);

    // Parse the new installer once; the chunker and the resolver share it.
    let new_container = Container::parse(new);
    let new_blocks = match &new_container {
        Ok(container) => {
            blockmap::blocks_with_boundaries(new, &blockmap::entry_boundaries(container))
        }
        Err(_) => blockmap::blocks_with_boundaries(new, &[]),
    };

    let plan = compute_diff(&old_blocks, &new_blocks)?;
    let download_size = diff::download_size(&plan);
    let ranges = diff::download_ranges(&plan);

    let mut entry_errors = Vec::new();
    let modified_files = match new_container {
        Ok(container) => {
            let mut resolver = Resolver::new(&container);
            let attributed = resolver.attribute(&ranges);
            entry_errors = resolver.errors;
            sort_by_bytes(attributed)
        }
        Err(e) => {
            // Not a container we understand; the byte total stands alone.
            log::warn!("new installer did not parse as a container: {e}");
            entry_errors.push(Error::corrupt("<container>", e));
            Vec::new()
        }
    };

    Ok(CompareReport {
        old_size: old.len() as u64,
        new_size: new.len() as u64,
        download_size,
        modified_files,
        entry_errors,
    })
}

fn sort_by_bytes(attributed: BTreeMap<String, u64>) -> Vec<FileDownload> {
    let mut files: Vec<FileDownload> = attributed
        .into_iter()
        .map(|(path, bytes)| FileDownload { path, bytes })
        .collect();
    files.sort_by(|a, b| a.bytes.cmp(&b.bytes).then_with(|| a.path.cmp(&b.path)));
    files
}

// ---------------------------------------------------------------------------
// Offset resolution
// ---------------------------------------------------------------------------

/// Resolves container offsets to logical paths, building per-entry archive
/// trees lazily: only entries actually hit by a download range pay the
/// decompression cost.
struct Resolver<'a> {
    container: &'a Container<'a>,
    /// Container offset -> entry index, keyed by each entry's data start.
    top: IntervalMap<usize>,
    /// Lazily built trees for nested-archive entries; `None` marks an entry
    /// whose tree failed to build.
    subtrees: HashMap<usize, Option<IntervalMap<String>>>,
    errors: Vec<Error>,
}

impl<'a> Resolver<'a> {
    fn new(container: &'a Container<'a>) -> Self {
        let mut keyed: Vec<(u64, usize)> = container
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_dir())
            .map(|(i, e)| (e.data_start, i))
            .collect();
        keyed.sort_unstable_by_key(|&(offset, _)| offset);
        Self {
            container,
            top: IntervalMap::from_sorted(keyed),
            subtrees: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Attribute every download range, returning bytes per resolved path.
    fn attribute(&mut self, ranges: &[(u64, u64)]) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for &(offset, size) in ranges {
            let end = offset + size;
            let clips: Vec<(usize, u64, u64)> = self
                .top
                .range(offset, end)
                .iter()
                .map(|c| (*c.value, c.from, c.to))
                .collect();

            let covered: u64 = clips.iter().map(|&(_, from, to)| to - from).sum();
            if covered < size {
                log::debug!(
                    "{} of {size} bytes at offset {offset} precede any entry data",
                    size - covered
                );
            }
            for (idx, from, to) in clips {
                self.attribute_clip(idx, from, to, &mut out);
            }
        }
        out
    }

    /// Attribute `[from, to)`, a sub-range of entry `idx`'s interval. The
    /// interval runs to the next entry's data start, so its tail covers the
    /// following local header; those bytes go to the entry itself rather
    /// than through its archive tree.
    fn attribute_clip(&mut self, idx: usize, from: u64, to: u64, out: &mut BTreeMap<String, u64>) {
        let container = self.container;
        let entry = &container.entries()[idx];
        let data_end = entry.data_start + entry.compressed_size;

        let data_to = to.min(data_end);
        if from < data_to {
            match entry_kind(&entry.name) {
                EntryKind::NestedArchive(_) => {
                    let local_from = from - entry.data_start;
                    let local_to = data_to - entry.data_start;
                    match self.subtree(idx) {
                        Some(sub) => {
                            for clip in sub.range(local_from, local_to) {
                                let path = if clip.value.is_empty() {
                                    entry.name.clone()
                                } else {
                                    format!("{}/{}", entry.name, clip.value)
                                };
                                *out.entry(path).or_insert(0) += clip.to - clip.from;
                            }
                        }
                        None => {
                            *out.entry(entry.name.clone()).or_insert(0) += data_to - from;
                        }
                    }
                }
                EntryKind::Raw => {
                    *out.entry(entry.name.clone()).or_insert(0) += data_to - from;
                }
            }
        }

        let tail_from = from.max(data_end);
        if tail_from < to {
            *out.entry(entry.name.clone()).or_insert(0) += to - tail_from;
        }
    }

    fn subtree(&mut self, idx: usize) -> Option<&IntervalMap<String>> {
        let container = self.container;
        self.subtrees
            .entry(idx)
            .or_insert_with(|| {
                let entry = &container.entries()[idx];
                match build_entry_tree(&entry.name, container.raw_data(entry), entry.is_compressed())
                {
                    Ok(tree) => Some(tree),
                    Err(err) => {
                        log::warn!("treating '{}' as opaque: {err}", entry.name);
                        self.errors.push(err);
                        None
                    }
                }
            })
            .as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
