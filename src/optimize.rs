// Diff-friendly container rewriting.
//
// Rewrites an installer so that unchanged content produces byte-identical
// compressed output across versions. Nested-archive entries are decompressed
// and re-deflated with a full flush at every embedded file's data offset: a
// full flush byte-aligns the stream AND resets the compressor's window, so
// each embedded file's compressed bytes depend only on that file's content.
// Every other entry passes through with its stored bytes untouched.
//
// Output is deterministic (entries sorted by name, timestamps zeroed) and
// written to a temporary sibling that is renamed into place only on success.

use std::borrow::Cow;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use flate2::{Compress, Compression, FlushCompress, Status};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::archive::{EntryKind, asar, entry_kind};
use crate::blockmap;
use crate::container::{ArchiveEntry, Container, ContainerWriter, METHOD_DEFLATE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct OptimizeSummary {
    pub input_size: u64,
    pub output_size: u64,
}

/// Rewrite `input` into `output`, optionally emitting a block manifest.
pub fn optimize(input: &Path, output: &Path, manifest: Option<&Path>) -> Result<OptimizeSummary> {
    if input == output {
        return Err(Error::InvalidInvocation(
            "input and output must be different files".into(),
        ));
    }

    let container = Container::open(input)?;
    let input_size = std::fs::metadata(input)?.len();

    let mut order: Vec<&ArchiveEntry> = container.entries().iter().collect();
    order.sort_by(|a, b| a.name.cmp(&b.name));

    #[cfg(feature = "parallel")]
    let prepared: Vec<Result<Prepared<'_>>> = order
        .par_iter()
        .map(|entry| prepare(&container, entry))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let prepared: Vec<Result<Prepared<'_>>> = order
        .iter()
        .map(|entry| prepare(&container, entry))
        .collect();

    let tmp = tmp_path(output);
    let result = write_entries(&tmp, prepared);
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, output)?;

    if let Some(manifest) = manifest {
        blockmap::write_manifest(output, manifest)?;
    }

    Ok(OptimizeSummary {
        input_size,
        output_size: std::fs::metadata(output)?.len(),
    })
}

fn tmp_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    output.with_file_name(name)
}

fn write_entries(tmp: &Path, prepared: Vec<Result<Prepared<'_>>>) -> Result<()> {
    let file = std::fs::File::create(tmp)?;
    let mut writer = ContainerWriter::new(BufWriter::new(file));
    for entry in prepared {
        match entry? {
            Prepared::Directory { name, attrs } => {
                writer.add_directory(name, attrs)?;
            }
            Prepared::File {
                name,
                method,
                crc32,
                uncompressed_size,
                attrs,
                raw,
            } => {
                writer.add_raw(name, method, crc32, uncompressed_size, attrs, &raw)?;
            }
        }
    }
    writer.finish()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-entry preparation
// ---------------------------------------------------------------------------

enum Prepared<'a> {
    Directory {
        name: &'a str,
        attrs: u32,
    },
    File {
        name: &'a str,
        method: u16,
        crc32: u32,
        uncompressed_size: u64,
        attrs: u32,
        raw: Cow<'a, [u8]>,
    },
}

fn prepare<'a>(container: &'a Container<'_>, entry: &'a ArchiveEntry) -> Result<Prepared<'a>> {
    if entry.is_dir() {
        return Ok(Prepared::Directory {
            name: &entry.name,
            attrs: entry.external_attrs,
        });
    }
    match entry_kind(&entry.name) {
        EntryKind::NestedArchive(_) => recompress_archive(container, entry),
        EntryKind::Raw => Ok(passthrough(container, entry)),
    }
}

fn passthrough<'a>(container: &'a Container<'_>, entry: &'a ArchiveEntry) -> Prepared<'a> {
    Prepared::File {
        name: &entry.name,
        method: entry.method,
        crc32: entry.crc32,
        uncompressed_size: entry.uncompressed_size,
        attrs: entry.external_attrs,
        raw: Cow::Borrowed(container.raw_data(entry)),
    }
}

/// Re-deflate a nested archive with a flush point at every embedded file's
/// data offset. The content (and therefore the CRC and uncompressed size)
/// is unchanged; only the compressed representation moves.
fn recompress_archive<'a>(
    container: &'a Container<'_>,
    entry: &'a ArchiveEntry,
) -> Result<Prepared<'a>> {
    // A stream we cannot decompress or whose CRC fails means the input
    // installer is damaged; that aborts the rewrite.
    let data = container.read_uncompressed(entry)?;

    // An entry merely named like an archive is left alone.
    let files = match asar::file_table(&data) {
        Ok(files) => files,
        Err(e) => {
            log::warn!("not recompressing '{}': {e}", entry.name);
            return Ok(passthrough(container, entry));
        }
    };

    let mut cuts: Vec<u64> = files
        .iter()
        .map(|f| f.offset)
        .filter(|&o| o > 0 && o < data.len() as u64)
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let raw = deflate_with_flush_points(&data, &cuts)?;
    log::debug!(
        "recompressed '{}' with {} flush points ({} -> {} bytes)",
        entry.name,
        cuts.len(),
        entry.compressed_size,
        raw.len()
    );
    Ok(Prepared::File {
        name: &entry.name,
        method: METHOD_DEFLATE,
        crc32: entry.crc32,
        uncompressed_size: data.len() as u64,
        attrs: entry.external_attrs,
        raw: Cow::Owned(raw),
    })
}

/// Raw-deflate `data` at maximum compression, issuing a full flush before
/// each offset in `cuts` (sorted, strictly inside the stream).
pub fn deflate_with_flush_points(data: &[u8], cuts: &[u64]) -> Result<Vec<u8>> {
    let mut compress = Compress::new(Compression::best(), false);
    let mut out = Vec::with_capacity(data.len() / 2);

    let mut segment_start = 0usize;
    for &cut in cuts {
        let cut = cut as usize;
        drive(
            &mut compress,
            &mut out,
            &data[segment_start..cut],
            FlushCompress::Full,
        )?;
        segment_start = cut;
    }
    drive(
        &mut compress,
        &mut out,
        &data[segment_start..],
        FlushCompress::Finish,
    )?;
    Ok(out)
}

fn drive(
    compress: &mut Compress,
    out: &mut Vec<u8>,
    mut input: &[u8],
    flush: FlushCompress,
) -> Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let mode = if input.is_empty() {
            flush
        } else {
            FlushCompress::None
        };
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        let status = compress
            .compress(input, &mut buf, mode)
            .map_err(std::io::Error::other)?;
        let consumed = (compress.total_in() - before_in) as usize;
        let produced = (compress.total_out() - before_out) as usize;
        out.extend_from_slice(&buf[..produced]);
        input = &input[consumed..];

        if input.is_empty() {
            if matches!(status, Status::StreamEnd) {
                break;
            }
            // A flush is complete once the compressor stops filling the
            // output buffer.
            if mode != FlushCompress::None && produced < buf.len() {
                break;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;
    use crate::inflate;

    fn random_bytes(len: usize, seed: u32) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut x = seed;
        for b in out.iter_mut() {
            x = x.wrapping_mul(48271) % 0x7fff_ffff;
            *b = (x >> 16) as u8;
        }
        out
    }

    fn installer(entries: &[(&str, &[u8], bool)]) -> Vec<u8> {
        let mut w = ContainerWriter::new(Vec::new());
        for &(name, data, compress) in entries {
            if name.ends_with('/') {
                w.add_directory(name, 0o40755 << 16).unwrap();
            } else {
                w.add_file(name, data, compress, 0o100644 << 16).unwrap();
            }
        }
        w.finish().unwrap()
    }

    fn write_tmp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn rejects_same_input_and_output() {
        let p = Path::new("installer.zip");
        assert!(matches!(
            optimize(p, p, None),
            Err(Error::InvalidInvocation(_))
        ));
    }

    #[test]
    fn flush_points_land_on_file_offsets() {
        let f1 = random_bytes(20_000, 1);
        let f2 = random_bytes(20_000, 2);
        let archive = asar::build(&[("f1", &f1), ("f2", &f2)]);
        let files = asar::file_table(&archive).unwrap();
        let cuts: Vec<u64> = files.iter().map(|f| f.offset).collect();

        let raw = deflate_with_flush_points(&archive, &cuts).unwrap();
        let out = inflate::inflate_with_boundaries(&raw).unwrap();
        assert_eq!(out.data, archive);

        // Every cut must appear as a recorded block boundary.
        let boundary_targets: Vec<u64> = out.boundaries.iter().map(|(_, u)| *u).collect();
        for cut in cuts {
            assert!(boundary_targets.contains(&cut), "no boundary at {cut}");
        }
    }

    #[test]
    fn optimize_preserves_contents_and_sorts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = asar::build(&[("lib.js", b"let x = 1; let y = 2; let z = x + y;")]);
        let bytes = installer(&[
            ("zz.txt", b"plain text file", true),
            ("app.asar", &archive, true),
            ("dir/", b"", false),
            ("aa.bin", &[0u8; 100], false),
        ]);
        let input = write_tmp(&dir, "in.zip", &bytes);
        let output = dir.path().join("out.zip");

        let summary = optimize(&input, &output, None).unwrap();
        assert_eq!(summary.input_size, bytes.len() as u64);

        let original = Container::parse(&bytes).unwrap();
        let rewritten = Container::open(&output).unwrap();
        let names: Vec<&str> = rewritten.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["aa.bin", "app.asar", "dir/", "zz.txt"]);

        for entry in rewritten.entries().iter().filter(|e| !e.is_dir()) {
            let orig = original
                .entries()
                .iter()
                .find(|e| e.name == entry.name)
                .unwrap();
            assert_eq!(
                rewritten.read_uncompressed(entry).unwrap(),
                original.read_uncompressed(orig).unwrap(),
                "content of {}",
                entry.name
            );
            assert_eq!(entry.external_attrs, orig.external_attrs);
            assert_eq!(entry.crc32, orig.crc32);
        }
    }

    #[test]
    fn optimize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = asar::build(&[
            ("a.js", &random_bytes(5_000, 1)),
            ("b.js", &random_bytes(5_000, 2)),
        ]);
        let bytes = installer(&[("app.asar", &archive, true), ("other", b"data", true)]);
        let input = write_tmp(&dir, "in.zip", &bytes);
        let out1 = dir.path().join("out1.zip");
        let out2 = dir.path().join("out2.zip");

        optimize(&input, &out1, None).unwrap();
        optimize(&out1, &out2, None).unwrap();
        assert_eq!(
            std::fs::read(&out1).unwrap(),
            std::fs::read(&out2).unwrap()
        );
    }

    #[test]
    fn change_in_one_file_isolates_compressed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = random_bytes(30_000, 1);
        let f2 = random_bytes(30_000, 2);
        let f3 = random_bytes(30_000, 3);
        let mut f2_changed = f2.clone();
        f2_changed[10_000..11_000].fill(0x5A);

        let asar_a = asar::build(&[("f1", &f1), ("f2", &f2), ("f3", &f3)]);
        let asar_b = asar::build(&[("f1", &f1), ("f2", &f2_changed), ("f3", &f3)]);
        let files = asar::file_table(&asar_a).unwrap();
        let f2_start = files[1].offset;
        let f3_start = files[2].offset;

        let in_a = write_tmp(&dir, "a.zip", &installer(&[("app.asar", &asar_a, true)]));
        let in_b = write_tmp(&dir, "b.zip", &installer(&[("app.asar", &asar_b, true)]));
        let out_a = dir.path().join("a.out.zip");
        let out_b = dir.path().join("b.out.zip");
        optimize(&in_a, &out_a, None).unwrap();
        optimize(&in_b, &out_b, None).unwrap();

        let raw_of = |path: &Path| {
            let c = Container::open(path).unwrap();
            let e = c.entries().iter().find(|e| e.name == "app.asar").unwrap();
            c.raw_data(e).to_vec()
        };
        let raw_a = raw_of(&out_a);
        let raw_b = raw_of(&out_b);

        // Locate the compressed offset of each flush point via the recorded
        // boundaries.
        let compressed_at = |raw: &[u8], target: u64| {
            let out = inflate::inflate_with_boundaries(raw).unwrap();
            out.boundaries
                .iter()
                .find(|(_, u)| **u == target)
                .map(|(c, _)| c)
                .unwrap()
        };
        let a_f2 = compressed_at(&raw_a, f2_start) as usize;
        let b_f2 = compressed_at(&raw_b, f2_start) as usize;
        let a_f3 = compressed_at(&raw_a, f3_start) as usize;
        let b_f3 = compressed_at(&raw_b, f3_start) as usize;

        // Everything before f2 and everything from f3 on is byte-identical;
        // only f2's segment moved.
        assert_eq!(raw_a[..a_f2], raw_b[..b_f2]);
        assert_eq!(raw_a[a_f3..], raw_b[b_f3..]);
        assert_ne!(raw_a[a_f2..a_f3], raw_b[b_f2..b_f3]);
    }

    #[test]
    fn non_archive_entries_pass_through_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = installer(&[("data.bin", &random_bytes(10_000, 7), true)]);
        let input = write_tmp(&dir, "in.zip", &bytes);
        let output = dir.path().join("out.zip");
        optimize(&input, &output, None).unwrap();

        let original = Container::parse(&bytes).unwrap();
        let rewritten = Container::open(&output).unwrap();
        assert_eq!(
            original.raw_data(&original.entries()[0]),
            rewritten.raw_data(&rewritten.entries()[0])
        );
    }

    #[test]
    fn misnamed_archive_passes_through_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = installer(&[("fake.asar", &random_bytes(1_000, 9), true)]);
        let input = write_tmp(&dir, "in.zip", &bytes);
        let output = dir.path().join("out.zip");
        optimize(&input, &output, None).unwrap();

        let original = Container::parse(&bytes).unwrap();
        let rewritten = Container::open(&output).unwrap();
        assert_eq!(
            original.raw_data(&original.entries()[0]),
            rewritten.raw_data(&rewritten.entries()[0])
        );
    }

    #[test]
    fn writes_blockmap_manifest_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = installer(&[("f", b"some file content", true)]);
        let input = write_tmp(&dir, "in.zip", &bytes);
        let output = dir.path().join("out.zip");
        let manifest = dir.path().join("out.blockmap");
        optimize(&input, &output, Some(&manifest)).unwrap();
        assert!(manifest.exists());
        assert!(std::fs::metadata(&manifest).unwrap().len() > 0);
    }

    #[test]
    fn failed_rewrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_tmp(&dir, "in.zip", b"not a zip at all");
        let output = dir.path().join("out.zip");
        assert!(optimize(&input, &output, None).is_err());
        assert!(!output.exists());
        assert!(!tmp_path(&output).exists());
    }
}
