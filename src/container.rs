// Minimal zip container reader/writer (Zip32, store/deflate only).
//
// The reader parses the central directory and resolves every entry's local
// header to the absolute offset where its data begins; those offsets are what
// the top-level interval tree is keyed on. The writer produces deterministic
// output: caller-chosen entry order, zeroed DOS timestamps, no data
// descriptors, explicit sizes. Re-running the writer over unchanged input
// yields byte-identical output.
//
// Zip64, encryption, and non-deflate methods are out of scope.

use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::inflate;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
/// EOCD plus the maximum trailing comment.
const EOCD_SEARCH_SPAN: usize = EOCD_LEN + u16::MAX as usize;

pub const METHOD_STORE: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// Version-made-by: unix host, spec 3.0 (carries the mode bits in the high
/// word of the external attributes, as the original installers do).
const VERSION_MADE_BY: u16 = (3 << 8) | 30;
const VERSION_NEEDED: u16 = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("end-of-central-directory record not found")]
    MissingEocd,
    #[error("bad record signature at offset {0}")]
    BadSignature(u64),
    #[error("record truncated at offset {0}")]
    Truncated(u64),
    #[error("entry name is not valid UTF-8")]
    NonUtf8Name,
    #[error("unsupported compression method {method} for '{name}'")]
    UnsupportedMethod { name: String, method: u16 },
    #[error("entry '{0}' data exceeds the container")]
    EntryOutOfBounds(String),
    #[error("CRC-32 mismatch for '{0}'")]
    CrcMismatch(String),
    #[error("deflate error in '{name}': {source}")]
    Inflate {
        name: String,
        source: inflate::InflateError,
    },
    #[error("entry too large for zip32")]
    TooLarge,
}

// ---------------------------------------------------------------------------
// Entry descriptor
// ---------------------------------------------------------------------------

/// One file record, resolved to the absolute offset where its data begins.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Absolute offset of the entry's data within the container stream.
    pub data_start: u64,
    pub external_attrs: u32,
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_compressed(&self) -> bool {
        self.method == METHOD_DEFLATE
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// A parsed container: the byte stream (owned or borrowed) plus resolved
/// entries.
pub struct Container<'a> {
    data: Cow<'a, [u8]>,
    entries: Vec<ArchiveEntry>,
}

fn u16_at(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_at(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

impl Container<'static> {
    pub fn open(path: &Path) -> Result<Self, ZipError> {
        let data = std::fs::read(path)?;
        let entries = parse_entries(&data)?;
        Ok(Self {
            data: Cow::Owned(data),
            entries,
        })
    }
}

impl<'a> Container<'a> {
    /// Parse an in-memory container without copying its bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, ZipError> {
        let entries = parse_entries(data)?;
        Ok(Self {
            data: Cow::Borrowed(data),
            entries,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// The entry's stored bytes, compressed or not, exactly as on disk.
    pub fn raw_data(&self, entry: &ArchiveEntry) -> &[u8] {
        let start = entry.data_start as usize;
        &self.data[start..start + entry.compressed_size as usize]
    }

    /// Decompress an entry (or copy it if stored), verifying its CRC-32.
    pub fn read_uncompressed(&self, entry: &ArchiveEntry) -> Result<Vec<u8>, ZipError> {
        let raw = self.raw_data(entry);
        let data = if entry.is_compressed() {
            inflate::inflate_with_boundaries(raw)
                .map_err(|source| ZipError::Inflate {
                    name: entry.name.clone(),
                    source,
                })?
                .data
        } else {
            raw.to_vec()
        };
        if crc32fast::hash(&data) != entry.crc32 {
            return Err(ZipError::CrcMismatch(entry.name.clone()));
        }
        Ok(data)
    }
}

fn parse_entries(data: &[u8]) -> Result<Vec<ArchiveEntry>, ZipError> {
    let eocd = find_eocd(data)?;
    let entry_count = u16_at(data, eocd + 10) as usize;
    let cd_offset = u32_at(data, eocd + 16) as usize;

    let mut entries = Vec::with_capacity(entry_count);
    let mut pos = cd_offset;
    for _ in 0..entry_count {
        if pos + CENTRAL_HEADER_LEN > data.len() {
            return Err(ZipError::Truncated(pos as u64));
        }
        if u32_at(data, pos) != CENTRAL_HEADER_SIG {
            return Err(ZipError::BadSignature(pos as u64));
        }

        let method = u16_at(data, pos + 10);
        let crc32 = u32_at(data, pos + 16);
        let compressed_size = u32_at(data, pos + 20) as u64;
        let uncompressed_size = u32_at(data, pos + 24) as u64;
        let name_len = u16_at(data, pos + 28) as usize;
        let extra_len = u16_at(data, pos + 30) as usize;
        let comment_len = u16_at(data, pos + 32) as usize;
        let external_attrs = u32_at(data, pos + 38);
        let local_offset = u32_at(data, pos + 42) as usize;

        let name_end = pos + CENTRAL_HEADER_LEN + name_len;
        if name_end > data.len() {
            return Err(ZipError::Truncated(pos as u64));
        }
        let name = std::str::from_utf8(&data[pos + CENTRAL_HEADER_LEN..name_end])
            .map_err(|_| ZipError::NonUtf8Name)?
            .to_string();

        if method != METHOD_STORE && method != METHOD_DEFLATE {
            return Err(ZipError::UnsupportedMethod { name, method });
        }

        let data_start = resolve_data_start(data, local_offset)?;
        if data_start + compressed_size > data.len() as u64 {
            return Err(ZipError::EntryOutOfBounds(name));
        }

        entries.push(ArchiveEntry {
            name,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            data_start,
            external_attrs,
        });

        pos = name_end + extra_len + comment_len;
    }

    Ok(entries)
}

fn find_eocd(data: &[u8]) -> Result<usize, ZipError> {
    if data.len() < EOCD_LEN {
        return Err(ZipError::MissingEocd);
    }
    let floor = data.len().saturating_sub(EOCD_SEARCH_SPAN);
    let mut pos = data.len() - EOCD_LEN;
    loop {
        if u32_at(data, pos) == EOCD_SIG {
            return Ok(pos);
        }
        if pos == floor {
            return Err(ZipError::MissingEocd);
        }
        pos -= 1;
    }
}

/// Walk a central-directory local-header offset to the entry's data offset.
fn resolve_data_start(data: &[u8], local_offset: usize) -> Result<u64, ZipError> {
    if local_offset + LOCAL_HEADER_LEN > data.len() {
        return Err(ZipError::Truncated(local_offset as u64));
    }
    if u32_at(data, local_offset) != LOCAL_HEADER_SIG {
        return Err(ZipError::BadSignature(local_offset as u64));
    }
    // Name/extra lengths in the local header may differ from the central
    // directory's, so the local values are authoritative here.
    let name_len = u16_at(data, local_offset + 26) as usize;
    let extra_len = u16_at(data, local_offset + 28) as usize;
    Ok((local_offset + LOCAL_HEADER_LEN + name_len + extra_len) as u64)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct CentralRecord {
    name: String,
    method: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    external_attrs: u32,
    local_offset: u32,
}

/// Deterministic container writer. Entries appear in the order they are
/// added; all timestamps are zeroed.
pub struct ContainerWriter<W: Write> {
    out: W,
    offset: u64,
    central: Vec<CentralRecord>,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            central: Vec::new(),
        }
    }

    /// Append a directory entry (no data).
    pub fn add_directory(&mut self, name: &str, external_attrs: u32) -> Result<(), ZipError> {
        self.add_raw(name, METHOD_STORE, 0, 0, external_attrs, &[])
    }

    /// Append an entry whose payload is already in its stored form
    /// (pre-compressed bytes for deflate, plain bytes for store). The caller
    /// supplies the CRC-32 and uncompressed size of the logical content.
    pub fn add_raw(
        &mut self,
        name: &str,
        method: u16,
        crc32: u32,
        uncompressed_size: u64,
        external_attrs: u32,
        raw: &[u8],
    ) -> Result<(), ZipError> {
        let compressed_size = u32::try_from(raw.len()).map_err(|_| ZipError::TooLarge)?;
        let uncompressed_size = u32::try_from(uncompressed_size).map_err(|_| ZipError::TooLarge)?;
        let name_len = u16::try_from(name.len()).map_err(|_| ZipError::TooLarge)?;
        let local_offset = u32::try_from(self.offset).map_err(|_| ZipError::TooLarge)?;

        let mut hdr = Vec::with_capacity(LOCAL_HEADER_LEN + name.len());
        hdr.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        hdr.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        hdr.extend_from_slice(&0u16.to_le_bytes()); // flags
        hdr.extend_from_slice(&method.to_le_bytes());
        hdr.extend_from_slice(&0u16.to_le_bytes()); // mod time (zeroed)
        hdr.extend_from_slice(&0u16.to_le_bytes()); // mod date (zeroed)
        hdr.extend_from_slice(&crc32.to_le_bytes());
        hdr.extend_from_slice(&compressed_size.to_le_bytes());
        hdr.extend_from_slice(&uncompressed_size.to_le_bytes());
        hdr.extend_from_slice(&name_len.to_le_bytes());
        hdr.extend_from_slice(&0u16.to_le_bytes()); // extra len
        hdr.extend_from_slice(name.as_bytes());

        self.out.write_all(&hdr)?;
        self.out.write_all(raw)?;
        self.offset += hdr.len() as u64 + raw.len() as u64;

        self.central.push(CentralRecord {
            name: name.to_string(),
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            external_attrs,
            local_offset,
        });
        Ok(())
    }

    /// Convenience for fresh content: computes the CRC and compresses with a
    /// single deflate pass when `compress` is set.
    pub fn add_file(
        &mut self,
        name: &str,
        data: &[u8],
        compress: bool,
        external_attrs: u32,
    ) -> Result<(), ZipError> {
        let crc = crc32fast::hash(data);
        if compress {
            let mut enc =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::best());
            enc.write_all(data)?;
            let raw = enc.finish()?;
            self.add_raw(
                name,
                METHOD_DEFLATE,
                crc,
                data.len() as u64,
                external_attrs,
                &raw,
            )
        } else {
            self.add_raw(
                name,
                METHOD_STORE,
                crc,
                data.len() as u64,
                external_attrs,
                data,
            )
        }
    }

    /// Write the central directory and end record, returning the sink.
    pub fn finish(mut self) -> Result<W, ZipError> {
        let cd_start = u32::try_from(self.offset).map_err(|_| ZipError::TooLarge)?;
        let count = u16::try_from(self.central.len()).map_err(|_| ZipError::TooLarge)?;

        let mut cd = Vec::new();
        for rec in &self.central {
            cd.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            cd.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            cd.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // flags
            cd.extend_from_slice(&rec.method.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // mod time
            cd.extend_from_slice(&0u16.to_le_bytes()); // mod date
            cd.extend_from_slice(&rec.crc32.to_le_bytes());
            cd.extend_from_slice(&rec.compressed_size.to_le_bytes());
            cd.extend_from_slice(&rec.uncompressed_size.to_le_bytes());
            cd.extend_from_slice(&(rec.name.len() as u16).to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // extra len
            cd.extend_from_slice(&0u16.to_le_bytes()); // comment len
            cd.extend_from_slice(&0u16.to_le_bytes()); // disk number
            cd.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            cd.extend_from_slice(&rec.external_attrs.to_le_bytes());
            cd.extend_from_slice(&rec.local_offset.to_le_bytes());
            cd.extend_from_slice(rec.name.as_bytes());
        }
        let cd_size = u32::try_from(cd.len()).map_err(|_| ZipError::TooLarge)?;

        self.out.write_all(&cd)?;
        self.out.write_all(&EOCD_SIG.to_le_bytes())?;
        self.out.write_all(&0u16.to_le_bytes())?; // disk number
        self.out.write_all(&0u16.to_le_bytes())?; // cd start disk
        self.out.write_all(&count.to_le_bytes())?; // entries on this disk
        self.out.write_all(&count.to_le_bytes())?; // total entries
        self.out.write_all(&cd_size.to_le_bytes())?;
        self.out.write_all(&cd_start.to_le_bytes())?;
        self.out.write_all(&0u16.to_le_bytes())?; // comment len
        Ok(self.out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
