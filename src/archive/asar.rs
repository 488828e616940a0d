// ASAR-style nested-archive header parsing.
//
// Layout: a 16-byte prefix whose little-endian u32 at byte offset 12 gives
// the size of a UTF-8 JSON manifest that immediately follows; file data
// starts after the manifest. The manifest is a recursive tree of
// `{name -> {offset?, size?, files?}}`: a node with `offset` is a stored
// file whose data begins at `16 + header_len + offset`, a node with `files`
// is a directory. Offsets are JSON strings in the wild (they can exceed
// 2^31), so both string and integer forms are accepted.

use serde_json::Value;
use thiserror::Error;

/// Byte offset of the header-length field within the prefix.
const HEADER_LEN_OFFSET: usize = 12;
/// Total prefix size before the JSON manifest.
pub const PREFIX_LEN: u64 = 16;

#[derive(Debug, Error)]
pub enum AsarError {
    #[error("archive too short for a header")]
    TooShort,
    #[error("manifest length exceeds the archive")]
    HeaderOutOfBounds,
    #[error("manifest is not valid JSON: {0}")]
    BadManifest(String),
    #[error("manifest offset field is not an integer")]
    BadOffset,
}

/// One stored file from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsarFile {
    /// Slash-joined path within the archive.
    pub path: String,
    /// Absolute data offset within the decompressed archive stream.
    pub offset: u64,
    /// Stored size, when the manifest carries one.
    pub size: Option<u64>,
}

/// Parse the manifest of a decompressed archive and list its stored files,
/// sorted by data offset.
pub fn file_table(data: &[u8]) -> Result<Vec<AsarFile>, AsarError> {
    if data.len() < PREFIX_LEN as usize {
        return Err(AsarError::TooShort);
    }
    let header_len = u32::from_le_bytes([
        data[HEADER_LEN_OFFSET],
        data[HEADER_LEN_OFFSET + 1],
        data[HEADER_LEN_OFFSET + 2],
        data[HEADER_LEN_OFFSET + 3],
    ]) as usize;

    let manifest_end = (PREFIX_LEN as usize)
        .checked_add(header_len)
        .filter(|&end| end <= data.len())
        .ok_or(AsarError::HeaderOutOfBounds)?;
    let manifest: Value = serde_json::from_slice(&data[PREFIX_LEN as usize..manifest_end])
        .map_err(|e| AsarError::BadManifest(e.to_string()))?;

    let data_base = PREFIX_LEN + header_len as u64;
    let mut files = Vec::new();
    crawl(&manifest, "", data_base, &mut files)?;
    files.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn crawl(node: &Value, path: &str, base: u64, out: &mut Vec<AsarFile>) -> Result<(), AsarError> {
    if let Some(offset) = node.get("offset") {
        let offset = parse_u64(offset)?;
        let size = match node.get("size") {
            Some(v) => Some(parse_u64(v)?),
            None => None,
        };
        out.push(AsarFile {
            path: path.to_string(),
            offset: base + offset,
            size,
        });
    }

    if let Some(Value::Object(children)) = node.get("files") {
        for (name, child) in children {
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}/{name}")
            };
            crawl(child, &child_path, base, out)?;
        }
    }
    Ok(())
}

fn parse_u64(v: &Value) -> Result<u64, AsarError> {
    match v {
        Value::String(s) => s.parse().map_err(|_| AsarError::BadOffset),
        Value::Number(n) => n.as_u64().ok_or(AsarError::BadOffset),
        _ => Err(AsarError::BadOffset),
    }
}

// ---------------------------------------------------------------------------
// Test fixture builder
// ---------------------------------------------------------------------------

/// Assemble an archive from `(path, content)` pairs. Paths may contain
/// slashes; intermediate directories are synthesized in the manifest.
/// Intended for tests and fixtures; the core only ever consumes archives.
pub fn build(files: &[(&str, &[u8])]) -> Vec<u8> {
    use serde_json::{Map, json};

    fn subtree<'a>(root: &'a mut Map<String, Value>, dir: &str) -> &'a mut Map<String, Value> {
        let mut cur = root;
        for part in dir.split('/') {
            let node = cur
                .entry(part.to_string())
                .or_insert_with(|| json!({ "files": {} }));
            if !node.get("files").is_some_and(Value::is_object) {
                node["files"] = json!({});
            }
            match node.get_mut("files").and_then(Value::as_object_mut) {
                Some(children) => cur = children,
                None => unreachable!(),
            }
        }
        cur
    }

    let mut tree = Map::new();
    let mut blob = Vec::new();
    for (path, content) in files {
        let node = json!({
            "offset": blob.len().to_string(),
            "size": content.len(),
        });
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, *path),
        };
        let parent = match dir {
            Some(dir) => subtree(&mut tree, dir),
            None => &mut tree,
        };
        parent.insert(name.to_string(), node);
        blob.extend_from_slice(content);
    }

    let manifest = serde_json::to_vec(&json!({ "files": tree })).expect("manifest json");
    let mut out = Vec::with_capacity(PREFIX_LEN as usize + manifest.len() + blob.len());
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&(8 + manifest.len() as u32).to_le_bytes());
    out.extend_from_slice(&(4 + manifest.len() as u32).to_le_bytes());
    out.extend_from_slice(&(manifest.len() as u32).to_le_bytes());
    out.extend_from_slice(&manifest);
    out.extend_from_slice(&blob);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
