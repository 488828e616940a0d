// Crate-wide error taxonomy.
//
// Entry-level failures (`CorruptData`) carry the offending entry's path and
// are collected per entry during tree building; they never abort sibling
// entries. `ChecksumSizeMismatch` is fatal for a whole comparison: it means
// the chunking stage's equal-checksum-implies-equal-size assumption broke.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file open, read, write, rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed deflate stream, archive header, or container structure.
    /// Aborts processing of the named entry only.
    #[error("corrupt data in '{entry}': {reason}")]
    CorruptData { entry: String, reason: String },

    /// Two blocks matched by checksum but differ in size. Fatal for the
    /// whole comparison.
    #[error(
        "block size mismatch for checksum {checksum}: old size {old_size} != new size {new_size}"
    )]
    ChecksumSizeMismatch {
        checksum: String,
        old_size: u32,
        new_size: u32,
    },

    /// Interval map keys must be inserted in strictly increasing order.
    #[error("interval key {key} is not greater than previous key {last}")]
    NonMonotonicKey { key: u64, last: u64 },

    /// Container-level read or write failure.
    #[error("container error: {0}")]
    Container(#[from] crate::container::ZipError),

    /// Invocation rejected before any I/O was performed.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),
}

impl Error {
    /// Attach an entry path to a lower-level corruption error.
    pub fn corrupt(entry: impl Into<String>, reason: impl ToString) -> Self {
        Error::CorruptData {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }
}
