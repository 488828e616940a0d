//! Rezip: diff-friendly re-compression for nested installer archives.
//!
//! Installers that embed archive files (ASAR-style bundles inside a zip)
//! compress poorly for differential updates: one changed byte reshuffles the
//! deflate stream from that point on. This crate provides:
//! - A rewriter (`optimize`) that re-deflates embedded archives with a full
//!   flush at every inner file boundary, so unchanged files keep
//!   byte-identical compressed output across versions
//! - A comparator (`compare`) that block-diffs two installers and resolves
//!   each download range through the archive layers to the logical file
//!   that caused it
//! - The supporting pieces: an instrumented inflate that records deflate
//!   block boundaries (`inflate`), interval maps (`interval`), a minimal
//!   deterministic zip reader/writer (`container`), and block checksumming
//!   (`blockmap`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Rewrite an installer for diff-friendly compression.
//! rezip::optimize::optimize(
//!     Path::new("app-1.0.zip"),
//!     Path::new("app-1.0.opt.zip"),
//!     None,
//! )
//! .unwrap();
//!
//! // Later: what would the 1.1 update actually download, and why?
//! let report = rezip::compare::compare_files(
//!     Path::new("app-1.0.opt.zip"),
//!     Path::new("app-1.1.opt.zip"),
//! )
//! .unwrap();
//! println!("download: {} bytes", report.download_size);
//! for file in &report.modified_files {
//!     println!("{:>10}  {}", file.bytes, file.path);
//! }
//! ```

pub mod archive;
pub mod blockmap;
pub mod compare;
pub mod container;
pub mod diff;
pub mod error;
pub mod inflate;
pub mod interval;
pub mod optimize;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, Result};
