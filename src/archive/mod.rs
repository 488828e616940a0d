// Embedded-archive support: manifest parsing and offset-tree construction.

pub mod asar;
pub mod tree;

pub use tree::{ArchiveFormat, EntryKind, build_entry_tree, entry_kind};
