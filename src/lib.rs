//! Binary patches for files and directory trees.
//!
//! - `linear` / `binary_diff`: create single-file patches (BPS)
//! - `binary_patch`: the shared interpreter that applies them
//! - `create` / `apply`: multi-file patches over directory trees (BPM)
//! - `archive`: packed snapshots of a directory tree (BPA)
//!
//! ```
//! let source = b"AAAAABBBBB";
//! let target = b"AAAAACBBBBB";
//! let patch = beat::binary_diff::create(source, target, b"");
//! let applied = beat::binary_patch::apply(&patch, source).unwrap();
//! assert_eq!(applied.target, target);
//! ```

pub mod apply;
pub mod archive;
pub mod binary_diff;
pub mod binary_patch;
pub mod checksum;
pub mod create;
pub mod error;
pub mod linear;
pub mod multi_format;
pub mod patch_format;
pub mod patch_writer;
pub mod util;
pub mod varint;

pub use binary_diff::DeltaOptions;
pub use error::{ChecksumKind, PatchError, Result};
pub use patch_format::{AppliedPatch, ArchiveSummary, Mode, MultiSummary, PatchInfo};
