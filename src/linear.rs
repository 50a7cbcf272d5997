//! Linear patches: the whole target travels as one literal run.

use log::debug;
use std::path::Path;

use crate::binary_patch;
use crate::error::Result;
use crate::patch_format::{AppliedPatch, Instruction};
use crate::patch_writer::PatchWriter;
use crate::util;

/// Emit a single `TargetRead` covering the entire target. The source is only
/// recorded through its length and checksum.
pub fn create(source: &[u8], target: &[u8], manifest: &[u8]) -> Vec<u8> {
    let mut writer = PatchWriter::new(source, target, manifest);
    writer.push(Instruction::TargetRead {
        length: target.len(),
    });
    writer.finish()
}

/// [`create`] over two files on disk.
pub fn create_file(source_path: &Path, target_path: &Path, manifest: &[u8]) -> Result<Vec<u8>> {
    util::ensure_distinct(source_path, target_path)?;
    let source = util::mmap_file(source_path)?;
    let target = util::mmap_file(target_path)?;
    let patch = create(&source, &target, manifest);
    debug!(
        "linear patch {} -> {}: {} bytes",
        source_path.display(),
        target_path.display(),
        patch.len()
    );
    Ok(patch)
}

pub fn apply(patch: &[u8], source: &[u8]) -> Result<AppliedPatch> {
    binary_patch::apply(patch, source)
}
