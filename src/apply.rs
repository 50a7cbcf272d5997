use log::{debug, trace};
use std::path::Path;

use crate::binary_patch;
use crate::checksum;
use crate::error::{ChecksumKind, PatchError, Result};
use crate::multi_format::{self, Entry, EntryOp};
use crate::patch_format::MultiSummary;
use crate::util;

/// Outcome of a fully applied multi-file patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiApplied {
    pub summary: MultiSummary,
    pub manifest: Vec<u8>,
}

/// Read a source file and check it against the checksum recorded at creation.
fn verified_source(path: &Path, expected: u32) -> Result<util::FileData> {
    let data = util::mmap_file(path)?;
    if checksum::checksum(&data) != expected {
        return Err(PatchError::checksum(ChecksumKind::Source));
    }
    Ok(data)
}

fn apply_entry(entry: &Entry, source_dir: &Path, target_dir: &Path) -> Result<()> {
    let output = util::safe_join(target_dir, &entry.path)?;
    match &entry.op {
        EntryOp::CreatePath => {
            std::fs::create_dir_all(&output).map_err(|e| PatchError::io(&output, e))?;
        }
        EntryOp::DeletePath => {}
        EntryOp::CreateFile { patch } => {
            let applied = binary_patch::apply(patch, &[])?;
            util::write_file(&output, &applied.target)?;
        }
        EntryOp::ModifyFile { patch } => {
            let applied = {
                let source = util::mmap_file(&util::safe_join(source_dir, &entry.path)?)?;
                binary_patch::apply(patch, &source)?
            };
            util::write_file(&output, &applied.target)?;
        }
        EntryOp::MirrorFile { checksum } => {
            let data = verified_source(&util::safe_join(source_dir, &entry.path)?, *checksum)?;
            util::write_file(&output, &data)?;
        }
        EntryOp::RenameFile { origin, checksum } => {
            let data = verified_source(&util::safe_join(source_dir, origin)?, *checksum)?;
            util::write_file(&output, &data)?;
        }
    }
    trace!("{}: {:?}", entry.path, entry.op.tag());
    Ok(())
}

/// Apply the multi-file patch at `modify_path` to `source_dir`, building the
/// result in `target_dir` (created if missing).
///
/// Whole-or-nothing at the tree level: the first failing entry aborts the
/// operation and is reported as `PatchError::Entry`. Nothing already written
/// is rolled back; the caller decides whether to remove `target_dir`.
pub fn apply_patch(modify_path: &Path, source_dir: &Path, target_dir: &Path) -> Result<MultiApplied> {
    util::ensure_distinct(source_dir, target_dir)?;

    let file = {
        let raw = util::mmap_file(modify_path)?;
        multi_format::decode(&raw)?
    };

    std::fs::create_dir_all(target_dir).map_err(|e| PatchError::io(target_dir, e))?;

    for entry in &file.entries {
        apply_entry(entry, source_dir, target_dir).map_err(|e| PatchError::entry(&entry.path, e))?;
    }

    debug!(
        "applied {} entries from {} into {}",
        file.entries.len(),
        modify_path.display(),
        target_dir.display()
    );
    Ok(MultiApplied {
        summary: file.summary(),
        manifest: file.manifest,
    })
}
