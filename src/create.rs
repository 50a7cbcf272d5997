use log::{debug, trace};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::binary_diff::{self, DeltaOptions};
use crate::checksum;
use crate::error::{PatchError, Result};
use crate::linear;
use crate::multi_format::{self, Entry, EntryOp, MultiPatchFile};
use crate::patch_format::{Mode, MultiSummary};
use crate::util::{self, DirEntry, EntryKind};

/// What one relative path needs, decided from the two directory listings.
enum Plan {
    Directory,
    Compare { source: PathBuf, target: PathBuf },
    Create { target: PathBuf, size: u64 },
    Delete,
}

/// Single-file patch in the requested mode.
pub fn single_file_patch(mode: Mode, options: &DeltaOptions, source: &[u8], target: &[u8]) -> Vec<u8> {
    match mode {
        Mode::Linear => linear::create(source, target, &[]),
        Mode::Delta => binary_diff::create_with(source, target, &[], options),
    }
}

fn classify(source: Option<&DirEntry>, target: Option<&DirEntry>) -> Plan {
    match (source, target) {
        (_, Some(t)) if t.kind == EntryKind::Dir => Plan::Directory,
        (Some(s), Some(t)) if s.kind == EntryKind::File => Plan::Compare {
            source: s.full_path.clone(),
            target: t.full_path.clone(),
        },
        (_, Some(t)) => Plan::Create {
            target: t.full_path.clone(),
            size: t.size,
        },
        (_, None) => Plan::Delete,
    }
}

/// Source-only files that a target-only file may have been renamed from.
///
/// Only sizes shared with some target-only file are worth hashing; the walk
/// already recorded every size.
struct RenameIndex {
    sizes: HashSet<u64>,
    by_content: HashMap<[u8; 32], String>,
}

impl RenameIndex {
    fn build(source: &BTreeMap<String, DirEntry>, target: &BTreeMap<String, DirEntry>) -> Result<Self> {
        let added_sizes: HashSet<u64> = only_files(target, source).map(|e| e.size).collect();
        let removed: Vec<&DirEntry> = only_files(source, target)
            .filter(|e| e.size > 0 && added_sizes.contains(&e.size))
            .collect();

        let hashed = removed
            .par_iter()
            .map(|e| -> Result<([u8; 32], String)> {
                let data = util::mmap_file(&e.full_path)?;
                Ok((util::fingerprint(&data), e.relative_path.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        // Lowest path wins when several removed files share content.
        let mut index = Self {
            sizes: removed.iter().map(|e| e.size).collect(),
            by_content: HashMap::with_capacity(hashed.len()),
        };
        for (hash, path) in hashed {
            index.by_content.entry(hash).or_insert(path);
        }
        Ok(index)
    }

    fn origin(&self, size: u64, data: &[u8]) -> Option<&String> {
        if size == 0 || !self.sizes.contains(&size) {
            return None;
        }
        self.by_content.get(&util::fingerprint(data))
    }
}

/// Files of `tree` whose path is absent from `other`.
fn only_files<'a>(
    tree: &'a BTreeMap<String, DirEntry>,
    other: &'a BTreeMap<String, DirEntry>,
) -> impl Iterator<Item = &'a DirEntry> + 'a {
    tree.values()
        .filter(move |e| e.kind == EntryKind::File && !other.contains_key(&e.relative_path))
}

fn plan_entry(
    path: &str,
    plan: &Plan,
    mode: Mode,
    options: &DeltaOptions,
    renames: &RenameIndex,
) -> Result<EntryOp> {
    let op = match plan {
        Plan::Directory => EntryOp::CreatePath,
        Plan::Delete => EntryOp::DeletePath,
        Plan::Compare { source, target } => {
            let source = util::mmap_file(source)?;
            let target = util::mmap_file(target)?;
            if *source == *target {
                EntryOp::MirrorFile {
                    checksum: checksum::checksum(&target),
                }
            } else {
                EntryOp::ModifyFile {
                    patch: single_file_patch(mode, options, &source, &target),
                }
            }
        }
        Plan::Create { target, size } => {
            let target = util::mmap_file(target)?;
            match renames.origin(*size, &target) {
                Some(origin) => EntryOp::RenameFile {
                    origin: origin.clone(),
                    checksum: checksum::checksum(&target),
                },
                _ => EntryOp::CreateFile {
                    patch: single_file_patch(mode, options, &[], &target),
                },
            }
        }
    };
    trace!("{path}: {:?}", op.tag());
    Ok(op)
}

/// Diff two directory trees into an in-memory multi-file patch.
///
/// Every relative path of either tree gets exactly one entry, in sorted
/// order, so parents precede their children.
pub fn build_patch(
    source_dir: &Path,
    target_dir: &Path,
    mode: Mode,
    manifest: &[u8],
    options: &DeltaOptions,
) -> Result<MultiPatchFile> {
    util::ensure_distinct(source_dir, target_dir)?;

    // Stage 1: walk both trees
    let source = util::walk_directory(source_dir)?;
    let target = util::walk_directory(target_dir)?;

    // Stage 2: one plan per path of the union
    let paths: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
    let plans: Vec<(&String, Plan)> = paths
        .into_iter()
        .map(|path| (path, classify(source.get(path), target.get(path))))
        .collect();

    // Stage 3: rename candidates, then per-entry patches in parallel.
    // Each single-file patch owns its own match index.
    let renames = RenameIndex::build(&source, &target)?;
    let entries = plans
        .par_iter()
        .map(|(path, plan)| -> Result<Entry> {
            let op = plan_entry(path, plan, mode, options, &renames)
                .map_err(|e| PatchError::entry(path, e))?;
            Ok(Entry {
                path: (*path).clone(),
                op,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(MultiPatchFile {
        manifest: manifest.to_vec(),
        entries,
    })
}

/// Create a multi-file patch at `modify_path` transforming `source_dir`
/// into `target_dir`.
pub fn create_patch(
    modify_path: &Path,
    source_dir: &Path,
    target_dir: &Path,
    mode: Mode,
    manifest: &[u8],
) -> Result<MultiSummary> {
    create_patch_with(modify_path, source_dir, target_dir, mode, manifest, &DeltaOptions::default())
}

pub fn create_patch_with(
    modify_path: &Path,
    source_dir: &Path,
    target_dir: &Path,
    mode: Mode,
    manifest: &[u8],
    options: &DeltaOptions,
) -> Result<MultiSummary> {
    let file = build_patch(source_dir, target_dir, mode, manifest, options)?;
    let summary = file.summary();
    let encoded = multi_format::encode(&file);

    std::fs::write(modify_path, &encoded).map_err(|e| PatchError::io(modify_path, e))?;
    debug!(
        "multi-file patch {}: {} entries, {} bytes ({:?} mode)",
        modify_path.display(),
        file.entries.len(),
        encoded.len(),
        mode
    );
    Ok(summary)
}
