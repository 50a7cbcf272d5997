//! Multi-file (BPM) container: one entry per relative path.

use std::collections::HashSet;

use crate::checksum;
use crate::error::{ChecksumKind, PatchError, Result};
use crate::patch_format::{MultiSummary, BPM_MAGIC};
use crate::varint::{self, ByteReader};

/// Low three bits of an entry word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    CreatePath = 0,
    CreateFile = 1,
    ModifyFile = 2,
    MirrorFile = 3,
    DeletePath = 4,
    RenameFile = 5,
}

impl EntryTag {
    fn from_bits(bits: u64) -> Result<Self> {
        Ok(match bits & 7 {
            0 => EntryTag::CreatePath,
            1 => EntryTag::CreateFile,
            2 => EntryTag::ModifyFile,
            3 => EntryTag::MirrorFile,
            4 => EntryTag::DeletePath,
            5 => EntryTag::RenameFile,
            other => return Err(PatchError::Malformed(format!("unknown entry tag {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOp {
    /// Directory present in the target tree.
    CreatePath,
    /// File only in the target; single-file patch against an empty source.
    CreateFile { patch: Vec<u8> },
    /// File in both trees with differing content.
    ModifyFile { patch: Vec<u8> },
    /// File in both trees with identical content.
    MirrorFile { checksum: u32 },
    /// Path only in the source; produces nothing.
    DeletePath,
    /// File only in the target, identical to `origin` in the source.
    RenameFile { origin: String, checksum: u32 },
}

impl EntryOp {
    pub fn tag(&self) -> EntryTag {
        match self {
            EntryOp::CreatePath => EntryTag::CreatePath,
            EntryOp::CreateFile { .. } => EntryTag::CreateFile,
            EntryOp::ModifyFile { .. } => EntryTag::ModifyFile,
            EntryOp::MirrorFile { .. } => EntryTag::MirrorFile,
            EntryOp::DeletePath => EntryTag::DeletePath,
            EntryOp::RenameFile { .. } => EntryTag::RenameFile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub op: EntryOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiPatchFile {
    pub manifest: Vec<u8>,
    pub entries: Vec<Entry>,
}

impl MultiPatchFile {
    /// Count entries per tag.
    pub fn summary(&self) -> MultiSummary {
        let mut summary = MultiSummary::default();
        for entry in &self.entries {
            match entry.op {
                EntryOp::CreatePath => summary.paths_created += 1,
                EntryOp::CreateFile { .. } => summary.files_created += 1,
                EntryOp::ModifyFile { .. } => summary.files_modified += 1,
                EntryOp::MirrorFile { .. } => summary.files_mirrored += 1,
                EntryOp::DeletePath => summary.paths_deleted += 1,
                EntryOp::RenameFile { .. } => summary.files_renamed += 1,
            }
        }
        summary
    }
}

fn write_path(out: &mut Vec<u8>, path: &str, low_bits: u64, shift: u32) {
    debug_assert!(!path.is_empty());
    varint::write(out, ((path.len() as u64 - 1) << shift) | low_bits);
    out.extend_from_slice(path.as_bytes());
}

fn read_path(reader: &mut ByteReader<'_>, len: usize) -> Result<String> {
    let bytes = reader.read_bytes(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PatchError::Malformed("entry path is not UTF-8".to_string()))
}

pub fn encode(file: &MultiPatchFile) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(BPM_MAGIC);
    varint::write(&mut out, file.manifest.len() as u64);
    out.extend_from_slice(&file.manifest);
    varint::write(&mut out, file.entries.len() as u64);

    for entry in &file.entries {
        write_path(&mut out, &entry.path, entry.op.tag() as u64, 3);
        match &entry.op {
            EntryOp::CreatePath | EntryOp::DeletePath => {}
            EntryOp::CreateFile { patch } | EntryOp::ModifyFile { patch } => {
                varint::write(&mut out, patch.len() as u64);
                out.extend_from_slice(patch);
            }
            EntryOp::MirrorFile { checksum } => {
                out.extend_from_slice(&checksum.to_le_bytes());
            }
            EntryOp::RenameFile { origin, checksum } => {
                write_path(&mut out, origin, 0, 0);
                out.extend_from_slice(&checksum.to_le_bytes());
            }
        }
    }

    checksum::seal(&mut out);
    out
}

/// Parse and verify a multi-file patch. Entry paths are unique.
pub fn decode(data: &[u8]) -> Result<MultiPatchFile> {
    if !data.starts_with(BPM_MAGIC) {
        return Err(PatchError::BadMagic);
    }
    let body = checksum::verify_sealed(data).ok_or(PatchError::checksum(ChecksumKind::Body))?;

    let mut reader = ByteReader::new(body);
    reader.read_bytes(BPM_MAGIC.len())?;
    let manifest_len = reader.read_len()?;
    let manifest = reader.read_bytes(manifest_len)?.to_vec();
    let count = reader.read_len()?;

    let mut entries = Vec::with_capacity(count.min(reader.remaining()));
    let mut seen = HashSet::new();
    for _ in 0..count {
        let word = reader.read_varint()?;
        let tag = EntryTag::from_bits(word)?;
        let path_len = usize::try_from((word >> 3) + 1).map_err(|_| PatchError::OutOfBounds)?;
        let path = read_path(&mut reader, path_len)?;

        let op = match tag {
            EntryTag::CreatePath => EntryOp::CreatePath,
            EntryTag::DeletePath => EntryOp::DeletePath,
            EntryTag::CreateFile | EntryTag::ModifyFile => {
                let len = reader.read_len()?;
                let patch = reader.read_bytes(len)?.to_vec();
                if tag == EntryTag::CreateFile {
                    EntryOp::CreateFile { patch }
                } else {
                    EntryOp::ModifyFile { patch }
                }
            }
            EntryTag::MirrorFile => EntryOp::MirrorFile {
                checksum: reader.read_u32_le()?,
            },
            EntryTag::RenameFile => {
                let origin_len = reader
                    .read_varint()?
                    .checked_add(1)
                    .and_then(|len| usize::try_from(len).ok())
                    .ok_or(PatchError::OutOfBounds)?;
                let origin = read_path(&mut reader, origin_len)?;
                EntryOp::RenameFile {
                    origin,
                    checksum: reader.read_u32_le()?,
                }
            }
        };

        if !seen.insert(path.clone()) {
            return Err(PatchError::Malformed(format!("duplicate entry {path}")));
        }
        entries.push(Entry { path, op });
    }

    if reader.remaining() != 0 {
        return Err(PatchError::Malformed(format!(
            "{} unexpected bytes after the last entry",
            reader.remaining()
        )));
    }

    Ok(MultiPatchFile { manifest, entries })
}
