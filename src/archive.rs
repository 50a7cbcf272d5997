//! Packed archives (BPA): a snapshot of a directory tree, no diffing.

use log::debug;
use std::path::Path;

use crate::checksum;
use crate::error::{ChecksumKind, PatchError, Result};
use crate::patch_format::{ArchiveSummary, BPA_MAGIC};
use crate::util::{self, EntryKind};
use crate::varint::{self, ByteReader};

/// Outcome of an unpacked archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
    pub summary: ArchiveSummary,
    pub manifest: Vec<u8>,
}

/// Serialize every directory and file under `source_dir`.
pub fn pack(source_dir: &Path, manifest: &[u8]) -> Result<(Vec<u8>, ArchiveSummary)> {
    let entries = util::walk_directory(source_dir)?;
    let mut summary = ArchiveSummary::default();

    let mut out = Vec::new();
    out.extend_from_slice(BPA_MAGIC);
    varint::write(&mut out, manifest.len() as u64);
    out.extend_from_slice(manifest);

    for (path, entry) in &entries {
        let is_dir = entry.kind == EntryKind::Dir;
        varint::write(&mut out, ((path.len() as u64 - 1) << 1) | u64::from(is_dir));
        out.extend_from_slice(path.as_bytes());
        if is_dir {
            summary.dirs += 1;
            continue;
        }
        let data = util::mmap_file(&entry.full_path).map_err(|e| PatchError::entry(path, e))?;
        varint::write(&mut out, data.len() as u64);
        out.extend_from_slice(&data);
        out.extend_from_slice(&checksum::checksum(&data).to_le_bytes());
        summary.files += 1;
        summary.bytes += data.len() as u64;
    }

    checksum::seal(&mut out);
    Ok((out, summary))
}

/// Pack `source_dir` into the archive file at `archive_path`.
pub fn create(archive_path: &Path, source_dir: &Path, manifest: &[u8]) -> Result<ArchiveSummary> {
    let (data, summary) = pack(source_dir, manifest)?;
    std::fs::write(archive_path, &data).map_err(|e| PatchError::io(archive_path, e))?;
    debug!(
        "packed {} dirs, {} files from {} into {} ({} bytes)",
        summary.dirs,
        summary.files,
        source_dir.display(),
        archive_path.display(),
        data.len()
    );
    Ok(summary)
}

/// One decoded archive entry; `contents` is `None` for a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    pub path: String,
    pub contents: Option<&'a [u8]>,
}

/// A verified archive, borrowing file contents from the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive<'a> {
    pub manifest: &'a [u8],
    pub entries: Vec<ArchiveEntry<'a>>,
}

impl Archive<'_> {
    pub fn summary(&self) -> ArchiveSummary {
        let mut summary = ArchiveSummary::default();
        for entry in &self.entries {
            match entry.contents {
                Some(contents) => {
                    summary.files += 1;
                    summary.bytes += contents.len() as u64;
                }
                None => summary.dirs += 1,
            }
        }
        summary
    }
}

/// Parse an archive and check every checksum without touching the disk.
pub fn decode(data: &[u8]) -> Result<Archive<'_>> {
    if !data.starts_with(BPA_MAGIC) {
        return Err(PatchError::BadMagic);
    }
    let body = checksum::verify_sealed(data).ok_or(PatchError::checksum(ChecksumKind::Body))?;

    let mut reader = ByteReader::new(body);
    reader.read_bytes(BPA_MAGIC.len())?;
    let manifest_len = reader.read_len()?;
    let manifest = reader.read_bytes(manifest_len)?;

    let mut entries = Vec::new();
    while reader.remaining() > 0 {
        let word = reader.read_varint()?;
        let path_len = usize::try_from((word >> 1) + 1).map_err(|_| PatchError::OutOfBounds)?;
        let path = String::from_utf8(reader.read_bytes(path_len)?.to_vec())
            .map_err(|_| PatchError::Malformed("archive path is not UTF-8".to_string()))?;

        if word & 1 != 0 {
            entries.push(ArchiveEntry { path, contents: None });
            continue;
        }

        let len = reader.read_len()?;
        let contents = reader.read_bytes(len)?;
        if checksum::checksum(contents) != reader.read_u32_le()? {
            return Err(PatchError::entry(
                &path,
                PatchError::checksum(ChecksumKind::Target),
            ));
        }
        entries.push(ArchiveEntry {
            path,
            contents: Some(contents),
        });
    }

    Ok(Archive { manifest, entries })
}

/// Recreate the packed tree under `target_dir`. The whole archive is
/// verified before anything is written.
pub fn unpack_bytes(data: &[u8], target_dir: &Path) -> Result<Unpacked> {
    let archive = decode(data)?;
    let outputs = archive
        .entries
        .iter()
        .map(|entry| util::safe_join(target_dir, &entry.path))
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(target_dir).map_err(|e| PatchError::io(target_dir, e))?;
    for (entry, output) in archive.entries.iter().zip(&outputs) {
        match entry.contents {
            None => std::fs::create_dir_all(output).map_err(|e| PatchError::io(output, e))?,
            Some(contents) => {
                util::write_file(output, contents).map_err(|e| PatchError::entry(&entry.path, e))?
            }
        }
    }

    Ok(Unpacked {
        summary: archive.summary(),
        manifest: archive.manifest.to_vec(),
    })
}

/// Unpack the archive file at `archive_path` into `target_dir`.
pub fn unpack(archive_path: &Path, target_dir: &Path) -> Result<Unpacked> {
    let raw = util::mmap_file(archive_path)?;
    let unpacked = unpack_bytes(&raw, target_dir)?;
    debug!(
        "unpacked {} dirs, {} files into {}",
        unpacked.summary.dirs,
        unpacked.summary.files,
        target_dir.display()
    );
    Ok(unpacked)
}
