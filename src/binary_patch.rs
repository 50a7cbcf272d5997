use log::{debug, trace};
use std::path::Path;

use crate::checksum;
use crate::error::{ChecksumKind, PatchError, Result};
use crate::patch_format::{
    Action, AppliedPatch, Instruction, PatchInfo, BPS_MAGIC, BPS_TRAILER_LEN,
};
use crate::util;
use crate::varint::ByteReader;

/// Upper bound on the up-front allocation for the reconstructed target.
/// The declared length is untrusted until the target checksum verifies.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Smallest well-formed patch: magic, three one-byte lengths, trailer.
const MIN_PATCH_LEN: usize = BPS_MAGIC.len() + 3 + BPS_TRAILER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ReadHeader,
    ReadManifest,
    ExecuteInstructions,
    VerifyChecksums,
    Done,
}

#[derive(Debug, Default, Clone, Copy)]
struct Trailer {
    source: u32,
    target: u32,
    body: u32,
}

/// Validated outer frame of a patch: checked magic and body checksum,
/// decoded lengths, and a reader positioned at the manifest length.
struct Envelope<'a> {
    reader: ByteReader<'a>,
    source_size: usize,
    target_size: usize,
    trailer: Trailer,
}

fn open(patch: &[u8]) -> Result<Envelope<'_>> {
    if !patch.starts_with(BPS_MAGIC) {
        return Err(PatchError::BadMagic);
    }
    if patch.len() < MIN_PATCH_LEN || checksum::verify_sealed(patch).is_none() {
        return Err(PatchError::checksum(ChecksumKind::Body));
    }

    let split = patch.len() - BPS_TRAILER_LEN;
    let mut tail = ByteReader::new(&patch[split..]);
    let trailer = Trailer {
        source: tail.read_u32_le()?,
        target: tail.read_u32_le()?,
        body: tail.read_u32_le()?,
    };

    let mut reader = ByteReader::new(&patch[..split]);
    reader.read_bytes(BPS_MAGIC.len())?;
    let source_size = reader.read_len()?;
    let target_size = reader.read_len()?;

    Ok(Envelope {
        reader,
        source_size,
        target_size,
        trailer,
    })
}

/// Read the header, manifest and stored checksums without applying.
pub fn inspect(patch: &[u8]) -> Result<PatchInfo> {
    let mut envelope = open(patch)?;
    let manifest_len = envelope.reader.read_len()?;
    let manifest = envelope.reader.read_bytes(manifest_len)?.to_vec();
    Ok(PatchInfo {
        source_size: envelope.source_size,
        target_size: envelope.target_size,
        manifest,
        source_checksum: envelope.trailer.source,
        target_checksum: envelope.trailer.target,
        body_checksum: envelope.trailer.body,
    })
}

/// Decode the instruction stream without executing it.
pub fn instructions(patch: &[u8]) -> Result<Vec<Instruction>> {
    let mut envelope = open(patch)?;
    let reader = &mut envelope.reader;
    let manifest_len = reader.read_len()?;
    reader.read_bytes(manifest_len)?;

    let mut decoded = Vec::new();
    while reader.remaining() > 0 {
        let word = reader.read_varint()?;
        let length = usize::try_from((word >> 2) + 1).map_err(|_| PatchError::OutOfBounds)?;
        let instruction = match Action::from_bits(word) {
            Action::SourceRead => Instruction::SourceRead { length },
            Action::TargetRead => {
                reader.read_bytes(length)?;
                Instruction::TargetRead { length }
            }
            Action::SourceCopy => Instruction::SourceCopy {
                length,
                relative_offset: reader.read_signed()?,
            },
            Action::TargetCopy => Instruction::TargetCopy {
                length,
                relative_offset: reader.read_signed()?,
            },
        };
        decoded.push(instruction);
    }
    Ok(decoded)
}

/// Per-call interpreter context. The two copy cursors persist across
/// instructions; each relative offset moves them cumulatively.
struct Interpreter<'a> {
    patch: &'a [u8],
    source: &'a [u8],
    reader: ByteReader<'a>,
    trailer: Trailer,
    target_size: usize,
    target: Vec<u8>,
    manifest: &'a [u8],
    source_cursor: i64,
    target_cursor: i64,
}

impl<'a> Interpreter<'a> {
    fn new(patch: &'a [u8], source: &'a [u8]) -> Self {
        Self {
            patch,
            source,
            reader: ByteReader::new(&[]),
            trailer: Trailer::default(),
            target_size: 0,
            target: Vec::new(),
            manifest: &[],
            source_cursor: 0,
            target_cursor: 0,
        }
    }

    /// Validates the frame and the supplied source before any output exists.
    fn read_header(&mut self) -> Result<Stage> {
        let envelope = open(self.patch)?;
        if envelope.source_size != self.source.len()
            || checksum::checksum(self.source) != envelope.trailer.source
        {
            return Err(PatchError::checksum(ChecksumKind::Source));
        }
        self.reader = envelope.reader;
        self.trailer = envelope.trailer;
        self.target_size = envelope.target_size;
        self.target = Vec::with_capacity(envelope.target_size.min(MAX_PREALLOC));
        Ok(Stage::ReadManifest)
    }

    fn read_manifest(&mut self) -> Result<Stage> {
        let len = self.reader.read_len()?;
        self.manifest = self.reader.read_bytes(len)?;
        Ok(Stage::ExecuteInstructions)
    }

    fn execute_instructions(&mut self) -> Result<Stage> {
        while self.target.len() < self.target_size {
            let word = self.reader.read_varint()?;
            let length = usize::try_from((word >> 2) + 1).map_err(|_| PatchError::OutOfBounds)?;
            if length > self.target_size - self.target.len() {
                return Err(PatchError::OutOfBounds);
            }

            match Action::from_bits(word) {
                Action::SourceRead => {
                    let start = self.target.len();
                    let bytes = self
                        .source
                        .get(start..start + length)
                        .ok_or(PatchError::OutOfBounds)?;
                    self.target.extend_from_slice(bytes);
                }
                Action::TargetRead => {
                    let bytes = self.reader.read_bytes(length)?;
                    self.target.extend_from_slice(bytes);
                }
                Action::SourceCopy => {
                    let start = move_cursor(&mut self.source_cursor, self.reader.read_signed()?)?;
                    let bytes = self
                        .source
                        .get(start..)
                        .and_then(|rest| rest.get(..length))
                        .ok_or(PatchError::OutOfBounds)?;
                    self.target.extend_from_slice(bytes);
                    self.source_cursor += length as i64;
                }
                Action::TargetCopy => {
                    let start = move_cursor(&mut self.target_cursor, self.reader.read_signed()?)?;
                    if start >= self.target.len() {
                        return Err(PatchError::OutOfBounds);
                    }
                    // The copy may overlap the bytes it produces; grow in
                    // chunks of whatever is already written.
                    let mut copied = 0;
                    while copied < length {
                        let from = start + copied;
                        let chunk = (self.target.len() - from).min(length - copied);
                        self.target.extend_from_within(from..from + chunk);
                        copied += chunk;
                    }
                    self.target_cursor += length as i64;
                }
            }
        }
        Ok(Stage::VerifyChecksums)
    }

    fn verify_checksums(&mut self) -> Result<Stage> {
        if self.reader.remaining() != 0 {
            return Err(PatchError::Malformed(format!(
                "{} bytes of instructions past the declared target length",
                self.reader.remaining()
            )));
        }
        if checksum::checksum(&self.target) != self.trailer.target {
            return Err(PatchError::checksum(ChecksumKind::Target));
        }
        Ok(Stage::Done)
    }
}

/// Apply a relative offset and return the new cursor as a buffer index.
fn move_cursor(cursor: &mut i64, delta: i64) -> Result<usize> {
    let moved = cursor.checked_add(delta).ok_or(PatchError::OutOfBounds)?;
    let index = usize::try_from(moved).map_err(|_| PatchError::OutOfBounds)?;
    *cursor = moved;
    Ok(index)
}

/// Reconstruct the target described by `patch` from `source`.
///
/// Shared by linear and delta patches; the interpreter only sees opcodes.
pub fn apply(patch: &[u8], source: &[u8]) -> Result<AppliedPatch> {
    let mut machine = Interpreter::new(patch, source);
    let mut stage = Stage::ReadHeader;
    while stage != Stage::Done {
        trace!("interpreter: {stage:?}");
        stage = match stage {
            Stage::ReadHeader => machine.read_header()?,
            Stage::ReadManifest => machine.read_manifest()?,
            Stage::ExecuteInstructions => machine.execute_instructions()?,
            Stage::VerifyChecksums => machine.verify_checksums()?,
            Stage::Done => Stage::Done,
        };
    }
    Ok(AppliedPatch {
        manifest: machine.manifest.to_vec(),
        target: machine.target,
    })
}

/// Apply the patch at `patch_path` to `source_path`, writing `target_path`
/// only once the whole target has been reconstructed and verified.
/// `target_path` must not name the source file.
pub fn apply_file(patch_path: &Path, source_path: &Path, target_path: &Path) -> Result<AppliedPatch> {
    util::ensure_distinct(source_path, target_path)?;
    // Scope both mappings so they are released before the target is written;
    // the target may replace the source in place.
    let applied = {
        let patch = util::mmap_file(patch_path)?;
        let source = util::mmap_file(source_path)?;
        apply(&patch, &source)?
    };
    std::fs::write(target_path, &applied.target).map_err(|e| PatchError::io(target_path, e))?;
    debug!(
        "applied {} to {}: {} bytes written to {}",
        patch_path.display(),
        source_path.display(),
        applied.target.len(),
        target_path.display()
    );
    Ok(applied)
}
