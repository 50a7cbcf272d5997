//! Container markers and the shared instruction vocabulary.

/// Single-file patch.
pub const BPS_MAGIC: &[u8; 4] = b"BPS1";
/// Multi-file (directory tree) patch.
pub const BPM_MAGIC: &[u8; 4] = b"BPM1";
/// Packed archive.
pub const BPA_MAGIC: &[u8; 4] = b"BPA1";

/// Source, target and body checksums.
pub const BPS_TRAILER_LEN: usize = 12;

/// Low two bits of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SourceRead = 0,
    TargetRead = 1,
    SourceCopy = 2,
    TargetCopy = 3,
}

impl Action {
    pub fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            0 => Action::SourceRead,
            1 => Action::TargetRead,
            2 => Action::SourceCopy,
            _ => Action::TargetCopy,
        }
    }
}

/// One decoded or to-be-encoded instruction.
///
/// `TargetRead` carries only its length; the literal bytes follow the
/// instruction word in the patch body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    SourceRead { length: usize },
    TargetRead { length: usize },
    SourceCopy { length: usize, relative_offset: i64 },
    TargetCopy { length: usize, relative_offset: i64 },
}

impl Instruction {
    pub fn action(&self) -> Action {
        match self {
            Instruction::SourceRead { .. } => Action::SourceRead,
            Instruction::TargetRead { .. } => Action::TargetRead,
            Instruction::SourceCopy { .. } => Action::SourceCopy,
            Instruction::TargetCopy { .. } => Action::TargetCopy,
        }
    }

    pub fn length(&self) -> usize {
        match *self {
            Instruction::SourceRead { length }
            | Instruction::TargetRead { length }
            | Instruction::SourceCopy { length, .. }
            | Instruction::TargetCopy { length, .. } => length,
        }
    }
}

/// How a single-file patch is produced. Chosen once by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Store the target verbatim.
    #[default]
    Linear,
    /// Reference matching runs in the source and in the target built so far.
    Delta,
}

/// Header and trailer of a single-file patch, read without applying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub source_size: usize,
    pub target_size: usize,
    pub manifest: Vec<u8>,
    pub source_checksum: u32,
    pub target_checksum: u32,
    pub body_checksum: u32,
}

/// Result of a successful single-file application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub target: Vec<u8>,
    pub manifest: Vec<u8>,
}

/// Per-tag counts for a multi-file create or apply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MultiSummary {
    pub paths_created: usize,
    pub files_created: usize,
    pub files_modified: usize,
    pub files_mirrored: usize,
    pub files_renamed: usize,
    pub paths_deleted: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub dirs: usize,
    pub files: usize,
    pub bytes: u64,
}
