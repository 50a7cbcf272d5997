use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which of the three trailer checksums failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Source,
    Target,
    Body,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumKind::Source => "source",
            ChecksumKind::Target => "target",
            ChecksumKind::Body => "patch body",
        };
        f.write_str(name)
    }
}

/// Every failure the engine can report. None of these abort the process.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("not a recognized patch file (bad magic marker)")]
    BadMagic,

    #[error("{which} checksum mismatch")]
    ChecksumMismatch { which: ChecksumKind },

    #[error("instruction reads outside of its source or target bounds")]
    OutOfBounds,

    #[error("malformed variable-length integer")]
    MalformedVarint,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed patch data: {0}")]
    Malformed(String),

    #[error("refusing unsafe relative path: {0:?}")]
    UnsafePath(String),

    #[error("source and target resolve to the same location: {}", .0.display())]
    SamePath(PathBuf),

    #[error("entry {path} failed: {source}")]
    Entry {
        path: String,
        #[source]
        source: Box<PatchError>,
    },
}

impl PatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn checksum(which: ChecksumKind) -> Self {
        PatchError::ChecksumMismatch { which }
    }

    /// Wrap a per-entry failure of a multi-file operation.
    pub fn entry(path: &str, source: PatchError) -> Self {
        PatchError::Entry {
            path: path.to_string(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `Entry` wrappers.
    pub fn root_cause(&self) -> &PatchError {
        match self {
            PatchError::Entry { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PatchError>;
