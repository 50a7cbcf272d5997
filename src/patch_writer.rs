use log::trace;

use crate::checksum;
use crate::patch_format::{Action, Instruction, BPS_MAGIC};
use crate::varint;

/// Serializes a single-file patch: header, instruction stream, trailer.
///
/// The writer tracks how much of `target` has been described so far.
/// Consecutive literal runs are merged into one `TargetRead`, whose bytes are
/// taken from `target` at the current output offset.
pub struct PatchWriter<'a> {
    source: &'a [u8],
    target: &'a [u8],
    out: Vec<u8>,
    output_offset: usize,
    pending_literal: usize,
    instructions: usize,
}

impl<'a> PatchWriter<'a> {
    pub fn new(source: &'a [u8], target: &'a [u8], manifest: &[u8]) -> Self {
        let mut out = Vec::with_capacity(16 + manifest.len());
        out.extend_from_slice(BPS_MAGIC);
        varint::write(&mut out, source.len() as u64);
        varint::write(&mut out, target.len() as u64);
        varint::write(&mut out, manifest.len() as u64);
        out.extend_from_slice(manifest);
        Self {
            source,
            target,
            out,
            output_offset: 0,
            pending_literal: 0,
            instructions: 0,
        }
    }

    /// Bytes of the target already covered, including pending literals.
    pub fn output_offset(&self) -> usize {
        self.output_offset
    }

    pub fn remaining(&self) -> usize {
        self.target.len() - self.output_offset
    }

    /// Record `instruction` at the current output offset.
    pub fn push(&mut self, instruction: Instruction) {
        let length = instruction.length();
        if length == 0 {
            return;
        }
        debug_assert!(length <= self.remaining());
        match instruction {
            Instruction::TargetRead { .. } => {
                self.pending_literal += length;
            }
            Instruction::SourceRead { .. } => {
                self.flush_literals();
                self.word(Action::SourceRead, length);
            }
            Instruction::SourceCopy {
                relative_offset, ..
            }
            | Instruction::TargetCopy {
                relative_offset, ..
            } => {
                self.flush_literals();
                self.word(instruction.action(), length);
                varint::write_signed(&mut self.out, relative_offset);
            }
        }
        self.output_offset += length;
    }

    fn word(&mut self, action: Action, length: usize) {
        varint::write(&mut self.out, ((length as u64 - 1) << 2) | action as u64);
        self.instructions += 1;
    }

    fn flush_literals(&mut self) {
        if self.pending_literal == 0 {
            return;
        }
        let end = self.output_offset;
        let start = end - self.pending_literal;
        self.word(Action::TargetRead, self.pending_literal);
        self.out.extend_from_slice(&self.target[start..end]);
        self.pending_literal = 0;
    }

    /// Flush pending literals and append the three checksums.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush_literals();
        debug_assert_eq!(self.output_offset, self.target.len());
        let source_crc = checksum::checksum(self.source);
        let target_crc = checksum::checksum(self.target);
        self.out.extend_from_slice(&source_crc.to_le_bytes());
        self.out.extend_from_slice(&target_crc.to_le_bytes());
        checksum::seal(&mut self.out);
        trace!(
            "patch written: {} instructions, {} bytes",
            self.instructions,
            self.out.len()
        );
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_are_merged() {
        let target = b"abcdef";
        let mut writer = PatchWriter::new(b"", target, b"");
        writer.push(Instruction::TargetRead { length: 2 });
        writer.push(Instruction::TargetRead { length: 4 });
        let patch = writer.finish();

        // magic, three one-byte lengths, one word, six literals, trailer
        assert_eq!(patch.len(), 4 + 3 + 1 + 6 + 12);
        assert_eq!(patch[7], 0x80 | (5 << 2) | Action::TargetRead as u8);
        assert_eq!(&patch[8..14], target);
    }

    #[test]
    fn test_header_carries_manifest() {
        let mut writer = PatchWriter::new(b"src", b"", b"<xml/>");
        writer.push(Instruction::SourceRead { length: 0 });
        let patch = writer.finish();
        assert_eq!(&patch[..4], BPS_MAGIC);
        assert_eq!(patch[4], 0x80 | 3);
        assert_eq!(patch[5], 0x80);
        assert_eq!(patch[6], 0x80 | 6);
        assert_eq!(&patch[7..13], b"<xml/>");
        assert_eq!(patch.len(), 13 + 12);
    }
}
