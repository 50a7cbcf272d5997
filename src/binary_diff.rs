use log::debug;
use std::path::Path;

use crate::binary_patch;
use crate::error::Result;
use crate::patch_format::{Action, AppliedPatch, Instruction};
use crate::patch_writer::PatchWriter;
use crate::util;
use crate::varint;

/// Bytes hashed per index key.
pub const WINDOW: usize = 4;

/// Tuning for delta creation. Output only needs to round-trip; these trade
/// creation time against patch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaOptions {
    /// Matches shorter than this are emitted as literals instead. Longer ones
    /// still fall back to literals when their encoding is not smaller.
    pub min_match: usize,
    /// Index candidates examined per lookup, most recent first.
    pub max_candidates: usize,
    /// A sequential match at least this long is taken without an index lookup.
    pub good_match: usize,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            min_match: 4,
            max_candidates: 64,
            good_match: 256,
        }
    }
}

/// Chained hash index over 4-byte windows. Lives for one create call.
///
/// `head[bucket]` holds the most recent position + 1 for that bucket (0 is
/// empty); `prev[pos]` links each position to the previous one in its bucket.
/// Positions past `u32::MAX - 1` are not indexed.
struct MatchIndex {
    head: Vec<u32>,
    prev: Vec<u32>,
    shift: u32,
}

/// Bucket count bounds, as powers of two.
const MIN_BUCKET_BITS: u32 = 8;
const MAX_BUCKET_BITS: u32 = 24;

impl MatchIndex {
    /// Empty index with room for `positions` entries.
    fn with_capacity(positions: usize) -> Self {
        let bits = positions
            .next_power_of_two()
            .trailing_zeros()
            .clamp(MIN_BUCKET_BITS, MAX_BUCKET_BITS);
        let slots = positions.min(u32::MAX as usize - 1);
        Self {
            head: vec![0; 1 << bits],
            prev: vec![0; slots],
            shift: 32 - bits,
        }
    }

    fn build(data: &[u8]) -> Self {
        let mut index = Self::with_capacity(data.len());
        for pos in 0..data.len().saturating_sub(WINDOW - 1) {
            if let Some(key) = window_key(data, pos) {
                index.insert(key, pos);
            }
        }
        index
    }

    fn bucket(&self, key: u32) -> usize {
        (key.wrapping_mul(0x9E37_79B1) >> self.shift) as usize
    }

    fn insert(&mut self, key: u32, pos: usize) {
        if pos >= self.prev.len() {
            return;
        }
        let bucket = self.bucket(key);
        self.prev[pos] = self.head[bucket];
        self.head[bucket] = pos as u32 + 1;
    }

    /// Positions sharing `key`'s bucket, most recent first. Bucket
    /// collisions are possible; callers measure the actual match.
    fn candidates(&self, key: u32, limit: usize) -> impl Iterator<Item = usize> + '_ {
        let first = stored_position(self.head[self.bucket(key)]);
        std::iter::successors(first, move |&pos| stored_position(self.prev[pos])).take(limit)
    }
}

fn stored_position(slot: u32) -> Option<usize> {
    slot.checked_sub(1).map(|pos| pos as usize)
}

fn window_key(data: &[u8], pos: usize) -> Option<u32> {
    let w = data.get(pos..pos + WINDOW)?;
    Some(u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Match {
    action: Action,
    length: usize,
    offset: usize,
    /// Tie-break between equal lengths: lower is cheaper to encode.
    cost: u64,
}

fn consider(candidate: Match, best: &mut Option<Match>) {
    let better = match best {
        None => candidate.length > 0,
        Some(current) => {
            candidate.length > current.length
                || (candidate.length == current.length && candidate.cost < current.cost)
        }
    };
    if better {
        *best = Some(candidate);
    }
}

struct DeltaEncoder<'a> {
    source: &'a [u8],
    target: &'a [u8],
    options: &'a DeltaOptions,
    source_index: MatchIndex,
    target_index: MatchIndex,
    /// Target positions below this are in `target_index`.
    indexed: usize,
    source_cursor: i64,
    target_cursor: i64,
}

impl<'a> DeltaEncoder<'a> {
    fn new(source: &'a [u8], target: &'a [u8], options: &'a DeltaOptions) -> Self {
        Self {
            source,
            target,
            options,
            source_index: MatchIndex::build(source),
            target_index: MatchIndex::with_capacity(target.len()),
            indexed: 0,
            source_cursor: 0,
            target_cursor: 0,
        }
    }

    fn index_target_until(&mut self, pos: usize) {
        while self.indexed < pos {
            if let Some(key) = window_key(self.target, self.indexed) {
                self.target_index.insert(key, self.indexed);
            }
            self.indexed += 1;
        }
    }

    fn best_match(&mut self, pos: usize) -> Option<Match> {
        self.index_target_until(pos);
        let target = self.target;
        let rest = &target[pos..];
        let mut best: Option<Match> = None;

        // Same offset in the source: nothing to encode but the length.
        if let Some(aligned) = self.source.get(pos..) {
            let length = common_prefix(aligned, rest);
            consider(
                Match {
                    action: Action::SourceRead,
                    length,
                    offset: pos,
                    cost: 0,
                },
                &mut best,
            );
        }

        // Continue the previous source copy where it stopped.
        if let Ok(cursor) = usize::try_from(self.source_cursor) {
            if cursor != pos && cursor < self.source.len() {
                let length = common_prefix(&self.source[cursor..], rest);
                consider(
                    Match {
                        action: Action::SourceCopy,
                        length,
                        offset: cursor,
                        cost: 1,
                    },
                    &mut best,
                );
            }
        }

        let sequential = best.map_or(0, |m| m.length);
        if sequential >= self.options.good_match || sequential == rest.len() {
            return best;
        }

        let Some(key) = window_key(target, pos) else {
            return best;
        };

        for offset in self.source_index.candidates(key, self.options.max_candidates) {
            let length = common_prefix(&self.source[offset..], rest);
            consider(
                Match {
                    action: Action::SourceCopy,
                    length,
                    offset,
                    cost: 1 + (offset as i64 - self.source_cursor).unsigned_abs(),
                },
                &mut best,
            );
        }

        for offset in self.target_index.candidates(key, self.options.max_candidates) {
            let length = common_prefix(&target[offset..], rest);
            consider(
                Match {
                    action: Action::TargetCopy,
                    length,
                    offset,
                    cost: 1 + (offset as i64 - self.target_cursor).unsigned_abs(),
                },
                &mut best,
            );
        }

        best
    }

    /// Bytes the match would take in the patch body, given the current cursors.
    fn encoded_len(&self, m: &Match) -> usize {
        let word = varint::encoded_len(((m.length as u64 - 1) << 2) | m.action as u64);
        let offset = match m.action {
            Action::SourceCopy => varint::signed_len(m.offset as i64 - self.source_cursor),
            Action::TargetCopy => varint::signed_len(m.offset as i64 - self.target_cursor),
            Action::SourceRead | Action::TargetRead => 0,
        };
        word + offset
    }

    /// Turn a chosen match into an instruction and move the matching cursor.
    fn instruction(&mut self, m: Match) -> Instruction {
        let end = (m.offset + m.length) as i64;
        match m.action {
            Action::SourceRead => Instruction::SourceRead { length: m.length },
            Action::SourceCopy => {
                let relative_offset = m.offset as i64 - self.source_cursor;
                self.source_cursor = end;
                Instruction::SourceCopy {
                    length: m.length,
                    relative_offset,
                }
            }
            Action::TargetCopy => {
                let relative_offset = m.offset as i64 - self.target_cursor;
                self.target_cursor = end;
                Instruction::TargetCopy {
                    length: m.length,
                    relative_offset,
                }
            }
            Action::TargetRead => Instruction::TargetRead { length: m.length },
        }
    }
}

/// Compute a delta patch from `source` to `target` with default tuning.
///
/// Greedy, one target position at a time:
/// 1. Prefer the aligned source bytes or the continuation of the last copy
/// 2. Otherwise look up the 4-byte window in the source and target indexes
/// 3. Take the longest run; ties go to the smallest cursor movement
/// 4. Runs below `min_match`, or whose instruction would outweigh the bytes
///    it covers, become literals, merged into one `TargetRead`
pub fn create(source: &[u8], target: &[u8], manifest: &[u8]) -> Vec<u8> {
    create_with(source, target, manifest, &DeltaOptions::default())
}

pub fn create_with(source: &[u8], target: &[u8], manifest: &[u8], options: &DeltaOptions) -> Vec<u8> {
    let mut writer = PatchWriter::new(source, target, manifest);
    let mut encoder = DeltaEncoder::new(source, target, options);
    let min_match = options.min_match.max(1);
    let mut counts = [0usize; 4];

    while writer.remaining() > 0 {
        let pos = writer.output_offset();
        let instruction = match encoder.best_match(pos) {
            // A match must also encode smaller than the literal bytes it replaces.
            Some(m) if m.length >= min_match && encoder.encoded_len(&m) < m.length => {
                encoder.instruction(m)
            }
            _ => Instruction::TargetRead { length: 1 },
        };
        counts[instruction.action() as usize] += 1;
        writer.push(instruction);
    }

    let patch = writer.finish();
    debug!(
        "delta patch: source {} bytes, target {} bytes, patch {} bytes \
         (source-read {}, literal {}, source-copy {}, target-copy {})",
        source.len(),
        target.len(),
        patch.len(),
        counts[0],
        counts[1],
        counts[2],
        counts[3]
    );
    patch
}

/// [`create_with`] over two files on disk.
pub fn create_file(
    source_path: &Path,
    target_path: &Path,
    manifest: &[u8],
    options: &DeltaOptions,
) -> Result<Vec<u8>> {
    util::ensure_distinct(source_path, target_path)?;
    let source = util::mmap_file(source_path)?;
    let target = util::mmap_file(target_path)?;
    Ok(create_with(&source, &target, manifest, options))
}

pub fn apply(patch: &[u8], source: &[u8]) -> Result<AppliedPatch> {
    binary_patch::apply(patch, source)
}
