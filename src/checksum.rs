//! CRC-32 (IEEE) integrity checks for sources, targets and container bodies.

/// Standard CRC-32 over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Append the little-endian CRC-32 of everything already in `out`.
pub fn seal(out: &mut Vec<u8>) {
    let crc = checksum(out);
    out.extend_from_slice(&crc.to_le_bytes());
}

/// Check a buffer produced by [`seal`]: the last four bytes must be the
/// CRC-32 of everything before them. Returns the sealed body on success.
pub fn verify_sealed(data: &[u8]) -> Option<&[u8]> {
    let split = data.len().checked_sub(4)?;
    let (body, trailer) = data.split_at(split);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    (checksum(body) == stored).then_some(body)
}
