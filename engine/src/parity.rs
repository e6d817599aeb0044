//! XOR parity blocks for corruption localization and single-block recovery.
//!
//! A parity block is the byte-wise XOR of a disjoint set of data blocks.
//! Comparing group-level parity between two replicas localizes divergence
//! to a group without transferring the data itself, and a single missing or
//! corrupted block can be reconstructed from the remaining blocks plus the
//! parity.

/// Compute the XOR parity of a set of blocks.
///
/// Shorter blocks are right-padded with zero bytes to the longest block
/// length. An empty input yields an empty parity.
pub fn compute_parity<B: AsRef<[u8]>>(blocks: &[B]) -> Vec<u8> {
    let max_len = blocks.iter().map(|b| b.as_ref().len()).max().unwrap_or(0);

    let mut parity = vec![0u8; max_len];
    for block in blocks {
        for (i, byte) in block.as_ref().iter().enumerate() {
            parity[i] ^= byte;
        }
    }
    parity
}

/// Verify a set of blocks against a stored parity block.
pub fn verify_parity<B: AsRef<[u8]>>(blocks: &[B], parity: &[u8]) -> bool {
    compute_parity(blocks) == parity
}

/// Reconstruct a single missing block from the remaining blocks and the
/// parity of the full set.
///
/// The result has the parity's length; if the dropped block was shorter
/// than the longest block in the original set, the reconstruction carries
/// its zero padding.
pub fn recover_block<B: AsRef<[u8]>>(remaining: &[B], parity: &[u8]) -> Vec<u8> {
    let partial = compute_parity(remaining);
    compute_parity(&[partial.as_slice(), parity])
}

/// Group a sorted list of record checksums into fixed-size byte blocks.
///
/// Each block is the concatenation of `group_size` hex digests. Comparing
/// per-group parity between source and replica identifies which group
/// diverged. A `group_size` of zero yields a single block.
pub fn checksum_blocks(checksums: &[String], group_size: usize) -> Vec<Vec<u8>> {
    if checksums.is_empty() {
        return Vec::new();
    }
    let size = if group_size == 0 {
        checksums.len()
    } else {
        group_size
    };

    checksums
        .chunks(size)
        .map(|group| {
            let mut block = Vec::new();
            for checksum in group {
                block.extend_from_slice(checksum.as_bytes());
            }
            block
        })
        .collect()
}
