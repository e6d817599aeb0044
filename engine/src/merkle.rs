//! Merkle fingerprints over collections of record checksums.
//!
//! A collection fingerprint is the root of a binary hash tree built over
//! the per-record checksums, sorted by primary key. Any single-record
//! change, addition, or removal changes the root, while physical storage
//! order never does.

use crate::{checksum::record_checksum, error::Result, Record};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// The fingerprint of an empty collection: the hash of the empty byte
/// string. A fixed sentinel, not an error.
pub fn empty_root() -> String {
    sha256_hex(b"")
}

/// Compute the Merkle root of an ordered list of checksums.
///
/// Adjacent digests are concatenated (as hex text) and hashed to form the
/// next level; an odd element at any level is paired with itself. A single
/// input is combined with itself once; empty input yields [`empty_root`].
///
/// Sorting the checksum list by record key is the caller's contract;
/// [`collection_fingerprint`] does it for whole collections. Two calls with
/// different input orders produce different roots by design.
pub fn merkle_root(checksums: &[String]) -> String {
    if checksums.is_empty() {
        return empty_root();
    }

    if checksums.len() == 1 {
        let combined = format!("{}{}", checksums[0], checksums[0]);
        return sha256_hex(combined.as_bytes());
    }

    let mut level: Vec<String> = checksums.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            let combined = format!("{}{}", pair[0], right);
            next.push(sha256_hex(combined.as_bytes()));
        }
        level = next;
    }

    level.swap_remove(0)
}

/// Compute the fingerprint of a whole collection.
///
/// Records are sorted by primary key (absent keys sort as the empty
/// string), checksummed with `exclude` dropped, and rolled up into a
/// Merkle root.
pub fn collection_fingerprint(records: &[Record], exclude: &BTreeSet<String>) -> Result<String> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| a.key().cmp(b.key()));

    let mut checksums = Vec::with_capacity(sorted.len());
    for record in sorted {
        checksums.push(record_checksum(record, exclude)?);
    }

    Ok(merkle_root(&checksums))
}
