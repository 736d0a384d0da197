// src/workload.rs
//
// Shared workload: the list of content identifiers every worker operates on.
// Derived from the record count alone so all workers agree without talking.

use crate::cid::ContentId;

/// Seed string hashed to produce the identifier at `index`
pub fn seed_for(index: usize) -> String {
    format!("CID {}", index)
}

/// Identifier at `index` of the shared workload
pub fn cid_at(index: usize) -> ContentId {
    ContentId::from_data(seed_for(index).as_bytes())
}

/// Produce the ordered identifiers `0..record_count`
pub fn generate_cids(record_count: usize) -> Vec<ContentId> {
    (0..record_count).map(cid_at).collect()
}
