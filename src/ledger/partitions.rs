/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{entry_id} -> LedgerEntry (JSON)
/// - `children`: child:{parent_id}:{entry_id} -> entry_id (string)

/// Encode a job key: job:{entry_id}
pub fn encode_job_key(entry_id: &str) -> Vec<u8> {
    format!("job:{}", entry_id).into_bytes()
}

/// Encode a child index key: child:{parent_id}:{entry_id}
pub fn encode_child_key(parent_id: &str, entry_id: &str) -> Vec<u8> {
    format!("child:{}:{}", parent_id, entry_id).into_bytes()
}

/// Encode a child prefix for range scan: child:{parent_id}:
pub fn encode_child_prefix(parent_id: &str) -> Vec<u8> {
    format!("child:{}:", parent_id).into_bytes()
}
