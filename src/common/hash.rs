//! Hashing utilities for tablekeeper
//!
//! - BLAKE3 for stable region names
//! - HRW (Highest Random Weight) for deterministic server selection

use crate::common::types::ServerName;

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

fn weight(key: &str, server: &ServerName) -> u64 {
    let combined = format!("{}{}", key, server);
    let hash = blake3::hash(combined.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

/// HRW (Highest Random Weight) hashing
///
/// Given a key and a set of servers, returns servers sorted by their weight
/// (deterministic based on key). Placement stays stable for most keys
/// as servers join or leave.
pub fn hrw_hash<'a>(key: &str, servers: &'a [ServerName]) -> Vec<&'a ServerName> {
    let mut weights: Vec<(&ServerName, u64)> =
        servers.iter().map(|s| (s, weight(key, s))).collect();

    // Sort by weight (descending), ties broken by name
    weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    weights.into_iter().map(|(server, _)| server).collect()
}

/// Pick the single highest-weight server for a key
pub fn hrw_select<'a>(key: &str, servers: &'a [ServerName]) -> Option<&'a ServerName> {
    servers
        .iter()
        .max_by(|a, b| weight(key, a).cmp(&weight(key, b)).then_with(|| b.cmp(a)))
}
