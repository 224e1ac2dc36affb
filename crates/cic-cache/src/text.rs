//! SQL text normalization for staleness comparison
//!
//! A cached result is fresh iff the SQL that produced it still matches the
//! SQL the compiler would generate now, compared after collapsing whitespace
//! runs to a single space, trimming, and lower-casing. Cosmetic generator
//! changes therefore invalidate caches; the fingerprint exists so that logs
//! can show *that* two texts drifted without dumping either.

use sha2::{Digest, Sha256};

/// Collapse whitespace runs to single spaces, trim, lower-case.
pub fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the normalized text. Diagnostic only; freshness decisions
/// compare the normalized text itself.
pub fn fingerprint(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(sql).as_bytes());
    format!("{:x}", hasher.finalize())
}
