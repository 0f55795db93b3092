use sha2::Digest;
use sha2::Sha256;

use crate::VoucherId;

/// One row of the `IdempotencyKey` table (spec §3): the voucher a key
/// resolved to the first time it was used, plus a content hash of the
/// inputs that produced it so a same-key-different-inputs replay can be
/// told apart from a legitimate retry (spec §7 `IdempotencyConflict`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub voucher_id: VoucherId,
    pub input_hash: String,
}

/// Hashes everything that determines the outcome of a post so a replay with
/// the same key but a different target or metadata is detectable.
#[must_use]
pub fn hash_inputs(company_id: &str, target_id: &str, metadata: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(company_id.as_bytes());
    hasher.update(target_id.as_bytes());
    hasher.update(metadata.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
