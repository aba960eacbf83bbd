//! Stable hashing, tag fingerprints and provenance hashes
//!
//! Everything here is seed-free: the same input hashes to the same value
//! in every process, which is what lets bucket ids and fingerprints be
//! persisted.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields that change on read and must not affect lineage hashes
const VOLATILE_FIELDS: &[&str] = &[
    "usage_count",
    "access_count",
    "last_accessed_at",
    "last_accessed",
];

/// SHA-256 of `key`, first eight bytes read big-endian as an `i64`
pub fn stable_hash(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Bit position of a single tag inside a 64-bit fingerprint
fn tag_bit(tag: &str) -> u64 {
    1u64 << stable_hash(tag).rem_euclid(64)
}

/// 64-bit bloom mask with one bit set per tag
pub fn bloom_fingerprint<I, S>(tags: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .fold(0u64, |mask, tag| mask | tag_bit(tag.as_ref()))
}

/// Whether a candidate with `mask` could carry every tag in `required`.
///
/// False positives are possible, false negatives are not.
pub fn bloom_may_contain(mask: u64, required: u64) -> bool {
    mask & required == required
}

/// Order-independent, content-addressed hash of a node and its sources.
///
/// `data` is serialized with sorted keys after stripping volatile access
/// counters, then the sorted source hashes are appended.
pub fn provenance_hash(data: &Value, source_hashes: &[String]) -> String {
    let canonical = strip_volatile(data).to_string();

    let mut sources: Vec<&str> = source_hashes.iter().map(String::as_str).collect();
    sources.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    for source in sources {
        hasher.update(source.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// serde_json's default map is a BTreeMap, so re-serializing already
/// yields sorted keys at every depth.
fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_volatile).collect()),
        other => other.clone(),
    }
}
