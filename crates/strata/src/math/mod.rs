//! Deterministic math shared by storage, scoring and search

pub mod hashing;
pub mod quantization;

pub use hashing::{bloom_fingerprint, bloom_may_contain, provenance_hash, stable_hash};
pub use quantization::{
    cosine_similarity, cosine_similarity_fixed, dequantize, dot_product_fixed, quantize,
};
