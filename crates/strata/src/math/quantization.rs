//! Q16.16 fixed-point vector math
//!
//! Similarity is computed entirely on integers so that two processes on
//! different platforms rank the same vectors identically.
//!
//! Range limits:
//! - components must lie in `[-32768.0, 32767.99998]` to fit an `i32`
//! - a product of two components is below `2^62`, so an `i128`
//!   accumulator cannot overflow for any vector up to [`MAX_DIMENSION`]

use crate::error::{Result, StrataError};

/// Fractional bits of the fixed-point representation
pub const FRACTIONAL_BITS: u32 = 16;

/// Scale factor (2^16)
pub const SCALE: f64 = (1u32 << FRACTIONAL_BITS) as f64;

/// Largest vector length accepted by [`quantize`]
pub const MAX_DIMENSION: usize = 65_536;

/// Convert a float vector to Q16.16.
///
/// Rounds half-to-even. Non-finite components are rejected rather than
/// clamped since they indicate corrupted upstream data.
pub fn quantize(vector: &[f32]) -> Result<Vec<i32>> {
    if vector.len() > MAX_DIMENSION {
        return Err(StrataError::Validation(format!(
            "vector dimension {} exceeds maximum {MAX_DIMENSION}",
            vector.len()
        )));
    }

    vector
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if !v.is_finite() {
                return Err(StrataError::Quantization(format!(
                    "non-finite component {v} at index {i}"
                )));
            }
            let scaled = (f64::from(v) * SCALE).round_ties_even();
            if scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
                return Err(StrataError::Quantization(format!(
                    "component {v} at index {i} outside Q16.16 range"
                )));
            }
            Ok(scaled as i32)
        })
        .collect()
}

/// Exact inverse scaling of [`quantize`]
pub fn dequantize(quantized: &[i32]) -> Vec<f32> {
    quantized
        .iter()
        .map(|&q| (f64::from(q) / SCALE) as f32)
        .collect()
}

/// Integer dot product of two Q16.16 vectors.
///
/// The result is in Q32.32 units.
pub fn dot_product_fixed(a: &[i32], b: &[i32]) -> Result<i128> {
    if a.len() != b.len() {
        return Err(StrataError::Validation(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    Ok(a
        .iter()
        .zip(b)
        .map(|(&x, &y)| i128::from(i64::from(x) * i64::from(y)))
        .sum())
}

/// Cosine similarity on Q16.16 vectors, clamped to `[-1, 1]`.
///
/// Zero-norm input yields 0.0.
pub fn cosine_similarity_fixed(a: &[i32], b: &[i32]) -> Result<f64> {
    let dot = dot_product_fixed(a, b)?;
    let norm_a = dot_product_fixed(a, a)?;
    let norm_b = dot_product_fixed(b, b)?;

    if norm_a == 0 || norm_b == 0 {
        return Ok(0.0);
    }

    // One isqrt over the product keeps precision for short vectors
    let denominator = match norm_a.checked_mul(norm_b) {
        Some(product) => product.isqrt(),
        None => norm_a.isqrt() * norm_b.isqrt(),
    };
    if denominator == 0 {
        return Ok(0.0);
    }

    Ok((dot as f64 / denominator as f64).clamp(-1.0, 1.0))
}

/// Quantize both float vectors and compare them with [`cosine_similarity_fixed`]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    cosine_similarity_fixed(&quantize(a)?, &quantize(b)?)
}
