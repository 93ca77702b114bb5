//! BF16 truncation held in F32 storage.
//!
//! BF16 shares the F32 sign and exponent fields, so a BF16 value is exactly
//! the high half of an F32 bit pattern. Clearing the low 16 bits therefore
//! simulates round-toward-zero conversion to BF16 while keeping F32 width.
//! The mask is applied to `f32::to_bits`, which is independent of host byte
//! order; payloads are decoded and encoded little-endian separately.

use half::bf16;

pub const TRUNCATION_MASK: u32 = 0xFFFF_0000;

#[inline]
pub fn truncate_bits(bits: u32) -> u32 {
    bits & TRUNCATION_MASK
}

/// The BF16 value `v` truncates to.
#[inline]
pub fn to_bf16_truncated(v: f32) -> bf16 {
    bf16::from_bits((v.to_bits() >> 16) as u16)
}

/// `v` with the low 16 mantissa bits cleared.
#[inline]
pub fn fake_quantize_bf16(v: f32) -> f32 {
    f32::from_bits(truncate_bits(v.to_bits()))
}

pub fn fake_quantize_slice(values: &[f32]) -> Vec<f32> {
    values.iter().map(|&v| fake_quantize_bf16(v)).collect()
}
