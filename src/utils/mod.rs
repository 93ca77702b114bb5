//! Utility functions for fake quantization.

pub mod precision;
pub mod tensor_ops;

pub use precision::{fake_quantize_bf16, fake_quantize_slice, to_bf16_truncated, truncate_bits};
pub use tensor_ops::{f32_to_bytes, tensor_to_f32};
