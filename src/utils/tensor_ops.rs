//! Tensor payload conversion operations.

use crate::core::types::{GgmlType, TensorRecord};
use crate::error::{FakeQuantError, Result};
use half::{bf16, f16};

/// Decode a tensor payload to f32 values. Only float encodings are supported.
pub fn tensor_to_f32(tensor: &TensorRecord) -> Result<Vec<f32>> {
    let bytes = &tensor.data;
    Ok(match tensor.dtype {
        GgmlType::F32 => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        GgmlType::F16 => bytes
            .chunks_exact(2)
            .map(|chunk| f16::from_bits(u16::from_le_bytes([chunk[0], chunk[1]])).to_f32())
            .collect(),
        GgmlType::BF16 => bytes
            .chunks_exact(2)
            .map(|chunk| bf16::from_bits(u16::from_le_bytes([chunk[0], chunk[1]])).to_f32())
            .collect(),
        other => {
            return Err(FakeQuantError::UnsupportedTensorType {
                tensor: tensor.name.clone(),
                dtype: other.to_string(),
            })
        }
    })
}

/// Little-endian F32 payload.
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
